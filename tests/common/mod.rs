mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from detectbatch for tests
pub use detectbatch::{
    AssetSet, AssetStatus, BoundingBox, CancelFlag, Detection, DetectionOrchestrator,
    DetectError, RunConfig, RunEvent, RunState,
};
