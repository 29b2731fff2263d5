pub mod aggregate;
pub mod annotate;
pub mod assets;
pub mod capability;
pub mod config;
pub mod detection;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod plots;
pub mod preferences;
pub mod progress;

pub use aggregate::{ResultAggregator, RunSummary};
pub use assets::{AddReport, AssetSet};
pub use capability::{DetectionCapability, ModelStore};
pub use config::{AppConfig, RunConfig};
pub use detection::{ContourDetector, ModelManifest};
pub use error::DetectError;
pub use models::{AssetStatus, BoundingBox, Detection, DetectionResult, IndexedResult};
pub use orchestrator::{CancelFlag, DetectionOrchestrator, RunOutcome, RunState};
pub use output::OutputWriter;
pub use preferences::{MemoryPreferences, PreferenceStore, TomlPreferences};
pub use progress::{ChannelReporter, LogLevel, Progress, ProgressReporter, RunEvent, TracingReporter};
