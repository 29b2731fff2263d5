//! Run events and the sinks that receive them.
//!
//! The orchestrator never reads these events back; they exist for whatever
//! presentation layer is attached (terminal output, logs, a GUI).

use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::models::AssetStatus;
use crate::orchestrator::RunState;

/// Positional progress. A completed run over N assets emits N + 2 of these:
/// index 0 at start, 1..=N per asset, and N again on completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub phase: RunState,
    pub index: usize,
    pub total: usize,
    pub asset_path: Option<PathBuf>,
    pub status: Option<AssetStatus>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Progress(Progress),
    Log { level: LogLevel, message: String },
    /// Ask the presentation layer to show the run directory to the user
    RevealOutput(PathBuf),
}

impl RunEvent {
    pub fn as_progress(&self) -> Option<&Progress> {
        match self {
            RunEvent::Progress(progress) => Some(progress),
            _ => None,
        }
    }
}

/// Sink for run events
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: RunEvent);
}

impl<F> ProgressReporter for F
where
    F: Fn(RunEvent) + Send + Sync,
{
    fn report(&self, event: RunEvent) {
        self(event)
    }
}

/// Forwards events to an async consumer, typically a UI task
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: UnboundedSender<RunEvent>,
}

impl ChannelReporter {
    pub fn new(sender: UnboundedSender<RunEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: RunEvent) {
        // A closed receiver just means nobody is watching any more.
        let _ = self.sender.send(event);
    }
}

/// Writes every event to the `tracing` log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: RunEvent) {
        match event {
            RunEvent::Progress(p) => {
                let asset = p
                    .asset_path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default();
                let message = p.message.unwrap_or_default();
                info!(phase = ?p.phase, "[{}/{}] {} {}", p.index, p.total, asset, message);
            }
            RunEvent::Log { level, message } => match level {
                LogLevel::Debug => debug!("{message}"),
                LogLevel::Info => info!("{message}"),
                LogLevel::Warn => warn!("{message}"),
                LogLevel::Error => error!("{message}"),
            },
            RunEvent::RevealOutput(dir) => info!("results in {}", dir.display()),
        }
    }
}
