//! Drives one detection run from asset selection to finished output directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::aggregate::{ResultAggregator, RunSummary};
use crate::annotate::{AnnotationStyle, annotate};
use crate::assets::AssetSet;
use crate::capability::DetectionCapability;
use crate::config::RunConfig;
use crate::error::{DetectError, Result};
use crate::models::{AssetStatus, DetectionResult, IndexedResult};
use crate::output::{self, OutputWriter};
use crate::progress::{LogLevel, Progress, ProgressReporter, RunEvent};

/// Lifecycle of a run.
///
/// `Idle → Loading → Running → Finalizing → Completed`. `Failed` is only
/// reachable while loading, which covers creating the run directory;
/// `Cancelled` only while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Loading,
    Running,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }
}

/// Cooperative cancellation, checked once per asset
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub state: RunState,
    pub summary: RunSummary,
    pub output_dir: PathBuf,
    pub plots: Vec<PathBuf>,
}

/// Hands out results strictly by index, holding back any that arrive early
#[derive(Debug, Default)]
pub(crate) struct ReorderBuffer {
    pending: BTreeMap<usize, DetectionResult>,
}

impl ReorderBuffer {
    /// The result for `index`, pulling from `source` until it shows up.
    /// `None` once the source is exhausted without producing it.
    pub(crate) fn take<I>(&mut self, index: usize, source: &mut I) -> Option<DetectionResult>
    where
        I: Iterator<Item = IndexedResult> + ?Sized,
    {
        if let Some(result) = self.pending.remove(&index) {
            return Some(result);
        }
        while let Some(item) = source.next() {
            if item.index == index {
                return Some(item.result);
            }
            if item.index < index {
                debug!("dropping late result for index {}", item.index);
                continue;
            }
            self.pending.insert(item.index, item.result);
        }
        None
    }

    pub(crate) fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Clears the in-progress flag when a run ends, however it ends
struct ActiveRun<'a>(&'a AtomicBool);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DetectionOrchestrator<D, R> {
    capability: D,
    reporter: R,
    results_root: PathBuf,
    state: Mutex<RunState>,
    active: AtomicBool,
    cancel: CancelFlag,
}

impl<D, R> DetectionOrchestrator<D, R>
where
    D: DetectionCapability,
    R: ProgressReporter,
{
    pub fn new(capability: D, reporter: R, results_root: impl Into<PathBuf>) -> Self {
        Self {
            capability,
            reporter,
            results_root: results_root.into(),
            state: Mutex::new(RunState::Idle),
            active: AtomicBool::new(false),
            cancel: CancelFlag::default(),
        }
    }

    /// Share a cancel flag created elsewhere, e.g. by a UI's stop button
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle for cancelling the run in flight
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn capability(&self) -> &D {
        &self.capability
    }

    /// Process every asset in `assets` with the model and options in `config`.
    ///
    /// Fatal errors come back as `Err` before any output directory exists.
    /// Per-asset failures are counted in the returned summary instead.
    pub async fn run(&self, assets: &AssetSet, config: &RunConfig) -> Result<RunOutcome> {
        let _active = self.begin()?;
        config.validate()?;

        let snapshot = assets.snapshot();
        if snapshot.is_empty() {
            return Err(DetectError::EmptyAssetSet);
        }
        let total = snapshot.len();
        self.cancel.reset();

        self.set_state(RunState::Loading);
        info!("loading model {}", config.model_identifier);
        let handle = match self.capability.load(&config.model_identifier) {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(e, total)),
        };

        let writer = match OutputWriter::create_fresh_run_directory(&self.results_root, output::now()) {
            Ok(writer) => writer,
            Err(e) => return Err(self.fail(e, total)),
        };

        self.set_state(RunState::Running);
        info!("running detection on {} assets into {}", total, writer.run_dir().display());
        self.progress(RunState::Running, 0, total, None, None, None);

        let mut aggregator = ResultAggregator::new(total);
        let style = AnnotationStyle::new(config.hide_labels, config.hide_confidence);
        let mut reorder = ReorderBuffer::default();
        let mut results = self.capability.infer(&handle, &snapshot);

        for (i, asset) in snapshot.iter().enumerate() {
            let result = reorder
                .take(i, &mut results)
                .unwrap_or_else(|| DetectionResult::failed(asset, "no result produced"));

            let message = match &result.status {
                AssetStatus::Success => {
                    aggregator.mark_success();
                    aggregator.record(asset, &result.detections);
                    if !self.write_outputs(&writer, &result, config, style) {
                        aggregator.mark_degraded(asset);
                    }
                    ResultAggregator::summary_text(&result.detections)
                }
                AssetStatus::Failed(reason) => {
                    aggregator.mark_failed();
                    warn!("{}: {}", asset.display(), reason);
                    self.log(LogLevel::Warn, format!("{}: {}", asset.display(), reason));
                    reason.clone()
                }
            };

            self.progress(
                RunState::Running,
                i + 1,
                total,
                Some(asset.clone()),
                Some(result.status),
                Some(message),
            );

            tokio::task::yield_now().await;

            if self.cancel.is_cancelled() {
                info!("run cancelled after {} of {} assets", i + 1, total);
                self.set_state(RunState::Cancelled);
                self.progress(
                    RunState::Cancelled,
                    i + 1,
                    total,
                    None,
                    None,
                    Some(format!("cancelled after {} of {} assets", i + 1, total)),
                );
                return Ok(RunOutcome {
                    state: RunState::Cancelled,
                    summary: aggregator.into_summary(),
                    output_dir: writer.run_dir().to_path_buf(),
                    plots: Vec::new(),
                });
            }
        }
        drop(results);
        if reorder.buffered() > 0 {
            debug!("discarding {} results for unknown assets", reorder.buffered());
        }

        self.set_state(RunState::Finalizing);
        let mut plots = Vec::new();
        if config.save_plots {
            let report = aggregator.finalize(writer.run_dir());
            for e in report.errors {
                warn!("{e}");
                self.log(LogLevel::Warn, e.to_string());
            }
            plots = report.written;
        }

        self.set_state(RunState::Completed);
        let summary = aggregator.into_summary();
        let message = format!(
            "{} of {} succeeded, {} failed, {} detections",
            summary.succeeded,
            summary.total,
            summary.failed,
            summary.detection_count()
        );
        info!("{message}");
        self.progress(RunState::Completed, total, total, None, None, Some(message));

        let output_dir = writer.run_dir().to_path_buf();
        if config.auto_open_output {
            self.reporter.report(RunEvent::RevealOutput(output_dir.clone()));
        }

        Ok(RunOutcome {
            state: RunState::Completed,
            summary,
            output_dir,
            plots,
        })
    }

    fn begin(&self) -> Result<ActiveRun<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DetectError::RunAlreadyInProgress)?;
        Ok(ActiveRun(&self.active))
    }

    fn fail(&self, err: DetectError, total: usize) -> DetectError {
        error!("{err}");
        self.set_state(RunState::Failed);
        self.progress(RunState::Failed, 0, total, None, None, Some(err.to_string()));
        err
    }

    /// Annotated image, labels and crops for one asset. Returns false when
    /// any of them could not be written.
    fn write_outputs(
        &self,
        writer: &OutputWriter,
        result: &DetectionResult,
        config: &RunConfig,
        style: AnnotationStyle,
    ) -> bool {
        let path: &Path = result.path();
        let image = match image::open(path) {
            Ok(image) => image,
            Err(e) => {
                self.output_error(DetectError::output_write(writer.annotated_path(path), e));
                return false;
            }
        };

        let mut ok = true;
        let rendered = annotate(&image, &result.detections, style);
        if let Err(e) = writer.write_annotated_image(path, &rendered) {
            self.output_error(e);
            ok = false;
        }

        if config.save_labels && !result.detections.is_empty() {
            let size = result.image_size.unwrap_or((image.width(), image.height()));
            if let Err(e) = writer.write_labels(path, &result.detections, size, config.save_confidence) {
                self.output_error(e);
                ok = false;
            }
        }

        if config.save_crops && !result.detections.is_empty() {
            let report = writer.write_crops(path, &image, &result.detections);
            ok &= report.is_complete();
            for e in report.errors {
                self.output_error(e);
            }
        }

        ok
    }

    fn output_error(&self, err: DetectError) {
        warn!("{err}");
        self.log(LogLevel::Warn, err.to_string());
    }

    fn set_state(&self, state: RunState) {
        debug!("run state -> {:?}", state);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn log(&self, level: LogLevel, message: String) {
        self.reporter.report(RunEvent::Log { level, message });
    }

    fn progress(
        &self,
        phase: RunState,
        index: usize,
        total: usize,
        asset_path: Option<PathBuf>,
        status: Option<AssetStatus>,
        message: Option<String>,
    ) {
        self.reporter.report(RunEvent::Progress(Progress {
            phase,
            index,
            total,
            asset_path,
            status,
            message,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(index: usize) -> IndexedResult {
        IndexedResult {
            index,
            result: DetectionResult::failed(format!("{index}.png"), "x"),
        }
    }

    #[test]
    fn reorder_buffer_restores_request_order() {
        let mut source = vec![indexed(2), indexed(0), indexed(1)].into_iter();
        let mut buffer = ReorderBuffer::default();

        let order: Vec<PathBuf> = (0..3)
            .filter_map(|i| buffer.take(i, &mut source))
            .map(|r| r.asset_path)
            .collect();

        assert_eq!(
            order,
            vec![PathBuf::from("0.png"), PathBuf::from("1.png"), PathBuf::from("2.png")]
        );
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn reorder_buffer_reports_missing_results() {
        let mut source = vec![indexed(1)].into_iter();
        let mut buffer = ReorderBuffer::default();

        assert!(buffer.take(0, &mut source).is_none());
        assert!(buffer.take(1, &mut source).is_some());
    }
}
