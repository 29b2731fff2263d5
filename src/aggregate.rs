use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::DetectError;
use crate::models::Detection;
use crate::plots;

pub const PLOTS_DIR: &str = "plots";
pub const CONFIDENCE_PLOT: &str = "confidence_distribution.png";
pub const CLASS_PLOT: &str = "class_distribution.png";
const CONFIDENCE_BINS: usize = 10;

/// Statistics for one run. Only ever grows while the run is in progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Assets whose detection succeeded but whose outputs could not be written
    pub degraded: Vec<PathBuf>,
    pub class_counts: BTreeMap<String, usize>,
    pub confidences: Vec<f32>,
}

impl RunSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn detection_count(&self) -> usize {
        self.confidences.len()
    }

    pub fn mean_confidence(&self) -> Option<f32> {
        if self.confidences.is_empty() {
            return None;
        }
        Some(self.confidences.iter().sum::<f32>() / self.confidences.len() as f32)
    }

    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0 || !self.degraded.is_empty()
    }
}

/// Plot files written by [`ResultAggregator::finalize`], and what went wrong
#[derive(Debug, Default)]
pub struct PlotReport {
    pub written: Vec<PathBuf>,
    pub errors: Vec<DetectError>,
}

/// Accumulates per-image detections into a [`RunSummary`]
#[derive(Debug, Default)]
pub struct ResultAggregator {
    summary: RunSummary,
}

impl ResultAggregator {
    pub fn new(total: usize) -> Self {
        Self {
            summary: RunSummary::new(total),
        }
    }

    /// Add one successful image's detections to the running totals
    pub fn record(&mut self, asset_path: &Path, detections: &[Detection]) {
        debug!("recording {} detections for {}", detections.len(), asset_path.display());
        for detection in detections {
            *self
                .summary
                .class_counts
                .entry(detection.class_name.clone())
                .or_insert(0) += 1;
            self.summary.confidences.push(detection.confidence);
        }
    }

    pub fn mark_success(&mut self) {
        self.summary.succeeded += 1;
    }

    pub fn mark_failed(&mut self) {
        self.summary.failed += 1;
    }

    pub fn mark_degraded(&mut self, asset_path: &Path) {
        if !self.summary.degraded.iter().any(|p| p == asset_path) {
            self.summary.degraded.push(asset_path.to_path_buf());
        }
    }

    /// One-line digest such as `"3 persons, 1 car"`; empty when nothing was found
    pub fn summary_text(detections: &[Detection]) -> String {
        let mut per_class: BTreeMap<(usize, &str), usize> = BTreeMap::new();
        for detection in detections {
            *per_class
                .entry((detection.class_id, detection.class_name.as_str()))
                .or_insert(0) += 1;
        }

        per_class
            .into_iter()
            .map(|((_, name), count)| {
                let plural = if count > 1 { "s" } else { "" };
                format!("{count} {name}{plural}")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render the confidence histogram and the class bar chart under
    /// `<output_dir>/plots`. Failures are collected, never raised.
    pub fn finalize(&self, output_dir: &Path) -> PlotReport {
        let plots_dir = output_dir.join(PLOTS_DIR);
        let mut report = PlotReport::default();

        let confidence_path = plots_dir.join(CONFIDENCE_PLOT);
        match plots::render_histogram(&self.summary.confidences, CONFIDENCE_BINS, &confidence_path) {
            Ok(()) => report.written.push(confidence_path),
            Err(e) => report.errors.push(e),
        }

        let class_path = plots_dir.join(CLASS_PLOT);
        let entries: Vec<(&str, usize)> = self
            .summary
            .class_counts
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        match plots::render_bar_chart(&entries, &class_path) {
            Ok(()) => report.written.push(class_path),
            Err(e) => report.errors.push(e),
        }

        report
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }
}
