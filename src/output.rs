use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use time::{Duration, OffsetDateTime};
use time::macros::format_description;
use tracing::debug;

use crate::error::{DetectError, Result};
use crate::models::Detection;

pub const RUN_DIR_PREFIX: &str = "detection_";
pub const LABELS_DIR: &str = "labels";
pub const CROPS_DIR: &str = "crops";
const FALLBACK_EXTENSION: &str = "jpg";
/// Upper bound on seconds skipped while looking for an unused run directory
const MAX_RUN_DIR_ATTEMPTS: u32 = 3600;

/// `YYYYMMDDHHMMSS` of `now`, in the offset it carries
pub fn run_timestamp(now: OffsetDateTime) -> String {
    let format = format_description!("[year][month][day][hour][minute][second]");
    now.format(&format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Local time, or UTC when the local offset is unknown
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn run_dir_path(results_root: &Path, timestamp: &str) -> PathBuf {
    results_root.join(format!("{RUN_DIR_PREFIX}{timestamp}"))
}

/// Crops written by [`OutputWriter::write_crops`] and the ones that failed
#[derive(Debug, Default)]
pub struct CropReport {
    pub written: Vec<PathBuf>,
    pub errors: Vec<DetectError>,
}

impl CropReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Writes the artifacts of one run into its `detection_<timestamp>` directory.
///
/// Output names are derived from the asset's file stem only, so two assets
/// with the same stem in different folders overwrite each other.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    run_dir: PathBuf,
}

impl OutputWriter {
    /// Create `<results_root>/detection_<timestamp>`. Succeeds when the
    /// directory already exists and leaves its contents alone.
    pub fn ensure_run_directory(results_root: &Path, timestamp: &str) -> Result<Self> {
        let run_dir = run_dir_path(results_root, timestamp);
        std::fs::create_dir_all(&run_dir).map_err(|e| DetectError::output_write(&run_dir, e))?;
        debug!("run directory ready at {}", run_dir.display());
        Ok(Self { run_dir })
    }

    /// Create a run directory no earlier run has used. Starts at `started`
    /// and moves forward one second past every directory that already exists.
    pub fn create_fresh_run_directory(results_root: &Path, started: OffsetDateTime) -> Result<Self> {
        let mut at = started;
        for _ in 0..MAX_RUN_DIR_ATTEMPTS {
            let timestamp = run_timestamp(at);
            if !run_dir_path(results_root, &timestamp).exists() {
                return Self::ensure_run_directory(results_root, &timestamp);
            }
            debug!("run directory for {timestamp} is taken");
            at += Duration::SECOND;
        }
        Err(DetectError::output_write(
            run_dir_path(results_root, &run_timestamp(started)),
            "no unused run directory name left",
        ))
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn annotated_path(&self, asset_path: &Path) -> PathBuf {
        let (stem, ext) = stem_and_extension(asset_path);
        self.run_dir.join(format!("{stem}_detected.{ext}"))
    }

    pub fn labels_path(&self, asset_path: &Path) -> PathBuf {
        let (stem, _) = stem_and_extension(asset_path);
        self.run_dir.join(LABELS_DIR).join(format!("{stem}.txt"))
    }

    /// Save `<stem>_detected.<ext>` in the run directory
    pub fn write_annotated_image(&self, asset_path: &Path, rendered: &DynamicImage) -> Result<PathBuf> {
        let path = self.annotated_path(asset_path);
        rendered
            .save(&path)
            .map_err(|e| DetectError::output_write(&path, e))?;
        Ok(path)
    }

    /// Save `labels/<stem>.txt` with one `class cx cy w h [conf]` line per
    /// detection, coordinates normalized by the image size
    pub fn write_labels(
        &self,
        asset_path: &Path,
        detections: &[Detection],
        image_size: (u32, u32),
        include_confidence: bool,
    ) -> Result<PathBuf> {
        let path = self.labels_path(asset_path);
        let contents = format_labels(detections, image_size, include_confidence);
        write_creating_parent(&path, contents.as_bytes())?;
        Ok(path)
    }

    /// Save one cropped image per detection as `crops/<class>/<stem>_<n>.<ext>`,
    /// numbering from 1 per class within this asset. A failed crop does not
    /// stop the others.
    pub fn write_crops(&self, asset_path: &Path, image: &DynamicImage, detections: &[Detection]) -> CropReport {
        let (stem, ext) = stem_and_extension(asset_path);
        let mut per_class: HashMap<&str, usize> = HashMap::new();
        let mut report = CropReport::default();

        for detection in detections {
            let n = per_class.entry(detection.class_name.as_str()).or_insert(0);
            *n += 1;

            let Some(bbox) = detection.bbox.clamped(image.width(), image.height()) else {
                debug!("skipping crop outside image bounds for {}", asset_path.display());
                continue;
            };

            let class_dir = self.run_dir.join(CROPS_DIR).join(path_component(&detection.class_name));
            let path = class_dir.join(format!("{stem}_{n}.{ext}"));
            let saved = std::fs::create_dir_all(&class_dir)
                .map_err(|e| DetectError::output_write(&class_dir, e))
                .and_then(|()| {
                    image
                        .crop_imm(bbox.x, bbox.y, bbox.width, bbox.height)
                        .save(&path)
                        .map_err(|e| DetectError::output_write(&path, e))
                });
            match saved {
                Ok(()) => report.written.push(path),
                Err(e) => report.errors.push(e),
            }
        }

        report
    }
}

pub fn format_labels(detections: &[Detection], (width, height): (u32, u32), include_confidence: bool) -> String {
    let mut out = String::new();
    for detection in detections {
        let (cx, cy, w, h) = detection.bbox.normalized(width, height);
        let _ = write!(out, "{} {cx:.6} {cy:.6} {w:.6} {h:.6}", detection.class_id);
        if include_confidence {
            let _ = write!(out, " {:.6}", detection.confidence);
        }
        out.push('\n');
    }
    out
}

fn stem_and_extension(asset_path: &Path) -> (String, String) {
    let stem = asset_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".to_string());
    let ext = asset_path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
    (stem, ext)
}

/// Class name usable as a single directory name below `crops/`
fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn write_creating_parent(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DetectError::output_write(parent, e))?;
    }
    std::fs::write(path, contents).map_err(|e| DetectError::output_write(path, e))
}
