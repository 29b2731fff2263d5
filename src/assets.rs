use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{DetectError, Result};

/// Extensions picked up by folder scans, compared case-insensitively
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// What happened to each path handed to [`AssetSet::add_files`]
#[derive(Debug, Default)]
pub struct AddReport {
    pub added: usize,
    pub duplicates: usize,
    pub rejected: Vec<DetectError>,
}

impl AddReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Ordered, deduplicated selection of input images.
///
/// Insertion order is kept so progress numbering is stable across runs over
/// the same selection. A run borrows the set immutably for its whole
/// lifetime, so it cannot be mutated while a run is active.
#[derive(Debug, Clone, Default)]
pub struct AssetSet {
    paths: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

impl AssetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append each path that is not already present.
    ///
    /// Paths that do not exist or are not regular files are rejected one by
    /// one and listed in the report; the rest of the batch still goes in.
    pub fn add_files<I, P>(&mut self, paths: I) -> AddReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut report = AddReport::default();

        for path in paths {
            let path = path.as_ref();
            let absolute = match std::path::absolute(path) {
                Ok(absolute) => absolute,
                Err(e) => {
                    report.rejected.push(DetectError::InvalidAsset {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if !absolute.is_file() {
                let reason = if absolute.exists() {
                    "not a regular file"
                } else {
                    "file does not exist"
                };
                report.rejected.push(DetectError::InvalidAsset {
                    path: absolute,
                    reason: reason.to_string(),
                });
                continue;
            }

            if self.seen.insert(absolute.clone()) {
                self.paths.push(absolute);
                report.added += 1;
            } else {
                report.duplicates += 1;
            }
        }

        report
    }

    /// Add every image below `folder`, recursing into subdirectories.
    ///
    /// Matches are sorted by full path before merging so the resulting order
    /// does not depend on directory enumeration order. Fails with
    /// `EmptySelection` and leaves the set untouched when nothing matches.
    pub fn add_folder(&mut self, folder: impl AsRef<Path>) -> Result<AddReport> {
        let folder = folder.as_ref();
        let root = std::path::absolute(folder).map_err(|e| DetectError::InvalidAsset {
            path: folder.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !root.is_dir() {
            return Err(DetectError::InvalidAsset {
                path: root,
                reason: "not a directory".to_string(),
            });
        }

        let mut found: Vec<PathBuf> = WalkDir::new(&root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("skipping unreadable entry under {}: {}", root.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| has_image_extension(path))
            .collect();

        if found.is_empty() {
            return Err(DetectError::EmptySelection { folder: root });
        }

        found.sort();
        debug!("found {} images under {}", found.len(), root.display());
        Ok(self.add_files(found))
    }

    pub fn clear(&mut self) {
        self.paths.clear();
        self.seen.clear();
    }

    /// Copy of the current selection, in insertion order
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.paths.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        std::path::absolute(path.as_ref())
            .map(|p| self.seen.contains(&p))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            IMAGE_EXTENSIONS.iter().any(|candidate| *candidate == lower)
        })
        .unwrap_or(false)
}
