//! Campaign directory snapshots
//!
//! A [`CampaignDirectory`] is an immutable picture of one campaign taken at
//! scan time: the top-level entry names, the file extensions present, and
//! the marker flags the classifier rules consume. A snapshot is never
//! mutated; the next scan takes a fresh one and compares it to the old.

use crate::config::MarkerConfig;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Immutable structural snapshot of one campaign directory.
///
/// All marker flags are resolved against the [`MarkerConfig`] at snapshot
/// time so classification stays a pure function of this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignDirectory {
    /// Campaign name, derived from the directory's path segment
    pub name: String,
    /// Absolute path of the campaign directory
    pub path: PathBuf,
    /// Top-level entry names (files and directories)
    pub entries: BTreeSet<String>,
    /// Lowercased extensions of top-level files
    pub extensions: BTreeSet<String>,
    /// First configured entry-point script found at the top level
    pub top_level_entry_point: Option<String>,
    /// Number of top-level files (directories excluded)
    pub file_count: usize,
    /// Number of top-level files with a server-side script extension
    pub dynamic_file_count: usize,
    /// The top-level entry point carries a dynamic extension
    pub entry_point_is_dynamic: bool,
    /// `public/<entry point>` exists
    pub has_public_entry_point: bool,
    /// A configured framework directory (`routes/`, `app/`, ...) exists
    pub has_framework_dir: bool,
    /// A configured dependency manifest (`composer.json`, ...) exists
    pub has_manifest: bool,
}

impl CampaignDirectory {
    /// Take a snapshot of the directory at `path`.
    ///
    /// This is the only I/O in the classification pipeline. An unreadable
    /// directory surfaces as an `io::Error` that the scan controller
    /// reports as a per-campaign failure.
    pub fn snapshot(path: &Path, markers: &MarkerConfig) -> io::Result<CampaignDirectory> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("campaign path has no final segment: {}", path.display()),
                )
            })?;

        let mut entries = BTreeSet::new();
        let mut extensions = BTreeSet::new();
        let mut file_count = 0;
        let mut dynamic_file_count = 0;
        let mut has_framework_dir = false;
        let mut has_manifest = false;
        let mut public_dir: Option<PathBuf> = None;

        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let entry_name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                if markers.is_framework_dir(&entry_name) {
                    has_framework_dir = true;
                }
                if entry_name == markers.public_dir {
                    public_dir = Some(entry.path());
                }
            } else {
                file_count += 1;
                if markers.is_manifest(&entry_name) {
                    has_manifest = true;
                }
                if let Some(ext) = extension_of(&entry_name) {
                    if markers.is_dynamic_extension(&ext) {
                        dynamic_file_count += 1;
                    }
                    extensions.insert(ext);
                }
            }

            entries.insert(entry_name);
        }

        // Lookup order of markers.entry_points decides which one wins
        let top_level_entry_point = markers
            .entry_points
            .iter()
            .find(|e| entries.contains(e.as_str()))
            .cloned();

        let entry_point_is_dynamic = top_level_entry_point
            .as_deref()
            .and_then(extension_of)
            .map(|ext| markers.is_dynamic_extension(&ext))
            .unwrap_or(false);

        let has_public_entry_point = match public_dir {
            Some(dir) => markers
                .entry_points
                .iter()
                .any(|e| dir.join(e).is_file()),
            None => false,
        };

        Ok(CampaignDirectory {
            name,
            path: path.to_path_buf(),
            entries,
            extensions,
            top_level_entry_point,
            file_count,
            dynamic_file_count,
            entry_point_is_dynamic,
            has_public_entry_point,
            has_framework_dir,
            has_manifest,
        })
    }

    /// True when the snapshot saw no entries at all
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lowercased extension of a file name, if any
fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}
