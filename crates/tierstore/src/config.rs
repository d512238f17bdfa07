//! Disk store configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default root directory for a disk store
pub const DEFAULT_ROOT: &str = "cache-disk";

/// Where a [`DiskStore`](crate::DiskStore) keeps its files
///
/// Layout:
/// ```text
/// <root>/<meta_file>    {"first":..,"last":..,"size":..}
/// <root>/<data_dir>/    one file per entry, named by `codec::encode`
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Root directory
    pub root: PathBuf,
    /// Entry directory name under `root`
    pub data_dir: String,
    /// Metadata file name under `root`
    pub meta_file: String,
}

impl DiskConfig {
    /// Config rooted at `root` with default file names
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Full path of the entry directory
    pub fn data_path(&self) -> PathBuf {
        self.root.join(&self.data_dir)
    }

    /// Full path of the metadata file
    pub fn meta_path(&self) -> PathBuf {
        self.root.join(&self.meta_file)
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            data_dir: "data".to_string(),
            meta_file: "metafile".to_string(),
        }
    }
}
