//! Local copies of sub-assets, one flat directory keyed by the url basename.

use bytes::Bytes;
use courier_core::model::SubAsset;
use courier_utils::write_atomic;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use tokio::{fs::metadata, task::spawn_blocking};

use crate::{error, utils::filename_from_url, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    Written(PathBuf),
    /// A previous copy was there and `force` was not set.
    Kept(PathBuf),
}

impl CacheOutcome {
    pub fn into_path(self) -> PathBuf {
        match self {
            CacheOutcome::Written(p) | CacheOutcome::Kept(p) => p,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssetCache {
    root: PathBuf,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, asset: &SubAsset) -> Result<PathBuf> {
        Ok(self.root.join(filename_from_url(&asset.download_url)?))
    }

    /// Assets of hidden creators never count as cached.
    pub async fn has_cached(&self, asset: &SubAsset) -> bool {
        if !asset.public {
            return false;
        }
        match self.path_for(asset) {
            Ok(path) => file_exists(&path).await,
            Err(_) => false,
        }
    }

    /// Replace whatever is at `path` with `data` in one step.
    pub async fn store(&self, path: PathBuf, data: Bytes) -> Result<()> {
        spawn_blocking(move || write_atomic(&path, &data))
            .await
            .context(error::Join)?
            .context(error::Utils)
    }
}

async fn file_exists(path: impl AsRef<Path>) -> bool {
    match metadata(path).await {
        Ok(m) => m.is_file(),
        Err(_) => false,
    }
}
