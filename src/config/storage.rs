use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use artery_adapter::LinkMode;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Module workspace shared with the resolution backend. Falls back to
    /// the first entry of `$GOPATH` when unset.
    #[serde(default)]
    pub gopath: Option<PathBuf>,
    /// How mirrored module directories are aliased under their requested path.
    #[serde(default)]
    pub link_mode: LinkMode,
}

impl StorageConfig {
    pub fn normalize_paths(&mut self, base_dir: &Path) {
        if let Some(path) = self.gopath.as_mut()
            && path.is_relative()
        {
            *path = base_dir.join(&*path);
        }
    }

    pub fn gopath(&self) -> Result<&Path> {
        self.gopath
            .as_deref()
            .ok_or_else(|| anyhow!("GOPATH is not configured"))
    }

    /// Root of the module download cache served to clients:
    /// `<gopath>/pkg/mod/cache/download`.
    pub fn download_dir(&self) -> Result<PathBuf> {
        Ok(self
            .gopath()?
            .join("pkg")
            .join("mod")
            .join("cache")
            .join("download"))
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        if let Some(gopath) = &self.gopath {
            std::fs::create_dir_all(gopath)?;
        }
        Ok(())
    }
}

/// Picks the first non-empty entry of a `GOPATH`-style list.
pub fn gopath_from_env(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    std::env::split_paths(&value).find(|path| !path.as_os_str().is_empty())
}
