use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use path_clean::PathClean;
use serde::Deserialize;
use tokio::fs::{self, File};

// Retry configuration constants
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_MS: u64 = 100;

/// How a mirrored module directory is aliased under its requested path.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// Hard filesystem link, the historical goproxy behaviour. Directories
    /// cannot be hard linked on Linux or macOS, so this alias never lands there.
    #[default]
    Hard,
    Symlink,
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkMode::Hard => write!(f, "hard"),
            LinkMode::Symlink => write!(f, "symlink"),
        }
    }
}

/// Read-mostly view over the module download cache.
#[derive(Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: PathBuf) -> Self {
        FilesystemStorage { root }
    }

    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating storage root {}", self.root.display()))
    }

    /// Joins a request path onto the root. The path is cleaned as if it were
    /// absolute first, so `..` segments can never climb above the root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        let cleaned = Path::new("/").join(relative).clean();
        match cleaned.strip_prefix("/") {
            Ok(inner) => self.root.join(inner),
            Err(_) => self.root.clone(),
        }
    }

    pub async fn exists(&self, relative: &str) -> bool {
        fs::metadata(self.resolve(relative)).await.is_ok()
    }

    /// Opens a cached regular file. Missing files and directories yield `None`.
    pub async fn open_read(&self, relative: &str) -> Result<Option<FileHandle>> {
        let path = self.resolve(relative);

        let mut attempt = 0;
        let file = loop {
            attempt += 1;
            match File::open(&path).await {
                Ok(file) => break file,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) if should_retry(&e) && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(
                        "open_read attempt {}/{} failed with {:?}, retrying in {}ms: {}",
                        attempt,
                        MAX_ATTEMPTS,
                        e.kind(),
                        BACKOFF_MS,
                        path.display()
                    );
                    tokio::time::sleep(Duration::from_millis(BACKOFF_MS)).await;
                    continue;
                }
                Err(e) => {
                    return Err(anyhow::Error::from(e).context(format!(
                        "opening cached file {} (after {} attempts)",
                        path.display(),
                        attempt
                    )));
                }
            }
        };

        let metadata = file
            .metadata()
            .await
            .with_context(|| format!("reading metadata {}", path.display()))?;
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(FileHandle {
            file,
            size: metadata.len(),
            path,
        }))
    }

    /// Makes `alias` point at the same directory as `target`, both relative to
    /// the root. The alias parent is created on demand; an existing alias is
    /// reported as an error and left untouched.
    pub async fn link_dir(&self, target: &str, alias: &str, mode: LinkMode) -> Result<()> {
        let source = self.resolve(target);
        let dest = self.resolve(alias);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating alias parent {}", parent.display()))?;
        }

        let result = match mode {
            LinkMode::Hard => fs::hard_link(&source, &dest).await,
            LinkMode::Symlink => symlink_dir(&source, &dest).await,
        };

        result.with_context(|| {
            format!(
                "linking {} -> {} ({mode})",
                source.display(),
                dest.display()
            )
        })
    }
}

pub struct FileHandle {
    pub file: File,
    pub size: u64,
    pub path: PathBuf,
}

#[cfg(unix)]
async fn symlink_dir(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs::symlink(source, dest).await
}

#[cfg(windows)]
async fn symlink_dir(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs::symlink_dir(source, dest).await
}

/// Determines if an I/O error should be retried
fn should_retry(error: &std::io::Error) -> bool {
    matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
        || matches!(error.raw_os_error(), Some(16) | Some(11))
    // 16 = EBUSY (Device or resource busy)
    // 11 = EAGAIN (Resource temporarily unavailable)
}
