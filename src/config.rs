use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::mirror::MirrorRule;

pub mod logging;
pub mod resolver;
pub mod server;
pub mod storage;


pub use logging::LoggingConfig;
pub use resolver::ResolverConfig;
pub use server::ServerConfig;
pub use storage::StorageConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Ordered mirror rules; the first rule whose origin occurs in a module
    /// path wins.
    #[serde(default)]
    pub mirrors: Vec<MirrorRule>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// File the configuration was read from; `None` when defaults were used
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let candidate = path.unwrap_or_else(|| PathBuf::from("artery.toml"));
        let mut config = if candidate.exists() {
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read config {}", candidate.display()))?;
            let mut config: Config = toml::from_str(&raw)
                .with_context(|| format!("invalid config {}", candidate.display()))?;
            config
                .storage
                .normalize_paths(candidate.parent().unwrap_or(Path::new(".")));
            config.source = Some(candidate);
            config
        } else {
            // Tracing is not up yet; callers report the missing file.
            let mut config = Config::default();
            let cwd = std::env::current_dir().context("reading current directory")?;
            config.storage.normalize_paths(&cwd);
            config
        };

        if config.storage.gopath.is_none() {
            config.storage.gopath = storage::gopath_from_env(std::env::var_os("GOPATH"));
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.gopath.is_none() {
            bail!("no GOPATH configured: set storage.gopath or the GOPATH environment variable");
        }
        if self.server.workers == 0 {
            bail!("server.workers must be at least 1");
        }
        if self.resolver.command.trim().is_empty() {
            bail!("resolver.command must not be empty");
        }
        if self.resolver.max_stderr_bytes == 0 {
            bail!("resolver.max_stderr_bytes must be positive");
        }
        if let Some(idx) = self.mirrors.iter().position(|rule| rule.origin.is_empty()) {
            bail!("mirror rule #{} has an empty origin", idx + 1);
        }
        Ok(())
    }
}
