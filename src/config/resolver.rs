use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Executable of the resolution backend
    #[serde(default = "ResolverConfig::default_command")]
    pub command: String,
    /// Arguments placed before the `<module>@<version>` target
    #[serde(default = "ResolverConfig::default_args")]
    pub args: Vec<String>,
    /// Upper bound for a single backend run (seconds)
    #[serde(default = "ResolverConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bytes of stderr kept for parsing and logging; the rest is drained
    #[serde(default = "ResolverConfig::default_max_stderr_bytes")]
    pub max_stderr_bytes: usize,
    /// GOPROXY handed to the backend so it never loops back into this proxy
    #[serde(default = "ResolverConfig::default_goproxy")]
    pub goproxy: String,
    /// Extra environment for the backend
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ResolverConfig {
    fn default_command() -> String {
        "go".to_string()
    }

    fn default_args() -> Vec<String> {
        vec!["get".to_string(), "-d".to_string()]
    }

    fn default_timeout_secs() -> u64 {
        300
    }

    fn default_max_stderr_bytes() -> usize {
        1024 * 1024
    }

    fn default_goproxy() -> String {
        "direct".to_string()
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
            args: Self::default_args(),
            timeout_secs: Self::default_timeout_secs(),
            max_stderr_bytes: Self::default_max_stderr_bytes(),
            goproxy: Self::default_goproxy(),
            env: BTreeMap::new(),
        }
    }
}
