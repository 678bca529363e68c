use serde::Deserialize;

/// Listener settings for the module proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// Port clients reach through `GOPROXY=http://<host>:<port>`
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    /// Runtime worker threads; backend subprocesses are not bounded by this
    #[serde(default = "ServerConfig::default_workers")]
    pub workers: usize,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8081
    }

    fn default_workers() -> usize {
        num_cpus::get()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            workers: Self::default_workers(),
        }
    }
}
