//! Resolution backend: the `go` tool run as a subprocess.
//!
//! The proxy only consumes the backend's exit status and the `downloading`
//! lines it prints on stderr; stdout is drained and dropped.

use std::{
    fmt,
    future::Future,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncRead, AsyncReadExt},
    process::Command,
};
use tracing::debug;

use crate::{config::Config, module::ModuleCoordinate};

pub trait ResolutionBackend: Send + Sync + 'static {
    /// Fetches `coordinate` into the shared module cache. An `Err` means the
    /// backend could not be run at all; a failing run is reported through
    /// [`ResolutionOutcome::exit`].
    fn resolve(
        &self,
        coordinate: &ModuleCoordinate,
    ) -> impl Future<Output = Result<ResolutionOutcome>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendExit {
    Success,
    /// Non-zero exit; `None` when the process was killed by a signal.
    Failed(Option<i32>),
}

impl From<ExitStatus> for BackendExit {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            BackendExit::Success
        } else {
            BackendExit::Failed(status.code())
        }
    }
}

impl fmt::Display for BackendExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendExit::Success => write!(f, "success"),
            BackendExit::Failed(Some(code)) => write!(f, "exit code {code}"),
            BackendExit::Failed(None) => write!(f, "terminated by signal"),
        }
    }
}

/// A module version the backend reported fetching, parsed from a stderr line
/// such as `go: downloading golang.org/x/text v0.3.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    pub tool: String,
    pub module_path: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionOutcome {
    pub exit: BackendExit,
    pub stderr: String,
    pub stderr_truncated: bool,
    /// Empty unless the backend succeeded.
    pub downloads: Vec<DownloadEvent>,
}

impl ResolutionOutcome {
    pub fn new(exit: BackendExit, stderr: String, stderr_truncated: bool) -> Self {
        let downloads = match exit {
            BackendExit::Success => parse_download_events(&stderr),
            BackendExit::Failed(_) => Vec::new(),
        };
        Self {
            exit,
            stderr,
            stderr_truncated,
            downloads,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit == BackendExit::Success
    }
}

/// Collects every line made of exactly four whitespace-separated fields whose
/// second field is `downloading`.
pub fn parse_download_events(stderr: &str) -> Vec<DownloadEvent> {
    stderr
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [tool, "downloading", module_path, version] => Some(DownloadEvent {
                    tool: (*tool).to_string(),
                    module_path: (*module_path).to_string(),
                    version: (*version).to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Runs `<command> <args...> <path>@<version>` with the module workspace
/// environment.
#[derive(Debug, Clone)]
pub struct GoCommandBackend {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    workdir: Option<PathBuf>,
    timeout: Duration,
    max_stderr_bytes: usize,
}

impl GoCommandBackend {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
            workdir: None,
            timeout: Duration::from_secs(300),
            max_stderr_bytes: 1024 * 1024,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let gopath = config.storage.gopath().context("configuring resolver")?;
        let resolver = &config.resolver;

        let mut env = vec![
            ("GOPATH".to_string(), gopath.display().to_string()),
            ("GO111MODULE".to_string(), "on".to_string()),
            ("GOPROXY".to_string(), resolver.goproxy.clone()),
        ];
        env.extend(
            resolver
                .env
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        Ok(Self::new(resolver.command.clone(), resolver.args.clone())
            .with_env(env)
            .with_workdir(gopath.to_path_buf())
            .with_timeout(Duration::from_secs(resolver.timeout_secs))
            .with_max_stderr_bytes(resolver.max_stderr_bytes))
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_workdir(mut self, workdir: PathBuf) -> Self {
        self.workdir = Some(workdir);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_stderr_bytes(mut self, limit: usize) -> Self {
        self.max_stderr_bytes = limit;
        self
    }
}

impl ResolutionBackend for GoCommandBackend {
    async fn resolve(&self, coordinate: &ModuleCoordinate) -> Result<ResolutionOutcome> {
        let target = coordinate.to_string();
        debug!(command = %self.command, args = ?self.args, %target, "invoking resolution backend");

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(&target)
            .envs(self.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {} for {target}", self.command))?;
        let stdout = child.stdout.take().context("capturing backend stdout")?;
        let stderr = child.stderr.take().context("capturing backend stderr")?;
        let limit = self.max_stderr_bytes;

        // Both pipes are drained concurrently so a chatty backend can never
        // block on a full pipe before exiting.
        let run = async move {
            let (_, captured) = tokio::try_join!(drain(stdout), capture_bounded(stderr, limit))?;
            let status = child.wait().await?;
            Ok::<_, io::Error>((status, captured))
        };

        let (status, (bytes, truncated)) = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result.with_context(|| format!("waiting for backend on {target}"))?,
            Err(_) => bail!(
                "backend timed out after {}s resolving {target}",
                self.timeout.as_secs()
            ),
        };

        let stderr = String::from_utf8_lossy(&bytes).into_owned();
        Ok(ResolutionOutcome::new(status.into(), stderr, truncated))
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<u64> {
    io::copy(&mut reader, &mut io::sink()).await
}

/// Keeps the first `limit` bytes and discards the rest; reports whether
/// anything was discarded.
async fn capture_bounded<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> io::Result<(Vec<u8>, bool)> {
    let mut captured = Vec::new();
    (&mut reader)
        .take(limit as u64)
        .read_to_end(&mut captured)
        .await?;
    let overflow = drain(reader).await?;
    Ok((captured, overflow > 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================================
    // parse_download_events tests
    // ============================================================================

    #[test]
    fn parses_go_downloading_lines() {
        let stderr = "go: finding example.com/foo v1.2.3\n\
                      go: downloading example.com/foo v1.2.3\n\
                      go: downloading golang.org/x/text v0.3.0\n";
        let events = parse_download_events(stderr);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tool, "go:");
        assert_eq!(events[0].module_path, "example.com/foo");
        assert_eq!(events[0].version, "v1.2.3");
        assert_eq!(events[1].module_path, "golang.org/x/text");
    }

    #[test]
    fn accepts_any_tool_token() {
        let events = parse_download_events("go downloading example.com/foo v1.2.3");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tool, "go");
    }

    #[test]
    fn ignores_lines_with_wrong_field_count() {
        let stderr = "go: downloading example.com/foo\n\
                      go: downloading example.com/foo v1.2.3 extra\n\
                      \n\
                      go: extracting example.com/foo v1.2.3\n";
        assert!(parse_download_events(stderr).is_empty());
    }

    #[test]
    fn tolerates_irregular_whitespace() {
        let events = parse_download_events("  go:\tdownloading   example.com/foo  v1.0.1 \r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version, "v1.0.1");
    }

    #[test]
    fn failed_outcome_has_no_downloads() {
        let outcome = ResolutionOutcome::new(
            BackendExit::Failed(Some(1)),
            "go: downloading example.com/foo v1.2.3\ngo: example.com/foo@v9: unknown revision\n"
                .to_string(),
            false,
        );
        assert!(!outcome.succeeded());
        assert!(outcome.downloads.is_empty());
    }

    #[test]
    fn backend_exit_display() {
        assert_eq!(BackendExit::Success.to_string(), "success");
        assert_eq!(BackendExit::Failed(Some(2)).to_string(), "exit code 2");
        assert_eq!(BackendExit::Failed(None).to_string(), "terminated by signal");
    }

    // ============================================================================
    // Subprocess tests
    // ============================================================================

    #[tokio::test]
    async fn capture_bounded_truncates() {
        let data: &[u8] = b"0123456789";
        let (captured, truncated) = capture_bounded(data, 4).await.unwrap();
        assert_eq!(captured, b"0123");
        assert!(truncated);

        let (captured, truncated) = capture_bounded(data, 64).await.unwrap();
        assert_eq!(captured, data);
        assert!(!truncated);
    }

    #[cfg(unix)]
    fn shell(script: &str) -> GoCommandBackend {
        // The coordinate is appended after the script and lands in $0.
        GoCommandBackend::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_backend_with_target_argument() {
        let backend = shell(r#"echo "go: downloading $0" | sed 's/@/ /' >&2; echo ignored"#);
        let outcome = backend
            .resolve(&ModuleCoordinate::new("example.com/foo", "v1.2.3"))
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(
            outcome.downloads,
            vec![DownloadEvent {
                tool: "go:".to_string(),
                module_path: "example.com/foo".to_string(),
                version: "v1.2.3".to_string(),
            }]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_non_zero_exit() {
        let backend = shell("echo 'go: downloading example.com/foo v1.2.3' >&2; echo boom >&2; exit 3");
        let outcome = backend
            .resolve(&ModuleCoordinate::new("example.com/foo", "latest"))
            .await
            .unwrap();

        assert_eq!(outcome.exit, BackendExit::Failed(Some(3)));
        assert!(outcome.stderr.contains("boom"));
        assert!(outcome.downloads.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn passes_environment_and_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let backend = shell(r#"echo "$GOPROXY $(pwd)" >&2"#)
            .with_env(vec![("GOPROXY".to_string(), "direct".to_string())])
            .with_workdir(dir.path().to_path_buf());
        let outcome = backend
            .resolve(&ModuleCoordinate::new("example.com/foo", "v1.0.0"))
            .await
            .unwrap();

        let canonical = dir.path().canonicalize().unwrap();
        assert!(outcome.stderr.starts_with("direct "));
        assert!(
            outcome.stderr.trim_end().ends_with(canonical.to_str().unwrap())
                || outcome.stderr.trim_end().ends_with(dir.path().to_str().unwrap())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bounds_stderr_and_drains_large_output() {
        let backend = shell("i=0; while [ $i -lt 2000 ]; do echo 'noise noise noise noise noise' >&2; echo out; i=$((i+1)); done")
            .with_max_stderr_bytes(128);
        let outcome = backend
            .resolve(&ModuleCoordinate::new("example.com/foo", "v1.0.0"))
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.stderr.len(), 128);
        assert!(outcome.stderr_truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn times_out_slow_backend() {
        let backend = shell("sleep 5").with_timeout(Duration::from_millis(100));
        let result = backend
            .resolve(&ModuleCoordinate::new("example.com/foo", "v1.0.0"))
            .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_command_is_an_error() {
        let backend = GoCommandBackend::new("artery-no-such-backend-binary", Vec::new());
        let result = backend
            .resolve(&ModuleCoordinate::new("example.com/foo", "v1.0.0"))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn from_config_sets_module_environment() {
        let mut config = Config::default();
        config.storage.gopath = Some(PathBuf::from("/data/gopath"));
        config
            .resolver
            .env
            .insert("GOFLAGS".to_string(), "-mod=mod".to_string());

        let backend = GoCommandBackend::from_config(&config).unwrap();
        assert_eq!(backend.command, "go");
        assert_eq!(backend.args, vec!["get", "-d"]);
        assert_eq!(backend.workdir, Some(PathBuf::from("/data/gopath")));
        assert!(backend.env.contains(&("GOPATH".to_string(), "/data/gopath".to_string())));
        assert!(backend.env.contains(&("GO111MODULE".to_string(), "on".to_string())));
        assert!(backend.env.contains(&("GOPROXY".to_string(), "direct".to_string())));
        assert!(backend.env.contains(&("GOFLAGS".to_string(), "-mod=mod".to_string())));
    }

    #[test]
    fn from_config_requires_gopath() {
        assert!(GoCommandBackend::from_config(&Config::default()).is_err());
    }
}
