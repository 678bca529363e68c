use artery_adapter::{FilesystemStorage, LinkMode};
use tracing::{info, warn};

use crate::module::escape_path;

/// Aliases the mirrored module's cache directory under the path the client
/// asked for, so the next request for it is a plain cache hit. Failures are
/// logged and reported as `false`; concurrent first requests routinely race
/// here and the loser sees "already exists".
pub async fn link_mirrored(
    storage: &FilesystemStorage,
    mode: LinkMode,
    original: &str,
    mirrored: &str,
) -> bool {
    // The cache stores modules under their case-escaped paths.
    let target = escape_path(mirrored).unwrap_or_else(|_| mirrored.to_string());
    let alias = escape_path(original).unwrap_or_else(|_| original.to_string());

    match storage.link_dir(&target, &alias, mode).await {
        Ok(()) => {
            info!(%target, %alias, %mode, "linked mirrored module");
            true
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), %target, %alias, %mode, "failed to alias mirrored module");
            false
        }
    }
}
