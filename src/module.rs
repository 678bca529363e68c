//! Go module proxy protocol paths.
//!
//! Request paths follow the GOPROXY protocol:
//! `/<module>/@v/<version>.info`, `.mod`, `.zip`, `/<module>/@latest` and
//! `/<module>/@v/list`. Module paths and versions travel in their
//! case-escaped form, where every uppercase letter is written as `!` followed
//! by its lowercase counterpart (`github.com/BurntSushi` becomes
//! `github.com/!burnt!sushi`).

use std::fmt;

use rama::http::StatusCode;
use thiserror::Error;

/// Version token used for `/@latest` requests.
pub const LATEST: &str = "latest";

const VERSION_SEPARATOR: &str = "/@v/";
const LATEST_SUFFIX: &str = "/@latest";
const LIST_SUFFIX: &str = "/@v/list";
const GOPKG_IN: &str = "gopkg.in/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinateError {
    #[error("bad module path: {0}")]
    MalformedPath(String),
    #[error("invalid escaped module path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("invalid escaped version {version:?}: {reason}")]
    InvalidVersion {
        version: String,
        reason: &'static str,
    },
}

impl CoordinateError {
    /// A malformed path is the client's fault. Escaping failures mean the
    /// protocol's own encoding contract was broken and surface as 500.
    pub fn status(&self) -> StatusCode {
        match self {
            CoordinateError::MalformedPath(_) => StatusCode::BAD_REQUEST,
            CoordinateError::InvalidPath { .. } | CoordinateError::InvalidVersion { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Info,
    Mod,
    Zip,
    Latest,
    List,
    Other,
}

impl RequestKind {
    pub fn from_path(path: &str) -> Self {
        match extension(path) {
            Some(".info") => return RequestKind::Info,
            Some(".mod") => return RequestKind::Mod,
            Some(".zip") => return RequestKind::Zip,
            _ => {}
        }
        if path.ends_with(LATEST_SUFFIX) {
            RequestKind::Latest
        } else if path.ends_with(LIST_SUFFIX) {
            RequestKind::List
        } else {
            RequestKind::Other
        }
    }

    /// File suffix of the concrete artifact kinds.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            RequestKind::Info => Some(".info"),
            RequestKind::Mod => Some(".mod"),
            RequestKind::Zip => Some(".zip"),
            RequestKind::Latest | RequestKind::List | RequestKind::Other => None,
        }
    }

    pub fn needs_resolution(self) -> bool {
        matches!(
            self,
            RequestKind::Info | RequestKind::Mod | RequestKind::Zip | RequestKind::Latest
        )
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Info => write!(f, "info"),
            RequestKind::Mod => write!(f, "mod"),
            RequestKind::Zip => write!(f, "zip"),
            RequestKind::Latest => write!(f, "latest"),
            RequestKind::List => write!(f, "list"),
            RequestKind::Other => write!(f, "other"),
        }
    }
}

/// A decoded `(module path, version)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCoordinate {
    pub path: String,
    pub version: String,
}

impl ModuleCoordinate {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST
    }
}

/// Renders as the `<path>@<version>` target understood by the go tool.
impl fmt::Display for ModuleCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.version)
    }
}

/// A classified proxy request. `coordinate` is set for every kind that
/// needs resolution and absent for `list` and pass-through paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequest {
    pub kind: RequestKind,
    pub coordinate: Option<ModuleCoordinate>,
}

impl ModuleRequest {
    /// Parses a percent-decoded URL path.
    pub fn parse(path: &str) -> Result<Self, CoordinateError> {
        let kind = RequestKind::from_path(path);
        let coordinate = match kind {
            RequestKind::Info | RequestKind::Mod | RequestKind::Zip => {
                let suffix = kind.suffix().unwrap_or_default();
                let parts: Vec<&str> = path.split(VERSION_SEPARATOR).collect();
                if parts.len() != 2 {
                    return Err(CoordinateError::MalformedPath(path.to_string()));
                }
                let raw_version = parts[1].strip_suffix(suffix).unwrap_or(parts[1]);
                let version = unescape_version(raw_version)?;
                let module = unescape_path(trim_leading_slash(parts[0]))?;
                Some(ModuleCoordinate::new(module, version))
            }
            RequestKind::Latest => {
                let raw = path.strip_suffix(LATEST_SUFFIX).unwrap_or(path);
                let module = unescape_path(trim_leading_slash(raw))?;
                Some(ModuleCoordinate::new(module, LATEST))
            }
            RequestKind::List | RequestKind::Other => None,
        };
        Ok(Self { kind, coordinate })
    }
}

/// Splits a concrete-artifact URL path into the part before `/@v/`.
pub fn module_prefix(path: &str) -> Option<&str> {
    path.split_once(VERSION_SEPARATOR).map(|(prefix, _)| prefix)
}

fn trim_leading_slash(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Extension of the final path element, dot included.
fn extension(path: &str) -> Option<&str> {
    let last = path.rsplit('/').next().unwrap_or(path);
    last.rfind('.').map(|idx| &last[idx..])
}

pub fn escape_path(path: &str) -> Result<String, CoordinateError> {
    check_path(path).map_err(|reason| CoordinateError::InvalidPath {
        path: path.to_string(),
        reason,
    })?;
    escape_string(path).ok_or_else(|| CoordinateError::InvalidPath {
        path: path.to_string(),
        reason: "unescapable character",
    })
}

pub fn unescape_path(escaped: &str) -> Result<String, CoordinateError> {
    let invalid = |reason| CoordinateError::InvalidPath {
        path: escaped.to_string(),
        reason,
    };
    let path = unescape_string(escaped).ok_or_else(|| invalid("bad escaping"))?;
    check_path(&path).map_err(invalid)?;
    Ok(path)
}

pub fn escape_version(version: &str) -> Result<String, CoordinateError> {
    check_version(version).map_err(|reason| CoordinateError::InvalidVersion {
        version: version.to_string(),
        reason,
    })?;
    escape_string(version).ok_or_else(|| CoordinateError::InvalidVersion {
        version: version.to_string(),
        reason: "unescapable character",
    })
}

pub fn unescape_version(escaped: &str) -> Result<String, CoordinateError> {
    let invalid = |reason| CoordinateError::InvalidVersion {
        version: escaped.to_string(),
        reason,
    };
    let version = unescape_string(escaped).ok_or_else(|| invalid("bad escaping"))?;
    check_version(&version).map_err(invalid)?;
    Ok(version)
}

fn escape_string(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '!' || !c.is_ascii() {
            return None;
        }
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn unescape_string(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut bang = false;
    for c in escaped.chars() {
        if !c.is_ascii() {
            return None;
        }
        if bang {
            bang = false;
            if !c.is_ascii_lowercase() {
                return None;
            }
            out.push(c.to_ascii_uppercase());
            continue;
        }
        if c == '!' {
            bang = true;
            continue;
        }
        if c.is_ascii_uppercase() {
            return None;
        }
        out.push(c);
    }
    if bang { None } else { Some(out) }
}

fn check_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("empty string");
    }
    if path.contains("..") {
        return Err("double dot");
    }
    let mut elems = path.split('/');
    let first = elems.next().unwrap_or_default();
    check_elem(first, true)?;
    if !first.contains('.') {
        return Err("missing dot in first path element");
    }
    if first.starts_with('-') {
        return Err("leading dash in first path element");
    }
    if !first
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.'))
    {
        return Err("invalid char in first path element");
    }
    elems.try_for_each(|elem| check_elem(elem, true))?;
    if split_path_version(path).is_none() {
        return Err("invalid major version suffix");
    }
    Ok(())
}

/// Splits a module path into its prefix and major-version suffix (`/v2`,
/// `.v3` for gopkg.in, or empty). `None` when the suffix is malformed:
/// `/v0`, `/v1`, a leading zero, dotted digits, or a gopkg.in path without
/// `.vN`.
pub fn split_path_version(path: &str) -> Option<(&str, &str)> {
    if path.starts_with(GOPKG_IN) {
        return split_gopkg_in(path);
    }

    let bytes = path.as_bytes();
    let mut i = bytes.len();
    let mut dot = false;
    while i > 0 && (bytes[i - 1].is_ascii_digit() || bytes[i - 1] == b'.') {
        dot |= bytes[i - 1] == b'.';
        i -= 1;
    }
    if i <= 1 || i == bytes.len() || bytes[i - 1] != b'v' || bytes[i - 2] != b'/' {
        return Some((path, ""));
    }

    let (prefix, major) = path.split_at(i - 2);
    if dot || major.len() <= 2 || major.as_bytes()[2] == b'0' || major == "/v1" {
        return None;
    }
    Some((prefix, major))
}

fn split_gopkg_in(path: &str) -> Option<(&str, &str)> {
    let bytes = path.as_bytes();
    let mut i = path.strip_suffix("-unstable").unwrap_or(path).len();
    while i > 0 && bytes[i - 1].is_ascii_digit() {
        i -= 1;
    }
    // Every gopkg.in path ends in .vN.
    if i <= 1 || bytes[i - 1] != b'v' || bytes[i - 2] != b'.' {
        return None;
    }

    let (prefix, major) = path.split_at(i - 2);
    if major.len() <= 2 || (major.as_bytes()[2] == b'0' && major != ".v0") {
        return None;
    }
    Some((prefix, major))
}

fn check_version(version: &str) -> Result<(), &'static str> {
    check_elem(version, false)?;
    if !version.chars().all(file_name_ok) {
        return Err("invalid char in version");
    }
    Ok(())
}

fn check_elem(elem: &str, module_path: bool) -> Result<(), &'static str> {
    if elem.is_empty() {
        return Err("empty path element");
    }
    if elem.chars().all(|c| c == '.') {
        return Err("invalid path element");
    }
    if elem.ends_with('.') {
        return Err("trailing dot in path element");
    }
    if module_path {
        if elem.starts_with('.') {
            return Err("leading dot in path element");
        }
        if !elem.chars().all(mod_path_ok) {
            return Err("invalid char in path element");
        }
    }
    Ok(())
}

fn mod_path_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn file_name_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&()+,-.=@[]^_{}~ ".contains(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================================
    // RequestKind tests
    // ============================================================================

    #[test]
    fn kind_from_suffixes() {
        assert_eq!(
            RequestKind::from_path("/example.com/foo/@v/v1.0.0.info"),
            RequestKind::Info
        );
        assert_eq!(
            RequestKind::from_path("/example.com/foo/@v/v1.0.0.mod"),
            RequestKind::Mod
        );
        assert_eq!(
            RequestKind::from_path("/example.com/foo/@v/v1.0.0.zip"),
            RequestKind::Zip
        );
        assert_eq!(
            RequestKind::from_path("/example.com/foo/@latest"),
            RequestKind::Latest
        );
        assert_eq!(
            RequestKind::from_path("/example.com/foo/@v/list"),
            RequestKind::List
        );
        assert_eq!(
            RequestKind::from_path("/example.com/foo/@v/v1.0.0.ziphash"),
            RequestKind::Other
        );
        assert_eq!(RequestKind::from_path("/"), RequestKind::Other);
    }

    #[test]
    fn extension_only_looks_at_last_element() {
        assert_eq!(RequestKind::from_path("/gopkg.in/yaml.v2/@latest"), RequestKind::Latest);
        assert_eq!(RequestKind::from_path("/gopkg.in/yaml.v2/@v/list"), RequestKind::List);
    }

    #[test]
    fn kind_suffix_and_resolution() {
        assert_eq!(RequestKind::Info.suffix(), Some(".info"));
        assert_eq!(RequestKind::Latest.suffix(), None);
        assert!(RequestKind::Zip.needs_resolution());
        assert!(RequestKind::Latest.needs_resolution());
        assert!(!RequestKind::List.needs_resolution());
        assert!(!RequestKind::Other.needs_resolution());
    }

    // ============================================================================
    // ModuleRequest::parse tests
    // ============================================================================

    #[test]
    fn parses_info_request() {
        let req = ModuleRequest::parse("/example.com/foo/@v/v1.0.0.info").unwrap();
        assert_eq!(req.kind, RequestKind::Info);
        assert_eq!(
            req.coordinate,
            Some(ModuleCoordinate::new("example.com/foo", "v1.0.0"))
        );
    }

    #[test]
    fn parses_escaped_path_and_version() {
        let req =
            ModuleRequest::parse("/github.com/!burnt!sushi/toml/@v/v0.3.1-!r!c1.mod").unwrap();
        let coordinate = req.coordinate.unwrap();
        assert_eq!(coordinate.path, "github.com/BurntSushi/toml");
        assert_eq!(coordinate.version, "v0.3.1-RC1");
    }

    #[test]
    fn parses_pseudo_version_zip() {
        let req = ModuleRequest::parse(
            "/golang.org/x/text/@v/v0.0.0-20170915032832-14c0d48ead0c.zip",
        )
        .unwrap();
        assert_eq!(req.kind, RequestKind::Zip);
        assert_eq!(
            req.coordinate.unwrap().version,
            "v0.0.0-20170915032832-14c0d48ead0c"
        );
    }

    #[test]
    fn parses_latest_request() {
        let req = ModuleRequest::parse("/github.com/!azure/go-autorest/@latest").unwrap();
        assert_eq!(req.kind, RequestKind::Latest);
        let coordinate = req.coordinate.unwrap();
        assert_eq!(coordinate.path, "github.com/Azure/go-autorest");
        assert!(coordinate.is_latest());
        assert_eq!(coordinate.to_string(), "github.com/Azure/go-autorest@latest");
    }

    #[test]
    fn list_and_other_carry_no_coordinate() {
        let list = ModuleRequest::parse("/example.com/foo/@v/list").unwrap();
        assert_eq!(list.kind, RequestKind::List);
        assert!(list.coordinate.is_none());

        let other = ModuleRequest::parse("/robots.txt").unwrap();
        assert_eq!(other.kind, RequestKind::Other);
        assert!(other.coordinate.is_none());
    }

    #[test]
    fn missing_separator_is_malformed() {
        let err = ModuleRequest::parse("/example.com/foo/v1.0.0.info").unwrap_err();
        assert!(matches!(err, CoordinateError::MalformedPath(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn repeated_separator_is_malformed() {
        let err = ModuleRequest::parse("/example.com/@v/foo/@v/v1.0.0.mod").unwrap_err();
        assert!(matches!(err, CoordinateError::MalformedPath(_)));
    }

    #[test]
    fn malformed_paths_never_panic() {
        for path in [
            ".info",
            "/.zip",
            "/@v/.mod",
            "/@v/@v/.info",
            "/@v//@v//@v/x.zip",
            "",
            "/",
        ] {
            let _ = ModuleRequest::parse(path);
        }
    }

    #[test]
    fn uppercase_in_escaped_path_is_decode_error() {
        let err = ModuleRequest::parse("/github.com/BurntSushi/toml/@v/v0.3.1.info").unwrap_err();
        assert!(matches!(err, CoordinateError::InvalidPath { .. }));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_version_escape_is_decode_error() {
        let err = ModuleRequest::parse("/example.com/foo/@v/v1.0.0!.info").unwrap_err();
        assert!(matches!(err, CoordinateError::InvalidVersion { .. }));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = ModuleRequest::parse("/example.com/foo/@v/.info").unwrap_err();
        assert!(matches!(err, CoordinateError::InvalidVersion { .. }));
    }

    #[test]
    fn empty_module_path_is_decode_error() {
        let err = ModuleRequest::parse("/@v/v1.0.0.info").unwrap_err();
        assert!(matches!(err, CoordinateError::InvalidPath { .. }));
    }

    #[test]
    fn latest_with_invalid_path_is_decode_error() {
        let err = ModuleRequest::parse("/localhost/@latest").unwrap_err();
        assert!(matches!(err, CoordinateError::InvalidPath { .. }));
    }

    #[test]
    fn module_prefix_splits_on_first_separator() {
        assert_eq!(
            module_prefix("/example.com/foo/@v/v1.0.0.info"),
            Some("/example.com/foo")
        );
        assert_eq!(module_prefix("/example.com/foo/@latest"), None);
    }

    // ============================================================================
    // Escaping tests
    // ============================================================================

    #[test]
    fn escape_path_lowercases_with_bangs() {
        assert_eq!(
            escape_path("github.com/BurntSushi/toml").unwrap(),
            "github.com/!burnt!sushi/toml"
        );
        assert_eq!(escape_path("golang.org/x/text").unwrap(), "golang.org/x/text");
    }

    #[test]
    fn escape_path_rejects_invalid_paths() {
        assert!(escape_path("").is_err());
        assert!(escape_path("/example.com/foo").is_err());
        assert!(escape_path("example.com/foo/").is_err());
        assert!(escape_path("example.com//foo").is_err());
        assert!(escape_path("example.com/../foo").is_err());
        assert!(escape_path("Example.com/foo").is_err());
        assert!(escape_path("localhost/foo").is_err());
        assert!(escape_path("-example.com/foo").is_err());
        assert!(escape_path("example.com/fo!o").is_err());
        assert!(escape_path("example.com/.hidden").is_err());
    }

    #[test]
    fn double_dot_anywhere_is_rejected() {
        assert!(escape_path("example.com/foo..bar").is_err());
        let err = ModuleRequest::parse("/example.com/foo..bar/@v/v1.0.0.zip").unwrap_err();
        assert!(matches!(err, CoordinateError::InvalidPath { reason: "double dot", .. }));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_major_version_suffix_is_rejected() {
        for path in [
            "example.com/foo/v1",
            "example.com/foo/v0",
            "example.com/foo/v02",
            "example.com/foo/v2.1",
            "gopkg.in/yaml",
            "gopkg.in/yaml.v",
            "gopkg.in/yaml.v01",
        ] {
            assert!(escape_path(path).is_err(), "{path} should be rejected");
        }

        let err = ModuleRequest::parse("/gopkg.in/yaml/@v/v1.0.0.info").unwrap_err();
        assert!(matches!(err, CoordinateError::InvalidPath { .. }));
        let err = ModuleRequest::parse("/example.com/foo/v1/@latest").unwrap_err();
        assert!(matches!(err, CoordinateError::InvalidPath { .. }));
    }

    #[test]
    fn major_version_suffixes_split() {
        assert_eq!(
            split_path_version("example.com/foo/v2"),
            Some(("example.com/foo", "/v2"))
        );
        assert_eq!(
            split_path_version("example.com/foo"),
            Some(("example.com/foo", ""))
        );
        assert_eq!(
            split_path_version("example.com/foo/v1x"),
            Some(("example.com/foo/v1x", ""))
        );
        assert_eq!(
            split_path_version("gopkg.in/yaml.v2"),
            Some(("gopkg.in/yaml", ".v2"))
        );
        assert_eq!(
            split_path_version("gopkg.in/check.v0"),
            Some(("gopkg.in/check", ".v0"))
        );
        assert_eq!(
            split_path_version("gopkg.in/src-d/go-git.v4-unstable"),
            Some(("gopkg.in/src-d/go-git", ".v4-unstable"))
        );
        assert!(ModuleRequest::parse("/gopkg.in/yaml.v2/@v/v2.4.0.mod").is_ok());
        assert!(ModuleRequest::parse("/example.com/foo/v3/@v/v3.1.0.info").is_ok());
    }

    #[test]
    fn unescape_rejects_bad_sequences() {
        assert!(unescape_path("github.com/!Burnt").is_err());
        assert!(unescape_path("github.com/burnt!").is_err());
        assert!(unescape_path("github.com/!1burnt").is_err());
        assert!(unescape_path("github.com/bürnt").is_err());
    }

    #[test]
    fn escape_version_handles_uppercase() {
        assert_eq!(escape_version("v1.0.0-RC1").unwrap(), "v1.0.0-!r!c1");
        assert_eq!(escape_version("v1.2.3").unwrap(), "v1.2.3");
        assert!(escape_version("v1/2").is_err());
        assert!(escape_version("..").is_err());
        assert!(escape_version("v1.").is_err());
    }

    #[test]
    fn version_allows_incompatible_build_suffix() {
        assert_eq!(
            unescape_version("v2.0.0+incompatible").unwrap(),
            "v2.0.0+incompatible"
        );
    }

    #[test]
    fn escape_then_unescape_restores_mixed_case_path() {
        let original = "github.com/Shopify/Sarama";
        let escaped = escape_path(original).unwrap();
        assert_eq!(unescape_path(&escaped).unwrap(), original);
    }
}
