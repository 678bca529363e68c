//! Module path mirroring.
//!
//! A mirror rule sends fetches of one logical module to another source, e.g.
//! `golang.org/x` to `github.com/golang`. Matching is by substring, not by
//! prefix: a rule applies when its origin occurs anywhere in the module path.

use std::borrow::Cow;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MirrorRule {
    pub origin: String,
    pub dest: String,
}

impl MirrorRule {
    /// Rewrites the first occurrence of the origin, if present.
    pub fn apply(&self, path: &str) -> Option<String> {
        path.contains(self.origin.as_str())
            .then(|| path.replacen(self.origin.as_str(), &self.dest, 1))
    }
}

/// Path handed to the resolution backend. Only the first matching rule is
/// applied; without a match the input is returned unchanged.
pub fn effective_path<'a>(rules: &[MirrorRule], path: &'a str) -> Cow<'a, str> {
    rules
        .iter()
        .find_map(|rule| rule.apply(path))
        .map_or(Cow::Borrowed(path), Cow::Owned)
}
