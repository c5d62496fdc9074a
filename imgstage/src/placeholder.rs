//! Placeholder substitution in asset and exclude paths.
//!
//! Backends expose tokens such as `<GOPATH>` or `<INSTALLPATH>` that users can
//! put in `--asset` and `--exclude` arguments before the real paths (usually
//! somewhere inside the scratch directory) are known.

use std::collections::BTreeMap;
use std::path::Path;

/// Maps placeholder tokens to the paths they stand for.
///
/// Substitution replaces every occurrence of every token. Tokens are applied
/// one after another, so the result only stays independent of the order (and
/// `substitute` only stays idempotent) as long as no replacement value itself
/// contains a token. Backends are expected to uphold that; it is not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMapping {
    tokens: BTreeMap<String, String>,
}

impl PlaceholderMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.insert(token, path);
        self
    }

    pub fn insert(&mut self, token: impl Into<String>, path: impl AsRef<Path>) {
        self.tokens
            .insert(token.into(), path.as_ref().to_string_lossy().into_owned());
    }

    /// Replace every placeholder occurring in `path`.
    pub fn substitute(&self, path: &str) -> String {
        let substituted = self
            .tokens
            .iter()
            .fold(path.to_string(), |acc, (token, value)| {
                acc.replace(token.as_str(), value)
            });
        if substituted != path {
            tracing::trace!(from = path, to = %substituted, "substituted placeholders");
        }
        substituted
    }
}
