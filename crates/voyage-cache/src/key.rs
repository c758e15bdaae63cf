//! Cache key construction.
//!
//! Keys have the shape `{namespace}:{identifier}[:{variant}]`, e.g.
//! `product:1042` or `search:lisbon:en`. Every component is escaped before it
//! is joined, so a `:` inside an identifier can never make two different
//! lookups share a key. Both tiers use the same string, which is what lets
//! them agree on identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Well-known namespaces used by the portal's read paths.
pub mod namespaces {
    /// Single product documents.
    pub const PRODUCT: &str = "product";
    /// Search suggestions per search term.
    pub const SEARCH: &str = "search";
    /// Hot / top-N lists.
    pub const HOT: &str = "hot";
    /// Category tree nodes.
    pub const CATEGORY: &str = "category";
    /// Results of memoized operations.
    pub const MEMO: &str = "memo";
}

/// A namespaced, escaped cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from its logical parts.
    ///
    /// Fails with [`CacheError::InvalidKeyInput`] when `namespace` or
    /// `identifier` is blank, or when a variant is given but empty.
    pub fn build(
        namespace: &str,
        identifier: &str,
        variant: Option<&str>,
    ) -> Result<Self, CacheError> {
        if namespace.trim().is_empty() {
            return Err(CacheError::InvalidKeyInput(
                "namespace must not be empty".into(),
            ));
        }
        if identifier.trim().is_empty() {
            return Err(CacheError::InvalidKeyInput(format!(
                "identifier must not be empty (namespace {namespace})"
            )));
        }

        let mut key = String::with_capacity(namespace.len() + identifier.len() + 8);
        push_escaped(&mut key, namespace);
        key.push(':');
        push_escaped(&mut key, identifier);

        if let Some(variant) = variant {
            if variant.is_empty() {
                return Err(CacheError::InvalidKeyInput(format!(
                    "variant must not be empty when given (key {key})"
                )));
            }
            key.push(':');
            push_escaped(&mut key, variant);
        }

        Ok(CacheKey(key))
    }

    /// The encoded key string, as stored in both tiers.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Build a key from its logical parts. See [`CacheKey::build`].
pub fn build_key(
    namespace: &str,
    identifier: &str,
    variant: Option<&str>,
) -> Result<CacheKey, CacheError> {
    CacheKey::build(namespace, identifier, variant)
}

fn push_escaped(out: &mut String, part: &str) {
    for ch in part.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            _ => out.push(ch),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
