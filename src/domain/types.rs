use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for one logical page.
///
/// The empty id names the landing page; every other id doubles as the page's
/// URL path segment. The set of valid ids is fixed at startup from the
/// configured page table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The landing page (empty id).
    pub fn landing() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_landing(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical URL path for this page: `/` for the landing page,
    /// `/<id>.html` otherwise.
    pub fn canonical_path(&self) -> String {
        if self.is_landing() {
            "/".to_string()
        } else {
            format!("/{}.html", self.0)
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_landing() {
            f.write_str("(landing)")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for PageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The address-encoding byte pair of one chain: the version byte of public
/// addresses and the version byte of WIF-encoded private keys.
///
/// Both are immutable chain parameters, which is why resolved pairs are
/// never re-fetched or overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBytePair {
    pub public: u8,
    pub private: u8,
}
