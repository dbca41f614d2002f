//! Cache bucket naming.
//!
//! Every bucket is named `{prefix}-{purpose}-v{version}`. Activation deletes
//! any bucket whose name is not in [`CacheRegistry::valid_names`], so a purpose
//! missing from [`CachePurpose::ALL`] is never cleaned up and a purpose removed
//! from it is deleted on the next activation.

use std::fmt;

use crate::config::SwConfig;

/// What a cache bucket holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePurpose {
    Precache,
    Runtime,
    Pages,
    Static,
    Images,
    Api,
    Fonts,
    Offline,
}

impl CachePurpose {
    /// Every purpose owned by the current worker version.
    pub const ALL: [CachePurpose; 8] = [
        CachePurpose::Precache,
        CachePurpose::Runtime,
        CachePurpose::Pages,
        CachePurpose::Static,
        CachePurpose::Images,
        CachePurpose::Api,
        CachePurpose::Fonts,
        CachePurpose::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CachePurpose::Precache => "precache",
            CachePurpose::Runtime => "runtime",
            CachePurpose::Pages => "pages",
            CachePurpose::Static => "static",
            CachePurpose::Images => "images",
            CachePurpose::Api => "api",
            CachePurpose::Fonts => "fonts",
            CachePurpose::Offline => "offline",
        }
    }
}

impl fmt::Display for CachePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names the cache buckets of one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRegistry {
    prefix: String,
    version: String,
}

impl CacheRegistry {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn from_config(config: &SwConfig) -> Self {
        Self::new(&config.cache_prefix, &config.version)
    }

    /// Worker version these names belong to.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Bucket name for a purpose.
    pub fn bucket_name(&self, purpose: CachePurpose) -> String {
        format!("{}-{}-v{}", self.prefix, purpose, self.version)
    }

    /// Names of every bucket this version may keep.
    pub fn valid_names(&self) -> Vec<String> {
        CachePurpose::ALL
            .iter()
            .map(|purpose| self.bucket_name(*purpose))
            .collect()
    }

    /// Whether `name` belongs to this version.
    pub fn is_valid(&self, name: &str) -> bool {
        CachePurpose::ALL
            .iter()
            .any(|purpose| self.bucket_name(*purpose) == name)
    }
}
