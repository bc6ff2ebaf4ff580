//! Cache configuration

use crate::options::OptionsDefaults;
use readthrough_types::{DEFAULT_PAGE, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Tunables for a [`ResourceCache`](crate::ResourceCache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Page used by options groups that have not set one
    #[serde(default = "default_page")]
    pub default_page: u64,

    /// Page size used by options groups that have not set one
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,

    /// Depth at which options comparison stops looking for differences
    #[serde(default = "default_diff_depth")]
    pub options_diff_depth: usize,
}

fn default_page() -> u64 {
    DEFAULT_PAGE
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn default_diff_depth() -> usize {
    5
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            default_page: default_page(),
            default_page_size: default_page_size(),
            options_diff_depth: default_diff_depth(),
        }
    }
}

impl CacheConfig {
    pub(crate) fn options_defaults(&self) -> OptionsDefaults {
        OptionsDefaults {
            page: self.default_page,
            size: self.default_page_size,
            diff_depth: self.options_diff_depth,
        }
    }
}
