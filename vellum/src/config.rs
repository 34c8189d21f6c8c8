//! Engine configuration

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

/// Default cap on how deeply views may include each other
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Where views live and how they are rendered.
///
/// Deserializes with defaults for everything but `source_root`:
///
/// ```
/// let config: vellum::ViewConfig =
///     serde_json::from_str(r#"{ "source_root": "views", "strict": true }"#).unwrap();
/// assert_eq!(config.cache_root(), "views");
/// assert_eq!(config.max_depth, vellum::DEFAULT_MAX_DEPTH);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ViewConfig {
    /// Directory holding view sources
    pub source_root: Utf8PathBuf,

    /// Directory holding compiled entries; `source_root` when unset
    #[serde(default)]
    pub cache_root: Option<Utf8PathBuf>,

    /// Maximum inclusion depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Check markup templates for malformed directives before compiling
    #[serde(default)]
    pub strict: bool,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl ViewConfig {
    pub fn new(source_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            cache_root: None,
            max_depth: DEFAULT_MAX_DEPTH,
            strict: false,
        }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        self.cache_root.as_deref().unwrap_or(&self.source_root)
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<Utf8PathBuf>) -> Self {
        self.cache_root = Some(cache_root.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}
