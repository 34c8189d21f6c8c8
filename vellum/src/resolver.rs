//! Mapping view names to fragments on disk
//!
//! The resolver owns the cache policy: a persisted entry always wins, and a
//! markup source is compiled (and persisted) only when no entry exists.

use crate::cache::CacheStore;
use crate::compiler::{check, compile};
use crate::error::{Result, StorageAction, ViewError};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fmt;
use std::fs;
use std::sync::LazyLock;
use tracing::debug;

/// Extension of fragment sources, used without compiling
pub const NATIVE_EXTENSION: &str = "vlm";

/// Extension of markup sources, compiled on first use
pub const MARKUP_EXTENSION: &str = "html";

/// A view name: dot-separated segments of ASCII alphanumerics, `_` and `-`
pub(crate) const VIEW_NAME_PATTERN: &str = r"[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*";

static VIEW_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{VIEW_NAME_PATTERN}$")).expect("view name pattern is valid")
});

/// A validated, dot-delimited view name such as `layouts.header`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewName(String);

impl ViewName {
    /// Validate `name`: one or more non-empty segments of ASCII
    /// alphanumerics, `_` and `-`, separated by dots
    pub fn parse(name: &str) -> Result<Self> {
        if VIEW_NAME.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(ViewError::InvalidName {
                name: name.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// `root/seg/seg/last.ext`
    pub fn source_path(&self, root: &Utf8Path, extension: &str) -> Utf8PathBuf {
        let mut path = root.to_path_buf();
        path.extend(self.segments());
        path.set_extension(extension);
        path
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a resolved fragment was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// An existing cache entry
    Cached,
    /// A native fragment source, used as is
    Native,
    /// A markup source compiled just now and persisted
    Compiled,
}

/// The fragment file to execute for a view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: Utf8PathBuf,
    pub origin: Origin,
}

/// Finds or produces the compiled fragment for a view
#[derive(Debug, Clone)]
pub struct ViewResolver {
    source_root: Utf8PathBuf,
    cache: CacheStore,
    strict: bool,
}

impl ViewResolver {
    pub fn new(source_root: impl Into<Utf8PathBuf>, cache: CacheStore, strict: bool) -> Self {
        Self {
            source_root: source_root.into(),
            cache,
            strict,
        }
    }

    pub fn source_root(&self) -> &Utf8Path {
        &self.source_root
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn resolve(&self, name: &ViewName) -> Result<Resolved> {
        if let Some(path) = self.cache.lookup(name) {
            return Ok(Resolved {
                path,
                origin: Origin::Cached,
            });
        }

        let native = name.source_path(&self.source_root, NATIVE_EXTENSION);
        if native.is_file() {
            debug!(view = %name, path = %native, "using native fragment");
            return Ok(Resolved {
                path: native,
                origin: Origin::Native,
            });
        }

        let markup = name.source_path(&self.source_root, MARKUP_EXTENSION);
        if markup.is_file() {
            let template = fs::read_to_string(&markup)
                .map_err(|e| ViewError::storage(StorageAction::Read, &markup, e))?;
            if self.strict {
                check(markup.as_str(), &template)?;
            }
            debug!(view = %name, path = %markup, "compiling view");
            let path = self.cache.persist(name, &compile(&template))?;
            return Ok(Resolved {
                path,
                origin: Origin::Compiled,
            });
        }

        Err(ViewError::Reference {
            name: name.to_string(),
            searched: vec![native, markup],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_map_segments_to_directories() {
        let name = ViewName::parse("layouts.partials.header").unwrap();
        assert_eq!(
            name.source_path(Utf8Path::new("views"), MARKUP_EXTENSION),
            "views/layouts/partials/header.html"
        );
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in ["", ".", "a..b", "a.", "../etc", "a/b", "/abs", "a b", "a.b\\c"] {
            let err = ViewName::parse(bad).unwrap_err();
            assert!(matches!(err, ViewError::InvalidName { .. }), "{bad:?}");
        }
        for good in ["home", "layouts.header", "user-card_v2.x"] {
            assert_eq!(ViewName::parse(good).unwrap().as_str(), good);
        }
    }
}
