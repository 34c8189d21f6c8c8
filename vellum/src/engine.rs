//! Rendering views

use crate::cache::CacheStore;
use crate::config::ViewConfig;
use crate::error::{Result, StorageAction, ViewError};
use crate::fragment::{Executor, Host, Interpreter, Scope};
use crate::resolver::{ViewName, ViewResolver};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fs;
use tracing::debug;

/// Resolves, compiles and renders views.
///
/// ```no_run
/// use vellum::{Scope, ViewEngine};
///
/// let engine = ViewEngine::new("views", "views/.cache");
/// let html = engine.render("pages.home", Scope::from_iter([("title", "Welcome")]))?;
/// # Ok::<(), vellum::ViewError>(())
/// ```
#[derive(Debug)]
pub struct ViewEngine<E: Executor = Interpreter> {
    config: ViewConfig,
    resolver: ViewResolver,
    executor: E,
}

impl ViewEngine {
    /// An engine with default settings; `cache_root` may equal `source_root`
    pub fn new(source_root: impl Into<Utf8PathBuf>, cache_root: impl Into<Utf8PathBuf>) -> Self {
        Self::with_config(ViewConfig::new(source_root).with_cache_root(cache_root))
    }

    pub fn with_config(config: ViewConfig) -> Self {
        Self::with_executor(config, Interpreter)
    }
}

impl<E: Executor> ViewEngine<E> {
    /// An engine running fragments through a custom executor
    pub fn with_executor(config: ViewConfig, executor: E) -> Self {
        let resolver = ViewResolver::new(
            config.source_root.clone(),
            CacheStore::new(config.cache_root()),
            config.strict,
        );
        Self {
            config,
            resolver,
            executor,
        }
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn source_root(&self) -> &Utf8Path {
        self.resolver.source_root()
    }

    pub fn cache_root(&self) -> &Utf8Path {
        self.resolver.cache().root()
    }

    /// Render the view `name` with `params` bound as top-level variables
    pub fn render(&self, name: &str, params: Scope) -> Result<String> {
        self.render_at(name, params, 0)
    }

    /// Render with parameters taken from the fields of a serializable
    /// map or struct
    pub fn render_serialize<T: Serialize + ?Sized>(&self, name: &str, params: &T) -> Result<String> {
        let scope = Scope::from_serialize(params).map_err(|source| ViewError::Parameters {
            name: name.to_string(),
            source,
        })?;
        self.render(name, scope)
    }

    /// Delete every compiled entry, returning how many were removed
    pub fn clear_cache(&self) -> Result<usize> {
        self.resolver.cache().clear()
    }

    fn render_at(&self, name: &str, mut scope: Scope, depth: usize) -> Result<String> {
        let name = ViewName::parse(name)?;
        let resolved = self.resolver.resolve(&name)?;
        let fragment = fs::read_to_string(&resolved.path)
            .map_err(|e| ViewError::storage(StorageAction::Read, &resolved.path, e))?;
        debug!(view = %name, origin = ?resolved.origin, depth, "rendering view");

        let mut host = Inclusion { engine: self, depth };
        self.executor.execute(&fragment, &mut scope, &mut host)
    }
}

/// The engine as seen by a fragment rendering at `depth`
struct Inclusion<'e, E: Executor> {
    engine: &'e ViewEngine<E>,
    depth: usize,
}

impl<E: Executor> Host for Inclusion<'_, E> {
    fn include(&mut self, name: &str) -> Result<String> {
        let limit = self.engine.config.max_depth;
        if self.depth >= limit {
            return Err(ViewError::RecursionLimit {
                name: name.to_string(),
                limit,
            });
        }
        // Included views never see the includer's variables
        self.engine.render_at(name, Scope::new(), self.depth + 1)
    }
}
