#![doc = include_str!("../README.md")]

mod cache;
pub use cache::{COMPILED_SUFFIX, CacheStore};

mod compiler;
pub use compiler::{check, compile};

mod config;
pub use config::{DEFAULT_MAX_DEPTH, ViewConfig};

mod directive;
pub use directive::{DirectiveRule, Pass, rules};

mod engine;
pub use engine::ViewEngine;

mod error;
pub use error::{CompileError, ExecutionError, Result, StorageAction, ViewError};

pub mod fragment;
pub use fragment::{Executor, Host, Interpreter, Scope, Value};

mod resolver;
pub use resolver::{MARKUP_EXTENSION, NATIVE_EXTENSION, Origin, Resolved, ViewName, ViewResolver};
