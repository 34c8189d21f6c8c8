//! Error types for resolving, compiling and rendering views
//!
//! Every error carries structured fields rather than preformatted text, and
//! implements [`miette::Diagnostic`] so callers can print rich reports.

use camino::Utf8PathBuf;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T, E = ViewError> = std::result::Result<T, E>;

/// All errors surfaced by a [`ViewEngine`](crate::ViewEngine)
#[derive(Error, Debug, Diagnostic)]
pub enum ViewError {
    /// The name is not a well-formed dotted view name
    #[error("Invalid view name `{name}`")]
    #[diagnostic(
        code(vellum::reference::invalid_name),
        help("View names are dot-separated segments of letters, digits, `_` and `-`")
    )]
    InvalidName { name: String },

    /// No source exists for the view under any supported extension
    #[error("View `{name}` does not exist")]
    #[diagnostic(
        code(vellum::reference),
        help("Searched: {}", searched.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", "))
    )]
    Reference {
        name: String,
        searched: Vec<Utf8PathBuf>,
    },

    /// The cache store or a source file could not be read, written or removed
    #[error("Unable to {action} `{path}`")]
    #[diagnostic(code(vellum::storage))]
    Storage {
        action: StorageAction,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The executor failed while running a fragment
    #[error(transparent)]
    #[diagnostic(transparent)]
    Execution(#[from] ExecutionError),

    /// Strict mode rejected a template
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    /// View inclusion nested deeper than the configured limit
    #[error("Including `{name}` exceeds the inclusion depth limit of {limit}")]
    #[diagnostic(
        code(vellum::recursion_limit),
        help("A view is probably including itself, directly or through another view")
    )]
    RecursionLimit { name: String, limit: usize },

    /// Render parameters could not be converted into a scope
    #[error("Unable to convert render parameters for `{name}`")]
    #[diagnostic(code(vellum::parameters))]
    Parameters {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ViewError {
    pub(crate) fn storage(
        action: StorageAction,
        path: impl Into<Utf8PathBuf>,
        source: std::io::Error,
    ) -> Self {
        ViewError::Storage {
            action,
            path: path.into(),
            source,
        }
    }
}

/// The filesystem operation behind a [`ViewError::Storage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageAction {
    Read,
    Write,
    CreateDir,
    ListDir,
    Remove,
}

impl std::fmt::Display for StorageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StorageAction::Read => "read",
            StorageAction::Write => "write",
            StorageAction::CreateDir => "create directory",
            StorageAction::ListDir => "list directory",
            StorageAction::Remove => "remove",
        })
    }
}

/// Errors raised while executing a compiled fragment
#[derive(Error, Debug, Diagnostic)]
pub enum ExecutionError {
    #[error("Syntax error at byte {offset}: {message}")]
    #[diagnostic(code(vellum::exec::syntax))]
    Syntax { message: String, offset: usize },

    #[error("Variable `{name}` is not defined")]
    #[diagnostic(
        code(vellum::exec::undefined),
        help("Available variables: {}", available.join(", "))
    )]
    Undefined {
        name: String,
        available: Vec<String>,
    },

    #[error("Map has no field `{field}`")]
    #[diagnostic(
        code(vellum::exec::unknown_field),
        help("Available fields: {}", known_fields.join(", "))
    )]
    UnknownField {
        field: String,
        known_fields: Vec<String>,
    },

    #[error("Expected {expected}, found {found} ({context})")]
    #[diagnostic(code(vellum::exec::type_error))]
    Type {
        expected: String,
        found: String,
        context: String,
    },

    #[error("Unknown function `{name}`")]
    #[diagnostic(
        code(vellum::exec::unknown_function),
        help(
            "Available functions: isset, empty, include, len, upper, lower, trim, escape, join, default"
        )
    )]
    UnknownFunction { name: String },

    #[error("`{name}` takes {expected} argument(s), got {found}")]
    #[diagnostic(code(vellum::exec::arity))]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
}

/// Problems found by the strict template checker
#[derive(Error, Debug, Diagnostic)]
pub enum CompileError {
    #[error("Unknown directive `@{keyword}`")]
    #[diagnostic(
        code(vellum::compile::unknown_directive),
        help(
            "Known directives: if, elseif, else, endif, for, break, continue, endfor, isset, endisset, empty, endempty, php, endphp, view, style, script"
        )
    )]
    UnknownDirective {
        keyword: String,
        #[label("not a directive")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Malformed `@{keyword}` directive")]
    #[diagnostic(code(vellum::compile::malformed), help("Expected `{expected}`"))]
    Malformed {
        keyword: String,
        expected: &'static str,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Unexpected `@{found}`")]
    #[diagnostic(code(vellum::compile::unexpected), help("{hint}"))]
    Unexpected {
        found: String,
        hint: String,
        #[label("here")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },

    #[error("Unclosed `@{keyword}`")]
    #[diagnostic(
        code(vellum::compile::unclosed),
        help("Add `@{close}` to close this block")
    )]
    Unclosed {
        keyword: String,
        close: &'static str,
        #[label("opened here")]
        span: SourceSpan,
        #[source_code]
        src: NamedSource<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_names_action_and_path() {
        let err = ViewError::storage(
            StorageAction::Remove,
            "cache/home.compiled.vlm",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert_eq!(
            err.to_string(),
            "Unable to remove `cache/home.compiled.vlm`"
        );
    }

    #[test]
    fn execution_errors_are_transparent() {
        let err = ViewError::from(ExecutionError::UnknownFunction {
            name: "shout".to_string(),
        });
        assert_eq!(err.to_string(), "Unknown function `shout`");
    }
}
