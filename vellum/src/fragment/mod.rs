//! Executing compiled fragments
//!
//! A fragment is markup interleaved with tags:
//!
//! ```text
//! <%%                     - A literal `<%`
//! <%# comment %>          - Discarded
//! <%= expr %>             - Emit the value of `expr`, unescaped
//! <% if a { %>…<% } %>    - Statements (if/else if/else, for, break,
//!                           continue, let, echo), may span several tags
//! ```
//!
//! The renderer hands fragments to an [`Executor`]. [`Interpreter`] is the
//! built-in one: it parses the fragment into a small statement tree and
//! walks it against a [`Scope`], calling back into a [`Host`] for
//! `include(name)`.

mod ast;
mod eval;
mod lexer;
mod parser;
mod scope;
mod value;

pub use scope::Scope;
pub use value::Value;

pub(crate) use lexer::{CLOSE_TAG, ESCAPED_OPEN_TAG, OPEN_TAG};

use crate::error::Result;
use ast::Program;
use eval::Evaluator;

/// Services an executing fragment may call back into
pub trait Host {
    /// Render the view `name` and return its output
    fn include(&mut self, name: &str) -> Result<String>;
}

/// Runs fragment text against a scope and captures its output
pub trait Executor {
    /// Execute `fragment`, returning everything it emitted.
    ///
    /// Output is all-or-nothing: on error nothing is returned.
    fn execute(&self, fragment: &str, scope: &mut Scope, host: &mut dyn Host) -> Result<String>;
}

/// The built-in fragment executor
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Executor for Interpreter {
    fn execute(&self, fragment: &str, scope: &mut Scope, host: &mut dyn Host) -> Result<String> {
        let program = Program::parse(fragment)?;
        let mut out = String::new();
        Evaluator::new(scope, host).run(&program.nodes, &mut out)?;
        Ok(out)
    }
}
