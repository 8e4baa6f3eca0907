//! # wdlrun
//!
//! A local runner for the Workflow Description Language (WDL): parser,
//! static typechecker, workflow scheduler, and containerized task runtime.
//!
//! The front end lexes and parses WDL source ([`syntax`]), builds a typed
//! AST with resolved imports ([`ast`]), and lowers workflows into a
//! dependency graph with explicit gather nodes ([`ast::graph`]). The
//! runtime ([`run`]) advances a pure state machine over that graph,
//! executing each ready call as a container via a pluggable backend, with
//! admission control and an inter-run call cache.

pub mod ast;
pub mod env;
pub mod error;
pub mod eval;
pub mod run;
pub mod syntax;
pub mod types;
pub mod value;

pub use ast::{Document, Task, Workflow};
pub use env::{Binding, Bindings};
pub use error::{Error, SourceLoc};
pub use eval::stdlib::StdLib;
pub use run::{Config, RunOptions, RunOutcome};
pub use types::Type;
pub use value::Value;
