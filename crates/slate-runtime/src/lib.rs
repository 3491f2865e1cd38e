//! SlateScript runtime
//!
//! Loads compiled `.ssasm` programs and runs them in a
//! [`slate_core::Vm`], keeping session state (globals, natives, debugger)
//! across executions.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod loader;
pub mod session;

pub use error::RuntimeError;
pub use loader::{load_program, load_program_bytes, PROGRAM_EXTENSION};
pub use session::Session;
