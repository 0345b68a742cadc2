//! Error types

mod sandwich_error;

pub use sandwich_error::{ErrorKind, SandwichError, SandwichResult};
