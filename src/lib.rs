//! Drive an interactive Scilab interpreter as a library: prompt-synchronised
//! execution, output cleaning, interrupts and inline figure extraction.

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod kernel;
pub mod logging;
pub mod plot;
pub mod printer;
pub mod process;
pub mod prompt;
pub mod sanitize;
pub mod session;

pub use error::{ArtifactError, KernelError, Result};
pub use execution::{ExecutionResult, ImageArtifact};
pub use session::ScilabSession;
