//! Scilab process bootstrap.

use super::{CommandLauncher, LineEnding};
use crate::config::{resolve_executable, Config};
use crate::error::Result;

/// Console mode without the desktop; figures can still be created and exported.
pub const DEFAULT_ARGS: &[&str] = &["-nw"];

/// Launcher for the Scilab found through `cfg`.
///
/// `SCILAB_ARGS` replaces the default arguments entirely. Scilab expects
/// `\n` on its input on every platform.
pub fn launcher(cfg: &Config) -> Result<CommandLauncher> {
    let executable = resolve_executable(cfg)?;
    let args = cfg.interpreter_args();
    let launcher = if args.is_empty() {
        CommandLauncher::new(executable).args(DEFAULT_ARGS.iter().copied())
    } else {
        CommandLauncher::new(executable).args(args)
    };
    Ok(launcher.with_line_ending(LineEnding::Lf))
}
