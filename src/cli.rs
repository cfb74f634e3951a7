use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "scilab-kernel",
    about = "Run Scilab code through a managed interpreter session",
    version
)]
pub struct Cli {
    /// Code to execute. Without it, cells are read from stdin.
    #[arg(value_name = "CODE")]
    pub code: Option<String>,

    /// Scilab executable (overrides SCILAB_EXECUTABLE).
    #[arg(long)]
    pub executable: Option<String>,

    /// Figure format: svg, png, jpg or jpeg.
    #[arg(short = 'f', long)]
    pub format: Option<String>,

    /// Figure size as `width,height`, or `auto`.
    #[arg(short = 's', long)]
    pub size: Option<String>,

    /// Plot backend; anything but `inline` shows native windows.
    #[arg(short = 'b', long)]
    pub backend: Option<String>,

    /// Force precise rendering of clipped SVG paths.
    #[arg(short = 'a', long)]
    pub antialiasing: bool,

    /// Directory where returned figures are saved.
    #[arg(long = "figure-dir", value_name = "DIR")]
    pub figure_dir: Option<PathBuf>,

    /// Execute a whole file as one cell.
    #[arg(long, conflicts_with = "code")]
    pub file: Option<PathBuf>,

    /// Print each result as one JSON line, images base64 encoded.
    #[arg(long)]
    pub json: bool,

    /// Print version and connection diagnostics, then exit.
    #[arg(long)]
    pub check: bool,

    /// Execute without printing output or extracting figures.
    #[arg(long)]
    pub silent: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Command-line flags take precedence over the rc file and environment.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(exe) = &self.executable {
            cfg.set("SCILAB_EXECUTABLE", exe.as_str());
        }
        if let Some(format) = &self.format {
            cfg.set("PLOT_FORMAT", format.as_str());
        }
        if let Some(size) = &self.size {
            cfg.set("PLOT_SIZE", size.as_str());
        }
        if let Some(backend) = &self.backend {
            cfg.set("PLOT_BACKEND", backend.as_str());
        }
        if self.antialiasing {
            cfg.set("PLOT_ANTIALIASING", "true");
        }
    }
}
