//! Terminal output for execution results.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use crate::error::ArtifactError;
use crate::execution::{ExecutionResult, ImageArtifact};
use crate::plot::PlotFormat;

pub struct TextPrinter {
    pub color: bool,
}

impl TextPrinter {
    pub fn print(&self, text: &str) {
        if !text.is_empty() {
            println!("{}", text);
        }
    }

    pub fn notice(&self, text: &str) {
        if self.color {
            eprintln!("{}", text.yellow());
        } else {
            eprintln!("{}", text);
        }
    }

    pub fn error(&self, text: &str) {
        if self.color {
            eprintln!("{}", text.red());
        } else {
            eprintln!("{}", text);
        }
    }

    pub fn artifact_error(&self, err: &ArtifactError) {
        self.error(&format!("figure error: {}", err));
    }

    pub fn saved(&self, path: &Path, artifact: &ImageArtifact) {
        let dims = match (artifact.width, artifact.height) {
            (Some(w), Some(h)) => format!(" {}x{}", w, h),
            _ => String::new(),
        };
        let line = format!("[{}{}] {}", artifact.mime_type, dims, path.display());
        if self.color {
            println!("{}", line.cyan());
        } else {
            println!("{}", line);
        }
    }

    /// Text, then artifact errors, then an interrupt notice.
    pub fn result(&self, result: &ExecutionResult) {
        self.print(&result.text);
        for err in &result.artifact_errors {
            self.artifact_error(err);
        }
        if result.interrupted {
            self.notice("interrupted");
        }
    }
}

/// Write `artifact` into `dir` as `figure_<n>.<ext>`.
pub fn save_artifact(dir: &Path, index: usize, artifact: &ImageArtifact) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let ext = extension_for(artifact.mime_type);
    let path = dir.join(format!("figure_{}.{}", index, ext));
    fs::write(&path, &artifact.data).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn extension_for(mime: &str) -> &'static str {
    [PlotFormat::Svg, PlotFormat::Png, PlotFormat::Jpg]
        .into_iter()
        .find(|f| f.mime_type() == mime)
        .map_or("bin", PlotFormat::extension)
}
