//! Reading exported figure files back into image artifacts.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{debug, warn};

use super::{svg, PlotFormat, PlotSettings};
use crate::error::ArtifactError;
use crate::execution::ImageArtifact;

/// Fresh scratch directory for one extraction pass, under `root` when given.
pub fn figure_dir(root: Option<&Path>) -> io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("scilab-figures-");
    match root {
        Some(root) => {
            fs::create_dir_all(root)?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    }
}

/// Read every file in `dir` in ascending filename order.
///
/// A file that fails to read or normalise is reported in the second vector
/// and the remaining files are still processed.
pub fn collect_figures(
    dir: &Path,
    settings: &PlotSettings,
) -> (Vec<ImageArtifact>, Vec<ArtifactError>) {
    let mut artifacts = Vec::new();
    let mut errors = Vec::new();

    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            errors.push(ArtifactError { path: dir.to_path_buf(), message: e.to_string() });
            return (artifacts, errors);
        }
    };
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    for path in files {
        match read_figure(&path, settings) {
            Ok(artifact) => {
                debug!(path = %path.display(), mime = artifact.mime_type, "figure extracted");
                artifacts.push(artifact);
            }
            Err(message) => {
                warn!(path = %path.display(), %message, "figure could not be extracted");
                errors.push(ArtifactError { path, message });
            }
        }
    }

    (artifacts, errors)
}

fn read_figure(path: &Path, settings: &PlotSettings) -> Result<ImageArtifact, String> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(PlotFormat::from_extension)
        .ok_or_else(|| "unrecognised figure file extension".to_string())?;
    let data = fs::read(path).map_err(|e| e.to_string())?;
    if data.is_empty() {
        return Err("figure file is empty".into());
    }

    let size = settings.size.dimensions();
    if format.is_vector() {
        let img = svg::normalize(&data, size, settings.antialiasing)?;
        return Ok(ImageArtifact::new(img.data, format.mime_type(), Some((img.width, img.height))));
    }

    let dims = size.or_else(|| match format {
        PlotFormat::Png => png_dimensions(&data),
        _ => None,
    });
    Ok(ImageArtifact::new(data, format.mime_type(), dims))
}

/// Width and height from the IHDR chunk of a PNG stream.
pub fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
    if data.len() < 24 || &data[..8] != SIGNATURE || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(data[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(data[20..24].try_into().ok()?);
    Some((width, height))
}
