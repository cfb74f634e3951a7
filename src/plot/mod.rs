//! Plot configuration and the Scilab fragments that apply it.

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::KernelError;

pub mod extract;
pub mod svg;

/// File stem shared by every exported figure; the index is zero padded so
/// lexical order equals figure order.
pub const FIGURE_STEM: &str = "figure_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Inline,
    /// Any other backend name: figures open in native windows and nothing is
    /// extracted.
    #[serde(untagged)]
    Other(String),
}

impl From<&str> for Backend {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("inline") {
            Backend::Inline
        } else {
            Backend::Other(s.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotFormat {
    Svg,
    Png,
    Jpg,
    Jpeg,
}

impl PlotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            PlotFormat::Svg => "svg",
            PlotFormat::Png => "png",
            PlotFormat::Jpg => "jpg",
            PlotFormat::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            PlotFormat::Svg => "image/svg+xml",
            PlotFormat::Png => "image/png",
            PlotFormat::Jpg | PlotFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, PlotFormat::Svg)
    }

    /// Scilab exporter used for this format.
    fn exporter(self) -> &'static str {
        match self {
            PlotFormat::Svg => "xs2svg",
            PlotFormat::Png => "xs2png",
            PlotFormat::Jpg | PlotFormat::Jpeg => "xs2jpg",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        ext.parse().ok()
    }
}

impl FromStr for PlotFormat {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(PlotFormat::Svg),
            "png" => Ok(PlotFormat::Png),
            "jpg" => Ok(PlotFormat::Jpg),
            "jpeg" => Ok(PlotFormat::Jpeg),
            other => Err(KernelError::Config(format!(
                "unsupported plot format `{other}` (expected svg, png, jpg or jpeg)"
            ))),
        }
    }
}

impl fmt::Display for PlotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Figure size in pixels. `Auto` is the `-1` sentinel: let the renderer decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlotSize {
    Auto,
    Fixed { width: u32, height: u32 },
}

impl PlotSize {
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            PlotSize::Auto => None,
            PlotSize::Fixed { width, height } => Some((width, height)),
        }
    }
}

impl FromStr for PlotSize {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") || s == "-1" || s == "-1,-1" {
            return Ok(PlotSize::Auto);
        }
        let bad = || {
            KernelError::Config(format!("plot size must be `width,height` or `auto`, got `{s}`"))
        };
        let (w, h) = s.split_once(',').ok_or_else(bad)?;
        let width = w.trim().parse::<u32>().map_err(|_| bad())?;
        let height = h.trim().parse::<u32>().map_err(|_| bad())?;
        if width == 0 || height == 0 {
            return Err(bad());
        }
        Ok(PlotSize::Fixed { width, height })
    }
}

impl fmt::Display for PlotSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlotSize::Auto => f.write_str("auto"),
            PlotSize::Fixed { width, height } => write!(f, "{width},{height}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotSettings {
    pub backend: Backend,
    pub format: PlotFormat,
    pub size: PlotSize,
    pub antialiasing: bool,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Inline,
            format: PlotFormat::Svg,
            size: PlotSize::Fixed { width: 560, height: 420 },
            antialiasing: false,
        }
    }
}

impl PlotSettings {
    pub fn is_inline(&self) -> bool {
        self.backend == Backend::Inline
    }

    /// Fragment that resets the default figure to the configured geometry.
    pub fn configuration_fragment(&self) -> String {
        let (width, height) = self.size.dimensions().unwrap_or((560, 420));
        let visible = if self.is_inline() { "off" } else { "on" };
        [
            "h = gdf();".to_string(),
            "h.figure_position = [0, 0];".to_string(),
            format!("h.figure_size = [{width},{height}];"),
            format!("h.axes_size = [{width} * 0.98, {height} * 0.8];"),
            format!("h.visible = \"{visible}\";"),
        ]
        .join("\n")
    }

    /// Single-line fragment exporting every open figure window into `dir`
    /// as `figure_NNN.<ext>` and closing it.
    pub fn export_fragment(&self, dir: &Path) -> String {
        let dir = dir.to_string_lossy().replace('\\', "/").replace('\'', "''");
        format!(
            "ids_array = winsid(); for i = 1:size(ids_array, \"*\"), \
             outfile = sprintf('{dir}/{FIGURE_STEM}%03d.{ext}', i); \
             {exporter}(ids_array(i), outfile); \
             close(get_figure_handle(ids_array(i))); end",
            ext = self.format.extension(),
            exporter = self.format.exporter(),
        )
    }
}
