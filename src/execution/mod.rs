//! Execution engine: the prompt-synchronised driver and its result types.

use serde::Serialize;

use crate::error::ArtifactError;

pub mod driver;

/// What one submitted fragment produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    /// Sanitized interpreter output.
    pub text: String,
    /// Rendered figures in display order.
    pub artifacts: Vec<ImageArtifact>,
    /// Set when the user cancelled the fragment; `text` holds whatever was
    /// printed before the interpreter came back to its prompt.
    pub interrupted: bool,
    /// Figures that could not be read back.
    pub artifact_errors: Vec<ArtifactError>,
}

/// One rendered figure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageArtifact {
    #[serde(serialize_with = "as_base64")]
    pub data: Vec<u8>,
    pub mime_type: &'static str,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ImageArtifact {
    pub fn new(data: Vec<u8>, mime_type: &'static str, dims: Option<(u32, u32)>) -> Self {
        Self {
            data,
            mime_type,
            width: dims.map(|d| d.0),
            height: dims.map(|d| d.1),
        }
    }
}

fn as_base64<S: serde::Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

/// Raw output of one fragment before sanitizing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub text: String,
    pub interrupted: bool,
}
