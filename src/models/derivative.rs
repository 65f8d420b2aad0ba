//! Derivative specifications: the fixed sizes produced for every source image.

use serde::{Deserialize, Serialize};

/// One target rendition of a source image.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DerivativeSpec {
    /// Human-readable name used in logs and reports.
    pub name: String,

    /// Exact output width in pixels.
    pub width: u32,

    /// Exact output height in pixels.
    pub height: u32,

    /// File stem under the destination directory (`<dir>/<subpath>.jpg`).
    pub destination_subpath: String,
}

impl DerivativeSpec {
    pub fn new(name: impl Into<String>, width: u32, height: u32, subpath: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            destination_subpath: subpath.into(),
        }
    }

    /// The built-in table: thumbnail 100x100, medium 400x400, tiny 28x28.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("thumbnail", 100, 100, "thumbnail"),
            Self::new("medium", 400, 400, "medium"),
            Self::new("tiny", 28, 28, "tiny"),
        ]
    }
}
