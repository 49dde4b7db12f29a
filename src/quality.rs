//! Quality levels and their rendering profiles.
//!
//! The front-end offers exactly three choices, so [`Quality`] is a closed enum
//! rather than a free-form string: anything else is rejected when the upload
//! is parsed and never reaches the pipeline.
//!
//! | Quality | DPI | JPEG quality | PNG compression |
//! |---------|-----|--------------|-----------------|
//! | high    | 900 | 92           | default         |
//! | medium  | 600 | 80           | best            |
//! | low     | 300 | 60           | best            |
//!
//! Every column moves in the same direction, so a higher quality never yields
//! a smaller output than a lower one for the same document.

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Requested output fidelity.
///
/// Ordered by fidelity: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Quality {
    /// All qualities, lowest fidelity first.
    pub const ALL: [Quality; 3] = [Quality::Low, Quality::Medium, Quality::High];

    /// Form value as sent by the front-end.
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }

    /// The rendering profile for this quality.
    pub fn profile(self) -> &'static QualityProfile {
        match self {
            Quality::Low => &PROFILES[0],
            Quality::Medium => &PROFILES[1],
            Quality::High => &PROFILES[2],
        }
    }

    /// Parse an optional form value, mapping absence to `InvalidQuality`.
    pub fn from_form(value: Option<&str>) -> Result<Quality, ServiceError> {
        match value {
            Some(v) => v.parse(),
            None => Err(ServiceError::InvalidQuality { value: None }),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = ServiceError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            _ => Err(ServiceError::InvalidQuality {
                value: Some(s.to_string()),
            }),
        }
    }
}

/// PNG compression effort for the preview image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngCompression {
    Default,
    Best,
}

/// Rasterisation and compression parameters for one [`Quality`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityProfile {
    pub quality: Quality,
    /// Rendering resolution in dots per inch.
    pub dpi: u32,
    /// JPEG quality (1–100) for page images embedded in the output PDF.
    pub jpeg_quality: u8,
    /// Compression effort for the PNG preview.
    pub png_compression: PngCompression,
}

/// The static profile table, indexed in [`Quality::ALL`] order.
pub static PROFILES: [QualityProfile; 3] = [
    QualityProfile {
        quality: Quality::Low,
        dpi: 300,
        jpeg_quality: 60,
        png_compression: PngCompression::Best,
    },
    QualityProfile {
        quality: Quality::Medium,
        dpi: 600,
        jpeg_quality: 80,
        png_compression: PngCompression::Best,
    },
    QualityProfile {
        quality: Quality::High,
        dpi: 900,
        jpeg_quality: 92,
        png_compression: PngCompression::Default,
    },
];
