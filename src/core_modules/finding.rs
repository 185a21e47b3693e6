use crate::cell::CellId;
use crate::core_modules::pixel::pixel::Rgb;
use std::fmt;

pub const MISSING_ALT_MESSAGE: &str = "Missing Alt Tag";
pub const LOW_CONTRAST_PREFIX: &str = "Low Image Contrast: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FindingKind {
    MissingAlt,
    LowContrast,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FindingDetail {
    /// An image without alternative text.
    MissingAlt { image: String },
    /// An image whose dominant color is hard to tell apart from the background.
    LowContrast { image: String, score: f64, color: Rgb },
}

/// One accessibility defect detected in a cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub cell_id: CellId,
    pub detail: FindingDetail,
}

impl Finding {
    pub fn missing_alt(cell_id: CellId, image: impl Into<String>) -> Self {
        Self {
            cell_id,
            detail: FindingDetail::MissingAlt { image: image.into() },
        }
    }

    pub fn low_contrast(cell_id: CellId, image: impl Into<String>, score: f64, color: Rgb) -> Self {
        Self {
            cell_id,
            detail: FindingDetail::LowContrast {
                image: image.into(),
                score,
                color,
            },
        }
    }

    pub fn kind(&self) -> FindingKind {
        match self.detail {
            FindingDetail::MissingAlt { .. } => FindingKind::MissingAlt,
            FindingDetail::LowContrast { .. } => FindingKind::LowContrast,
        }
    }

    /// The image reference the finding is about, as written in the markup.
    pub fn image(&self) -> &str {
        match &self.detail {
            FindingDetail::MissingAlt { image } | FindingDetail::LowContrast { image, .. } => image,
        }
    }

    /// The human-readable panel message.
    pub fn message(&self) -> String {
        match &self.detail {
            FindingDetail::MissingAlt { .. } => MISSING_ALT_MESSAGE.to_string(),
            FindingDetail::LowContrast { color, .. } => format!("{LOW_CONTRAST_PREFIX}{}", color.hex()),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            FindingDetail::MissingAlt { image } => write!(f, "{}: {} ({image})", self.cell_id, self.message()),
            FindingDetail::LowContrast { image, score, .. } => {
                write!(f, "{}: {} at {score:.2}:1 ({image})", self.cell_id, self.message())
            }
        }
    }
}
