//! Visual templates
//!
//! A template is a reference image plus the metadata needed to turn a raw match
//! rectangle into a tap point: which of the nine anchor points to report, an extra
//! offset in screen percentages, and the resolution the image was captured at.

use crate::error::{LocateError, Result};
use crate::geometry::{Point, Rect, Resolution};
use image::DynamicImage;
use std::fmt;
use std::path::{Path, PathBuf};

/// Anchor point within a matched region, numbered like a phone keypad
///
/// ```text
/// 1 2 3
/// 4 5 6
/// 7 8 9
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetPos {
    TopLeft = 1,
    Top = 2,
    TopRight = 3,
    Left = 4,
    #[default]
    Mid = 5,
    Right = 6,
    BottomLeft = 7,
    Bottom = 8,
    BottomRight = 9,
}

impl TargetPos {
    /// Keypad number (1..=9) to anchor
    pub fn from_index(n: u8) -> Result<Self> {
        Ok(match n {
            1 => TargetPos::TopLeft,
            2 => TargetPos::Top,
            3 => TargetPos::TopRight,
            4 => TargetPos::Left,
            5 => TargetPos::Mid,
            6 => TargetPos::Right,
            7 => TargetPos::BottomLeft,
            8 => TargetPos::Bottom,
            9 => TargetPos::BottomRight,
            _ => {
                return Err(LocateError::invalid(format!(
                    "target_pos must be 1..=9, got {}",
                    n
                )))
            }
        })
    }

    /// Parse from names like "mid", "top-left", "bottom_right"
    pub fn from_str(s: &str) -> Result<Self> {
        if let Ok(n) = s.parse::<u8>() {
            return Self::from_index(n);
        }
        Ok(match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "topleft" => TargetPos::TopLeft,
            "top" => TargetPos::Top,
            "topright" => TargetPos::TopRight,
            "left" => TargetPos::Left,
            "mid" | "middle" | "center" => TargetPos::Mid,
            "right" => TargetPos::Right,
            "bottomleft" => TargetPos::BottomLeft,
            "bottom" => TargetPos::Bottom,
            "bottomright" => TargetPos::BottomRight,
            other => {
                return Err(LocateError::invalid(format!(
                    "unknown target_pos '{}'",
                    other
                )))
            }
        })
    }

    /// Point of this anchor inside `rect`
    pub fn locate(&self, rect: &Rect) -> Point {
        let idx = *self as u8 - 1;
        let col = (idx % 3) as u32;
        let row = (idx / 3) as u32;
        let x = match col {
            0 => rect.x_min,
            1 => rect.x_min + rect.width() / 2,
            _ => rect.x_max.saturating_sub(1),
        };
        let y = match row {
            0 => rect.y_min,
            1 => rect.y_min + rect.height() / 2,
            _ => rect.y_max.saturating_sub(1),
        };
        Point::new(x as i32, y as i32)
    }
}

/// Reference image and matching metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub path: PathBuf,
    /// Color matching when true, grayscale otherwise
    pub rgb: bool,
    pub target_pos: TargetPos,
    /// Offset added to the anchor point, in screen percentages (dx, dy)
    pub record_pos: (f64, f64),
    /// Resolution the reference image was captured at; `None` means "same as screen"
    pub resolution: Option<Resolution>,
    /// Per-template threshold override
    pub threshold: Option<f32>,
}

impl Template {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rgb: true,
            target_pos: TargetPos::Mid,
            record_pos: (0.0, 0.0),
            resolution: None,
            threshold: None,
        }
    }

    pub fn grayscale(mut self) -> Self {
        self.rgb = false;
        self
    }

    pub fn with_target_pos(mut self, pos: TargetPos) -> Self {
        self.target_pos = pos;
        self
    }

    pub fn with_record_pos(mut self, dx: f64, dy: f64) -> Self {
        self.record_pos = (dx, dy);
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Human-readable name, the file stem
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Decode the reference image
    pub fn load_image(&self) -> Result<DynamicImage> {
        if !self.path.is_file() {
            return Err(LocateError::Asset {
                path: self.path.clone(),
                reason: "file does not exist".to_string(),
            });
        }
        image::open(&self.path).map_err(|e| LocateError::Asset {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Template({})", self.path.display())
    }
}

/// Image directory laid out as `<root>/<page>/<name>.png`
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    root: PathBuf,
}

impl TemplateLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `<page>/<name>.png`, failing when the file is missing
    pub fn path(&self, page: &str, name: &str) -> Result<PathBuf> {
        let path = self.root.join(page).join(format!("{}.png", name));
        if path.is_file() {
            Ok(path)
        } else {
            Err(LocateError::Asset {
                path,
                reason: "template image not found".to_string(),
            })
        }
    }

    /// Template with default metadata for `<page>/<name>.png`
    pub fn template(&self, page: &str, name: &str) -> Result<Template> {
        Ok(Template::new(self.path(page, name)?))
    }
}
