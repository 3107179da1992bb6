//! Coordinate systems
//!
//! Three spaces are in play: normalized screen percentages in [0, 1], absolute pixels on
//! the device, and the reference resolution a template was recorded at. Conversion
//! between two resolutions is done per axis, so a point keeps its aspect-relative
//! position but absolute pixel offsets are distorted when the aspect ratios differ.
//! That distortion is not corrected.

use crate::error::{LocateError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Screen or image size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Absolute pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Screen-percentage coordinate; both components lie in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormPoint {
    pub x: f64,
    pub y: f64,
}

impl NormPoint {
    /// Checked constructor
    pub fn new(x: f64, y: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            return Err(LocateError::OutOfRange { x, y });
        }
        Ok(Self { x, y })
    }

    pub const CENTER: NormPoint = NormPoint { x: 0.5, y: 0.5 };
}

impl fmt::Display for NormPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3}]", self.x, self.y)
    }
}

/// Rectangle in absolute pixels, `(x_min, y_min, x_max, y_max)` with exclusive max
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl Rect {
    pub const fn new(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> u32 {
        self.x_max.saturating_sub(self.x_min)
    }

    pub fn height(&self) -> u32 {
        self.y_max.saturating_sub(self.y_min)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn center(&self) -> Point {
        Point::new(
            ((self.x_min + self.x_max) / 2) as i32,
            ((self.y_min + self.y_max) / 2) as i32,
        )
    }

    pub fn intersection_area(&self, other: &Rect) -> u64 {
        let x0 = self.x_min.max(other.x_min);
        let y0 = self.y_min.max(other.y_min);
        let x1 = self.x_max.min(other.x_max);
        let y1 = self.y_max.min(other.y_max);
        if x1 <= x0 || y1 <= y0 {
            return 0;
        }
        (x1 - x0) as u64 * (y1 - y0) as u64
    }

    /// Intersection over union, 0.0 for disjoint or empty rects
    pub fn iou(&self, other: &Rect) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union == 0 {
            0.0
        } else {
            inter as f64 / union as f64
        }
    }

    /// Validate against a frame of the given size
    pub fn check_within(&self, frame: Resolution) -> Result<()> {
        if self.x_min >= self.x_max
            || self.y_min >= self.y_max
            || self.x_max > frame.width
            || self.y_max > frame.height
        {
            return Err(LocateError::InvalidRect {
                x_min: self.x_min,
                y_min: self.y_min,
                x_max: self.x_max,
                y_max: self.y_max,
                width: frame.width,
                height: frame.height,
            });
        }
        Ok(())
    }
}

impl From<(u32, u32, u32, u32)> for Rect {
    fn from((x_min, y_min, x_max, y_max): (u32, u32, u32, u32)) -> Self {
        Self::new(x_min, y_min, x_max, y_max)
    }
}

/// Long-lived facts about the device under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub resolution: Resolution,
    pub device_id: String,
    /// Input method active before the session started, restored at the end
    pub default_ime: Option<String>,
}

impl DeviceProfile {
    pub fn new(resolution: Resolution, device_id: impl Into<String>) -> Self {
        Self {
            resolution,
            device_id: device_id.into(),
            default_ime: None,
        }
    }
}

/// Convert a normalized coordinate to absolute pixels on the profile's screen
pub fn to_absolute(p: NormPoint, profile: &DeviceProfile) -> Result<Point> {
    // NormPoint fields are public, so re-check the invariant
    let p = NormPoint::new(p.x, p.y)?;
    let res = profile.resolution;
    Ok(Point::new(
        (p.x * res.width as f64).round() as i32,
        (p.y * res.height as f64).round() as i32,
    ))
}

/// Convert an absolute pixel coordinate to screen percentages
pub fn to_normalized(p: Point, profile: &DeviceProfile) -> Result<NormPoint> {
    let res = profile.resolution;
    if res.is_empty() {
        return Err(LocateError::invalid(format!(
            "device resolution {} has no area",
            res
        )));
    }
    NormPoint::new(
        p.x as f64 / res.width as f64,
        p.y as f64 / res.height as f64,
    )
}

/// Map a pixel point from one resolution to another, independently per axis
pub fn rescale(p: Point, from: Resolution, to: Resolution) -> Result<Point> {
    if from.is_empty() {
        return Err(LocateError::invalid(format!(
            "source resolution {} has no area",
            from
        )));
    }
    let sx = to.width as f64 / from.width as f64;
    let sy = to.height as f64 / from.height as f64;
    Ok(Point::new(
        (p.x as f64 * sx).round() as i32,
        (p.y as f64 * sy).round() as i32,
    ))
}
