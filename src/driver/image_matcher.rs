//! Template matching on screenshots
//!
//! Normalized cross-correlation via imageproc, run in two passes: a coarse pass on a
//! downscaled frame to find candidate peaks, then a fine pass at full resolution in a
//! small window around each peak. Color templates are scored on every channel and a
//! location keeps the weakest channel's score, so a red button does not match a green
//! one of the same shape.
//!
//! Overlapping detections are reduced with greedy non-maximum suppression: candidates
//! are ranked (confidence desc, then top-left y, then x) and a candidate is dropped when
//! its rectangle overlaps an already kept one with IoU >= `MatchConfig::nms_iou`.

use crate::driver::template::Template;
use crate::error::Result;
use crate::geometry::{Point, Rect, Resolution};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::template_matching::{match_template, MatchTemplateMethod};
use std::cmp::Ordering;

/// Decoded screenshot
pub type Frame = RgbImage;

/// Scores allowed below the threshold in the coarse pass (downscaling blurs peaks)
const COARSE_SLACK: f32 = 0.1;

/// Smallest scaled template side for which the coarse pass is worth it
const MIN_COARSE_TEMPLATE: u32 = 5;

/// Cap on coarse peaks refined at full resolution
const MAX_COARSE_PEAKS: usize = 32;

/// Result of image matching
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Reported coordinate: anchor point plus record offset, in screen pixels
    pub point: Point,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
    /// Matched region in screen pixels
    pub rect: Rect,
    pub template: Template,
}

/// Image matching configuration
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Frames wider than this are downscaled to this width for the coarse pass
    pub coarse_width: f32,
    /// IoU at or above which a weaker detection is suppressed
    pub nms_iou: f64,
    /// Upper bound on `find_all` results, `None` for no bound
    pub max_results: Option<usize>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            coarse_width: 360.0,
            nms_iou: 0.3,
            max_results: None,
        }
    }
}

/// Raw peak in the score map, top-left of the template window
#[derive(Debug, Clone, Copy, PartialEq)]
struct Peak {
    x: u32,
    y: u32,
    score: f32,
}

/// Confidence desc, then reading order of the top-left corner
fn rank(a: &Peak, b: &Peak) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.y.cmp(&b.y))
        .then(a.x.cmp(&b.x))
}

#[derive(Debug, Clone, Default)]
pub struct TemplateMatcher {
    config: MatchConfig,
}

impl TemplateMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Best match above `threshold`, or `None`
    pub fn find(
        &self,
        template: &Template,
        screen: &Frame,
        threshold: f32,
    ) -> Result<Option<MatchResult>> {
        let image = template.load_image()?;
        Ok(self
            .match_image(template, &image, screen, threshold, Some(1))
            .into_iter()
            .next())
    }

    /// Every non-overlapping match above `threshold`, best first
    pub fn find_all(
        &self,
        template: &Template,
        screen: &Frame,
        threshold: f32,
    ) -> Result<Vec<MatchResult>> {
        let image = template.load_image()?;
        Ok(self.match_image(template, &image, screen, threshold, self.config.max_results))
    }

    /// Match an already decoded reference image
    pub fn match_image(
        &self,
        template: &Template,
        reference: &DynamicImage,
        screen: &Frame,
        threshold: f32,
        limit: Option<usize>,
    ) -> Vec<MatchResult> {
        let screen_res = Resolution::new(screen.width(), screen.height());
        let reference = scale_to_screen(reference, template.resolution, screen_res);
        let (tw, th) = (reference.width(), reference.height());

        let screen_planes = planes(screen, template.rgb);
        let tpl_planes = planes(&reference.to_rgb8(), template.rgb);

        let peaks = self.search(&screen_planes, &tpl_planes, threshold);
        let kept = suppress(peaks, tw, th, self.config.nms_iou, limit);

        let (dx, dy) = template.record_pos;
        let offset_x = (dx * screen_res.width as f64).round() as i32;
        let offset_y = (dy * screen_res.height as f64).round() as i32;

        kept.into_iter()
            .map(|peak| {
                let rect = Rect::new(peak.x, peak.y, peak.x + tw, peak.y + th);
                let point = template.target_pos.locate(&rect).offset(offset_x, offset_y);
                log::debug!(
                    "{} matched at {} (confidence {:.3})",
                    template,
                    point,
                    peak.score
                );
                MatchResult {
                    point,
                    confidence: peak.score,
                    rect,
                    template: template.clone(),
                }
            })
            .collect()
    }

    /// Peaks at full resolution, unordered
    fn search(&self, screen: &[GrayImage], template: &[GrayImage], threshold: f32) -> Vec<Peak> {
        let (sw, sh) = screen[0].dimensions();
        let (tw, th) = template[0].dimensions();
        if tw == 0 || th == 0 || tw > sw || th > sh {
            return Vec::new();
        }

        let scale = if sw as f32 > self.config.coarse_width {
            self.config.coarse_width / sw as f32
        } else {
            1.0
        };
        let small_tw = (tw as f32 * scale) as u32;
        let small_th = (th as f32 * scale) as u32;

        if scale >= 1.0 || small_tw < MIN_COARSE_TEMPLATE || small_th < MIN_COARSE_TEMPLATE {
            // Direct match without scaling
            let scores = score_map(screen, template);
            return local_maxima(&scores, threshold);
        }

        // Coarse pass
        let small_w = ((sw as f32 * scale) as u32).max(small_tw);
        let small_h = ((sh as f32 * scale) as u32).max(small_th);
        let small_screen: Vec<GrayImage> = screen
            .iter()
            .map(|p| imageops::resize(p, small_w, small_h, FilterType::Triangle))
            .collect();
        let small_tpl: Vec<GrayImage> = template
            .iter()
            .map(|p| imageops::resize(p, small_tw, small_th, FilterType::Triangle))
            .collect();

        let coarse = score_map(&small_screen, &small_tpl);
        let coarse_peaks = suppress(
            local_maxima(&coarse, threshold - COARSE_SLACK),
            small_tw,
            small_th,
            self.config.nms_iou,
            Some(MAX_COARSE_PEAKS),
        );

        // Fine pass in a window a few coarse pixels wider than the template
        let pad = (3.0 / scale).ceil() as u32 + 2;
        let mut refined = Vec::with_capacity(coarse_peaks.len());
        for peak in coarse_peaks {
            let cx = (peak.x as f32 / scale) as u32;
            let cy = (peak.y as f32 / scale) as u32;
            let roi_x = cx.saturating_sub(pad).min(sw - tw);
            let roi_y = cy.saturating_sub(pad).min(sh - th);
            let roi_w = (tw + pad * 2).min(sw - roi_x);
            let roi_h = (th + pad * 2).min(sh - roi_y);
            if roi_w < tw || roi_h < th {
                continue;
            }

            let roi: Vec<GrayImage> = screen
                .iter()
                .map(|p| imageops::crop_imm(p, roi_x, roi_y, roi_w, roi_h).to_image())
                .collect();
            let fine = score_map(&roi, template);
            if let Some(best) = global_max(&fine) {
                if best.score >= threshold {
                    refined.push(Peak {
                        x: roi_x + best.x,
                        y: roi_y + best.y,
                        score: best.score,
                    });
                }
            }
        }
        refined
    }
}

/// Resize the reference image per axis when it was captured at another resolution
fn scale_to_screen(
    reference: &DynamicImage,
    recorded: Option<Resolution>,
    screen: Resolution,
) -> DynamicImage {
    match recorded {
        Some(rec) if rec != screen && !rec.is_empty() => {
            let sx = screen.width as f64 / rec.width as f64;
            let sy = screen.height as f64 / rec.height as f64;
            let w = ((reference.width() as f64 * sx).round() as u32).max(1);
            let h = ((reference.height() as f64 * sy).round() as u32).max(1);
            log::debug!(
                "Rescaling template {}x{} -> {}x{} (recorded at {}, screen {})",
                reference.width(),
                reference.height(),
                w,
                h,
                rec,
                screen
            );
            reference.resize_exact(w, h, FilterType::Triangle)
        }
        _ => reference.clone(),
    }
}

/// Working planes: one luma plane, or the three color channels
fn planes(img: &RgbImage, rgb: bool) -> Vec<GrayImage> {
    if !rgb {
        return vec![imageops::grayscale(img)];
    }
    (0..3)
        .map(|c| GrayImage::from_fn(img.width(), img.height(), |x, y| Luma([img.get_pixel(x, y)[c]])))
        .collect()
}

/// Per-location score, minimum over planes; undefined scores (flat windows) become 0
fn score_map(screen: &[GrayImage], template: &[GrayImage]) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let mut combined: Option<ImageBuffer<Luma<f32>, Vec<f32>>> = None;
    for (s, t) in screen.iter().zip(template) {
        let map = match_template(s, t, MatchTemplateMethod::CrossCorrelationNormalized);
        combined = Some(match combined {
            None => map,
            Some(mut acc) => {
                for (a, b) in acc.pixels_mut().zip(map.pixels()) {
                    a[0] = a[0].min(b[0]);
                }
                acc
            }
        });
    }
    let mut scores = combined.unwrap_or_else(|| ImageBuffer::new(0, 0));
    for p in scores.pixels_mut() {
        if !p[0].is_finite() {
            p[0] = 0.0;
        }
    }
    scores
}

/// Find maximum value and location in result matrix
fn global_max(scores: &ImageBuffer<Luma<f32>, Vec<f32>>) -> Option<Peak> {
    let mut best: Option<Peak> = None;
    for (x, y, pixel) in scores.enumerate_pixels() {
        let candidate = Peak {
            x,
            y,
            score: pixel[0],
        };
        if best.map_or(true, |b| rank(&candidate, &b) == Ordering::Less) {
            best = Some(candidate);
        }
    }
    best
}

/// Locations >= threshold that are not below any of their 8 neighbours
fn local_maxima(scores: &ImageBuffer<Luma<f32>, Vec<f32>>, threshold: f32) -> Vec<Peak> {
    let (w, h) = scores.dimensions();
    let mut peaks = Vec::new();
    for (x, y, pixel) in scores.enumerate_pixels() {
        let v = pixel[0];
        if v < threshold {
            continue;
        }
        let mut is_peak = true;
        'neighbours: for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                if (nx, ny) != (x, y) && scores.get_pixel(nx, ny)[0] > v {
                    is_peak = false;
                    break 'neighbours;
                }
            }
        }
        if is_peak {
            peaks.push(Peak { x, y, score: v });
        }
    }
    peaks
}

/// Rank peaks and drop the ones overlapping a better kept peak
fn suppress(mut peaks: Vec<Peak>, tw: u32, th: u32, iou: f64, limit: Option<usize>) -> Vec<Peak> {
    peaks.sort_by(rank);
    let mut kept: Vec<Peak> = Vec::new();
    for peak in peaks {
        if limit.map_or(false, |n| kept.len() >= n) {
            break;
        }
        let rect = Rect::new(peak.x, peak.y, peak.x + tw, peak.y + th);
        let overlaps = kept.iter().any(|k| {
            let other = Rect::new(k.x, k.y, k.x + tw, k.y + th);
            rect.iou(&other) >= iou
        });
        if !overlaps {
            kept.push(peak);
        }
    }
    kept
}
