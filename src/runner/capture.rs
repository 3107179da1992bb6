//! Screenshots, crops and OCR on crops

use crate::driver::common;
use crate::driver::image_matcher::Frame;
use crate::driver::traits::{DeviceDriver, TextRecognizer};
use crate::error::Result;
use crate::geometry::{Rect, Resolution};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::path::{Path, PathBuf};

/// Current screen
pub async fn snapshot(device: &dyn DeviceDriver) -> Result<Frame> {
    device.capture_screen().await
}

/// Sub-image for `rect` (`x_min, y_min, x_max, y_max`, max exclusive)
pub fn crop(frame: &Frame, rect: Rect) -> Result<Frame> {
    rect.check_within(Resolution::new(frame.width(), frame.height()))?;
    Ok(image::imageops::crop_imm(frame, rect.x_min, rect.y_min, rect.width(), rect.height()).to_image())
}

/// Options for [`recognize_text`]
#[derive(Debug, Clone)]
pub struct OcrOptions<'a> {
    pub languages: &'a str,
    pub engine_config: &'a str,
    pub cutoff: u8,
}

/// Binarize, run OCR and drop the whitespace OCR engines insert between glyphs
pub fn recognize_text(
    ocr: &dyn TextRecognizer,
    frame: &Frame,
    options: &OcrOptions<'_>,
) -> Result<String> {
    let binary = common::binarize(frame, options.cutoff);
    let raw = ocr.recognize(&binary, options.languages, options.engine_config)?;
    let text = common::strip_ocr_whitespace(&raw);
    log::debug!("OCR {:?} -> {:?}", raw, text);
    Ok(text)
}

/// Persist a frame; the format follows the file extension
pub fn save_artifact(frame: &Frame, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    frame.save(path)?;
    log::debug!("Saved artifact {}", path.display());
    Ok(path.to_path_buf())
}

/// `<dir>/<epoch millis>.jpg`
pub fn artifact_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.jpg", chrono::Utc::now().timestamp_millis()))
}

/// PNG-encode and base64 a frame
pub fn to_base64_png(frame: &Frame) -> Result<String> {
    let mut buf = std::io::Cursor::new(Vec::new());
    frame.write_to(&mut buf, image::ImageFormat::Png)?;
    Ok(STANDARD.encode(buf.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeOcr;
    use crate::error::LocateError;
    use image::{GenericImageView, Rgb};

    fn gradient(w: u32, h: u32) -> Frame {
        Frame::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 0]))
    }

    #[test]
    fn test_crop_bounds() {
        let frame = gradient(200, 150);
        let part = crop(&frame, Rect::new(10, 20, 60, 50)).unwrap();
        assert_eq!(part.dimensions(), (50, 30));
        assert_eq!(part.get_pixel(0, 0), frame.get_pixel(10, 20));
        assert_eq!(part.get_pixel(49, 29), frame.get_pixel(59, 49));
    }

    #[test]
    fn test_crop_rejects_inverted_and_oversized() {
        let frame = gradient(200, 150);
        assert!(matches!(
            crop(&frame, Rect::new(100, 100, 50, 50)),
            Err(LocateError::InvalidRect { .. })
        ));
        assert!(matches!(
            crop(&frame, Rect::new(0, 0, 201, 10)),
            Err(LocateError::InvalidRect { .. })
        ));
    }

    #[test]
    fn test_recognize_text_binarizes_and_strips() {
        let ocr = FakeOcr::returning(" 智 学 网\t\n");
        let frame = Frame::from_fn(4, 1, |x, _| {
            if x < 2 {
                Rgb([100, 100, 100])
            } else {
                Rgb([200, 200, 200])
            }
        });
        let options = OcrOptions {
            languages: "eng+chi_sim",
            engine_config: "--psm 6",
            cutoff: 150,
        };
        assert_eq!(recognize_text(&ocr, &frame, &options).unwrap(), "智学网");

        let calls = ocr.calls();
        assert_eq!(calls.len(), 1);
        let (img, langs, config) = &calls[0];
        assert_eq!(img.as_raw(), &vec![0, 0, 255, 255]);
        assert_eq!(langs, "eng+chi_sim");
        assert_eq!(config, "--psm 6");
    }

    #[test]
    fn test_save_artifact_and_encode() {
        let dir = std::env::temp_dir().join(format!("lumi_capture_{}", uuid::Uuid::new_v4()));
        let frame = gradient(32, 16);
        let path = save_artifact(&frame, &artifact_path(&dir)).unwrap();
        assert!(path.is_file());
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(image::open(&path).unwrap().dimensions(), (32, 16));

        let encoded = to_base64_png(&frame).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(image::load_from_memory(&bytes).unwrap().dimensions(), (32, 16));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_to_unwritable_path_is_io_error() {
        let frame = gradient(4, 4);
        let err = save_artifact(&frame, Path::new("/proc/lumi/nope.png")).unwrap_err();
        assert!(matches!(err, LocateError::Io(_)));
    }
}
