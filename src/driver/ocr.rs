//! Tesseract CLI text recognizer
//!
//! The binarized image is written to a temporary PNG and handed to
//! `tesseract <image> stdout -l <languages> <config...>`. Plain-text output is
//! returned untouched; whitespace policy belongs to the caller.

use crate::driver::traits::TextRecognizer;
use crate::error::{LocateError, Result};
use crate::utils::binary_resolver;
use anyhow::Context;
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use uuid::Uuid;

/// OCR through the `tesseract` command line tool
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
}

impl TesseractOcr {
    /// Locate tesseract via the usual binary lookup
    pub fn new() -> Result<Self> {
        let binary = binary_resolver::find_tesseract().map_err(|e| LocateError::ocr(format!("{:#}", e)))?;
        Ok(Self { binary })
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, image_path: &Path, languages: &str, engine_config: &str) -> anyhow::Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image_path).arg("stdout");
        if !languages.is_empty() {
            cmd.arg("-l").arg(languages);
        }
        cmd.args(engine_config.split_whitespace());

        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute {:?}", self.binary))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Tesseract failed: {}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl TextRecognizer for TesseractOcr {
    fn recognize(&self, image: &GrayImage, languages: &str, engine_config: &str) -> Result<String> {
        let start = Instant::now();
        let temp_path = std::env::temp_dir().join(format!("lumi_ocr_{}.png", Uuid::new_v4()));
        image
            .save(&temp_path)
            .map_err(|e| LocateError::ocr(format!("cannot write OCR input: {}", e)))?;

        let result = self.run(&temp_path, languages, engine_config);
        let _ = std::fs::remove_file(&temp_path);

        let text = result.map_err(|e| LocateError::ocr(format!("{:#}", e)))?;
        log::debug!(
            "OCR ({}, {}) took {}ms: {:?}",
            languages,
            engine_config,
            start.elapsed().as_millis(),
            text
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_ocr_error() {
        let ocr = TesseractOcr::with_binary("/definitely/not/tesseract");
        let img = GrayImage::new(4, 4);
        let err = ocr.recognize(&img, "eng", "--psm 6").unwrap_err();
        assert!(matches!(err, LocateError::Ocr(_)));
    }
}
