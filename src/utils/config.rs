use crate::driver::common::PollOptions;
use crate::error::{LocateError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Speed profile for test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedProfile {
    /// Zero settle delay, tight polling (may be flaky on slow devices)
    Turbo,
    /// Minimal delays, for fast devices
    Fast,
    /// Balanced delays (default)
    #[default]
    Normal,
    /// Extra delays for slow devices/emulators
    Safe,
}

impl SpeedProfile {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "turbo" | "max" => SpeedProfile::Turbo,
            "fast" => SpeedProfile::Fast,
            "safe" | "slow" => SpeedProfile::Safe,
            _ => SpeedProfile::Normal,
        }
    }

    /// Profile named by `LUMI_SPEED`, if set
    pub fn from_env() -> Option<Self> {
        std::env::var("LUMI_SPEED").ok().map(|s| Self::from_str(&s))
    }

    /// Post-action settle delay in milliseconds
    pub fn settle_delay_ms(&self) -> u64 {
        match self {
            SpeedProfile::Turbo => 0,
            SpeedProfile::Fast => 50,
            SpeedProfile::Normal => 150,
            SpeedProfile::Safe => 300,
        }
    }

    /// Poll interval in milliseconds
    pub fn poll_interval_ms(&self) -> u64 {
        match self {
            SpeedProfile::Turbo => 30,
            SpeedProfile::Fast => 100,
            SpeedProfile::Normal => 300,
            SpeedProfile::Safe => 500,
        }
    }
}

/// Engine configuration
///
/// Every field has a default, so a YAML file only needs the keys it changes:
///
/// ```yaml
/// find_timeout_ms: 10000
/// threshold: 0.8
/// image_dir: ./images
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub speed: SpeedProfile,
    /// Wait for a target before an action gives up (ms)
    pub find_timeout_ms: u64,
    /// Wait used by existence checks (ms)
    pub exists_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub settle_delay_ms: u64,
    /// Gap between the two taps of a double tap (ms)
    pub double_tap_gap_ms: u64,
    pub long_press_ms: u64,
    pub swipe_duration_ms: u64,
    /// Backspaces sent to clear a field whose current text is unknown
    pub clear_text_max: usize,
    pub scroll_percent: f64,
    pub scroll_duration_ms: u64,
    /// Minimum normalized cross-correlation for a template match
    pub threshold: f32,
    /// Frame width used by the coarse matching pass
    pub coarse_width: u32,
    /// Gray level below which OCR input becomes black
    pub ocr_cutoff: u8,
    pub ocr_languages: String,
    pub ocr_config: String,
    /// Where screenshots, crops and the step report go
    pub log_dir: PathBuf,
    /// Template images, laid out as `<image_dir>/<page>/<name>.png`
    pub image_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_speed(SpeedProfile::Normal)
    }
}

impl Settings {
    /// Defaults with interval and settle delay seeded from a speed profile
    pub fn for_speed(speed: SpeedProfile) -> Self {
        Self {
            speed,
            find_timeout_ms: 20_000,
            exists_timeout_ms: 3_000,
            poll_interval_ms: speed.poll_interval_ms(),
            settle_delay_ms: speed.settle_delay_ms(),
            double_tap_gap_ms: 80,
            long_press_ms: 2_000,
            swipe_duration_ms: 500,
            clear_text_max: 32,
            scroll_percent: 0.6,
            scroll_duration_ms: 2_000,
            threshold: 0.7,
            coarse_width: 360,
            ocr_cutoff: 150,
            ocr_languages: "eng+chi_sim".to_string(),
            ocr_config: "--psm 6".to_string(),
            log_dir: PathBuf::from("./output"),
            image_dir: PathBuf::from("./images"),
        }
    }

    /// Load from a YAML file, then apply `LUMI_SPEED`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_yaml(&content)?;
        Ok(settings.with_env_overrides())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| LocateError::invalid(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Re-seed timing from `LUMI_SPEED` when it is set
    pub fn with_env_overrides(self) -> Self {
        match SpeedProfile::from_env() {
            Some(speed) => self.with_speed(speed),
            None => self,
        }
    }

    pub fn with_speed(mut self, speed: SpeedProfile) -> Self {
        self.speed = speed;
        self.poll_interval_ms = speed.poll_interval_ms();
        self.settle_delay_ms = speed.settle_delay_ms();
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(LocateError::invalid(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.scroll_percent) {
            return Err(LocateError::invalid(format!(
                "scroll_percent must be within [0, 1], got {}",
                self.scroll_percent
            )));
        }
        if self.coarse_width == 0 {
            return Err(LocateError::invalid("coarse_width must be positive"));
        }
        Ok(())
    }

    pub fn find_poll(&self) -> PollOptions {
        PollOptions::new(
            Duration::from_millis(self.find_timeout_ms),
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    pub fn exists_poll(&self) -> PollOptions {
        self.find_poll()
            .with_timeout(Duration::from_millis(self.exists_timeout_ms))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
