use crate::driver::image_matcher::Frame;
use crate::driver::ui_tree::UiTreeSnapshot;
use crate::error::Result;
use crate::geometry::{Point, Resolution};
use async_trait::async_trait;
use image::GrayImage;
use std::fmt;
use std::time::Duration;

/// Raw touch gesture in screen pixels
#[derive(Debug, Clone, PartialEq)]
pub enum Touch {
    Tap(Point),
    /// Press and hold at one point
    Press { at: Point, duration: Duration },
    /// Touch down at `from`, move to `to`, release
    Swipe {
        from: Point,
        to: Point,
        duration: Duration,
    },
}

/// Hardware/IME keys the engine needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    /// Backspace
    Delete,
    /// Caret to the end of the focused field
    MoveEnd,
}

impl Key {
    /// Android key event code
    pub fn keycode(&self) -> u32 {
        match self {
            Key::Enter => 66,
            Key::Delete => 67,
            Key::MoveEnd => 123,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Key::Enter => "enter",
            Key::Delete => "delete",
            Key::MoveEnd => "move_end",
        };
        f.write_str(name)
    }
}

/// Connection to the single device under test
///
/// Implementations report failures as [`crate::error::LocateError::Device`]. Frames must
/// match the resolution returned by [`DeviceDriver::screen_resolution`].
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Device serial or other stable identifier
    fn device_id(&self) -> String;

    /// Capture the current screen
    async fn capture_screen(&self) -> Result<Frame>;

    /// Inject a touch gesture
    async fn inject_touch(&self, touch: &Touch) -> Result<()>;

    /// Type text into the focused widget
    async fn inject_text(&self, text: &str) -> Result<()>;

    /// Press a key
    async fn inject_key(&self, key: Key) -> Result<()>;

    /// Press keys in order
    async fn inject_keys(&self, keys: &[Key]) -> Result<()> {
        for key in keys {
            self.inject_key(*key).await?;
        }
        Ok(())
    }

    /// Screen size in pixels, taking rotation into account
    async fn screen_resolution(&self) -> Result<Resolution>;

    /// Input method active right now, if the platform has such a concept
    async fn default_ime(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Switch input method
    async fn set_ime(&self, _ime: &str) -> Result<()> {
        Ok(())
    }
}

/// Source of UI-tree snapshots
#[async_trait]
pub trait UiTreeProvider: Send + Sync {
    /// Capture an internally consistent snapshot of the current hierarchy
    async fn freeze(&self) -> Result<UiTreeSnapshot>;
}

/// OCR engine, treated as a black box
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in an already binarized image
    ///
    /// # Arguments
    /// * `languages` - engine language hints, e.g. "eng+chi_sim"
    /// * `engine_config` - engine specific flags, e.g. "--psm 6"
    fn recognize(&self, image: &GrayImage, languages: &str, engine_config: &str)
        -> Result<String>;
}
