use async_trait::async_trait;
use std::time::Instant;

use super::adb;
use super::uiautomator;
use crate::driver::common;
use crate::driver::image_matcher::Frame;
use crate::driver::traits::{DeviceDriver, Key, Touch, UiTreeProvider};
use crate::driver::ui_tree::UiTreeSnapshot;
use crate::error::{LocateError, Result};
use crate::geometry::Resolution;

fn device_err(e: anyhow::Error) -> LocateError {
    LocateError::device(format!("{:#}", e))
}

/// Android device reached through ADB
#[derive(Debug, Clone)]
pub struct AdbDevice {
    serial: Option<String>,
    /// Screen size read at connect; hierarchy dumps are normalized by it
    screen: Resolution,
}

fn keyevent_command(keys: &[Key]) -> String {
    let codes: Vec<String> = keys.iter().map(|k| k.keycode().to_string()).collect();
    format!("input keyevent {}", codes.join(" "))
}

impl AdbDevice {
    /// Connect to `serial`, or to the only attached device when `None`
    pub async fn connect(serial: Option<&str>) -> Result<Self> {
        let serial = match serial {
            Some(s) => s.to_string(),
            None => {
                let devices = adb::get_devices().await.map_err(device_err)?;
                let online: Vec<_> = devices.into_iter().filter(|d| d.state == "device").collect();
                match online.as_slice() {
                    [only] => only.serial.clone(),
                    [] => return Err(LocateError::device("No Android devices connected")),
                    _ => {
                        return Err(LocateError::device(
                            "Multiple devices connected. Please specify one with --device",
                        ))
                    }
                }
            }
        };
        let (w, h) = adb::get_screen_size(Some(&serial))
            .await
            .map_err(device_err)?;
        log::info!("Using Android device {} ({}x{})", serial, w, h);
        Ok(Self::with_screen(&serial, Resolution::new(w, h)))
    }

    /// Device with a known screen size, skipping the connect-time queries
    pub fn with_screen(serial: &str, screen: Resolution) -> Self {
        Self {
            serial: Some(serial.to_string()),
            screen,
        }
    }

    pub fn screen(&self) -> Resolution {
        self.screen
    }

    fn snapshot_from_dump(&self, xml: &str) -> Result<UiTreeSnapshot> {
        uiautomator::parse_hierarchy(xml, self.screen)
    }

    fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    async fn shell(&self, cmd: &str) -> Result<String> {
        log::debug!("adb shell {}", cmd);
        adb::shell(self.serial(), cmd).await.map_err(device_err)
    }

    /// Raw hierarchy XML
    pub async fn dump_hierarchy_xml(&self) -> Result<String> {
        // exec-out to /dev/stdout avoids a file round trip on the device
        match adb::exec_out(self.serial(), "uiautomator dump /dev/stdout").await {
            Ok(output) if output.contains("<?xml") => Ok(output),
            _ => {
                // Fallback to file-based method for older Android versions
                self.shell(
                    "uiautomator dump /sdcard/window_dump.xml > /dev/null && cat /sdcard/window_dump.xml",
                )
                .await
            }
        }
    }
}

#[async_trait]
impl DeviceDriver for AdbDevice {
    fn device_id(&self) -> String {
        self.serial.clone().unwrap_or_default()
    }

    async fn capture_screen(&self) -> Result<Frame> {
        let start = Instant::now();
        let png = adb::exec_out_binary(self.serial(), "screencap -p")
            .await
            .map_err(device_err)?;
        let frame = image::load_from_memory(&png)
            .map_err(|e| LocateError::device(format!("screencap returned an unreadable image: {}", e)))?
            .to_rgb8();
        log::debug!(
            "Captured {}x{} frame in {}ms",
            frame.width(),
            frame.height(),
            start.elapsed().as_millis()
        );
        Ok(frame)
    }

    async fn inject_touch(&self, touch: &Touch) -> Result<()> {
        let cmd = match touch {
            Touch::Tap(p) => format!("input tap {} {}", p.x, p.y),
            // A swipe that does not move is a press
            Touch::Press { at, duration } => format!(
                "input swipe {} {} {} {} {}",
                at.x,
                at.y,
                at.x,
                at.y,
                duration.as_millis()
            ),
            Touch::Swipe { from, to, duration } => format!(
                "input swipe {} {} {} {} {}",
                from.x,
                from.y,
                to.x,
                to.y,
                duration.as_millis()
            ),
        };
        self.shell(&cmd).await.map(|_| ())
    }

    async fn inject_text(&self, text: &str) -> Result<()> {
        if !text.is_ascii() {
            log::warn!(
                "Non-ASCII text may not be typed correctly by 'input text': {}",
                text
            );
        }
        let escaped = common::escape_for_android_shell(text);
        self.shell(&format!("input text \"{}\"", escaped))
            .await
            .map(|_| ())
    }

    async fn inject_key(&self, key: Key) -> Result<()> {
        self.shell(&format!("input keyevent {}", key.keycode()))
            .await
            .map(|_| ())
    }

    async fn inject_keys(&self, keys: &[Key]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        // One shell round trip for the whole sequence
        self.shell(&keyevent_command(keys)).await.map(|_| ())
    }

    async fn screen_resolution(&self) -> Result<Resolution> {
        let (w, h) = adb::get_screen_size(self.serial())
            .await
            .map_err(device_err)?;
        Ok(Resolution::new(w, h))
    }

    async fn default_ime(&self) -> Result<Option<String>> {
        let ime = self
            .shell("settings get secure default_input_method")
            .await?
            .trim()
            .to_string();
        Ok(if ime.is_empty() || ime == "null" {
            None
        } else {
            Some(ime)
        })
    }

    async fn set_ime(&self, ime: &str) -> Result<()> {
        self.shell(&format!("ime set {}", ime)).await.map(|_| ())
    }
}

#[async_trait]
impl UiTreeProvider for AdbDevice {
    async fn freeze(&self) -> Result<UiTreeSnapshot> {
        let xml = self.dump_hierarchy_xml().await?;
        self.snapshot_from_dump(&xml)
    }
}
