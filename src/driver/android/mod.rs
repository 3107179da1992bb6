pub mod adb;
pub mod driver;
pub mod uiautomator;

pub use driver::AdbDevice;

use crate::error::{LocateError, Result};
use colored::Colorize;

/// List connected Android devices
pub async fn list_devices() -> Result<()> {
    let devices = adb::get_devices()
        .await
        .map_err(|e| LocateError::device(format!("{:#}", e)))?;

    if devices.is_empty() {
        println!("  No Android devices connected");
    } else {
        println!("  Found {} device(s):", devices.len());
        for device in devices {
            println!(
                "    {} {} ({})",
                "•".green(),
                device.serial.white().bold(),
                device.state.dimmed()
            );
        }
    }

    Ok(())
}
