pub mod android;
pub mod common;
#[cfg(test)]
pub mod fake;
pub mod image_matcher;
pub mod ocr;
pub mod selector;
pub mod template;
pub mod traits;
pub mod ui_tree;

use crate::error::{LocateError, Result};

/// List connected devices for the specified platform
pub async fn list_devices(platform: &str) -> Result<()> {
    match platform {
        "android" => android::list_devices().await,
        _ => Err(LocateError::invalid(format!("Unknown platform: {}", platform))),
    }
}
