use crate::utils::binary_resolver;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;

/// Represents an Android device as listed by `adb devices`
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub serial: String,
    pub state: String,
}

/// Get list of connected Android devices
pub async fn get_devices() -> Result<Vec<Device>> {
    let adb_path = binary_resolver::find_adb()?;
    let output = Command::new(adb_path)
        .args(["devices"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to execute adb devices")?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        log::debug!("adb devices stderr:\n{}", stderr);
    }

    Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_devices(stdout: &str) -> Vec<Device> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some(state)) => Some(Device {
                    serial: serial.to_string(),
                    state: state.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

fn with_serial<'a>(serial: Option<&'a str>, rest: &[&'a str]) -> Vec<&'a str> {
    let mut args = Vec::with_capacity(rest.len() + 2);
    if let Some(s) = serial {
        args.push("-s");
        args.push(s);
    }
    args.extend_from_slice(rest);
    args
}

/// Execute an ADB shell command
pub async fn shell(serial: Option<&str>, cmd: &str) -> Result<String> {
    let args = with_serial(serial, &["shell", cmd]);

    let adb_path = binary_resolver::find_adb()?;
    let output = Command::new(adb_path)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to execute: adb shell {}", cmd))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ADB shell command failed: {}", stderr);
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Execute ADB exec-out command (faster than shell for large output)
pub async fn exec_out(serial: Option<&str>, cmd: &str) -> Result<String> {
    let bytes = exec_out_binary(serial, cmd).await?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// Execute ADB exec-out command and return raw binary data
/// Use this for binary output like screenshots
pub async fn exec_out_binary(serial: Option<&str>, cmd: &str) -> Result<Vec<u8>> {
    let args = with_serial(serial, &["exec-out", cmd]);

    let adb_path = binary_resolver::find_adb()?;
    let output = Command::new(adb_path)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("Failed to execute: adb exec-out {}", cmd))?;

    // exec-out may not set exit status properly, check if we got output
    if output.stdout.is_empty() && !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ADB exec-out command failed: {}", stderr);
    }

    Ok(output.stdout)
}

/// Get screen resolution (handles rotation)
pub async fn get_screen_size(serial: Option<&str>) -> Result<(u32, u32)> {
    let output = shell(serial, "wm size").await?;
    let (width, height) = parse_wm_size(&output)
        .with_context(|| format!("Unexpected 'wm size' output: {}", output.trim()))?;

    // mRotation=1 (90°) or mRotation=3 (270°) means landscape
    let rotation_output = shell(serial, "dumpsys window displays | grep mRotation")
        .await
        .unwrap_or_default();
    let is_landscape =
        rotation_output.contains("mRotation=1") || rotation_output.contains("mRotation=3");

    if is_landscape && height > width {
        Ok((height, width))
    } else {
        Ok((width, height))
    }
}

/// Parse "Physical size: 1080x1920", preferring "Override size" when present
fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let mut physical = None;
    for line in output.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let Some((w, h)) = value.trim().split_once('x') else {
            continue;
        };
        let (Ok(w), Ok(h)) = (w.trim().parse(), h.trim().parse()) else {
            continue;
        };
        if label.contains("Override size") {
            return Some((w, h));
        }
        if label.contains("Physical size") {
            physical = Some((w, h));
        }
    }
    physical
}
