use anyhow::Result;
use std::path::PathBuf;

/// Install directory for bundled tools (~/.lumi-tester)
pub fn install_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".lumi-tester"))
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

/// Locate an external tool
///
/// Lookup order: explicit env override (`LUMI_<NAME>`), the install directory
/// (`~/.lumi-tester/<subdir>/<name>`), next to the current executable, then `PATH`.
pub fn find_binary(name: &str, subdir: &str) -> Result<PathBuf> {
    let mut checked_paths = Vec::new();
    let file = exe_name(name);

    let env_key = format!("LUMI_{}", name.to_uppercase());
    if let Ok(value) = std::env::var(&env_key) {
        let path = PathBuf::from(value);
        checked_paths.push(format!("Env {}: {:?}", env_key, path));
        if path.is_file() {
            return Ok(path);
        }
    }

    if let Some(dir) = install_dir() {
        let path = dir.join(subdir).join(&file);
        checked_paths.push(format!("Install Dir: {:?}", path));
        if path.is_file() {
            return Ok(path);
        }
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
    {
        let path = exe_dir.join(&file);
        checked_paths.push(format!("Sibling: {:?}", path));
        if path.is_file() {
            return Ok(path);
        }
    }

    if let Ok(path) = which::which(&file) {
        return Ok(path);
    }
    checked_paths.push("System PATH".to_string());

    Err(anyhow::anyhow!(
        "Could not find binary '{}'. Checked:\n{}",
        name,
        checked_paths.join("\n")
    ))
}

/// Find the adb binary
pub fn find_adb() -> Result<PathBuf> {
    find_binary("adb", "platform-tools")
}

/// Find the tesseract binary
pub fn find_tesseract() -> Result<PathBuf> {
    find_binary("tesseract", "tesseract")
}
