//! Find a chromium-family executable on this machine.

use std::path::{Path, PathBuf};

use crate::error::{CdpError, Result};

/// Executable names probed on the `PATH` and in well-known directories.
const APP_NAMES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
    "chrome-browser",
    "msedge",
];

/// Returns the path to a chromium executable.
///
/// An explicit `hint` bypasses probing entirely: it either resolves or the
/// lookup fails. Otherwise the `CHROME` environment variable, the `PATH`,
/// platform well-known install locations, the directory of the running
/// executable and (on Windows) the registry are consulted in that order.
pub fn find_chromium(hint: Option<&Path>) -> Result<PathBuf> {
    if let Some(hint) = hint {
        return if hint.is_file() {
            Ok(dunce::canonicalize(hint)?)
        } else {
            Err(CdpError::BrowserNotFound)
        };
    }

    if let Ok(path) = std::env::var("CHROME") {
        let path = Path::new(&path);
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
    }

    for app in APP_NAMES {
        if let Ok(path) = which::which(app) {
            return Ok(path);
        }
    }

    for path in well_known_paths() {
        if path.is_file() {
            return Ok(path);
        }
    }

    // A browser dropped next to the running executable wins over nothing.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            for app in APP_NAMES {
                let candidate = dir.join(app);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }

    #[cfg(windows)]
    if let Some(path) = registry_chrome_path() {
        if path.is_file() {
            return Ok(path);
        }
    }

    Err(CdpError::BrowserNotFound)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "macos")] {
        fn well_known_paths() -> Vec<PathBuf> {
            [
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                "/Applications/Chromium.app/Contents/MacOS/Chromium",
                "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
            ]
            .iter()
            .map(PathBuf::from)
            .collect()
        }
    } else if #[cfg(windows)] {
        fn well_known_paths() -> Vec<PathBuf> {
            let mut paths = Vec::new();
            for var in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
                if let Ok(base) = std::env::var(var) {
                    paths.push(PathBuf::from(&base).join("Google/Chrome/Application/chrome.exe"));
                    paths.push(PathBuf::from(&base).join("Microsoft/Edge/Application/msedge.exe"));
                    paths.push(PathBuf::from(&base).join("Chromium/Application/chrome.exe"));
                }
            }
            paths
        }
    } else {
        fn well_known_paths() -> Vec<PathBuf> {
            [
                "/usr/bin/google-chrome-stable",
                "/usr/bin/google-chrome",
                "/usr/bin/chromium",
                "/usr/bin/chromium-browser",
                "/snap/bin/chromium",
                "/opt/google/chrome/chrome",
            ]
            .iter()
            .map(PathBuf::from)
            .collect()
        }
    }
}

#[cfg(windows)]
fn registry_chrome_path() -> Option<PathBuf> {
    use winreg::enums::HKEY_LOCAL_MACHINE;
    use winreg::RegKey;

    RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey("SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\App Paths\\chrome.exe")
        .and_then(|key| key.get_value::<String, _>(""))
        .map(PathBuf::from)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_hint_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-a-browser");
        assert!(matches!(
            find_chromium(Some(&missing)),
            Err(CdpError::BrowserNotFound)
        ));
    }

    #[test]
    fn explicit_hint_bypasses_probing() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chromium");
        std::fs::write(&fake, b"#!/bin/sh\n").unwrap();
        let found = find_chromium(Some(&fake)).unwrap();
        assert_eq!(found.file_name().unwrap(), "chromium");
    }
}
