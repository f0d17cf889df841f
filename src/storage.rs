// SPDX-License-Identifier: GPL-3.0-only

//! Output locations for recordings

use crate::constants::APP_NAME;
use crate::constants::recording::FILE_EXTENSION;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default recordings directory: `<data_local_dir>/filtercam/recordings`
pub fn recordings_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("recordings")
}

/// File name for a new recording, unique across calls
pub fn recording_file_name() -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("recording_{}_{}.{}", timestamp, &id[..8], FILE_EXTENSION)
}

/// Create `dir` if needed and return a fresh recording path inside it
pub fn unique_recording_path(dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(recording_file_name());
    debug!(path = %path.display(), "Generated recording path");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names_are_unique_mp4() {
        let first = recording_file_name();
        let second = recording_file_name();
        assert_ne!(first, second);
        assert!(first.starts_with("recording_"));
        assert!(first.ends_with(".mp4"));
    }

    #[test]
    fn test_recordings_dir_is_app_scoped() {
        let dir = recordings_dir();
        assert!(dir.ends_with("filtercam/recordings"));
    }
}
