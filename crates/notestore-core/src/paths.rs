//! XDG Base Directory Spec compliant path resolution.
//!
//! Store files live in the application data directory:
//! - `$XDG_DATA_HOME/notestore/` when `XDG_DATA_HOME` is set
//! - `~/.local/share/notestore/` otherwise (macOS and Linux)
//! - `%LOCALAPPDATA%/notestore/` on Windows

use std::path::{Path, PathBuf};

const APP_DIR: &str = "notestore";

/// Returns the data directory holding store files.
pub fn data_dir() -> PathBuf {
    data_dir_from(std::env::var("XDG_DATA_HOME").ok().as_deref())
}

fn data_dir_from(xdg_data_home: Option<&str>) -> PathBuf {
    if let Some(xdg_data) = xdg_data_home {
        if !xdg_data.is_empty() {
            return PathBuf::from(xdg_data).join(APP_DIR);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            return local_app_data.join(APP_DIR);
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(home) = dirs::home_dir() {
            return home.join(".local").join("share").join(APP_DIR);
        }
    }

    PathBuf::from(".local/share").join(APP_DIR)
}

/// `<dir>/<model_name>.<extension>`
pub fn store_path(dir: &Path, model_name: &str, extension: &str) -> PathBuf {
    dir.join(format!("{model_name}.{extension}"))
}

/// Sibling path a migration writes before swapping: `<file-name>~1`.
pub fn migration_temp_path(store: &Path) -> PathBuf {
    let mut name = store
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push("~1");
    store.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_data_home_wins() {
        let dir = data_dir_from(Some("/xdg/data"));
        assert_eq!(dir, PathBuf::from("/xdg/data/notestore"));
    }

    #[test]
    fn empty_xdg_falls_back() {
        let dir = data_dir_from(Some(""));
        assert!(dir.to_string_lossy().ends_with("notestore"));
        assert_ne!(dir, PathBuf::from("notestore"));
    }

    #[test]
    fn store_path_uses_model_and_extension() {
        let path = store_path(Path::new("/data"), "UnCloudNotesDataModel", "notestore");
        assert_eq!(path, PathBuf::from("/data/UnCloudNotesDataModel.notestore"));
    }

    #[test]
    fn temp_path_is_sibling_with_suffix() {
        let temp = migration_temp_path(Path::new("/data/Notes.notestore"));
        assert_eq!(temp, PathBuf::from("/data/Notes.notestore~1"));
    }
}
