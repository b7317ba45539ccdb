use std::path::{Path, PathBuf};

pub const DEFAULT_ADB_PROGRAM: &str = "adb";

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

fn adb_file_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}

/// `platform-tools/adb` under an SDK root, if it exists.
pub fn sdk_adb_path(sdk_root: &Path) -> Option<PathBuf> {
    let candidate = sdk_root.join("platform-tools").join(adb_file_name());
    candidate.is_file().then_some(candidate)
}

/// Configured path, then `$ANDROID_HOME`/`$ANDROID_SDK_ROOT`, then `adb` on `PATH`.
pub fn resolve_adb_program(config_command_path: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if !normalized.is_empty() {
        return normalized;
    }
    for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
        if let Some(root) = std::env::var_os(var) {
            if let Some(found) = sdk_adb_path(Path::new(&root)) {
                return found.to_string_lossy().to_string();
            }
        }
    }
    DEFAULT_ADB_PROGRAM.to_string()
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program == DEFAULT_ADB_PROGRAM {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err(format!("ADB not found at {program}. Please check the path."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"D:\\platform tools\\adb.exe\"  "),
            "D:\\platform tools\\adb.exe"
        );
        assert_eq!(
            normalize_command_path("'/opt/android/platform-tools/adb'"),
            "/opt/android/platform-tools/adb"
        );
    }

    #[test]
    fn configured_path_wins() {
        assert_eq!(resolve_adb_program(" /custom/adb "), "/custom/adb");
    }

    #[test]
    fn finds_adb_inside_sdk_root() {
        let tmp = TempDir::new().expect("tmp");
        assert!(sdk_adb_path(tmp.path()).is_none());
        let tools = tmp.path().join("platform-tools");
        std::fs::create_dir_all(&tools).expect("mkdir");
        std::fs::write(tools.join(adb_file_name()), b"").expect("touch");
        assert_eq!(sdk_adb_path(tmp.path()), Some(tools.join(adb_file_name())));
    }

    #[test]
    fn validates_missing_and_directory_paths() {
        let err = validate_adb_program("/this/path/should/not/exist/adb").unwrap_err();
        assert!(err.contains("not found"));
        let tmp = TempDir::new().expect("tmp");
        assert!(validate_adb_program(tmp.path().to_str().unwrap()).is_err());
        assert!(validate_adb_program("adb").is_ok());
        assert!(validate_adb_program("  ").is_err());
    }
}
