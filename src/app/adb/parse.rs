use std::sync::OnceLock;

use regex::Regex;

use crate::app::adb::runner::CommandResult;
use crate::app::models::{ConnectionState, DeviceSummary, PackageEntry, RootState};

pub const PACKAGE_MARKER: &str = "package:";
pub const LISTING_FAILURE_MARKER: &str = "Error";
pub const INSTALL_SUCCESS_MARKER: &str = "Success";

/// Accepts a listing only if the command ran, produced at least one package
/// marker, and carries no failure marker.
pub fn is_usable_listing(result: &CommandResult) -> bool {
    !result.is_failure()
        && result.text.contains(PACKAGE_MARKER)
        && !result.text.contains(LISTING_FAILURE_MARKER)
}

/// One entry per `package:` line, in device order, duplicates kept.
/// `pm list packages -i` appends `  installer=<pkg>`; that suffix is split off.
pub fn parse_package_lines(output: &str) -> Vec<PackageEntry> {
    output
        .lines()
        .filter(|line| line.starts_with(PACKAGE_MARKER))
        .filter_map(|line| {
            let (_, payload) = line.split_once(':')?;
            let payload = payload.trim();
            let mut tokens = payload.split_whitespace();
            let identifier = tokens.next()?;
            let mut entry = PackageEntry::new(identifier);
            entry.installer = tokens
                .find_map(|token| token.strip_prefix("installer="))
                .filter(|value| !value.is_empty() && *value != "null")
                .map(str::to_string);
            Some(entry)
        })
        .collect()
}

/// `pm list packages -d <id>` filters by substring, so only an exact line counts.
pub fn is_package_disabled(output: &str, identifier: &str) -> bool {
    let wanted = format!("{PACKAGE_MARKER}{identifier}");
    output.lines().any(|line| line.trim() == wanted)
}

const LABEL_PATTERNS: [&str; 3] = [
    r#"application: label=(?:'(.*?)'|"(.*?)")"#,
    r#"package:.*?labelRes=.*?label=(?:'(.*?)'|"(.*?)")"#,
    r#"Package \[.*?\] \(.*?\):.*?name=.*? label=(?:'(.*?)'|"(.*?)")"#,
];

fn label_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        LABEL_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

/// Ordered patterns over `dumpsys package` output; the first pattern that matches wins.
pub fn extract_label(dump: &str) -> Option<String> {
    for pattern in label_patterns() {
        if let Some(caps) = pattern.captures(dump) {
            if let Some(value) = caps.get(1).or_else(|| caps.get(2)) {
                return Some(value.as_str().to_string());
            }
        }
    }
    None
}

fn device_lines(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with('*'))
        .filter(|line| !line.to_lowercase().starts_with("list of devices"))
}

pub fn connection_state_from_devices(output: &str) -> ConnectionState {
    let body = device_lines(output).collect::<Vec<_>>().join("\n");
    if body.contains("device") && !body.contains("unauthorized") {
        ConnectionState::Connected
    } else {
        ConnectionState::Disconnected
    }
}

pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    device_lines(output)
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let model = tokens
                .iter()
                .skip(2)
                .find_map(|token| token.strip_prefix("model:"))
                .map(str::to_string);
            Some(DeviceSummary {
                serial: tokens[0].to_string(),
                state: tokens[1].to_string(),
                model,
            })
        })
        .collect()
}

pub fn root_state_from_id(output: &str) -> RootState {
    if output.contains("uid=0") {
        RootState::Granted
    } else {
        RootState::NotAvailable
    }
}

/// The device bridge has no structured install status; it prints `Success`
/// or `Failure [INSTALL_...]`. All success detection goes through here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallVerdict {
    pub success: bool,
    pub failure_code: Option<String>,
}

impl InstallVerdict {
    pub fn from_output(output: &str) -> Self {
        static CODE: OnceLock<Option<Regex>> = OnceLock::new();
        let success = output.contains(INSTALL_SUCCESS_MARKER);
        let failure_code = if success {
            None
        } else {
            CODE.get_or_init(|| Regex::new(r"\b((?:INSTALL|DELETE)_[A-Z0-9_]+)").ok())
                .as_ref()
                .and_then(|re| re.captures(output))
                .map(|caps| caps[1].to_string())
        };
        Self {
            success,
            failure_code,
        }
    }
}
