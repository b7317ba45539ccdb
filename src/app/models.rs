use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionReport {
    pub state: ConnectionState,
    pub devices: Vec<DeviceSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageEntry {
    pub identifier: String,
    /// Placeholder equal to `identifier` until a label resolution lands.
    pub label: String,
    pub enabled: bool,
    pub installer: Option<String>,
}

impl PackageEntry {
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            label: identifier.clone(),
            identifier,
            enabled: true,
            installer: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn display(&self) -> &'static str {
        match self {
            ConnectionState::Unknown => "Checking...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected (Check USB Debugging)",
            ConnectionState::Error => "Connection Error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RootState {
    #[default]
    Unknown,
    Granted,
    NotAvailable,
    CheckFailed,
}

impl RootState {
    pub fn display(&self) -> &'static str {
        match self {
            RootState::Unknown => "Root: Checking...",
            RootState::Granted => "Root: Granted",
            RootState::NotAvailable => "Root: Not Available",
            RootState::CheckFailed => "Root: Check Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ListingStatus {
    #[default]
    Idle,
    Loading,
    Loaded,
    /// The device answered but reported no third-party packages.
    Empty,
    /// No candidate command produced parseable output.
    Failed,
}

/// Immutable view of device state handed to the rendering layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeviceSnapshot {
    pub connection: ConnectionState,
    pub root: RootState,
    pub listing: ListingStatus,
    pub generation: u64,
    pub packages: Vec<PackageEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstallPhase {
    Created,
    Extracting,
    Scanning,
    Installing,
    CleaningUp,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleManifestEntry {
    pub file_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallOutcome {
    pub success: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl InstallOutcome {
    pub fn succeeded(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            error_code: None,
        }
    }

    pub fn failed(detail: impl Into<String>, error_code: Option<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            error_code,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: String,
    pub message: String,
}

impl LogLine {
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp, self.message)
    }
}
