use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app::adb::runner::argv;
use crate::app::error::AppError;

pub const SCREENSHOT_DEVICE_PATH: &str = "/sdcard/screenshot.png";
pub const SETEDIT_PACKAGE: &str = "io.github.muntashirakon.setedit";
pub const WRITE_SECURE_SETTINGS: &str = "android.permission.WRITE_SECURE_SETTINGS";

pub const MAX_ANIMATION_SCALE: f32 = 10.0;
pub const MAX_SWAPPINESS: u32 = 100;

pub const CPU_GOVERNORS: [&str; 5] = ["performance", "ondemand", "powersave", "schedutil", "interactive"];
pub const THERMAL_PROFILES: [&str; 4] = ["default", "aggressive", "balanced", "conservative"];

const ANIMATION_SCALE_KEYS: [&str; 3] = [
    "window_animation_scale",
    "transition_animation_scale",
    "animator_duration_scale",
];

const KERNEL_VM_TWEAKS: [&str; 6] = [
    "echo 1 > /proc/sys/vm/oom_kill_allocating_task",
    "echo 0 > /proc/sys/vm/page-cluster",
    "echo 10 > /proc/sys/vm/dirty_ratio",
    "echo 5 > /proc/sys/vm/dirty_background_ratio",
    "echo 500 > /proc/sys/vm/dirty_expire_centisecs",
    "echo 100 > /proc/sys/vm/dirty_writeback_centisecs",
];

pub fn devices_args() -> Vec<String> {
    argv(&["devices", "-l"])
}

pub fn root_probe_args() -> Vec<String> {
    argv(&["shell", "su", "-c", "id"])
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RebootMode {
    System,
    Bootloader,
    Recovery,
}

impl RebootMode {
    pub fn args(&self) -> Vec<String> {
        match self {
            RebootMode::System => argv(&["reboot"]),
            RebootMode::Bootloader => argv(&["reboot", "bootloader"]),
            RebootMode::Recovery => argv(&["reboot", "recovery"]),
        }
    }
}

/// One-click device commands; output goes to the log stream only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuickCommand {
    Reboot(RebootMode),
    Screenshot,
    DeviceInfo,
    ListDevices,
}

impl QuickCommand {
    pub fn args(&self) -> Vec<String> {
        match self {
            QuickCommand::Reboot(mode) => mode.args(),
            QuickCommand::Screenshot => argv(&["shell", "screencap", "-p", SCREENSHOT_DEVICE_PATH]),
            QuickCommand::DeviceInfo => argv(&["shell", "getprop"]),
            QuickCommand::ListDevices => devices_args(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageAction {
    /// Local path of a single `.apk`.
    Install(String),
    Uninstall(String),
    Disable(String),
    Enable(String),
    ClearData(String),
}

impl PackageAction {
    pub fn target(&self) -> &str {
        match self {
            PackageAction::Install(value)
            | PackageAction::Uninstall(value)
            | PackageAction::Disable(value)
            | PackageAction::Enable(value)
            | PackageAction::ClearData(value) => value,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let target = self.target();
        match self {
            PackageAction::Install(_) => argv(&["install", target]),
            PackageAction::Uninstall(_) => argv(&["uninstall", "--user", "0", target]),
            PackageAction::Disable(_) => argv(&["shell", "pm", "disable-user", "--user", "0", target]),
            PackageAction::Enable(_) => argv(&["shell", "pm", "enable", target]),
            PackageAction::ClearData(_) => argv(&["shell", "pm", "clear", target]),
        }
    }

    /// Actions that change the installed or enabled set.
    pub fn refreshes_listing(&self) -> bool {
        !matches!(self, PackageAction::ClearData(_))
    }

    pub fn validate(&self, trace_id: &str) -> Result<(), AppError> {
        let field = match self {
            PackageAction::Install(_) => "apk_path",
            _ => "package_name",
        };
        if self.target().trim().is_empty() {
            return Err(AppError::validation(format!("{field} is required"), trace_id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Pull,
    Push,
}

/// Where a pull lands when no destination was given.
pub fn default_pull_destination() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Local directory a pull writes into: the destination itself, or its parent
/// when the last component looks like a file name.
pub fn pull_destination_dir(destination: &Path) -> Option<&Path> {
    let looks_like_file = destination
        .file_name()
        .is_some_and(|name| name.to_string_lossy().contains('.'));
    if looks_like_file {
        destination.parent().filter(|parent| !parent.as_os_str().is_empty())
    } else {
        Some(destination)
    }
}

/// Push needs both paths and an existing local source. Pull falls back to
/// [`default_pull_destination`] when `destination` is blank.
pub fn transfer_args(
    direction: TransferDirection,
    source: &str,
    destination: &str,
    trace_id: &str,
) -> Result<Vec<String>, AppError> {
    let source = source.trim();
    let destination = destination.trim();
    match direction {
        TransferDirection::Push => {
            if source.is_empty() || destination.is_empty() {
                return Err(AppError::validation(
                    "Please specify both source and destination paths",
                    trace_id,
                ));
            }
            if !Path::new(source).exists() {
                return Err(AppError::validation(
                    format!("Source file does not exist: {source}"),
                    trace_id,
                ));
            }
            Ok(argv(&["push", source, destination]))
        }
        TransferDirection::Pull => {
            if source.is_empty() {
                return Err(AppError::validation(
                    "Please specify the device path to pull",
                    trace_id,
                ));
            }
            let destination = if destination.is_empty() {
                default_pull_destination().to_string_lossy().to_string()
            } else {
                destination.to_string()
            };
            Ok(vec!["pull".to_string(), source.to_string(), destination])
        }
    }
}

fn settings_put(namespace: &str, key: &str, value: &str) -> Vec<String> {
    argv(&["shell", "settings", "put", namespace, key, value])
}

/// One command per global animation key. `0.0` disables animations.
pub fn animation_scale_commands(scale: f32, trace_id: &str) -> Result<Vec<Vec<String>>, AppError> {
    if !scale.is_finite() || !(0.0..=MAX_ANIMATION_SCALE).contains(&scale) {
        return Err(AppError::validation(
            format!("Animation scale must be between 0 and {MAX_ANIMATION_SCALE}"),
            trace_id,
        ));
    }
    let value = scale.to_string();
    Ok(ANIMATION_SCALE_KEYS
        .iter()
        .map(|key| settings_put("global", key, &value))
        .collect())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    Normal,
    Hz90,
    Hz120,
    UltraSmooth,
}

impl RefreshMode {
    /// `Normal` leaves the device settings untouched.
    pub fn commands(&self) -> Vec<Vec<String>> {
        match self {
            RefreshMode::Normal => Vec::new(),
            RefreshMode::Hz90 => vec![settings_put("system", "peak_refresh_rate", "90")],
            RefreshMode::Hz120 => vec![settings_put("system", "peak_refresh_rate", "120")],
            RefreshMode::UltraSmooth => vec![
                settings_put("system", "min_refresh_rate", "120"),
                settings_put("system", "peak_refresh_rate", "120"),
            ],
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            RefreshMode::Normal => "Normal",
            RefreshMode::Hz90 => "90Hz Mode",
            RefreshMode::Hz120 => "120Hz Mode",
            RefreshMode::UltraSmooth => "Ultra Smooth",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GpuRenderer {
    SkiaGl,
    OpenGl,
}

impl GpuRenderer {
    pub fn command(&self) -> Vec<String> {
        let value = match self {
            GpuRenderer::SkiaGl => "skiagl",
            GpuRenderer::OpenGl => "opengl",
        };
        settings_put("global", "debug.hwui.renderer", value)
    }
}

pub fn grant_setedit_args() -> Vec<String> {
    argv(&["shell", "pm", "grant", SETEDIT_PACKAGE, WRITE_SECURE_SETTINGS])
}

/// Tweaks that write kernel or sysfs knobs; every command must run elevated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RootTweak {
    ZramSize(u32),
    Swappiness(u32),
    KernelVm,
    CpuGovernor(String),
    ThermalProfile(String),
}

impl RootTweak {
    pub fn validate(&self, trace_id: &str) -> Result<(), AppError> {
        match self {
            RootTweak::ZramSize(0) => Err(AppError::validation(
                "zRAM size must be greater than 0 MB",
                trace_id,
            )),
            RootTweak::Swappiness(value) if *value > MAX_SWAPPINESS => Err(AppError::validation(
                format!("Swappiness must be between 0 and {MAX_SWAPPINESS}"),
                trace_id,
            )),
            RootTweak::CpuGovernor(governor) if !CPU_GOVERNORS.contains(&governor.as_str()) => {
                Err(AppError::validation(
                    format!("Unsupported CPU governor: {governor}"),
                    trace_id,
                ))
            }
            RootTweak::ThermalProfile(profile)
                if !THERMAL_PROFILES.contains(&profile.to_lowercase().as_str()) =>
            {
                Err(AppError::validation(
                    format!("Unsupported thermal profile: {profile}"),
                    trace_id,
                ))
            }
            _ => Ok(()),
        }
    }

    /// Device shell command lines, validated first. Each becomes `shell <line>`
    /// and is wrapped in `su -c` by the runner.
    pub fn commands(&self, trace_id: &str) -> Result<Vec<Vec<String>>, AppError> {
        self.validate(trace_id)?;
        let lines = match self {
            RootTweak::ZramSize(size) => vec![format!(
                "echo {size}M > /sys/block/zram0/disksize && mkswap /dev/block/zram0 && swapon /dev/block/zram0"
            )],
            RootTweak::Swappiness(value) => vec![format!("echo {value} > /proc/sys/vm/swappiness")],
            RootTweak::KernelVm => KERNEL_VM_TWEAKS.iter().map(|line| line.to_string()).collect(),
            RootTweak::CpuGovernor(governor) => vec![format!(
                "echo {governor} > /sys/devices/system/cpu/cpu0/cpufreq/scaling_governor"
            )],
            RootTweak::ThermalProfile(profile) => vec![format!(
                "echo {} > /sys/class/thermal/thermal_message/sconfig",
                profile.to_lowercase()
            )],
        };
        Ok(lines
            .into_iter()
            .map(|line| vec!["shell".to_string(), line])
            .collect())
    }

    pub fn describe(&self) -> String {
        match self {
            RootTweak::ZramSize(size) => format!("Set zRAM size to {size}MB"),
            RootTweak::Swappiness(value) => format!("Set swappiness to {value}"),
            RootTweak::KernelVm => "Applied kernel tweaks for performance".to_string(),
            RootTweak::CpuGovernor(governor) => format!("Set CPU governor to {governor}"),
            RootTweak::ThermalProfile(profile) => {
                format!("Applied thermal profile: {}", profile.to_lowercase())
            }
        }
    }
}
