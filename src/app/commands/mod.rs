use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::adb::apk::{is_bundle_file, is_package_file, normalize_apk_path};
use crate::app::adb::parse::{
    connection_state_from_devices, parse_adb_devices, root_state_from_id, InstallVerdict,
};
use crate::app::adb::runner::{CommandResult, RunOptions};
use crate::app::bundle::BundleInstaller;
use crate::app::config::{load_config, save_config, validate_config, AppConfig};
use crate::app::device::{
    animation_scale_commands, devices_args, grant_setedit_args, pull_destination_dir,
    root_probe_args, transfer_args, GpuRenderer, PackageAction, QuickCommand, RefreshMode,
    RootTweak, TransferDirection,
};
use crate::app::error::AppError;
use crate::app::events::CoreEvent;
use crate::app::models::{
    CommandResponse, ConnectionReport, ConnectionState, DeviceSnapshot, InstallOutcome,
    ListingStatus, LogLine, RootState,
};
use crate::app::packages::{list_third_party_packages, LabelResolver};
use crate::app::scheduler::TaskHandle;
use crate::app::shortcuts::{Shortcut, ShortcutKind};
use crate::app::state::AppState;


pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

/// Schedules `task` with the configured timeout and the task's own cancel token.
fn spawn_with_state<T, F>(state: &Arc<AppState>, name: &str, task: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&AppState, RunOptions) -> T + Send + 'static,
{
    let state_clone = Arc::clone(state);
    let options = state.run_options();
    state.scheduler.spawn(name, move |cancel| {
        task(&state_clone, options.with_cancel(&cancel))
    })
}

fn run_sequence(
    state: &AppState,
    commands: &[Vec<String>],
    options: &RunOptions,
    trace_id: &str,
) -> Vec<CommandResult> {
    let mut results = Vec::with_capacity(commands.len());
    for args in commands {
        if options.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            warn!(trace_id = %trace_id, "command sequence cancelled");
            break;
        }
        results.push(state.runner.run(args, options));
    }
    results
}

fn check_root_inner(state: &AppState, options: &RunOptions, trace_id: &str) -> RootState {
    let result = state.runner.run(&root_probe_args(), options);
    let root = if result.is_failure() {
        state.log.push(format!("Root check failed: {}", result.text.trim()));
        RootState::CheckFailed
    } else {
        root_state_from_id(&result.text)
    };
    state.snapshot.set_root(root);
    info!(trace_id = %trace_id, root = ?root, "root status checked");
    root
}

fn check_connection_inner(state: &AppState, options: &RunOptions, trace_id: &str) -> ConnectionReport {
    let result = state.runner.run(&devices_args(), options);
    let report = if result.is_failure() {
        warn!(trace_id = %trace_id, error = %result.text, "connection check failed");
        state
            .log
            .push(format!("Connection check failed: {}", result.text.trim()));
        ConnectionReport {
            state: ConnectionState::Error,
            devices: Vec::new(),
        }
    } else {
        ConnectionReport {
            state: connection_state_from_devices(&result.text),
            devices: parse_adb_devices(&result.text),
        }
    };
    state.snapshot.set_connection(report.state);
    info!(trace_id = %trace_id, state = ?report.state, devices = report.devices.len(), "connection checked");
    check_root_inner(state, options, trace_id);
    report
}

fn refresh_packages_inner(state: &AppState, options: &RunOptions, trace_id: &str) -> ListingStatus {
    let stale = state.cancel_label_tasks();
    if stale > 0 {
        debug!(trace_id = %trace_id, stale, "cancelled label lookups of the previous listing");
    }
    state.snapshot.begin_listing();
    match list_third_party_packages(state.runner.as_ref(), options, trace_id) {
        Ok(entries) if entries.is_empty() => {
            state.snapshot.replace_packages(Vec::new(), ListingStatus::Empty);
            state.log.push("No apps found in device");
            ListingStatus::Empty
        }
        Ok(entries) => {
            let count = entries.len();
            let generation = state
                .snapshot
                .replace_packages(entries.clone(), ListingStatus::Loaded);
            state.log.push(format!("Loaded {count} apps"));
            info!(trace_id = %trace_id, count, generation, "package listing loaded");
            let resolver = LabelResolver {
                runner: Arc::clone(&state.runner),
                store: Arc::clone(&state.snapshot),
                log: Arc::clone(&state.log),
                options: RunOptions::new(options.timeout),
            };
            // Label tasks outlive this refresh; only their cancel tokens are kept.
            let handles = resolver.spawn_all(&state.scheduler, generation, &entries, trace_id);
            state.track_label_tasks(handles.iter().map(|handle| handle.cancel.clone()).collect());
            ListingStatus::Loaded
        }
        Err(err) => {
            warn!(trace_id = %trace_id, code = %err.code, error = %err.error, "package listing failed");
            state.snapshot.replace_packages(Vec::new(), ListingStatus::Failed);
            state.log.push(err.error);
            ListingStatus::Failed
        }
    }
}

fn install_package_inner(
    state: &AppState,
    apk_path: &str,
    options: &RunOptions,
    trace_id: &str,
) -> InstallOutcome {
    let result = state
        .runner
        .run(&PackageAction::Install(apk_path.to_string()).args(), options);
    let outcome = if result.is_failure() {
        InstallOutcome::failed(
            result.text.trim(),
            result.failure.error_code().map(str::to_string),
        )
    } else {
        let verdict = InstallVerdict::from_output(&result.text);
        if verdict.success {
            InstallOutcome::succeeded(result.text.trim())
        } else {
            InstallOutcome::failed(result.text.trim(), verdict.failure_code)
        }
    };
    info!(trace_id = %trace_id, apk = %apk_path, success = outcome.success, "package install finished");
    if outcome.success {
        refresh_packages_inner(state, options, trace_id);
    }
    outcome
}

fn install_bundle_inner(
    state: &AppState,
    bundle_path: &Path,
    options: &RunOptions,
    trace_id: &str,
) -> InstallOutcome {
    let bundle_display = bundle_path.display().to_string();
    let outcome = BundleInstaller::new(state.runner.as_ref())
        .with_options(options.clone())
        .with_temp_root(state.bundle_temp_root())
        .with_log(&state.log)
        .on_phase(|phase| {
            (state.sink)(CoreEvent::InstallPhase {
                trace_id: trace_id.to_string(),
                bundle_path: bundle_display.clone(),
                phase,
            })
        })
        .install(bundle_path, trace_id);
    if outcome.success {
        refresh_packages_inner(state, options, trace_id);
    }
    outcome
}

/// Probes `devices -l`, then root. Both results land in the snapshot.
pub fn check_connection(
    state: &Arc<AppState>,
    trace_id: Option<String>,
) -> CommandResponse<TaskHandle<ConnectionReport>> {
    let trace_id = resolve_trace_id(trace_id);
    let trace_clone = trace_id.clone();
    let handle = spawn_with_state(state, "check_connection", move |state, options| {
        check_connection_inner(state, &options, &trace_clone)
    });
    CommandResponse {
        trace_id,
        data: handle,
    }
}

pub fn check_root(
    state: &Arc<AppState>,
    trace_id: Option<String>,
) -> CommandResponse<TaskHandle<RootState>> {
    let trace_id = resolve_trace_id(trace_id);
    let trace_clone = trace_id.clone();
    let handle = spawn_with_state(state, "check_root", move |state, options| {
        check_root_inner(state, &options, &trace_clone)
    });
    CommandResponse {
        trace_id,
        data: handle,
    }
}

/// Replaces the package collection. The handle completes once the listing is
/// in the snapshot; labels keep arriving afterwards as `LabelResolved` events.
pub fn refresh_packages(
    state: &Arc<AppState>,
    trace_id: Option<String>,
) -> CommandResponse<TaskHandle<ListingStatus>> {
    let trace_id = resolve_trace_id(trace_id);
    let trace_clone = trace_id.clone();
    let handle = spawn_with_state(state, "refresh_packages", move |state, options| {
        refresh_packages_inner(state, &options, &trace_clone)
    });
    CommandResponse {
        trace_id,
        data: handle,
    }
}

pub fn install_package(
    state: &Arc<AppState>,
    apk_path: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<TaskHandle<InstallOutcome>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&apk_path, "apk_path", &trace_id)?;
    if !is_package_file(&apk_path) {
        return Err(AppError::validation("apk_path must be an .apk file", &trace_id));
    }
    let path = normalize_apk_path(&apk_path).to_string_lossy().to_string();
    let trace_clone = trace_id.clone();
    let handle = spawn_with_state(state, "install_package", move |state, options| {
        install_package_inner(state, &path, &options, &trace_clone)
    });
    Ok(CommandResponse {
        trace_id,
        data: handle,
    })
}

pub fn install_bundle(
    state: &Arc<AppState>,
    bundle_path: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<TaskHandle<InstallOutcome>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&bundle_path, "bundle_path", &trace_id)?;
    if !is_bundle_file(&bundle_path) {
        return Err(AppError::validation("bundle_path must be an .xapk file", &trace_id));
    }
    let path = normalize_apk_path(&bundle_path);
    let trace_clone = trace_id.clone();
    let handle = spawn_with_state(state, "install_bundle", move |state, options| {
        install_bundle_inner(state, &path, &options, &trace_clone)
    });
    Ok(CommandResponse {
        trace_id,
        data: handle,
    })
}

/// Uninstall, enable, disable, clear data, or a plain single-package install.
/// Actions that change the listing refresh it once the command has returned.
pub fn run_package_action(
    state: &Arc<AppState>,
    action: PackageAction,
    trace_id: Option<String>,
) -> Result<CommandResponse<TaskHandle<CommandResult>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    action.validate(&trace_id)?;
    let trace_clone = trace_id.clone();
    let handle = spawn_with_state(state, "package_action", move |state, options| {
        let result = state.runner.run(&action.args(), &options);
        if action.refreshes_listing() && !result.is_failure() {
            refresh_packages_inner(state, &options, &trace_clone);
        }
        result
    });
    Ok(CommandResponse {
        trace_id,
        data: handle,
    })
}

/// Reboots, screenshot, device info, device list. Output only goes to the log.
pub fn run_quick_command(
    state: &Arc<AppState>,
    command: QuickCommand,
    trace_id: Option<String>,
) -> CommandResponse<TaskHandle<CommandResult>> {
    let trace_id = resolve_trace_id(trace_id);
    let handle = spawn_with_state(state, "quick_command", move |state, options| {
        state.runner.run(&command.args(), &options)
    });
    CommandResponse {
        trace_id,
        data: handle,
    }
}

pub fn transfer_file(
    state: &Arc<AppState>,
    direction: TransferDirection,
    source: String,
    destination: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<TaskHandle<CommandResult>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let args = transfer_args(direction, &source, &destination, &trace_id)?;
    if direction == TransferDirection::Pull {
        if let Some(dir) = pull_destination_dir(Path::new(&args[2])) {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|err| {
                    AppError::system(format!("Failed to create {}: {err}", dir.display()), &trace_id)
                })?;
                state.log.push(format!("Created directory: {}", dir.display()));
            }
        }
    }
    state.log.push(format!(
        "{} {} to {}",
        match direction {
            TransferDirection::Pull => "Pulling",
            TransferDirection::Push => "Pushing",
        },
        args[1],
        args[2]
    ));
    let handle = spawn_with_state(state, "transfer_file", move |state, options| {
        state.runner.run(&args, &options)
    });
    Ok(CommandResponse {
        trace_id,
        data: handle,
    })
}

fn spawn_settings(
    state: &Arc<AppState>,
    name: &str,
    commands: Vec<Vec<String>>,
    elevated: bool,
    summary: String,
    trace_id: String,
) -> CommandResponse<TaskHandle<Vec<CommandResult>>> {
    let trace_clone = trace_id.clone();
    let handle = spawn_with_state(state, name, move |state, options| {
        let options = if elevated { options.elevated() } else { options };
        let results = run_sequence(state, &commands, &options, &trace_clone);
        state.log.push(summary);
        results
    });
    CommandResponse {
        trace_id,
        data: handle,
    }
}

pub fn set_animation_scale(
    state: &Arc<AppState>,
    scale: f32,
    trace_id: Option<String>,
) -> Result<CommandResponse<TaskHandle<Vec<CommandResult>>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let commands = animation_scale_commands(scale, &trace_id)?;
    Ok(spawn_settings(
        state,
        "animation_scale",
        commands,
        false,
        format!("Animation scales set to {scale}x"),
        trace_id,
    ))
}

pub fn set_refresh_mode(
    state: &Arc<AppState>,
    mode: RefreshMode,
    trace_id: Option<String>,
) -> CommandResponse<TaskHandle<Vec<CommandResult>>> {
    let trace_id = resolve_trace_id(trace_id);
    spawn_settings(
        state,
        "refresh_mode",
        mode.commands(),
        false,
        format!("FPS mode set to {}", mode.describe()),
        trace_id,
    )
}

pub fn set_gpu_renderer(
    state: &Arc<AppState>,
    renderer: GpuRenderer,
    trace_id: Option<String>,
) -> CommandResponse<TaskHandle<Vec<CommandResult>>> {
    let trace_id = resolve_trace_id(trace_id);
    let command = renderer.command();
    let summary = format!(
        "GPU renderer set to {}",
        command.last().map(String::as_str).unwrap_or_default()
    );
    spawn_settings(state, "gpu_renderer", vec![command], false, summary, trace_id)
}

pub fn grant_setedit_permission(
    state: &Arc<AppState>,
    trace_id: Option<String>,
) -> CommandResponse<TaskHandle<Vec<CommandResult>>> {
    let trace_id = resolve_trace_id(trace_id);
    spawn_settings(
        state,
        "grant_setedit",
        vec![grant_setedit_args()],
        false,
        "Granted WRITE_SECURE_SETTINGS to SetEdit app".to_string(),
        trace_id,
    )
}

/// Validated before anything is scheduled; every command runs elevated.
pub fn apply_root_tweak(
    state: &Arc<AppState>,
    tweak: RootTweak,
    trace_id: Option<String>,
) -> Result<CommandResponse<TaskHandle<Vec<CommandResult>>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let commands = tweak.commands(&trace_id)?;
    Ok(spawn_settings(
        state,
        "root_tweak",
        commands,
        true,
        tweak.describe(),
        trace_id,
    ))
}

fn publish_shortcuts(state: &AppState, items: Vec<Shortcut>) {
    (state.sink)(CoreEvent::ShortcutsChanged(items));
}

pub fn list_shortcuts(state: &Arc<AppState>, trace_id: Option<String>) -> CommandResponse<Vec<Shortcut>> {
    let trace_id = resolve_trace_id(trace_id);
    let items = state.lock_shortcuts().list().to_vec();
    CommandResponse {
        trace_id,
        data: items,
    }
}

/// The shortcut is kept in memory even if writing the file fails; the failure
/// is reported to the log.
pub fn add_shortcut(
    state: &Arc<AppState>,
    path: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<Shortcut>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&path, "path", &trace_id)?;
    let path = normalize_apk_path(path.trim());
    let shortcut = Shortcut::from_file(&path.to_string_lossy(), &trace_id)?;
    let items = {
        let mut store = state.lock_shortcuts();
        if let Err(err) = store.add(shortcut.clone(), &trace_id) {
            warn!(trace_id = %trace_id, error = %err.error, "shortcut not persisted");
            state.log.push(err.error);
        }
        store.list().to_vec()
    };
    state
        .log
        .push(format!("Added shortcut for {}", shortcut.label));
    publish_shortcuts(state, items);
    Ok(CommandResponse {
        trace_id,
        data: shortcut,
    })
}

/// Out-of-range indices leave the list unchanged and return `None`. A failed
/// write is reported to the log, the entry stays removed.
pub fn remove_shortcut(
    state: &Arc<AppState>,
    index: usize,
    trace_id: Option<String>,
) -> CommandResponse<Option<Shortcut>> {
    let trace_id = resolve_trace_id(trace_id);
    let (removed, items) = {
        let mut store = state.lock_shortcuts();
        let removed = store.remove_at(index, &trace_id).map(|(shortcut, persisted)| {
            if let Err(err) = persisted {
                warn!(trace_id = %trace_id, error = %err.error, "shortcut removal not persisted");
                state.log.push(err.error);
            }
            shortcut
        });
        (removed, store.list().to_vec())
    };
    if let Some(shortcut) = &removed {
        state
            .log
            .push(format!("Removed shortcut for {}", shortcut.label));
        publish_shortcuts(state, items);
    }
    CommandResponse {
        trace_id,
        data: removed,
    }
}

pub fn install_shortcut(
    state: &Arc<AppState>,
    index: usize,
    trace_id: Option<String>,
) -> Result<CommandResponse<TaskHandle<InstallOutcome>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let shortcut = state.lock_shortcuts().get(index).cloned().ok_or_else(|| {
        AppError::out_of_range(format!("No shortcut at index {index}"), &trace_id)
    })?;
    state
        .log
        .push(format!("Installing {} from shortcut...", shortcut.label));
    let trace_clone = trace_id.clone();
    let handle = spawn_with_state(state, "install_shortcut", move |state, options| {
        match shortcut.kind {
            ShortcutKind::SinglePackage => {
                install_package_inner(state, &shortcut.source_path, &options, &trace_clone)
            }
            ShortcutKind::Bundle => install_bundle_inner(
                state,
                Path::new(&shortcut.source_path),
                &options,
                &trace_clone,
            ),
        }
    });
    Ok(CommandResponse {
        trace_id,
        data: handle,
    })
}

pub fn device_snapshot(state: &Arc<AppState>, trace_id: Option<String>) -> CommandResponse<DeviceSnapshot> {
    CommandResponse {
        trace_id: resolve_trace_id(trace_id),
        data: state.snapshot.current(),
    }
}

pub fn log_lines(state: &Arc<AppState>, trace_id: Option<String>) -> CommandResponse<Vec<LogLine>> {
    CommandResponse {
        trace_id: resolve_trace_id(trace_id),
        data: state.log.lines(),
    }
}

pub fn clear_log(state: &Arc<AppState>, trace_id: Option<String>) -> CommandResponse<bool> {
    state.log.clear();
    CommandResponse {
        trace_id: resolve_trace_id(trace_id),
        data: true,
    }
}

pub fn get_config(trace_id: Option<String>) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

pub fn save_app_config(
    config: AppConfig,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = validate_config(config);
    save_config(&config, &trace_id)?;
    info!(trace_id = %trace_id, "config saved");
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

/// Connection probe followed by a first listing; what the front-end runs at launch.
pub fn startup(state: &Arc<AppState>, trace_id: Option<String>) -> CommandResponse<TaskHandle<ListingStatus>> {
    let trace_id = resolve_trace_id(trace_id);
    let trace_clone = trace_id.clone();
    let handle = spawn_with_state(state, "startup", move |state, options| {
        let report = check_connection_inner(state, &options, &trace_clone);
        if report.state != ConnectionState::Connected {
            state.log.push(report.state.display());
        }
        refresh_packages_inner(state, &options, &trace_clone)
    });
    CommandResponse {
        trace_id,
        data: handle,
    }
}

pub fn shutdown(state: &Arc<AppState>) {
    let trace_id = resolve_trace_id(None);
    info!(trace_id = %trace_id, "shutting down");
    state.shutdown(SHUTDOWN_GRACE, &trace_id);
}
