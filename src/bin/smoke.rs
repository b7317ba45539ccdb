use std::path::PathBuf;
use std::time::{Duration, Instant};

use adb_manager_pro_lib::app::adb::locator::{resolve_adb_program, validate_adb_program};
use adb_manager_pro_lib::app::commands::{
    check_connection, install_bundle, install_package, refresh_packages, shutdown,
};
use adb_manager_pro_lib::app::config::load_config;
use adb_manager_pro_lib::app::error::{AppError, ERR_SYSTEM};
use adb_manager_pro_lib::app::events::noop_sink;
use adb_manager_pro_lib::app::logging::init_logging;
use adb_manager_pro_lib::app::models::{ConnectionState, InstallOutcome, ListingStatus, RootState};
use adb_manager_pro_lib::app::state::AppState;
use serde::Serialize;
use uuid::Uuid;

const LABEL_WAIT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default)]
struct Args {
    json: bool,
    labels: bool,
    bundle_path: Option<PathBuf>,
    apk_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    adb_program: Option<String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|warn|skip
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
}

impl SmokeCheck {
    fn skip(name: &'static str) -> Self {
        Self {
            name,
            status: "skip",
            duration_ms: 0,
            detail: None,
            error_code: None,
        }
    }
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        labels: true,
        ..Args::default()
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--json" => {
                args.json = true;
            }
            "--no-labels" => {
                args.labels = false;
            }
            "--bundle" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--bundle requires a value".to_string())?;
                args.bundle_path = Some(PathBuf::from(value));
            }
            "--apk" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--apk requires a value".to_string())?;
                args.apk_path = Some(PathBuf::from(value));
            }
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--json] [--no-labels] [--apk PATH] [--bundle PATH]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }
    Ok(args)
}

/// Runs `f`, timing it. `Ok((detail, warn))` passes, or warns when `warn` is set.
fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F) -> bool
where
    F: FnOnce() -> Result<(Option<String>, bool), AppError>,
{
    let start = Instant::now();
    match f() {
        Ok((detail, warn)) => {
            checks.push(SmokeCheck {
                name,
                status: if warn { "warn" } else { "pass" },
                duration_ms: start.elapsed().as_millis(),
                detail,
                error_code: None,
            });
            true
        }
        Err(err) => {
            checks.push(SmokeCheck {
                name,
                status: "fail",
                duration_ms: start.elapsed().as_millis(),
                detail: Some(err.error),
                error_code: Some(err.code),
            });
            false
        }
    }
}

fn outcome_check(
    outcome: Option<InstallOutcome>,
    trace_id: &str,
) -> Result<(Option<String>, bool), AppError> {
    match outcome {
        Some(outcome) if outcome.success => Ok((Some(outcome.detail), false)),
        Some(outcome) => Err(AppError::new(
            outcome.error_code.unwrap_or_else(|| ERR_SYSTEM.to_string()),
            outcome.detail,
            trace_id,
        )),
        None => Err(AppError::cancelled("install task did not run", trace_id)),
    }
}

fn finish(summary: SmokeSummary, json: bool) -> ! {
    let output = if json {
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
    } else {
        let mut text = format!("status: {}\ntrace_id: {}\n", summary.status, summary.trace_id);
        for check in &summary.checks {
            text.push_str(&format!("  {:<16} {}", check.name, check.status));
            if let Some(detail) = &check.detail {
                text.push_str(&format!("  {}", detail.lines().next().unwrap_or_default()));
            }
            text.push('\n');
        }
        text
    };
    println!("{output}");
    std::process::exit(if summary.status == "pass" { 0 } else { 1 });
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let mut checks: Vec<SmokeCheck> = Vec::new();

    let config = match load_config(&trace_id) {
        Ok(cfg) => cfg,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "load_config",
                status: "fail",
                duration_ms: 0,
                detail: Some(err.error),
                error_code: Some(err.code),
            });
            finish(
                SmokeSummary {
                    tool: "adb_manager_pro_smoke",
                    status: "fail",
                    trace_id,
                    adb_program: None,
                    checks,
                },
                args.json,
            );
        }
    };
    init_logging(&config.logging.level);

    let adb_program = resolve_adb_program(&config.adb.command_path);
    if !run_check(&mut checks, "adb_program", || {
        validate_adb_program(&adb_program)
            .map(|_| (Some(adb_program.clone()), false))
            .map_err(|err| AppError::not_found(err, &trace_id))
    }) {
        finish(
            SmokeSummary {
                tool: "adb_manager_pro_smoke",
                status: "fail",
                trace_id,
                adb_program: Some(adb_program),
                checks,
            },
            args.json,
        );
    }

    let state = AppState::from_config(config, noop_sink());
    let mut status = "pass";

    let connected = run_check(&mut checks, "connection", || {
        let report = check_connection(&state, Some(trace_id.clone()))
            .data
            .join()
            .ok_or_else(|| AppError::cancelled("connection check did not run", &trace_id))?;
        match report.state {
            ConnectionState::Connected => Ok((
                Some(format!("{} device(s)", report.devices.len())),
                false,
            )),
            other => Err(AppError::dependency(other.display(), &trace_id)),
        }
    });
    if !connected {
        status = "fail";
    }

    let root = state.snapshot.current().root;
    checks.push(SmokeCheck {
        name: "root",
        status: match root {
            RootState::Granted => "pass",
            RootState::Unknown => "skip",
            _ => "warn",
        },
        duration_ms: 0,
        detail: Some(root.display().to_string()),
        error_code: None,
    });

    if connected {
        let listed = run_check(&mut checks, "list_packages", || {
            let listing = refresh_packages(&state, Some(trace_id.clone()))
                .data
                .join()
                .unwrap_or(ListingStatus::Failed);
            let count = state.snapshot.current().packages.len();
            match listing {
                ListingStatus::Loaded => Ok((Some(format!("{count} packages")), false)),
                ListingStatus::Empty => Ok((Some("no third-party packages".to_string()), true)),
                _ => Err(AppError::listing("package listing failed", &trace_id)),
            }
        });
        if !listed {
            status = "fail";
        }

        if listed && args.labels {
            run_check(&mut checks, "labels", || {
                if !state.scheduler.wait_idle(LABEL_WAIT) {
                    return Err(AppError::timeout(
                        format!("{} label tasks still running", state.scheduler.outstanding()),
                        &trace_id,
                    ));
                }
                let snapshot = state.snapshot.current();
                let resolved = snapshot
                    .packages
                    .iter()
                    .filter(|entry| entry.label != entry.identifier)
                    .count();
                Ok((
                    Some(format!("{resolved}/{} labels resolved", snapshot.packages.len())),
                    resolved == 0 && !snapshot.packages.is_empty(),
                ))
            });
        } else {
            checks.push(SmokeCheck::skip("labels"));
        }
    } else {
        checks.push(SmokeCheck::skip("list_packages"));
        checks.push(SmokeCheck::skip("labels"));
    }

    match (&args.apk_path, connected) {
        (Some(path), true) => {
            let ok = run_check(&mut checks, "apk_install", || {
                let response = install_package(
                    &state,
                    path.to_string_lossy().to_string(),
                    Some(trace_id.clone()),
                )?;
                outcome_check(response.data.join(), &trace_id)
            });
            if !ok {
                status = "fail";
            }
        }
        _ => checks.push(SmokeCheck::skip("apk_install")),
    }

    match (&args.bundle_path, connected) {
        (Some(path), true) => {
            let ok = run_check(&mut checks, "bundle_install", || {
                let response = install_bundle(
                    &state,
                    path.to_string_lossy().to_string(),
                    Some(trace_id.clone()),
                )?;
                outcome_check(response.data.join(), &trace_id)
            });
            if !ok {
                status = "fail";
            }
        }
        _ => checks.push(SmokeCheck::skip("bundle_install")),
    }

    shutdown(&state);
    finish(
        SmokeSummary {
            tool: "adb_manager_pro_smoke",
            status,
            trace_id,
            adb_program: Some(adb_program),
            checks,
        },
        args.json,
    );
}
