use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::app::config::DEFAULT_COMMAND_TIMEOUT_SECS;
use crate::app::error::{AppError, ERR_CANCELLED, ERR_NOT_FOUND, ERR_SYSTEM, ERR_TIMEOUT};
use crate::app::events::LogStream;
use crate::app::scheduler::CancelToken;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// stdout, then stderr when the tool wrote anything there.
    pub fn combined(&self) -> String {
        let stderr = self.stderr.trim_end();
        if stderr.is_empty() {
            return self.stdout.clone();
        }
        if self.stdout.trim().is_empty() {
            return self.stderr.clone();
        }
        let mut text = self.stdout.clone();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::<u8>::new();
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&temp[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    cancel: Option<&CancelToken>,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AppError::not_found(
                    format!("ADB not found at {program}. Please check the path."),
                    trace_id,
                )
            } else {
                AppError::system(format!("Failed to spawn command: {err}"), trace_id)
            }
        })?;

    // A chatty child blocks once the pipe buffer fills; drain both streams while we poll.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = drain(stdout);
    let stderr_handle = drain(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                let cancelled = cancel.map(CancelToken::is_cancelled).unwrap_or(false);
                let timed_out = start.elapsed() > timeout;
                if cancelled || timed_out {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Grandchildren may still hold the pipes open; the drain
                    // threads finish on their own once they exit.
                    drop(stdout_handle);
                    drop(stderr_handle);
                    return Err(if cancelled {
                        AppError::cancelled("Command cancelled", trace_id)
                    } else {
                        AppError::timeout(
                            format!("Command timed out after {}s", timeout.as_secs()),
                            trace_id,
                        )
                    });
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(err) => {
                let _ = child.kill();
                drop(stdout_handle);
                drop(stderr_handle);
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum FailureKind {
    None,
    NotFound,
    Timeout,
    Cancelled,
    Other,
}

impl FailureKind {
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            FailureKind::None => None,
            FailureKind::NotFound => Some(ERR_NOT_FOUND),
            FailureKind::Timeout => Some(ERR_TIMEOUT),
            FailureKind::Cancelled => Some(ERR_CANCELLED),
            FailureKind::Other => Some(ERR_SYSTEM),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandResult {
    pub exited_normally: bool,
    pub text: String,
    pub failure: FailureKind,
    pub exit_code: Option<i32>,
}

impl CommandResult {
    pub fn completed(text: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            exited_normally: true,
            text: text.into(),
            failure: FailureKind::None,
            exit_code,
        }
    }

    pub fn failed(failure: FailureKind, text: impl Into<String>) -> Self {
        Self {
            exited_normally: false,
            text: text.into(),
            failure,
            exit_code: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure != FailureKind::None
    }

    pub fn from_error(err: &AppError) -> Self {
        let kind = match err.code.as_str() {
            ERR_NOT_FOUND => FailureKind::NotFound,
            ERR_TIMEOUT => FailureKind::Timeout,
            ERR_CANCELLED => FailureKind::Cancelled,
            _ => FailureKind::Other,
        };
        Self::failed(kind, err.error.clone())
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    pub elevated: bool,
    pub cancel: Option<CancelToken>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS))
    }
}

impl RunOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            elevated: false,
            cancel: None,
        }
    }

    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn with_cancel(mut self, cancel: &CancelToken) -> Self {
        self.cancel = Some(cancel.clone());
        self
    }
}

/// Seam between the device workflows and the external device-bridge process.
pub trait AdbRunner: Send + Sync {
    fn run(&self, args: &[String], options: &RunOptions) -> CommandResult;
}

pub fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Single-quotes `value` for the device shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Routes the whole command through `su -c` on the device. A leading `shell`
/// token is dropped since the rewritten command already runs in the device shell.
pub fn elevate_args(args: &[String]) -> Vec<String> {
    let inner = match args.first().map(String::as_str) {
        Some("shell") => &args[1..],
        _ => args,
    };
    let joined = inner.join(" ");
    vec![
        "shell".to_string(),
        "su".to_string(),
        "-c".to_string(),
        shell_quote(&joined),
    ]
}

pub struct ProcessRunner {
    program: String,
    log: Arc<LogStream>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, log: Arc<LogStream>) -> Self {
        Self {
            program: program.into(),
            log,
        }
    }
}

impl AdbRunner for ProcessRunner {
    fn run(&self, args: &[String], options: &RunOptions) -> CommandResult {
        let trace_id = uuid::Uuid::new_v4().to_string();
        self.log.push(format!(
            "Executing: adb {}{}",
            args.join(" "),
            if options.elevated { " (as root)" } else { "" }
        ));
        let final_args = if options.elevated {
            elevate_args(args)
        } else {
            args.to_vec()
        };
        debug!(trace_id = %trace_id, program = %self.program, args = ?final_args, "running adb");

        let result = match run_command_with_timeout(
            &self.program,
            &final_args,
            options.timeout,
            options.cancel.as_ref(),
            &trace_id,
        ) {
            Ok(output) => CommandResult::completed(output.combined(), output.exit_code),
            Err(err) => {
                warn!(trace_id = %trace_id, code = %err.code, error = %err.error, "adb invocation failed");
                CommandResult::from_error(&err)
            }
        };

        if result.is_failure() {
            self.log.push(result.text.clone());
        } else {
            self.log.push(format!("Result:\n{}", result.text));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::events::noop_sink;

    #[test]
    fn run_command_with_timeout_does_not_deadlock_on_large_stdout() {
        let (program, args) = if cfg!(windows) {
            (
                "cmd.exe",
                argv(&["/C", "for /L %i in (1,1,100000) do @echo 1234567890"]),
            )
        } else {
            (
                "sh",
                argv(&[
                    "-c",
                    "i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done",
                ]),
            )
        };

        let output = run_command_with_timeout(program, &args, Duration::from_secs(20), None, "t")
            .expect("expected large-output command to complete without timing out");

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[test]
    fn missing_executable_is_classified_as_not_found() {
        let err = run_command_with_timeout(
            "/definitely/not/here/adb",
            &argv(&["devices"]),
            Duration::from_secs(1),
            None,
            "trace-nf",
        )
        .unwrap_err();
        assert_eq!(err.code, ERR_NOT_FOUND);
        assert!(err.error.contains("/definitely/not/here/adb"));
        assert_eq!(CommandResult::from_error(&err).failure, FailureKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_is_killed_at_the_timeout() {
        let start = Instant::now();
        let err = run_command_with_timeout(
            "sh",
            &argv(&["-c", "sleep 10"]),
            Duration::from_millis(200),
            None,
            "t",
        )
        .unwrap_err();
        assert_eq!(err.code, ERR_TIMEOUT);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_does_not_wait_for_processes_holding_the_pipes() {
        let start = Instant::now();
        let err = run_command_with_timeout(
            "sh",
            &argv(&["-c", "sleep 3; echo done"]),
            Duration::from_millis(200),
            None,
            "t",
        )
        .unwrap_err();
        assert_eq!(err.code, ERR_TIMEOUT);
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "returned after {:?}",
            start.elapsed()
        );
    }

    #[cfg(unix)]
    #[test]
    fn cancel_token_kills_the_child() {
        let start = Instant::now();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        let err = run_command_with_timeout(
            "sh",
            &argv(&["-c", "sleep 10"]),
            Duration::from_secs(20),
            Some(&cancel),
            "t",
        )
        .unwrap_err();
        assert_eq!(err.code, ERR_CANCELLED);
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "returned after {:?}",
            start.elapsed()
        );
    }

    #[test]
    fn combined_output_appends_stderr() {
        let output = CommandOutput {
            stdout: "Performing Streamed Install".to_string(),
            stderr: "adb: failed to install".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(
            output.combined(),
            "Performing Streamed Install\nadb: failed to install"
        );
        let only_err = CommandOutput {
            stdout: String::new(),
            stderr: "error: no devices/emulators found\n".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(only_err.combined(), "error: no devices/emulators found\n");
    }

    #[test]
    fn elevation_wraps_the_whole_command_in_su() {
        let args = argv(&["shell", "settings", "put", "global", "window_animation_scale", "0.5"]);
        assert_eq!(
            elevate_args(&args),
            argv(&[
                "shell",
                "su",
                "-c",
                "'settings put global window_animation_scale 0.5'"
            ])
        );
        let raw = argv(&["echo 60 > /proc/sys/vm/swappiness"]);
        assert_eq!(
            elevate_args(&raw)[3],
            "'echo 60 > /proc/sys/vm/swappiness'"
        );
    }

    #[test]
    fn shell_quote_escapes_embedded_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_logs_invocations() {
        let log = Arc::new(LogStream::new(100, noop_sink()));
        let runner = ProcessRunner::new("echo", Arc::clone(&log));
        let result = runner.run(&argv(&["hello", "world"]), &RunOptions::default());
        assert!(result.exited_normally);
        assert_eq!(result.failure, FailureKind::None);
        assert_eq!(result.text.trim(), "hello world");
        assert!(log.contains("Executing: adb hello world"));
        assert!(log.contains("Result:\nhello world"));
    }

    #[test]
    fn process_runner_reports_missing_tool_without_panicking() {
        let log = Arc::new(LogStream::new(100, noop_sink()));
        let runner = ProcessRunner::new("/missing/tool/adb", Arc::clone(&log));
        let result = runner.run(&argv(&["devices"]), &RunOptions::default().elevated());
        assert!(!result.exited_normally);
        assert_eq!(result.failure, FailureKind::NotFound);
        assert!(log.contains("(as root)"));
        assert!(log.contains("ADB not found at /missing/tool/adb"));
    }
}
