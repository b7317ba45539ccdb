use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::app::adb::apk::{create_workspace, discover_package_files, extract_archive, order_by_size_desc};
use crate::app::adb::parse::InstallVerdict;
use crate::app::adb::runner::{AdbRunner, RunOptions};
use crate::app::error::{AppError, ERR_SYSTEM};
use crate::app::events::LogStream;
use crate::app::models::{InstallOutcome, InstallPhase};

pub const INSTALL_MULTIPLE: &str = "install-multiple";

/// Installs a multi-package bundle: extract to a private scratch directory,
/// find the embedded packages, install them in one `install-multiple` call,
/// then remove the scratch directory whatever happened.
pub struct BundleInstaller<'a> {
    runner: &'a dyn AdbRunner,
    options: RunOptions,
    temp_root: Option<PathBuf>,
    log: Option<&'a LogStream>,
    observer: Option<Box<dyn Fn(InstallPhase) + 'a>>,
}

impl<'a> BundleInstaller<'a> {
    pub fn new(runner: &'a dyn AdbRunner) -> Self {
        Self {
            runner,
            options: RunOptions::default(),
            temp_root: None,
            log: None,
            observer: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Scratch directories are created under `root` instead of the system temp dir.
    pub fn with_temp_root(mut self, root: Option<PathBuf>) -> Self {
        self.temp_root = root;
        self
    }

    pub fn with_log(mut self, log: &'a LogStream) -> Self {
        self.log = Some(log);
        self
    }

    pub fn on_phase(mut self, observer: impl Fn(InstallPhase) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    fn enter(&self, phase: InstallPhase, trace_id: &str) {
        debug!(trace_id = %trace_id, phase = ?phase, "bundle install phase");
        if let Some(observer) = &self.observer {
            observer(phase);
        }
    }

    fn note(&self, message: impl Into<String>) {
        if let Some(log) = self.log {
            log.push(message);
        }
    }

    pub fn install(&self, bundle_path: &Path, trace_id: &str) -> InstallOutcome {
        self.enter(InstallPhase::Created, trace_id);
        self.note(format!("Processing XAPK: {}", bundle_path.display()));

        let workspace = match create_workspace(self.temp_root.as_deref(), trace_id) {
            Ok(workspace) => workspace,
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, "bundle workspace unavailable");
                self.note(format!("Error installing XAPK: {}", err.error));
                self.enter(InstallPhase::Failed, trace_id);
                return InstallOutcome::failed(err.error, Some(err.code));
            }
        };
        self.note(format!(
            "Created temporary directory: {}",
            workspace.path().display()
        ));

        let result = self.run_phases(bundle_path, workspace.path(), trace_id);

        self.enter(InstallPhase::CleaningUp, trace_id);
        remove_workspace(workspace, trace_id);
        self.note("Cleaned up temporary files");

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(trace_id = %trace_id, code = %err.code, error = %err.error, "bundle install aborted");
                self.note(format!("Error installing XAPK: {}", err.error));
                InstallOutcome::failed(err.error, Some(err.code))
            }
        };
        if outcome.success {
            info!(trace_id = %trace_id, bundle = %bundle_path.display(), "bundle installed");
            self.note("XAPK installation successful!");
            self.enter(InstallPhase::Succeeded, trace_id);
        } else {
            self.enter(InstallPhase::Failed, trace_id);
        }
        outcome
    }

    /// Install-reported failures come back as an `Ok` failed outcome; anything
    /// that stopped the pipeline before the verdict is an `Err`.
    fn run_phases(
        &self,
        bundle_path: &Path,
        workspace: &Path,
        trace_id: &str,
    ) -> Result<InstallOutcome, AppError> {
        self.enter(InstallPhase::Extracting, trace_id);
        let extracted = extract_archive(bundle_path, workspace, trace_id)?;
        self.note(format!("Extracted XAPK to: {}", workspace.display()));
        debug!(trace_id = %trace_id, entries = extracted, "bundle extracted");

        self.enter(InstallPhase::Scanning, trace_id);
        let mut packages = discover_package_files(workspace).map_err(|err| {
            AppError::extraction(format!("Failed to scan bundle: {err}"), trace_id)
        })?;
        if packages.is_empty() {
            self.note("Error: No APK files found in XAPK package");
            return Err(AppError::no_packages(
                "No APK files found in XAPK package",
                trace_id,
            ));
        }
        order_by_size_desc(&mut packages);
        let paths: Vec<String> = packages.into_iter().map(|entry| entry.file_path).collect();
        self.note(format!("Found APK files: {}", paths.join(", ")));

        self.enter(InstallPhase::Installing, trace_id);
        let mut args = Vec::with_capacity(paths.len() + 1);
        args.push(INSTALL_MULTIPLE.to_string());
        args.extend(paths);
        let result = self.runner.run(&args, &self.options);
        if result.is_failure() {
            let code = result.failure.error_code().unwrap_or(ERR_SYSTEM);
            return Err(AppError::new(code, result.text, trace_id));
        }

        let verdict = InstallVerdict::from_output(&result.text);
        if verdict.success {
            return Ok(InstallOutcome::succeeded(result.text.trim().to_string()));
        }
        warn!(trace_id = %trace_id, code = ?verdict.failure_code, "bundle install rejected by device");
        self.note(format!("XAPK installation failed: {}", result.text));
        Ok(InstallOutcome::failed(
            result.text.trim().to_string(),
            verdict.failure_code,
        ))
    }
}

fn remove_workspace(workspace: TempDir, trace_id: &str) {
    let path = workspace.path().to_path_buf();
    if let Err(err) = workspace.close() {
        warn!(trace_id = %trace_id, path = %path.display(), error = %err, "failed to remove bundle workspace");
        if path.exists() {
            if let Err(err) = fs::remove_dir_all(&path) {
                warn!(trace_id = %trace_id, path = %path.display(), error = %err, "bundle workspace left behind");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs::File;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    use crate::app::adb::runner::CommandResult;
    use crate::app::events::noop_sink;
    use crate::app::test_support::{missing_tool, ok, ScriptedRunner};

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).expect("zip file");
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).expect("start");
            zip.write_all(body.as_bytes()).expect("write");
        }
        zip.finish().expect("finish");
    }

    fn sized(len: usize) -> String {
        "x".repeat(len)
    }

    struct Fixture {
        _tmp: TempDir,
        scratch: PathBuf,
        bundle: PathBuf,
    }

    fn fixture(entries: &[(&str, &str)]) -> Fixture {
        let tmp = TempDir::new().expect("tmp");
        let scratch = tmp.path().join("scratch");
        fs::create_dir_all(&scratch).expect("scratch");
        let bundle = tmp.path().join("game.xapk");
        write_zip(&bundle, entries);
        Fixture {
            _tmp: tmp,
            scratch,
            bundle,
        }
    }

    fn scratch_is_empty(fixture: &Fixture) -> bool {
        fs::read_dir(&fixture.scratch).expect("read scratch").next().is_none()
    }

    fn install_with(
        fixture: &Fixture,
        respond: impl Fn(&[String], &RunOptions) -> CommandResult + Send + Sync + 'static,
    ) -> (InstallOutcome, Vec<InstallPhase>, ScriptedRunner) {
        let runner = ScriptedRunner::new(respond);
        let phases = RefCell::new(Vec::new());
        let outcome = BundleInstaller::new(&runner)
            .with_temp_root(Some(fixture.scratch.clone()))
            .on_phase(|phase| phases.borrow_mut().push(phase))
            .install(&fixture.bundle, "trace-b");
        (outcome, phases.into_inner(), runner)
    }

    #[test]
    fn installs_largest_package_first_and_cleans_up() {
        let small = sized(5);
        let base = sized(50);
        let split = sized(10);
        let fixture = fixture(&[
            ("config.en.apk", split.as_str()),
            ("com.example.apk", base.as_str()),
            ("splits/config.xxhdpi.apk", small.as_str()),
            ("icon.png", "png"),
        ]);
        let (outcome, phases, runner) = install_with(&fixture, |_, _| ok("Success\n"));

        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.error_code, None);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0], INSTALL_MULTIPLE);
        let names: Vec<String> = calls[0][1..]
            .iter()
            .map(|path| {
                Path::new(path)
                    .file_name()
                    .expect("name")
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        assert_eq!(names, vec!["com.example.apk", "config.en.apk", "config.xxhdpi.apk"]);
        assert_eq!(
            phases,
            vec![
                InstallPhase::Created,
                InstallPhase::Extracting,
                InstallPhase::Scanning,
                InstallPhase::Installing,
                InstallPhase::CleaningUp,
                InstallPhase::Succeeded,
            ]
        );
        assert!(scratch_is_empty(&fixture));
    }

    #[test]
    fn malformed_archive_fails_extraction_and_cleans_up() {
        let fixture = fixture(&[]);
        fs::write(&fixture.bundle, b"not a zip at all").expect("overwrite");
        let (outcome, phases, runner) = install_with(&fixture, |_, _| ok("Success"));

        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("ERR_EXTRACTION"));
        assert!(runner.calls().is_empty());
        assert_eq!(phases.last(), Some(&InstallPhase::Failed));
        assert!(!phases.contains(&InstallPhase::Installing));
        assert!(scratch_is_empty(&fixture));
    }

    #[test]
    fn bundle_without_packages_fails_and_cleans_up() {
        let fixture = fixture(&[("manifest.json", "{}"), ("main.obb", "obb")]);
        let (outcome, _, runner) = install_with(&fixture, |_, _| ok("Success"));

        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("ERR_NO_PACKAGES"));
        assert!(runner.calls().is_empty());
        assert!(scratch_is_empty(&fixture));
    }

    #[test]
    fn device_rejection_reports_the_install_code_and_cleans_up() {
        let fixture = fixture(&[("base.apk", "base")]);
        let (outcome, phases, _) = install_with(&fixture, |_, _| {
            ok("Failure [INSTALL_FAILED_VERSION_DOWNGRADE: Package Verification Result]\n")
        });

        assert!(!outcome.success);
        assert_eq!(
            outcome.error_code.as_deref(),
            Some("INSTALL_FAILED_VERSION_DOWNGRADE")
        );
        assert!(outcome.detail.starts_with("Failure ["));
        assert_eq!(phases.last(), Some(&InstallPhase::Failed));
        assert!(scratch_is_empty(&fixture));
    }

    #[test]
    fn runner_failure_maps_to_its_code_and_cleans_up() {
        let fixture = fixture(&[("base.apk", "base")]);
        let (outcome, _, _) = install_with(&fixture, |_, _| missing_tool());

        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("ERR_NOT_FOUND"));
        assert!(outcome.detail.contains("ADB not found"));
        assert!(scratch_is_empty(&fixture));
    }

    #[test]
    fn progress_is_written_to_the_log_stream() {
        let fixture = fixture(&[("base.apk", "base")]);
        let runner = ScriptedRunner::new(|_, _| ok("Success"));
        let log = LogStream::new(100, noop_sink());
        let outcome = BundleInstaller::new(&runner)
            .with_temp_root(Some(fixture.scratch.clone()))
            .with_log(&log)
            .install(&fixture.bundle, "t");

        assert!(outcome.success);
        assert!(log.contains("Processing XAPK:"));
        assert!(log.contains("Found APK files:"));
        assert!(log.contains("Cleaned up temporary files"));
        assert!(log.contains("XAPK installation successful!"));
    }
}
