use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::adb::parse::{extract_label, is_package_disabled, is_usable_listing, parse_package_lines};
use crate::app::adb::runner::{argv, AdbRunner, RunOptions};
use crate::app::error::AppError;
use crate::app::events::LogStream;
use crate::app::models::PackageEntry;
use crate::app::scheduler::{TaskHandle, TaskScheduler};
use crate::app::state::SnapshotStore;

/// Tried in order; later ones drop flags older `pm` builds reject.
pub const LIST_CANDIDATES: [&[&str]; 3] = [
    &["shell", "pm", "list", "packages", "-s", "-3", "-u", "-i"],
    &["shell", "pm", "list", "packages", "-s", "-3"],
    &["shell", "pm", "list", "packages", "-3"],
];

pub fn disabled_query_args(identifier: &str) -> Vec<String> {
    argv(&["shell", "pm", "list", "packages", "-d", identifier])
}

pub fn dumpsys_package_args(identifier: &str) -> Vec<String> {
    argv(&["shell", "dumpsys", "package", identifier])
}

/// Lists third-party packages with their enabled flag. Labels are left as the
/// identifier placeholder; see [`LabelResolver`].
///
/// Fails with `ERR_LISTING` when no candidate command yields a usable listing,
/// which is distinct from an `Ok` with no entries.
pub fn list_third_party_packages(
    runner: &dyn AdbRunner,
    options: &RunOptions,
    trace_id: &str,
) -> Result<Vec<PackageEntry>, AppError> {
    let mut last_text = String::new();
    let mut accepted = None;
    for candidate in LIST_CANDIDATES {
        let result = runner.run(&argv(candidate), options);
        if is_usable_listing(&result) {
            accepted = Some(result.text);
            break;
        }
        debug!(trace_id = %trace_id, args = ?candidate, "listing candidate rejected");
        last_text = result.text;
    }
    let Some(output) = accepted else {
        return Err(AppError::listing(
            format!("Failed to load apps: {}", last_text.trim()),
            trace_id,
        ));
    };

    let mut entries = parse_package_lines(&output);
    // One `-d` query per entry; a failed query leaves that entry enabled.
    for entry in entries.iter_mut() {
        let result = runner.run(&disabled_query_args(&entry.identifier), options);
        if result.is_failure() {
            warn!(trace_id = %trace_id, package = %entry.identifier, error = %result.text, "disabled-status query failed");
            continue;
        }
        if is_package_disabled(&result.text, &entry.identifier) {
            entry.enabled = false;
        }
    }
    Ok(entries)
}

/// Human-readable label from `dumpsys package`. `Ok(None)` when no pattern
/// matched; `ERR_LABEL_UNRESOLVED` when the query itself failed.
pub fn resolve_label(
    runner: &dyn AdbRunner,
    identifier: &str,
    options: &RunOptions,
    trace_id: &str,
) -> Result<Option<String>, AppError> {
    let result = runner.run(&dumpsys_package_args(identifier), options);
    if result.is_failure() {
        return Err(AppError::label_unresolved(
            format!("Error updating app name for {identifier}: {}", result.text.trim()),
            trace_id,
        ));
    }
    Ok(extract_label(&result.text))
}

/// Background label lookups for one listing generation.
pub struct LabelResolver {
    pub runner: Arc<dyn AdbRunner>,
    pub store: Arc<SnapshotStore>,
    pub log: Arc<LogStream>,
    pub options: RunOptions,
}

impl LabelResolver {
    /// One task per entry. A result lands only if that exact entry is still
    /// part of `generation`; the caller never waits on these.
    pub fn spawn_all(
        &self,
        scheduler: &TaskScheduler,
        generation: u64,
        entries: &[PackageEntry],
        trace_id: &str,
    ) -> Vec<TaskHandle<bool>> {
        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let runner = Arc::clone(&self.runner);
                let store = Arc::clone(&self.store);
                let log = Arc::clone(&self.log);
                let options = self.options.clone();
                let identifier = entry.identifier.clone();
                let trace_id = trace_id.to_string();
                scheduler.spawn(&format!("label:{identifier}"), move |cancel| {
                    let options = options.with_cancel(&cancel);
                    match resolve_label(runner.as_ref(), &identifier, &options, &trace_id) {
                        Ok(Some(label)) => store.apply_label(generation, index, &identifier, &label),
                        Ok(None) => {
                            debug!(trace_id = %trace_id, package = %identifier, "no label pattern matched");
                            false
                        }
                        Err(err) => {
                            warn!(trace_id = %trace_id, package = %identifier, code = %err.code, "label unresolved");
                            log.push(err.error);
                            false
                        }
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::app::events::noop_sink;
    use crate::app::models::ListingStatus;
    use crate::app::test_support::{missing_tool, ok, ScriptedRunner};

    #[test]
    fn first_candidate_listing_is_parsed_with_identity_labels() {
        let runner = ScriptedRunner::new(|args, _| {
            if args.join(" ") == LIST_CANDIDATES[0].join(" ") {
                ok("package:com.a\npackage:com.b\n")
            } else {
                ok("")
            }
        });
        let entries = list_third_party_packages(&runner, &RunOptions::default(), "t").expect("list");
        let ids: Vec<&str> = entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["com.a", "com.b"]);
        assert!(entries.iter().all(|e| e.label == e.identifier && e.enabled));
        assert_eq!(
            runner.joined_calls(),
            vec![
                "shell pm list packages -s -3 -u -i",
                "shell pm list packages -d com.a",
                "shell pm list packages -d com.b",
            ]
        );
    }

    #[test]
    fn falls_through_to_a_later_candidate() {
        let runner = ScriptedRunner::new(|args, _| match args.join(" ").as_str() {
            "shell pm list packages -s -3 -u -i" => ok("Error: Unknown option: -u"),
            "shell pm list packages -s -3" => ok(""),
            "shell pm list packages -3" => ok("package:com.only\n"),
            _ => ok(""),
        });
        let entries = list_third_party_packages(&runner, &RunOptions::default(), "t").expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identifier, "com.only");
        assert_eq!(runner.calls().len(), 4);
    }

    #[test]
    fn no_usable_candidate_is_a_listing_failure() {
        let runner = ScriptedRunner::new(|_, _| missing_tool());
        let err = list_third_party_packages(&runner, &RunOptions::default(), "trace-l").unwrap_err();
        assert_eq!(err.code, "ERR_LISTING");
        assert_eq!(err.trace_id, "trace-l");
        assert!(err.error.starts_with("Failed to load apps:"));
        assert_eq!(runner.calls().len(), LIST_CANDIDATES.len());
    }

    #[test]
    fn disabled_query_requires_an_exact_line() {
        let runner = ScriptedRunner::new(|args, _| match args.join(" ").as_str() {
            "shell pm list packages -s -3 -u -i" => {
                ok("package:com.a  installer=com.android.vending\npackage:com.ab\n")
            }
            // Substring filter: the query for com.a also reports com.ab.
            "shell pm list packages -d com.a" => ok("package:com.ab\n"),
            "shell pm list packages -d com.ab" => ok("package:com.ab\n"),
            _ => ok(""),
        });
        let entries = list_third_party_packages(&runner, &RunOptions::default(), "t").expect("list");
        assert!(entries[0].enabled);
        assert_eq!(entries[0].installer.as_deref(), Some("com.android.vending"));
        assert!(!entries[1].enabled);
    }

    #[test]
    fn resolve_label_distinguishes_no_match_from_failure() {
        let runner = ScriptedRunner::new(|args, _| match args.last().map(String::as_str) {
            Some("com.named") => ok("Packages:\n  application: label='Named App' icon=0x7f\n"),
            Some("com.bare") => ok("Packages:\n  versionName=1.0\n"),
            _ => missing_tool(),
        });
        let options = RunOptions::default();
        assert_eq!(
            resolve_label(&runner, "com.named", &options, "t").expect("named").as_deref(),
            Some("Named App")
        );
        assert_eq!(resolve_label(&runner, "com.bare", &options, "t").expect("bare"), None);
        let err = resolve_label(&runner, "com.gone", &options, "t").unwrap_err();
        assert_eq!(err.code, "ERR_LABEL_UNRESOLVED");
    }

    #[test]
    fn resolver_applies_labels_to_the_current_generation_only() {
        let runner: Arc<dyn AdbRunner> = Arc::new(ScriptedRunner::new(|args, _| {
            match args.last().map(String::as_str) {
                Some("com.a") => ok("application: label=\"Alpha\"\n"),
                Some("com.b") => ok("nothing useful"),
                _ => missing_tool(),
            }
        }));
        let store = Arc::new(SnapshotStore::new(noop_sink()));
        let log = Arc::new(LogStream::new(100, noop_sink()));
        let scheduler = TaskScheduler::new(2);
        let entries = vec![
            PackageEntry::new("com.a"),
            PackageEntry::new("com.b"),
            PackageEntry::new("com.c"),
        ];
        let generation = store.replace_packages(entries.clone(), ListingStatus::Loaded);
        let resolver = LabelResolver {
            runner,
            store: Arc::clone(&store),
            log: Arc::clone(&log),
            options: RunOptions::default(),
        };

        let handles = resolver.spawn_all(&scheduler, generation, &entries, "t");
        let applied: Vec<Option<bool>> = handles.into_iter().map(|h| h.join()).collect();
        assert_eq!(applied, vec![Some(true), Some(false), Some(false)]);
        assert!(scheduler.wait_idle(Duration::from_secs(5)));

        let snapshot = store.current();
        let labels: Vec<&str> = snapshot.packages.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["Alpha", "com.b", "com.c"]);
        assert!(log.contains("Error updating app name for com.c"));

        // A stale generation never lands.
        let next = store.replace_packages(entries.clone(), ListingStatus::Loaded);
        let stale = resolver.spawn_all(&scheduler, generation, &entries[..1], "t");
        assert_eq!(stale.into_iter().map(|h| h.join()).collect::<Vec<_>>(), vec![Some(false)]);
        assert_eq!(store.current().generation, next);
        assert_eq!(store.current().packages[0].label, "com.a");
    }
}
