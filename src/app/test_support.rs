use std::sync::Mutex;

use crate::app::adb::runner::{AdbRunner, CommandResult, FailureKind, RunOptions};

type Responder = Box<dyn Fn(&[String], &RunOptions) -> CommandResult + Send + Sync>;

/// Fake device bridge: answers from a closure and records every argv it saw.
pub(crate) struct ScriptedRunner {
    respond: Responder,
    calls: Mutex<Vec<(Vec<String>, bool)>>,
}

impl ScriptedRunner {
    pub(crate) fn new(
        respond: impl Fn(&[String], &RunOptions) -> CommandResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .map(|(args, _)| args.clone())
            .collect()
    }

    pub(crate) fn elevated_calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .filter(|(_, elevated)| *elevated)
            .map(|(args, _)| args.clone())
            .collect()
    }

    pub(crate) fn joined_calls(&self) -> Vec<String> {
        self.calls().iter().map(|args| args.join(" ")).collect()
    }
}

impl AdbRunner for ScriptedRunner {
    fn run(&self, args: &[String], options: &RunOptions) -> CommandResult {
        self.calls
            .lock()
            .expect("calls")
            .push((args.to_vec(), options.elevated));
        (self.respond)(args, options)
    }
}

pub(crate) fn ok(text: &str) -> CommandResult {
    CommandResult::completed(text, Some(0))
}

pub(crate) fn missing_tool() -> CommandResult {
    CommandResult::failed(
        FailureKind::NotFound,
        "ADB not found at adb. Please check the path.",
    )
}
