use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Local;
use serde::Serialize;
use tracing::info;

use crate::app::models::{DeviceSnapshot, InstallPhase, LogLine};
use crate::app::shortcuts::Shortcut;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CoreEvent {
    Log(LogLine),
    Snapshot(DeviceSnapshot),
    LabelResolved {
        generation: u64,
        index: usize,
        identifier: String,
        label: String,
    },
    InstallPhase {
        trace_id: String,
        bundle_path: String,
        phase: InstallPhase,
    },
    ShortcutsChanged(Vec<Shortcut>),
}

pub type EventSink = Arc<dyn Fn(CoreEvent) + Send + Sync>;

pub fn noop_sink() -> EventSink {
    Arc::new(|_event| {})
}

/// User-facing activity log: a bounded ring of timestamped lines, each also
/// forwarded to the event sink and to tracing.
pub struct LogStream {
    lines: Mutex<VecDeque<LogLine>>,
    capacity: usize,
    sink: EventSink,
}

impl LogStream {
    pub fn new(capacity: usize, sink: EventSink) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            sink,
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        let line = LogLine {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            message: message.into(),
        };
        info!(target: "activity", "{}", line.message);
        {
            let mut guard = self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.len() == self.capacity {
                guard.pop_front();
            }
            guard.push_back(line.clone());
        }
        (self.sink)(CoreEvent::Log(line));
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|line| line.message.contains(needle))
    }

    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.push("Log cleared");
    }
}
