use std::sync::Mutex;
use std::time::SystemTime;

use tokio::sync::broadcast;

const SUBSCRIPTION_CAPACITY: usize = 256;

/// One timestamped log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: SystemTime,
    pub line: String,
}

/// Append-only log with live subscription, fed by the supervisor (child
/// process stdio) and the coordinator (lifecycle milestones).
pub trait LogSink: Send + Sync {
    fn append(&self, line: &str);

    /// Live feed of entries appended after the call. Slow subscribers may
    /// observe lag on the broadcast channel; history is not replayed.
    fn subscribe(&self) -> broadcast::Receiver<LogEntry>;

    /// Snapshot of everything appended so far.
    fn entries(&self) -> Vec<LogEntry>;
}

/// In-memory implementation backing the GUI log window and tests.
pub struct MemoryLogSink {
    history: Mutex<Vec<LogEntry>>,
    live: broadcast::Sender<LogEntry>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Self {
            history: Mutex::new(Vec::new()),
            live,
        }
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, line: &str) {
        let entry = LogEntry {
            timestamp: SystemTime::now(),
            line: line.to_owned(),
        };
        if let Ok(mut history) = self.history.lock() {
            history.push(entry.clone());
        }
        // Nobody subscribed yet is fine.
        let _ = self.live.send(entry);
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.live.subscribe()
    }

    fn entries(&self) -> Vec<LogEntry> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}
