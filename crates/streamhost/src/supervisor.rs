use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use streamhost_transport::{CancellationToken, CancellationTokenSource};
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{HostError, HostResult};
use crate::logsink::LogSink;

/// File name of the media-service executable, expected alongside the host
/// binary.
pub const MEDIA_SERVICE_EXECUTABLE: &str = "media-streaming-service";

/// Environment variable the runtime loader reads to find its configuration.
pub const RUNTIME_CONFIG_ENV: &str = "XR_RUNTIME_JSON";

/// Runtime configuration file searched for under the `releases/` subtree.
const RUNTIME_CONFIG_FILE: &str = "openxr_runtime.json";

/// Child output lines dropped before they reach the log sink. The service
/// emits these once per poll interval and they carry no information.
const NOISY_LINE_PREFIXES: &[&str] = &["status poll", "keep-alive"];

/// Where the media service and its runtime configuration live on disk.
#[derive(Debug, Clone)]
pub struct MediaServiceLayout {
    pub executable: PathBuf,
    pub releases_dir: PathBuf,
}

impl MediaServiceLayout {
    /// Locates the service installation alongside the running host binary.
    pub fn discover() -> HostResult<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .ok_or_else(|| HostError::invalid_configuration("host binary has no parent directory"))?;
        Ok(Self::rooted_at(dir))
    }

    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            executable: dir.join(MEDIA_SERVICE_EXECUTABLE),
            releases_dir: dir.join("releases"),
        }
    }

    /// Finds the runtime configuration file under `releases/`.
    ///
    /// The subtree is searched recursively; candidates are sorted
    /// lexicographically by full path and the first one wins, which keeps
    /// the choice deterministic across filesystems. More than one candidate
    /// is worth a warning.
    pub fn locate_runtime_config(&self) -> Option<PathBuf> {
        let mut candidates = Vec::new();
        collect_runtime_configs(&self.releases_dir, &mut candidates);
        candidates.sort();

        if candidates.len() > 1 {
            tracing::warn!(
                count = candidates.len(),
                chosen = %candidates[0].display(),
                "multiple runtime configuration candidates found under releases/"
            );
        }
        candidates.into_iter().next()
    }
}

fn collect_runtime_configs(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_runtime_configs(&path, out);
        } else if path.file_name().is_some_and(|name| name == RUNTIME_CONFIG_FILE) {
            out.push(path);
        }
    }
}

pub(crate) fn is_noisy_output(line: &str) -> bool {
    NOISY_LINE_PREFIXES
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

/// Launches, monitors, and restarts the media-service child process.
///
/// The child runs in its own OS process group and is spawned with
/// kill-on-drop, so an abnormal host exit sweeps it along. An unplanned
/// child exit is logged and answered with an immediate relaunch; `shutdown`
/// flips the teardown flag before any other step so the monitor never
/// relaunches during teardown, then force-kills the child and sweeps the
/// group for surviving descendants. Residual risk: a host crash that skips
/// drop handlers entirely can orphan a child spawned in the same instant.
pub struct MediaServiceSupervisor {
    cancel: CancellationTokenSource,
    monitor: Mutex<Option<JoinHandle<()>>>,
    child_pid: Arc<AtomicU32>,
}

impl MediaServiceSupervisor {
    pub fn launch(layout: MediaServiceLayout, sink: Arc<dyn LogSink>) -> Self {
        let (cancel, token) = CancellationTokenSource::new();
        let child_pid = Arc::new(AtomicU32::new(0));
        let monitor = tokio::spawn(monitor_loop(layout, sink, token, Arc::clone(&child_pid)));
        Self {
            cancel,
            monitor: Mutex::new(Some(monitor)),
            child_pid,
        }
    }

    /// Pid of the currently running child, if any.
    pub fn child_pid(&self) -> Option<u32> {
        match self.child_pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Tears the child down. Idempotent.
    pub async fn shutdown(&self) {
        // Flag first: the monitor must see the teardown before it can decide
        // to relaunch.
        self.cancel.cancel();
        let task = self.monitor.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn monitor_loop(
    layout: MediaServiceLayout,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
    child_pid: Arc<AtomicU32>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        kill_stale_instances(&layout.executable);

        let mut child = match spawn_child(&layout) {
            Ok(child) => child,
            Err(err) => {
                tracing::error!(
                    executable = %layout.executable.display(),
                    error = %err,
                    "failed to launch media service"
                );
                sink.append(&format!("[supervisor] failed to launch media service: {err}"));
                break;
            }
        };

        let pid = child.id().unwrap_or(0);
        child_pid.store(pid, Ordering::SeqCst);
        tracing::info!(pid, "media service launched");
        sink.append(&format!("[supervisor] media service launched (pid {pid})"));

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, Arc::clone(&sink), "media-service");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, Arc::clone(&sink), "media-service!");
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                sweep_process_group(pid);
                break;
            }
            status = child.wait() => {
                if cancel.is_cancelled() {
                    sweep_process_group(pid);
                    break;
                }
                let code = status
                    .ok()
                    .and_then(|s| s.code())
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_owned());
                tracing::warn!(pid, exit_code = %code, "media service exited; relaunching");
                sink.append(&format!(
                    "[supervisor] media service exited with code {code}; relaunching"
                ));
            }
        }
    }
    child_pid.store(0, Ordering::SeqCst);
}

fn spawn_child(layout: &MediaServiceLayout) -> std::io::Result<Child> {
    let mut command = Command::new(&layout.executable);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    match layout.locate_runtime_config() {
        Some(path) => {
            command.env(RUNTIME_CONFIG_ENV, &path);
        }
        None => {
            tracing::warn!(
                releases = %layout.releases_dir.display(),
                "no runtime configuration found; launching without {RUNTIME_CONFIG_ENV}"
            );
        }
    }

    command.spawn()
}

fn forward_output(
    stream: impl AsyncRead + Unpin + Send + 'static,
    sink: Arc<dyn LogSink>,
    label: &'static str,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_noisy_output(&line) {
                continue;
            }
            sink.append(&format!("[{label}] {line}"));
        }
    });
}

/// Recovery from a previous crash: any process still bound to the same
/// executable path is terminated before a new one is spawned.
fn kill_stale_instances(executable: &Path) {
    let mut system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    system.refresh_processes();

    for (pid, process) in system.processes() {
        let matches = process
            .exe()
            .is_some_and(|exe| exe == executable);
        if matches {
            tracing::warn!(pid = pid.as_u32(), "killing stale media service instance");
            process.kill();
        }
    }
}

#[cfg(unix)]
fn sweep_process_group(pid: u32) {
    if pid == 0 {
        return;
    }
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    // The child was spawned as its own group leader; this reaps any
    // descendants it left behind.
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn sweep_process_group(_pid: u32) {}
