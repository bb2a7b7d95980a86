//! Test doubles for the RPC and process seams.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;

use crate::daemon_config::DaemonConfig;
use crate::error::{ProcessError, RpcError};
use crate::process::{
    OutputStream, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessStatus,
    ProcessTermination, TerminationResult,
};
use crate::rpc::DaemonRpc;

/// One scripted probe answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    Ok,
    Refused,
    Code(i64),
    Unrecognized,
}

impl ProbeStep {
    fn into_result(self) -> Result<(), RpcError> {
        match self {
            ProbeStep::Ok => Ok(()),
            ProbeStep::Refused => Err(RpcError::ConnectionRefused("scripted".to_string())),
            ProbeStep::Code(code) => Err(RpcError::Daemon {
                code,
                message: "scripted".to_string(),
            }),
            ProbeStep::Unrecognized => Err(RpcError::Transport("scripted".to_string())),
        }
    }
}

/// [`DaemonRpc`] answering probes from a script, then a fixed fallback
pub struct ScriptedRpc {
    script: Mutex<VecDeque<ProbeStep>>,
    fallback: ProbeStep,
    probes: AtomicUsize,
    config: Mutex<Option<DaemonConfig>>,
}

impl ScriptedRpc {
    /// Plays `steps` in order, then refuses connections forever
    pub fn new(steps: impl IntoIterator<Item = ProbeStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            fallback: ProbeStep::Refused,
            probes: AtomicUsize::new(0),
            config: Mutex::new(None),
        }
    }

    pub fn always(step: ProbeStep) -> Self {
        Self::new([]).then_forever(step)
    }

    pub fn then_forever(mut self, step: ProbeStep) -> Self {
        self.fallback = step;
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Configuration passed to `initialize_config`, if any
    pub fn configured(&self) -> Option<DaemonConfig> {
        lock(&self.config).clone()
    }
}

#[async_trait]
impl DaemonRpc for ScriptedRpc {
    fn initialize_config(&self, config: &DaemonConfig) {
        *lock(&self.config) = Some(config.clone());
    }

    async fn probe(&self) -> Result<(), RpcError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let step = lock(&self.script).pop_front().unwrap_or(self.fallback);
        step.into_result()
    }
}

/// A recorded spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    pub pid: ProcessId,
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Test side of a fake child's output pipes
pub struct FakeChild {
    pub pid: ProcessId,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

impl FakeChild {
    pub async fn write_stdout(&mut self, line: &str) {
        write_line(&mut self.stdout, line).await;
    }

    pub async fn write_stderr(&mut self, line: &str) {
        write_line(&mut self.stderr, line).await;
    }
}

async fn write_line(stream: &mut DuplexStream, line: &str) {
    // A closed reader means the relay has stopped; that is not a test failure here
    let _ = stream.write_all(format!("{line}\n").as_bytes()).await;
    let _ = stream.flush().await;
}

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    spawn_failure: Option<String>,
    spawned: Vec<SpawnRecord>,
    terminated: Vec<ProcessId>,
    running: HashSet<ProcessId>,
    exits: HashMap<ProcessId, oneshot::Sender<ProcessStatus>>,
    children: VecDeque<FakeChild>,
}

/// In-memory [`ProcessManager`]; children exit when terminated or on demand
#[derive(Clone)]
pub struct FakeProcessManager {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProcessManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                next_pid: 4000,
                ..FakeState::default()
            })),
        }
    }

    /// Pretend a process this session did not start is alive
    pub fn with_running(self, pid: u32) -> Self {
        lock(&self.state).running.insert(ProcessId::new(pid));
        self
    }

    /// Make every spawn fail as if the binary were not executable
    pub fn fail_spawns(self, reason: &str) -> Self {
        lock(&self.state).spawn_failure = Some(reason.to_string());
        self
    }

    pub fn spawned(&self) -> Vec<SpawnRecord> {
        lock(&self.state).spawned.clone()
    }

    pub fn terminated(&self) -> Vec<ProcessId> {
        lock(&self.state).terminated.clone()
    }

    pub fn is_running(&self, pid: ProcessId) -> bool {
        lock(&self.state).running.contains(&pid)
    }

    /// Output pipes of the oldest child not yet taken
    pub fn take_child(&self) -> Option<FakeChild> {
        lock(&self.state).children.pop_front()
    }

    /// Make a spawned child exit with `code`
    pub fn exit(&self, pid: ProcessId, code: i32) -> bool {
        let mut state = lock(&self.state);
        state.running.remove(&pid);
        match state.exits.remove(&pid) {
            Some(exit) => exit.send(ProcessStatus::Exited(Some(code))).is_ok(),
            None => false,
        }
    }
}

struct FakeHandle {
    pid: ProcessId,
    program: PathBuf,
    args: Vec<String>,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    exit: Option<oneshot::Receiver<ProcessStatus>>,
}

#[async_trait]
impl ProcessHandle for FakeHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        Some(self.pid)
    }

    fn get_command(&self) -> &Path {
        &self.program
    }

    fn get_args(&self) -> &[String] {
        &self.args
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
        match self.exit.take() {
            Some(exit) => Ok(exit.await.unwrap_or(ProcessStatus::Exited(None))),
            None => Err(ProcessError::Io(std::io::Error::other(
                "process already waited on",
            ))),
        }
    }
}

#[async_trait]
impl ProcessLifecycle for FakeProcessManager {
    async fn spawn_process(
        &self,
        program: &Path,
        args: &[String],
    ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.spawn_failure {
            return Err(ProcessError::PermissionDenied(reason.clone()));
        }

        state.next_pid += 1;
        let pid = ProcessId::new(state.next_pid);
        let (stdout_writer, stdout_reader) = tokio::io::duplex(4096);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(4096);
        let (exit_tx, exit_rx) = oneshot::channel();

        state.spawned.push(SpawnRecord {
            pid,
            program: program.to_path_buf(),
            args: args.to_vec(),
        });
        state.running.insert(pid);
        state.exits.insert(pid, exit_tx);
        state.children.push_back(FakeChild {
            pid,
            stdout: stdout_writer,
            stderr: stderr_writer,
        });

        Ok(Box::new(FakeHandle {
            pid,
            program: program.to_path_buf(),
            args: args.to_vec(),
            stdout: Some(Box::new(stdout_reader)),
            stderr: Some(Box::new(stderr_reader)),
            exit: Some(exit_rx),
        }))
    }
}

#[async_trait]
impl ProcessTermination for FakeProcessManager {
    async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult {
        let mut state = lock(&self.state);
        state.terminated.push(pid);
        if !state.running.remove(&pid) {
            return TerminationResult::ProcessNotFound;
        }
        if let Some(exit) = state.exits.remove(&pid) {
            let _ = exit.send(ProcessStatus::Exited(None));
        }
        TerminationResult::Success
    }
}

impl ProcessManager for FakeProcessManager {
    fn platform_name(&self) -> &'static str {
        "fake"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
