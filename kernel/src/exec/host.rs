/*!
 * Host Execution
 * Runs kernel processes as host OS processes
 *
 * Each spawned child gets two helper threads: a reaper that deregisters
 * the process with its exit status, and a signal shim that plays the
 * process runtime's part by listening for signals and killing the host
 * child on a fatal one.
 */

use super::launch::LaunchRegistry;
use super::types::{validate_command, ExecError, ExecResult, LaunchData, SpawnRequest};
use super::ProcessExecution;
use crate::core::types::{Pid, FORCED_EXIT_STATUS};
use crate::process::{ProcessError, ProcessManager};
use std::io::ErrorKind;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Environment variable carrying the kernel pid into the child
pub const PID_ENV: &str = "KERNEL_PID";
/// Environment variable carrying a translator's mount path
pub const MOUNT_PATH_ENV: &str = "KERNEL_MOUNT_PATH";

pub struct HostExecution {
    processes: ProcessManager,
    launches: LaunchRegistry,
}

impl HostExecution {
    pub fn new(processes: ProcessManager) -> Self {
        info!("Host execution initialized");
        Self {
            processes,
            launches: LaunchRegistry::new(),
        }
    }

    fn command(request: &SpawnRequest, pid: Pid) -> Command {
        let mut cmd = Command::new(&request.cmd);
        cmd.args(&request.args)
            .env_clear()
            .envs(&request.env)
            .env(PID_ENV, pid.to_string());
        if let Some(launch) = &request.translator {
            cmd.env(MOUNT_PATH_ENV, &launch.mount_path);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }

    fn supervise(&self, pid: Pid, child: Child) -> ExecResult<()> {
        let kill = Arc::new(AtomicBool::new(false));

        let shim = {
            let processes = self.processes.clone();
            let kill = kill.clone();
            thread::Builder::new()
                .name(format!("signal-shim-{}", pid))
                .spawn(move || relay_signals(processes, pid, kill))
        };
        if let Err(e) = shim {
            return Err(self.abandon(pid, child, e));
        }

        let processes = self.processes.clone();
        let reaper = thread::Builder::new()
            .name(format!("reaper-{}", pid))
            .spawn(move || reap(processes, pid, child, kill));
        reaper.map(|_| ()).map_err(|e| {
            let _ = self.processes.deregister_process(pid, FORCED_EXIT_STATUS);
            ExecError::SpawnFailed(format!("reaper thread for {}: {}", pid, e))
        })
    }

    fn abandon(&self, pid: Pid, mut child: Child, cause: std::io::Error) -> ExecError {
        let _ = child.kill();
        let _ = child.wait();
        let _ = self.processes.deregister_process(pid, FORCED_EXIT_STATUS);
        ExecError::SpawnFailed(format!("supervisor thread for {}: {}", pid, cause))
    }
}

impl ProcessExecution for HostExecution {
    fn spawn(&self, request: SpawnRequest) -> ExecResult<Pid> {
        validate_command(&request.cmd)?;

        let (process_group_id, session_id) = match request.parent.pid() {
            Some(ppid) => (
                self.processes.get_process_group_id(ppid)?,
                self.processes.get_process_session_id(ppid)?,
            ),
            None => (0, 0),
        };
        let pid = self.processes.register_process(
            request.parent,
            process_group_id,
            session_id,
            request.cmd.clone(),
            request.args.clone(),
        )?;

        let mut cmd = Self::command(&request, pid);
        self.launches.insert(pid, LaunchData::from(request.clone()));

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.launches.discard(pid);
                let _ = self.processes.deregister_process(pid, FORCED_EXIT_STATUS);
                warn!(pid, cmd = %request.cmd, error = %e, "Host spawn failed");
                return Err(match e.kind() {
                    ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                        ExecError::InvalidExecutable(format!("{}: {}", request.cmd, e))
                    }
                    _ => ExecError::SpawnFailed(format!("{}: {}", request.cmd, e)),
                });
            }
        };

        info!(pid, os_pid = child.id(), cmd = %request.cmd, "Spawned host process");
        self.supervise(pid, child)?;
        Ok(pid)
    }

    fn fetch_launch_data(&self, pid: Pid) -> ExecResult<LaunchData> {
        self.launches.take(pid)
    }
}

fn relay_signals(processes: ProcessManager, pid: Pid, kill: Arc<AtomicBool>) {
    loop {
        match processes.listen_for_signal(pid) {
            Ok(signal) if signal.is_fatal() => {
                debug!(pid, %signal, "Fatal signal, killing host process");
                kill.store(true, Ordering::Release);
                return;
            }
            Ok(signal) => debug!(pid, %signal, "Signal has no host action"),
            Err(ProcessError::Cancelled(_)) | Err(ProcessError::UnknownProcess(_)) => return,
            Err(e) => {
                warn!(pid, error = %e, "Signal relay stopped");
                return;
            }
        }
    }
}

fn reap(processes: ProcessManager, pid: Pid, mut child: Child, kill: Arc<AtomicBool>) {
    let mut killed = false;
    loop {
        if !killed && (kill.load(Ordering::Acquire) || !processes.is_alive(pid)) {
            if let Err(e) = child.kill() {
                debug!(pid, error = %e, "Kill failed, process likely gone");
            }
            killed = true;
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code().unwrap_or(FORCED_EXIT_STATUS);
                info!(pid, exit_status = code, "Host process exited");
                if let Err(e) = processes.deregister_process(pid, code) {
                    debug!(pid, error = %e, "Process already removed");
                }
                return;
            }
            Ok(None) => thread::sleep(REAP_INTERVAL),
            Err(e) => {
                error!(pid, error = %e, "Failed to poll host process");
                let _ = processes.deregister_process(pid, FORCED_EXIT_STATUS);
                return;
            }
        }
    }
}
