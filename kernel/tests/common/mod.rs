/*!
 * Shared Test Harness
 * Fake backing store, fake bound objects, and a scripted execution service
 */

#![allow(dead_code)]

use overlay_kernel::exec::{ExecError, ExecResult, LaunchData, LaunchRegistry, ProcessExecution, SpawnRequest};
use overlay_kernel::naming::{
    DirEntry, FileAttributes, FileKind, FileNamespace, NamingError, NamingResult, NamingService,
    OpenFileInfo, RemoteObject, ServiceHandle, AccessMode,
};
use overlay_kernel::{ExitStatus, Pid, ProcessManager};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Bound object with no file namespace
#[derive(Debug)]
pub struct FakeObject {
    name: String,
}

impl FakeObject {
    pub fn handle(name: impl Into<String>) -> ServiceHandle {
        Arc::new(Self { name: name.into() })
    }
}

impl RemoteObject for FakeObject {
    fn name(&self) -> &str {
        &self.name
    }
}

/// In-memory file namespace
#[derive(Debug)]
pub struct FakeStore {
    name: String,
    entries: Mutex<BTreeMap<String, FileKind>>,
    open: Mutex<Vec<OpenFileInfo>>,
}

impl FakeStore {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let mut entries = BTreeMap::new();
        entries.insert("/".to_string(), FileKind::Directory);
        Arc::new(Self {
            name: name.into(),
            entries: Mutex::new(entries),
            open: Mutex::new(Vec::new()),
        })
    }

    pub fn with_files(name: impl Into<String>, files: &[&str]) -> Arc<Self> {
        let store = Self::new(name);
        for file in files {
            store.entries.lock().insert(file.to_string(), FileKind::File);
        }
        store
    }

    pub fn hold_open(&self, pid: Pid, path: &str) {
        let mut open = self.open.lock();
        let descriptor = open.len() as u64 + 3;
        open.push(OpenFileInfo {
            pid,
            descriptor,
            path: path.to_string(),
            mode: AccessMode::Read,
            server: self.name.clone(),
        });
    }
}

impl RemoteObject for FakeStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_namespace(&self) -> Option<&dyn FileNamespace> {
        Some(self)
    }
}

impl FileNamespace for FakeStore {
    fn attributes(&self, path: &str) -> NamingResult<FileAttributes> {
        self.entries
            .lock()
            .get(path)
            .map(|kind| FileAttributes {
                kind: *kind,
                size: 0,
                readonly: false,
            })
            .ok_or_else(|| NamingError::NotFound(path.to_string()))
    }

    fn list(&self, path: &str) -> NamingResult<Vec<DirEntry>> {
        let entries = self.entries.lock();
        if entries.get(path) != Some(&FileKind::Directory) {
            return Err(NamingError::NotFound(path.to_string()));
        }
        let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
        Ok(entries
            .iter()
            .filter_map(|(entry, kind)| {
                let name = entry.strip_prefix(&prefix)?;
                (!name.is_empty() && !name.contains('/')).then(|| DirEntry {
                    name: name.to_string(),
                    is_dir: *kind == FileKind::Directory,
                })
            })
            .collect())
    }

    fn open_files(&self, pid: Pid) -> Vec<OpenFileInfo> {
        self.open.lock().iter().filter(|f| f.pid == pid).cloned().collect()
    }
}

/// What a scripted translator does once spawned
#[derive(Debug, Clone)]
pub enum Script {
    /// Register after a delay, then run until terminated
    Register { delay: Duration },
    /// Look beneath its own mount before registering
    Probe { delay: Duration },
    /// Look up `path` before registering
    LookupFirst { path: &'static str },
    /// Exit without registering
    Exit(ExitStatus),
    /// Never register; exit when terminated
    Hang,
    /// Refuse the command outright
    Reject,
}

/// Execution service whose processes are threads following a script
pub struct ScriptedExecution {
    processes: ProcessManager,
    naming: OnceLock<Weak<NamingService>>,
    scripts: Mutex<HashMap<String, Script>>,
    spawn_delays: Mutex<HashMap<String, Duration>>,
    launches: LaunchRegistry,
    spawns: AtomicUsize,
    served: Arc<Mutex<HashMap<String, Arc<FakeStore>>>>,
    probes: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedExecution {
    pub fn new(processes: ProcessManager) -> Arc<Self> {
        Arc::new(Self {
            processes,
            naming: OnceLock::new(),
            scripts: Mutex::new(HashMap::new()),
            spawn_delays: Mutex::new(HashMap::new()),
            launches: LaunchRegistry::new(),
            spawns: AtomicUsize::new(0),
            served: Arc::new(Mutex::new(HashMap::new())),
            probes: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn attach(&self, naming: &Arc<NamingService>) {
        let _ = self.naming.set(Arc::downgrade(naming));
    }

    pub fn script(&self, command: &str, script: Script) {
        self.scripts.lock().insert(command.to_string(), script);
    }

    /// Make `spawn` of `command` block for `delay` after the process is registered
    pub fn slow_spawn(&self, command: &str, delay: Duration) {
        self.spawn_delays.lock().insert(command.to_string(), delay);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Store served by the translator currently registered at `mount`
    pub fn served(&self, mount: &str) -> Option<Arc<FakeStore>> {
        self.served.lock().get(mount).cloned()
    }

    /// (object name, remainder) seen by probing translators
    pub fn probes(&self) -> Vec<(String, String)> {
        self.probes.lock().clone()
    }
}

impl ProcessExecution for ScriptedExecution {
    fn spawn(&self, request: SpawnRequest) -> ExecResult<Pid> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .get(&request.cmd)
            .cloned()
            .unwrap_or(Script::Register {
                delay: Duration::from_millis(50),
            });
        if let Script::Reject = script {
            return Err(ExecError::InvalidExecutable(request.cmd));
        }

        let pid = self.processes.register_process(
            request.parent,
            0,
            0,
            request.cmd.clone(),
            request.args.clone(),
        )?;
        let mount = request.translator.as_ref().map(|t| t.mount_path.clone());
        let spawn_delay = self.spawn_delays.lock().get(&request.cmd).copied();
        self.launches.insert(pid, LaunchData::from(request));

        let naming = self.naming.get().and_then(Weak::upgrade);
        let processes = self.processes.clone();
        let served = self.served.clone();
        let probes = self.probes.clone();
        thread::spawn(move || {
            let register = |naming: &NamingService, mount: &str| {
                let store = FakeStore::with_files(format!("translator:{}", mount), &["/readme.txt"]);
                served.lock().insert(mount.to_string(), store.clone());
                if naming.register_translator(pid, mount, store).is_err() {
                    served.lock().remove(mount);
                }
            };

            match script {
                Script::Register { delay } => {
                    thread::sleep(delay);
                    if let (Some(naming), Some(mount)) = (&naming, &mount) {
                        register(naming, mount);
                    }
                    run_until_terminated(&processes, pid);
                }
                Script::Probe { delay } => {
                    if let (Some(naming), Some(mount)) = (&naming, &mount) {
                        let probe = format!("{}/readme.txt", mount);
                        if let Ok(resolution) = naming.lookup(pid, &probe) {
                            probes
                                .lock()
                                .push((resolution.handle.name().to_string(), resolution.remainder));
                        }
                        thread::sleep(delay);
                        register(naming, mount);
                    }
                    run_until_terminated(&processes, pid);
                }
                Script::LookupFirst { path } => {
                    if let (Some(naming), Some(mount)) = (&naming, &mount) {
                        if let Ok(resolution) = naming.lookup(pid, path) {
                            probes
                                .lock()
                                .push((resolution.handle.name().to_string(), resolution.remainder));
                        }
                        register(naming, mount);
                    }
                    run_until_terminated(&processes, pid);
                }
                Script::Exit(status) => {
                    let _ = processes.deregister_process(pid, status);
                }
                Script::Hang => run_until_terminated(&processes, pid),
                Script::Reject => {}
            }
        });

        if let Some(delay) = spawn_delay {
            thread::sleep(delay);
        }
        Ok(pid)
    }

    fn fetch_launch_data(&self, pid: Pid) -> ExecResult<LaunchData> {
        self.launches.take(pid)
    }
}

/// Minimal process runtime: exit on the first fatal signal
pub fn run_until_terminated(processes: &ProcessManager, pid: Pid) {
    loop {
        match processes.listen_for_signal(pid) {
            Ok(signal) if signal.is_fatal() => {
                let _ = processes.deregister_process(pid, 0);
                return;
            }
            Ok(_) => continue,
            Err(_) => return,
        }
    }
}

pub struct Harness {
    pub processes: ProcessManager,
    pub exec: Arc<ScriptedExecution>,
    pub store: Arc<FakeStore>,
    pub naming: Arc<NamingService>,
}

pub fn harness(activation_timeout: Duration) -> Harness {
    harness_with_table(activation_timeout, None)
}

pub fn harness_with_table(activation_timeout: Duration, table: Option<std::path::PathBuf>) -> Harness {
    let processes = ProcessManager::new();
    let exec = ScriptedExecution::new(processes.clone());
    let store = FakeStore::with_files("backing", &["/etc", "/etc/motd", "/mnt", "/mnt/x", "/mnt/x/readme.txt"]);
    let naming = NamingService::builder(store.clone(), processes.clone(), exec.clone())
        .with_activation_timeout(activation_timeout)
        .with_mount_table(table)
        .build();
    exec.attach(&naming);
    Harness {
        processes,
        exec,
        store,
        naming,
    }
}

/// Poll until `condition` holds or the deadline passes
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
