/*!
 * Naming Service
 * Global namespace overlaying the backing store with bound objects and
 * on-demand translators
 */

use super::activation::{Activation, ActivationWait};
use super::mount::{Claim, TranslatorMount};
use super::paths::{normalize, prefixes, remainder};
use super::table::{MountSpec, MountTable};
use super::traits::ServiceHandle;
use super::types::{
    DirEntry, FileAttributes, MountInfo, NamingError, NamingResult, OpenFileInfo, Resolution,
    TranslatorOptions,
};
use crate::core::config::{KernelConfig, DEFAULT_ACTIVATION_TIMEOUT};
use crate::core::types::{Pid, KERNEL_PID};
use crate::exec::{ExecError, ProcessExecution, SpawnRequest, TranslatorLaunch};
use crate::monitoring::{span_operation, span_request};
use crate::process::{ProcEventKind, ProcessManager, Signal};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Entry in the overlay
#[derive(Clone)]
enum Binding {
    Direct(ServiceHandle),
    Translator(Arc<TranslatorMount>),
}

/// Builder for NamingService
pub struct NamingServiceBuilder {
    backing: ServiceHandle,
    processes: ProcessManager,
    executor: Arc<dyn ProcessExecution>,
    activation_timeout: Duration,
    mount_table_path: Option<PathBuf>,
}

impl NamingServiceBuilder {
    /// Take tunables from the kernel configuration
    pub fn with_config(mut self, config: &KernelConfig) -> Self {
        self.activation_timeout = config.activation_timeout;
        self.mount_table_path = config.mount_table_path.clone();
        self
    }

    pub fn with_activation_timeout(mut self, timeout: Duration) -> Self {
        self.activation_timeout = timeout;
        self
    }

    /// Persist passive mounts here; `None` keeps them in memory only
    pub fn with_mount_table(mut self, path: Option<PathBuf>) -> Self {
        self.mount_table_path = path;
        self
    }

    pub fn build(self) -> Arc<NamingService> {
        info!(
            backing = self.backing.name(),
            activation_timeout_ms = self.activation_timeout.as_millis() as u64,
            mount_table = ?self.mount_table_path,
            "Naming service initialized"
        );
        Arc::new_cyclic(|me| NamingService {
            me: me.clone(),
            bindings: DashMap::with_hasher(RandomState::new()),
            table: Mutex::new(MountTable::new()),
            mount_table_path: self.mount_table_path,
            backing: self.backing,
            processes: self.processes,
            executor: self.executor,
            activation_timeout: self.activation_timeout,
        })
    }
}

/// Naming service.
///
/// Map guards are never held across a call into a mount, a process, or
/// a collaborator; entries are cloned out first.
pub struct NamingService {
    me: Weak<NamingService>,
    bindings: DashMap<String, Binding, RandomState>,
    /// Passive declarations; held across the file rewrite so saves are ordered
    table: Mutex<MountTable>,
    mount_table_path: Option<PathBuf>,
    backing: ServiceHandle,
    processes: ProcessManager,
    executor: Arc<dyn ProcessExecution>,
    activation_timeout: Duration,
}

impl NamingService {
    pub fn builder(
        backing: ServiceHandle,
        processes: ProcessManager,
        executor: Arc<dyn ProcessExecution>,
    ) -> NamingServiceBuilder {
        NamingServiceBuilder {
            backing,
            processes,
            executor,
            activation_timeout: DEFAULT_ACTIVATION_TIMEOUT,
            mount_table_path: None,
        }
    }

    /// Load the persisted mount table and install each entry as a configured mount
    pub fn start(&self) -> NamingResult<usize> {
        let Some(path) = &self.mount_table_path else {
            return Ok(0);
        };
        let loaded = MountTable::load(path)?;

        let mut table = self.table.lock();
        for (mount_path, spec) in loaded.iter() {
            let mount = TranslatorMount::new(mount_path.clone(), spec.command.clone(), spec.args.clone(), true);
            self.bindings
                .insert(mount_path.clone(), Binding::Translator(Arc::new(mount)));
        }
        let count = loaded.len();
        *table = loaded;

        info!(mounts = count, path = %path.display(), "Loaded passive translators");
        Ok(count)
    }

    fn binding(&self, path: &str) -> Option<Binding> {
        self.bindings.get(path).map(|entry| entry.value().clone())
    }

    fn mount_at(&self, path: &str) -> Option<Arc<TranslatorMount>> {
        match self.binding(path) {
            Some(Binding::Translator(mount)) => Some(mount),
            _ => None,
        }
    }

    fn persist(&self, table: &MountTable) -> NamingResult<()> {
        match &self.mount_table_path {
            Some(path) => table.save(path),
            None => Ok(()),
        }
    }

    fn terminate(&self, pid: Pid, path: &str) {
        match self.processes.send_signal(pid, Signal::Terminate) {
            Ok(()) => info!(pid, mount = path, "Terminating translator"),
            Err(e) => debug!(pid, mount = path, error = %e, "Translator already gone"),
        }
    }

    // ------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------

    /// Bind an object at `path`, replacing any mount there
    pub fn bind(&self, path: &str, handle: ServiceHandle) -> NamingResult<()> {
        let path = normalize(path)?;
        let name = handle.name().to_string();
        if let Some(Binding::Translator(mount)) = self.bindings.insert(path.clone(), Binding::Direct(handle)) {
            debug!(path = %path, running = ?mount.running_pid(), "Direct binding replaced translator mount");
        }
        info!(path = %path, object = %name, "Bound object");
        Ok(())
    }

    /// Remove whatever is bound at exactly `path`.
    ///
    /// A translator mount goes away entirely: its process is terminated
    /// and a persisted entry is dropped.
    pub fn unbind(&self, path: &str) -> NamingResult<()> {
        let path = normalize(path)?;
        let (_, removed) = self
            .bindings
            .remove(&path)
            .ok_or_else(|| NamingError::UnknownPath(path.clone()))?;

        if let Binding::Translator(mount) = removed {
            if let Some(pid) = mount.reset() {
                self.terminate(pid, &path);
            }
            let mut table = self.table.lock();
            if table.remove(&path).is_some() {
                self.persist(&table)?;
            }
        }
        info!(path = %path, "Unbound");
        Ok(())
    }

    /// Declare a translator at `path`.
    ///
    /// PASSIVE persists the declaration, ACTIVATE starts the translator
    /// before returning, FORCE replaces one that is already running.
    pub fn bind_translator(
        &self,
        path: &str,
        command: &str,
        args: Vec<String>,
        options: TranslatorOptions,
    ) -> NamingResult<()> {
        let path = normalize(path)?;
        if command.trim().is_empty() {
            return Err(NamingError::InvalidExecutable("empty command".to_string()));
        }

        if let Some(existing) = self.mount_at(&path) {
            if existing.is_running() {
                if !options.contains(TranslatorOptions::FORCE) {
                    debug!(path = %path, "Translator already running, bind ignored");
                    return Ok(());
                }
                if let Some(pid) = existing.reset() {
                    self.terminate(pid, &path);
                }
            }
        }

        let passive = options.contains(TranslatorOptions::PASSIVE);
        let mount = Arc::new(TranslatorMount::new(path.clone(), command.to_string(), args.clone(), passive));
        self.bindings
            .insert(path.clone(), Binding::Translator(mount.clone()));
        info!(path = %path, command, ?options, "Translator bound");

        if passive {
            let mut table = self.table.lock();
            table.insert(path.clone(), MountSpec::new(command, args));
            self.persist(&table)?;
        }

        if options.contains(TranslatorOptions::ACTIVATE) {
            self.activate(KERNEL_PID, &mount)
                .unwrap_or(Err(NamingError::TranslatorFailed {
                    path: path.clone(),
                    reason: "activation did not complete".to_string(),
                }))?;
        }
        Ok(())
    }

    /// Tear down a translator declaration.
    ///
    /// PASSIVE drops the persisted entry; ACTIVATE (the default when no
    /// option is given) stops any running process and reverts the mount
    /// to its persisted configuration, or removes it if there is none.
    pub fn unbind_translator(&self, path: &str, options: TranslatorOptions) -> NamingResult<()> {
        let path = normalize(path)?;
        let options = if options.is_empty() {
            TranslatorOptions::ACTIVATE
        } else {
            options
        };

        let mount = self.mount_at(&path);
        let mut table = self.table.lock();
        if mount.is_none() && table.get(&path).is_none() {
            return Err(NamingError::UnknownPath(path));
        }

        if options.contains(TranslatorOptions::PASSIVE) && table.remove(&path).is_some() {
            self.persist(&table)?;
            if let Some(mount) = &mount {
                mount.set_passive(false);
            }
            info!(path = %path, "Passive translator removed");
        }

        if options.contains(TranslatorOptions::ACTIVATE) {
            if let Some(mount) = &mount {
                if let Some(pid) = mount.reset() {
                    self.terminate(pid, &path);
                }
            }
            match table.get(&path) {
                Some(spec) => {
                    let mount = TranslatorMount::new(path.clone(), spec.command.clone(), spec.args.clone(), true);
                    self.bindings
                        .insert(path.clone(), Binding::Translator(Arc::new(mount)));
                }
                None => {
                    self.bindings.remove(&path);
                }
            }
            info!(path = %path, "Active translator removed");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolve `path` to the object serving it and the path left for that object.
    ///
    /// The longest bound prefix wins. An unstarted translator there is
    /// started first, unless `caller` is that translator's own process,
    /// in which case resolution continues with shorter prefixes.
    pub fn lookup(&self, caller: Pid, path: &str) -> NamingResult<Resolution> {
        let mut span = span_request("lookup", path);
        let mut activating = Duration::ZERO;
        let result = self.resolve(caller, path, false, &mut activating);
        span.exclude(activating);
        span.record_outcome(&result);
        result
    }

    /// With `beneath`, resolve strictly below the entry at `path`, i.e. the
    /// node a mount there covers. Time spent waiting on translator starts
    /// is added to `activating`.
    fn resolve(
        &self,
        caller: Pid,
        path: &str,
        beneath: bool,
        activating: &mut Duration,
    ) -> NamingResult<Resolution> {
        let path = normalize(path)?;

        for prefix in prefixes(&path) {
            if beneath && prefix == path {
                continue;
            }
            let Some(binding) = self.binding(prefix) else {
                continue;
            };

            match binding {
                Binding::Direct(handle) => {
                    return Ok(Resolution {
                        handle,
                        remainder: remainder(&path, prefix),
                    })
                }
                Binding::Translator(mount) => match self.activate_timed(caller, &mount, activating) {
                    Some(outcome) => {
                        return outcome.map(|handle| Resolution {
                            handle,
                            remainder: remainder(&path, prefix),
                        })
                    }
                    None => {
                        debug!(caller, mount = prefix, "Translator looking beneath its own mount");
                    }
                },
            }
        }

        Ok(Resolution {
            handle: self.backing.clone(),
            remainder: path,
        })
    }

    fn activate_timed(
        &self,
        caller: Pid,
        mount: &Arc<TranslatorMount>,
        activating: &mut Duration,
    ) -> Option<NamingResult<ServiceHandle>> {
        let started = Instant::now();
        let outcome = self.activate(caller, mount);
        *activating += started.elapsed();
        outcome
    }

    /// Get a live handle for `mount`, starting the translator if needed.
    ///
    /// `None` means the caller is the translator being started.
    fn activate(&self, caller: Pid, mount: &Arc<TranslatorMount>) -> Option<NamingResult<ServiceHandle>> {
        match mount.claim() {
            Claim::Ready(handle) => Some(Ok(handle)),
            Claim::Join(activation) => self.await_activation(caller, mount, &activation),
            Claim::Spawn(activation) => {
                let span = span_operation("translator_activation");
                self.spawn_translator(caller, mount, &activation);
                let outcome = self.await_activation(caller, mount, &activation);
                span.record_result(matches!(outcome, Some(Ok(_))));
                outcome
            }
        }
    }

    /// The node beneath the mount is resolved as `caller`, so a starting
    /// translator that triggers a nested mount still sees through its own.
    fn spawn_translator(&self, caller: Pid, mount: &Arc<TranslatorMount>, activation: &Arc<Activation>) {
        let mut nested = Duration::ZERO;
        let underlying = match self.resolve(caller, &mount.path, true, &mut nested) {
            Ok(resolution) => resolution,
            Err(e) => {
                mount.fail(activation, e);
                return;
            }
        };

        let request = SpawnRequest::new(mount.command.clone(), mount.args.clone()).with_translator(TranslatorLaunch {
            mount_path: mount.path.clone(),
            backing: underlying.handle,
            backing_path: underlying.remainder,
        });

        match self.executor.spawn(request) {
            Ok(pid) if mount.attach_pid(activation, pid) => {
                info!(pid, mount = %mount.path, command = %mount.command, "Translator spawned");
                self.watch_translator(&mount.path, pid);
            }
            Ok(pid) => {
                warn!(pid, mount = %mount.path, "Mount reset during spawn, stopping superseded translator");
                self.terminate(pid, &mount.path);
            }
            Err(e) => {
                warn!(mount = %mount.path, error = %e, "Translator spawn failed");
                mount.fail(activation, spawn_error(&mount.path, e));
            }
        }
    }

    /// Reset the mount when the translator process goes away
    fn watch_translator(&self, path: &str, pid: Pid) {
        let service = self.me.clone();
        let mount_path = path.to_string();
        let handler = Arc::new(move |_: &crate::process::ProcEvent| {
            if let Some(service) = service.upgrade() {
                service.translator_exited(&mount_path, pid);
            }
        });

        if self
            .processes
            .register_event_handler(pid, ProcEventKind::Deregister, handler)
            .is_err()
        {
            // exited before we could watch it
            self.translator_exited(path, pid);
        }
    }

    fn await_activation(
        &self,
        caller: Pid,
        mount: &Arc<TranslatorMount>,
        activation: &Arc<Activation>,
    ) -> Option<NamingResult<ServiceHandle>> {
        match activation.wait(caller, Instant::now() + self.activation_timeout) {
            ActivationWait::Ready(outcome) => Some(outcome),
            ActivationWait::SelfReference => None,
            ActivationWait::TimedOut => {
                let error = NamingError::TranslatorFailed {
                    path: mount.path.clone(),
                    reason: format!(
                        "no registration within {}ms",
                        self.activation_timeout.as_millis()
                    ),
                };
                if mount.fail(activation, error.clone()) {
                    warn!(mount = %mount.path, pid = ?activation.pid(), "Translator activation timed out");
                    if let Some(pid) = activation.pid() {
                        self.terminate(pid, &mount.path);
                    }
                }
                Some(activation.outcome().unwrap_or(Err(error)))
            }
        }
    }

    /// Self-registration of a translator started for `mount_path`
    pub fn register_translator(&self, caller: Pid, mount_path: &str, handle: ServiceHandle) -> NamingResult<()> {
        let path = normalize(mount_path)?;
        let mount = self
            .mount_at(&path)
            .ok_or_else(|| NamingError::UnknownPath(path.clone()))?;
        mount.register(caller, handle, Instant::now() + self.activation_timeout)?;
        info!(pid = caller, mount = %path, "Translator registered");
        Ok(())
    }

    /// Reset a mount whose translator died unexpectedly
    pub fn translator_failure(&self, path: &str) -> NamingResult<()> {
        let path = normalize(path)?;
        let mount = self
            .mount_at(&path)
            .ok_or_else(|| NamingError::UnknownPath(path.clone()))?;
        let pid = mount.reset();
        warn!(mount = %path, pid = ?pid, "Translator failure reported, mount reset");
        Ok(())
    }

    fn translator_exited(&self, path: &str, pid: Pid) {
        if let Some(mount) = self.mount_at(path) {
            if mount.reset_if_pid(pid) {
                info!(pid, mount = path, "Translator exited, mount reset");
            }
        }
    }

    // ------------------------------------------------------------------
    // File namespace
    // ------------------------------------------------------------------

    fn namespace_call<T>(
        &self,
        caller: Pid,
        path: &str,
        call: impl FnOnce(&dyn super::traits::FileNamespace, &str) -> NamingResult<T>,
    ) -> NamingResult<T> {
        let resolution = self.lookup(caller, path)?;
        match resolution.handle.as_namespace() {
            Some(namespace) => call(namespace, &resolution.remainder),
            None => Err(NamingError::IllegalOperation(format!(
                "{} does not serve files",
                resolution.handle.name()
            ))),
        }
    }

    pub fn attributes(&self, caller: Pid, path: &str) -> NamingResult<FileAttributes> {
        self.namespace_call(caller, path, |namespace, rest| namespace.attributes(rest))
    }

    pub fn list(&self, caller: Pid, path: &str) -> NamingResult<Vec<DirEntry>> {
        self.namespace_call(caller, path, |namespace, rest| namespace.list(rest))
    }

    /// Open files held by `pid` across the backing store and every active translator
    pub fn get_open_files(&self, pid: Pid) -> Vec<OpenFileInfo> {
        let mut files = self
            .backing
            .as_namespace()
            .map(|namespace| namespace.open_files(pid))
            .unwrap_or_default();

        for handle in self.translator_mounts().iter().filter_map(|mount| mount.handle()) {
            if let Some(namespace) = handle.as_namespace() {
                files.extend(namespace.open_files(pid));
            }
        }
        files
    }

    fn translator_mounts(&self) -> Vec<Arc<TranslatorMount>> {
        self.bindings
            .iter()
            .filter_map(|entry| match entry.value() {
                Binding::Translator(mount) => Some(mount.clone()),
                Binding::Direct(_) => None,
            })
            .collect()
    }

    /// Translator mounts, ordered by path
    pub fn mounts(&self) -> Vec<MountInfo> {
        let mut infos: Vec<MountInfo> = self
            .translator_mounts()
            .iter()
            .map(|mount| mount.info())
            .collect();
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        infos
    }

    pub fn backing(&self) -> &ServiceHandle {
        &self.backing
    }
}

fn spawn_error(path: &str, err: ExecError) -> NamingError {
    match err {
        ExecError::InvalidExecutable(reason) => NamingError::InvalidExecutable(reason),
        ExecError::ServiceUnreachable(reason) => NamingError::ServiceUnreachable(reason),
        other => NamingError::TranslatorFailed {
            path: path.to_string(),
            reason: other.to_string(),
        },
    }
}
