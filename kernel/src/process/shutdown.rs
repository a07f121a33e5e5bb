/*!
 * Kernel Shutdown
 * Ordered, post-order teardown of every process tree
 */

use super::manager::ProcessManager;
use super::signals::Signal;
use super::types::{
    EventHandler, ProcEvent, ProcEventKind, ProcessError, ProcessResult, ShutdownReport,
};
use crate::core::types::{ParentId, Pid, FORCED_EXIT_STATUS};
use crate::monitoring::OperationSpan;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl ProcessManager {
    /// Stop the kernel.
    ///
    /// Process leaders go first, translators last so that file access keeps
    /// working while ordinary processes clean up. Within each tree children
    /// are terminated before their parent. A process that has not
    /// deregistered within the grace period is removed by force.
    pub fn shutdown(&self) -> ProcessResult<ShutdownReport> {
        if !self.begin_stopping() {
            return Err(ProcessError::IllegalOperation(
                "shutdown already in progress".to_string(),
            ));
        }
        let span = OperationSpan::new("kernel_shutdown");

        let mut leaders = Vec::new();
        let mut translators = Vec::new();
        for proc in self.all_procs() {
            let inner = proc.inner.lock();
            if !inner.is_alive() {
                continue;
            }
            match inner.parent {
                ParentId::Daemon => leaders.push(proc.id),
                ParentId::Translator => translators.push(proc.id),
                ParentId::Process(_) => {}
            }
        }
        info!(
            leaders = leaders.len(),
            translators = translators.len(),
            "Kernel stopping"
        );

        let mut report = ShutdownReport::default();
        for pid in leaders.into_iter().chain(translators) {
            self.terminate_tree(pid, &mut report);
        }

        span.record_items_processed(report.terminated.len());
        span.record_result(report.forced.is_empty());
        self.finish_shutdown();

        info!(
            terminated = report.terminated.len(),
            forced = report.forced.len(),
            "Kernel shutdown complete"
        );
        Ok(report)
    }

    fn terminate_tree(&self, pid: Pid, report: &mut ShutdownReport) {
        let children = match self.get(pid) {
            Some(proc) => {
                let inner = proc.inner.lock();
                if !inner.is_alive() {
                    return;
                }
                inner.children.clone()
            }
            None => return,
        };

        for child in children {
            self.terminate_tree(child, report);
        }
        self.terminate_one(pid, report);
    }

    fn terminate_one(&self, pid: Pid, report: &mut ShutdownReport) {
        let (done_tx, done_rx) = flume::bounded::<()>(1);
        let handler: EventHandler = Arc::new(move |_: &ProcEvent| {
            let _ = done_tx.try_send(());
        });
        if self
            .register_event_handler(pid, ProcEventKind::Deregister, handler)
            .is_err()
        {
            // exited on its own in the meantime
            return;
        }

        if let Err(e) = self.send_signal(pid, Signal::Terminate) {
            debug!(pid, error = %e, "Terminate not delivered");
        }
        report.terminated.push(pid);

        let grace = self.shutdown_grace();
        if done_rx.recv_timeout(grace).is_ok() {
            debug!(pid, "Process exited");
            return;
        }

        warn!(
            pid,
            grace_ms = grace.as_millis() as u64,
            "Process ignored terminate, forcing deregistration"
        );
        if let Err(e) = self.deregister_process(pid, FORCED_EXIT_STATUS) {
            debug!(pid, error = %e, "Forced deregistration raced with exit");
        }
        report.forced.push(pid);
    }
}
