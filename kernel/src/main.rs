/*!
 * Overlay Kernel - Main Entry Point
 *
 * Wires the process manager, backing store, execution service, and
 * naming service together, then idles until Ctrl+C or a SHUTDOWN signal.
 */

use anyhow::Context;
use overlay_kernel::{
    init_tracing, HostExecution, HostStore, KernelConfig, KernelState, NamingService,
    ProcessExecution, ProcessManager,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = KernelConfig::from_env().context("reading kernel configuration")?;
    init_tracing(config.trace_json);

    info!("Overlay kernel starting...");
    info!(
        storage = %config.storage_path.display(),
        mount_table = ?config.mount_table_path,
        "Configuration loaded"
    );

    let process_manager = ProcessManager::builder().with_config(&config).build();

    let backing = Arc::new(
        HostStore::new(&config.storage_path).context("opening backing store")?,
    );
    let executor: Arc<dyn ProcessExecution> =
        Arc::new(HostExecution::new(process_manager.clone()));

    let naming = NamingService::builder(backing, process_manager.clone(), executor)
        .with_config(&config)
        .build();
    let mounts = naming.start().context("loading mount table")?;

    info!(passive_mounts = mounts, "Kernel initialization complete");
    info!("Press Ctrl+C to exit");

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                break;
            }
            _ = status.tick() => {
                if process_manager.kernel_state() != KernelState::Running {
                    break;
                }
                info!(
                    processes = process_manager.process_count(),
                    mounts = naming.mounts().len(),
                    "Kernel running"
                );
            }
        }
    }

    if process_manager.kernel_state() == KernelState::Running {
        let manager = process_manager.clone();
        match tokio::task::spawn_blocking(move || manager.shutdown()).await {
            Ok(Ok(report)) if !report.forced.is_empty() => {
                warn!(forced = ?report.forced, "Some processes were removed by force");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Shutdown already under way"),
            Err(e) => error!(error = %e, "Shutdown task panicked"),
        }
    }

    let manager = process_manager.clone();
    let grace = config.shutdown_grace;
    let finished = tokio::task::spawn_blocking(move || manager.wait_for_shutdown(grace * 4))
        .await
        .unwrap_or(false);
    if !finished {
        warn!("Kernel did not reach shutdown state in time");
    }

    info!("Kernel stopped");
    Ok(())
}
