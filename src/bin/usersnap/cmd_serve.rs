use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use usersnap::interrupt::set_up_process_interrupt_handler;
use usersnap::server::HttpServer;
use usersnap::{SnapshotManager, Store, UsersConfig};

/// Startup hook -> serve -> (signal) -> drain + flush -> stop workers.
pub fn exec(cfg: UsersConfig) -> Result<()> {
    info!("serve: {}", cfg);
    let interrupted = set_up_process_interrupt_handler()?;

    let store = Arc::new(Store::new());
    let mut manager = SnapshotManager::from_config(&cfg);
    let outcome = manager.load_into(&store)?;
    info!(
        "serve: snapshot {} -> {} user(s), next_id={}",
        outcome,
        store.len(),
        store.next_id()
    );

    let http = HttpServer::start(store.clone(), &cfg.http_addr, cfg.http_workers)?;
    manager.serving()?;

    interrupted.wait(Duration::from_millis(100));
    info!("serve: termination requested, draining");

    // Воркеры ещё живы: новые мутации получат 503, чтения обслуживаются до конца.
    let flushed = manager.shutdown(&store, cfg.drain_timeout());

    let stuck = http.stop(cfg.drain_timeout());
    if stuck > 0 {
        warn!("serve: exiting with {} busy worker(s)", stuck);
    }

    let report = flushed?;
    info!(
        "serve: shutdown complete ({} user(s), {} B, next_id={}{})",
        report.records,
        report.bytes,
        report.next_id,
        if report.drain_timed_out { ", drain timed out" } else { "" }
    );
    Ok(())
}
