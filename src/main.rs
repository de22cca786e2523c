use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use elegoo_watcher::{
    config::Config,
    conn_manager::{PrinterConnCmd, PrinterConnManager, PrinterConnMsg, PrinterId},
    logging,
    status::StatusSnapshot,
};

/// threads:
///     manager task, owns the printer sessions and polls them
///     main task, logs what the manager reports until ctrl-c
#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    let _guard = logging::init_logs(&config.log_dir, config.log_keep)?;

    if config.printers.is_empty() {
        warn!("no printers configured, set ELEGOO_IP or add one to config.yaml");
    }

    let (msg_tx, mut msg_rx) = tokio::sync::mpsc::channel::<PrinterConnMsg>(25);
    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::channel::<PrinterConnCmd>(25);

    let printer_states: Arc<DashMap<PrinterId, StatusSnapshot>> = Arc::new(DashMap::new());

    let mut manager = PrinterConnManager::new(config, printer_states.clone(), cmd_rx, msg_tx);
    let manager = tokio::spawn(async move {
        debug!("running PrinterConnManager");
        if let Err(e) = manager.run().await {
            error!("error running PrinterConnManager: {:?}", e);
        }
    });

    loop {
        tokio::select! {
            msg = msg_rx.recv() => match msg {
                Some(msg) => handle_msg(msg),
                None => break,
            },
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for ctrl-c")?;
                info!("interrupted, stopping");
                break;
            }
        }
    }

    if let Err(e) = cmd_tx.send(PrinterConnCmd::Shutdown).await {
        debug!("manager already stopped: {:?}", e);
    }
    drop(msg_rx);
    manager.await.context("manager task panicked")?;

    debug!("{} printers tracked at exit", printer_states.len());
    Ok(())
}

fn handle_msg(msg: PrinterConnMsg) {
    match msg {
        PrinterConnMsg::Connected(id, identity) => {
            info!(
                "{}: connected to {} {} ({}, firmware {:?})",
                id, identity.name, identity.model, identity.address, identity.firmware
            );
        }
        PrinterConnMsg::Disconnected(id, reason) => match reason {
            Some(reason) => warn!("{}: disconnected: {}", id, reason),
            None => warn!("{}: disconnected", id),
        },
        PrinterConnMsg::StatusReport(id, status, last_updated) => match last_updated {
            Some(at) => info!("{} [{}]: {}", id, at.format("%H:%M:%S"), status.summary()),
            None => debug!("{}: no status received yet", id),
        },
    }
}
