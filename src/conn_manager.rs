use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use tokio::{
    sync::mpsc::{Receiver, Sender},
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn, Instrument};

use crate::{
    config::{Config, PrinterConfig},
    sdcp::{discovery::PrinterIdentity, ElegooClient, SessionTiming},
    status::{PrinterStatus, StatusSnapshot},
};

/// The configured name of a printer
pub type PrinterId = Arc<String>;

/// messages from PrinterConnManager to the front end
#[derive(Debug, Clone)]
pub enum PrinterConnMsg {
    Connected(PrinterId, Arc<PrinterIdentity>),
    /// The connection ended or could not be opened, with the reason if known
    Disconnected(PrinterId, Option<String>),
    /// The latest status of a printer, and when the printer last sent one
    StatusReport(PrinterId, Arc<PrinterStatus>, Option<DateTime<Local>>),
}

/// messages from the front end to PrinterConnManager
#[derive(Debug, Clone)]
pub enum PrinterConnCmd {
    /// poll a printer now instead of waiting for the next tick
    ReportStatus(PrinterId),
    /// drop the connection and connect again right away
    Reconnect(PrinterId),
    /// close the connection and stop reconnecting until `Reconnect`
    Disconnect(PrinterId),
    Shutdown,
}

struct PrinterConn {
    config: PrinterConfig,
    client: ElegooClient,
    last_attempt: Option<Instant>,
    /// connected as of the last tick, used to notice a dropped connection
    was_connected: bool,
    /// set by `Disconnect`, cleared by `Reconnect`
    paused: bool,
}

pub struct PrinterConnManager {
    config: Config,
    timing: SessionTiming,
    printers: HashMap<PrinterId, PrinterConn>,
    printer_states: Arc<DashMap<PrinterId, StatusSnapshot>>,
    cmd_rx: Receiver<PrinterConnCmd>,
    msg_tx: Sender<PrinterConnMsg>,
}

impl PrinterConnManager {
    pub fn new(
        config: Config,
        printer_states: Arc<DashMap<PrinterId, StatusSnapshot>>,
        cmd_rx: Receiver<PrinterConnCmd>,
        msg_tx: Sender<PrinterConnMsg>,
    ) -> Self {
        let timing = config.timing();
        Self {
            config,
            timing,
            printers: HashMap::new(),
            printer_states,
            cmd_rx,
            msg_tx,
        }
    }

    /// Overrides the session timing taken from the config
    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// init:
    ///     - create a client for each configured printer
    ///     - connect them all if `auto_connect` is set
    /// loop:
    ///     - on each tick poll connected printers and retry the others
    ///     - handle commands until `Shutdown` or the command channel closes
    pub async fn run(&mut self) -> Result<()> {
        for printer in self.config.printers.clone() {
            self.add_printer(printer);
        }

        if self.config.auto_connect {
            let ids: Vec<PrinterId> = self.printers.keys().cloned().collect();
            for id in ids {
                self.connect_printer(&id).await;
            }
        } else {
            for conn in self.printers.values_mut() {
                conn.paused = true;
            }
        }

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_all().await;
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(PrinterConnCmd::Shutdown) | None => break,
                        Some(cmd) => {
                            debug!("got cmd = {:?}", cmd);
                            self.handle_command(cmd).await;
                        }
                    }
                }
            }
        }

        info!("shutting down printer connections");
        for conn in self.printers.values_mut() {
            conn.client.disconnect().await;
        }
        Ok(())
    }

    fn add_printer(&mut self, printer: PrinterConfig) {
        let id: PrinterId = Arc::new(printer.name.clone());
        if self.printers.contains_key(&id) {
            warn!("duplicate printer name in config: {}", id);
            return;
        }

        let span = tracing::info_span!("printer", name = %id, session = %nanoid::nanoid!(8));
        let client = ElegooClient::new(self.timing.clone()).with_span(span);

        self.printer_states.insert(id.clone(), StatusSnapshot::default());
        self.printers.insert(
            id,
            PrinterConn {
                config: printer,
                client,
                last_attempt: None,
                was_connected: false,
                paused: false,
            },
        );
    }

    async fn send(&self, msg: PrinterConnMsg) {
        if let Err(e) = self.msg_tx.send(msg).await {
            error!("error sending printer message: {:?}", e);
        }
    }

    async fn connect_printer(&mut self, id: &PrinterId) {
        let Some(conn) = self.printers.get_mut(id) else {
            warn!("printer not found: {:?}", id);
            return;
        };

        conn.last_attempt = Some(Instant::now());
        let span = conn.client.span().clone();
        let host = conn.config.host.clone();

        let connected = conn.client.connect(&host).instrument(span).await;
        conn.was_connected = connected;

        let msg = if connected {
            match conn.client.identity() {
                Some(identity) => PrinterConnMsg::Connected(id.clone(), identity),
                None => return,
            }
        } else {
            PrinterConnMsg::Disconnected(id.clone(), conn.client.last_error())
        };
        self.send(msg).await;
    }

    async fn poll_all(&mut self) {
        let ids: Vec<PrinterId> = self.printers.keys().cloned().collect();
        for id in ids {
            self.poll_printer(&id).await;
        }
    }

    /// Polls a connected printer, or retries a disconnected one once the
    /// reconnect interval has passed since the last attempt
    async fn poll_printer(&mut self, id: &PrinterId) {
        let reconnect_interval = self.config.reconnect_interval();
        let Some(conn) = self.printers.get_mut(id) else {
            return;
        };

        if conn.client.is_connected() {
            let span = conn.client.span().clone();
            if let Err(e) = conn.client.request_status().instrument(span).await {
                warn!("status request failed for {}: {}", id, e);
            }
        }

        if conn.client.is_connected() {
            self.report_status(id).await;
            return;
        }

        if conn.was_connected {
            conn.was_connected = false;
            let reason = conn.client.last_error();
            error!("printer disconnected: {}", id);
            self.send(PrinterConnMsg::Disconnected(id.clone(), reason)).await;
            return;
        }

        let due = match conn.last_attempt {
            Some(at) => at.elapsed() >= reconnect_interval,
            None => true,
        };
        if due && !conn.paused {
            debug!("reconnecting to {}", id);
            self.connect_printer(id).await;
        }
    }

    /// Copies the client's latest status into the shared map and publishes it
    async fn report_status(&self, id: &PrinterId) {
        let Some(conn) = self.printers.get(id) else {
            warn!("printer not found: {:?}", id);
            return;
        };

        let (status, last_updated, _) = conn.client.current_status();
        self.printer_states.insert(
            id.clone(),
            StatusSnapshot {
                status: status.clone(),
                last_updated,
            },
        );
        self.send(PrinterConnMsg::StatusReport(id.clone(), status, last_updated))
            .await;
    }

    async fn handle_command(&mut self, cmd: PrinterConnCmd) {
        match cmd {
            PrinterConnCmd::ReportStatus(id) => {
                let Some(conn) = self.printers.get(&id) else {
                    warn!("printer not found: {:?}", id);
                    return;
                };
                if conn.client.is_connected() {
                    let span = conn.client.span().clone();
                    if let Err(e) = conn.client.request_status().instrument(span).await {
                        warn!("status request failed for {}: {}", id, e);
                    }
                }
                self.report_status(&id).await;
            }
            PrinterConnCmd::Reconnect(id) => {
                let Some(conn) = self.printers.get_mut(&id) else {
                    warn!("printer not found: {:?}", id);
                    return;
                };
                conn.paused = false;
                self.connect_printer(&id).await;
            }
            PrinterConnCmd::Disconnect(id) => {
                let Some(conn) = self.printers.get_mut(&id) else {
                    warn!("printer not found: {:?}", id);
                    return;
                };
                conn.paused = true;
                let was_connected = std::mem::take(&mut conn.was_connected);
                conn.client.disconnect().await;
                if was_connected {
                    self.send(PrinterConnMsg::Disconnected(id, None)).await;
                }
            }
            PrinterConnCmd::Shutdown => {}
        }
    }
}
