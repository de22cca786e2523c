use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::utils::preview;

/// Port printers listen on for the discovery probe
pub const DISCOVERY_PORT: u16 = 3000;
/// Local port replies are expected on, when it can be bound
pub const LOCAL_DISCOVERY_PORT: u16 = 54780;
pub const DISCOVERY_PROBE: &[u8] = b"M99999";
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Goes in the `Id` field of every request envelope
pub const CONNECTION_KIND: &str = "ElegooPrinterAPI";

pub const FALLBACK_ID: &str = "generic-id";
pub const FALLBACK_NAME: &str = "generic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterIdentity {
    /// mainboard ID
    pub id: String,
    pub name: String,
    pub address: String,
    pub model: String,
    pub firmware: String,
    pub connection_kind: String,
}

impl PrinterIdentity {
    /// Stand-in used when the printer did not answer discovery
    pub fn fallback(address: &str) -> Self {
        Self {
            id: FALLBACK_ID.to_string(),
            name: FALLBACK_NAME.to_string(),
            address: address.to_string(),
            model: String::new(),
            firmware: String::new(),
            connection_kind: CONNECTION_KIND.to_string(),
        }
    }
}

/// Parses a discovery reply of the form `id|name|address|model|firmware|...`.
///
/// Needs at least the first three fields. An empty address field falls back
/// to `requested`.
pub fn parse_reply(data: &[u8], requested: &str) -> Option<PrinterIdentity> {
    let text = match std::str::from_utf8(data) {
        Ok(t) => t.trim(),
        Err(e) => {
            warn!("discovery reply is not UTF-8: {}", e);
            return None;
        }
    };
    debug!("raw discovery reply: {:?}", preview(text, 200));

    if !text.contains('|') {
        warn!("unrecognised discovery reply");
        return None;
    }

    let parts: Vec<&str> = text.split('|').map(str::trim).collect();
    if parts.len() < 3 {
        warn!("discovery reply has {} fields, need at least 3", parts.len());
        return None;
    }

    let field = |i: usize| parts.get(i).map(|s| s.to_string()).unwrap_or_default();

    let mut address = field(2);
    if address.is_empty() {
        address = requested.to_string();
    }

    Some(PrinterIdentity {
        id: field(0),
        name: field(1),
        address,
        model: field(3),
        firmware: field(4),
        connection_kind: CONNECTION_KIND.to_string(),
    })
}

/// Single-shot UDP discovery against one known address
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    remote_port: u16,
    local_port: u16,
    timeout: Duration,
}

impl Default for DiscoveryClient {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_TIMEOUT)
    }
}

impl DiscoveryClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            remote_port: DISCOVERY_PORT,
            local_port: LOCAL_DISCOVERY_PORT,
            timeout,
        }
    }

    /// `local_port` 0 skips straight to an ephemeral port
    pub fn with_ports(mut self, remote_port: u16, local_port: u16) -> Self {
        self.remote_port = remote_port;
        self.local_port = local_port;
        self
    }

    /// Probes `address` and waits for one reply. Every failure is logged and
    /// turned into `None`.
    pub async fn discover(&self, address: &str) -> Option<PrinterIdentity> {
        info!("starting printer discovery at {}", address);
        match self.try_discover(address).await {
            Ok(Some(printer)) => {
                info!("discovered: {} ({})", printer.name, printer.address);
                Some(printer)
            }
            Ok(None) => {
                warn!("could not discover printer details, will attempt direct connection");
                None
            }
            Err(e) => {
                warn!("error during discovery: {:?}", e);
                None
            }
        }
    }

    async fn try_discover(&self, address: &str) -> Result<Option<PrinterIdentity>> {
        let socket = self.bind().await?;
        socket.set_broadcast(true).context("enable broadcast")?;

        debug!("sending discovery probe to {}:{}", address, self.remote_port);
        socket
            .send_to(DISCOVERY_PROBE, (address, self.remote_port))
            .await
            .with_context(|| format!("send probe to {}:{}", address, self.remote_port))?;

        let mut buf = [0u8; 8192];
        let (n, from) = match tokio::time::timeout(self.timeout, socket.recv_from(&mut buf)).await {
            Ok(res) => res.context("receive discovery reply")?,
            Err(_) => {
                warn!("printer discovery timed out after {:?}", self.timeout);
                return Ok(None);
            }
        };
        debug!("received {} bytes from {}", n, from);

        Ok(parse_reply(&buf[..n], address))
    }

    async fn bind(&self) -> Result<UdpSocket> {
        if self.local_port != 0 {
            match UdpSocket::bind(("0.0.0.0", self.local_port)).await {
                Ok(socket) => return Ok(socket),
                Err(e) => warn!("could not bind to port {}: {}", self.local_port, e),
            }
        }
        UdpSocket::bind(("0.0.0.0", 0))
            .await
            .context("bind ephemeral discovery socket")
    }
}

/// Probes `address` with the default ports
pub async fn discover(address: &str, timeout: Duration) -> Option<PrinterIdentity> {
    DiscoveryClient::new(timeout).discover(address).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_reply() {
        let reply = b"ABCD1234|Saturn|192.168.1.50|Saturn 4 Ultra|V1.4.2|extra";
        let p = parse_reply(reply, "10.0.0.1").unwrap();
        assert_eq!(p.id, "ABCD1234");
        assert_eq!(p.name, "Saturn");
        assert_eq!(p.address, "192.168.1.50");
        assert_eq!(p.model, "Saturn 4 Ultra");
        assert_eq!(p.firmware, "V1.4.2");
        assert_eq!(p.connection_kind, CONNECTION_KIND);
    }

    #[test]
    fn parses_three_field_reply() {
        let p = parse_reply(b"id|name|", "10.0.0.1").unwrap();
        assert_eq!(p.address, "10.0.0.1");
        assert_eq!(p.model, "");
        assert_eq!(p.firmware, "");
    }

    #[test]
    fn rejects_short_or_garbled_replies() {
        assert_eq!(parse_reply(b"id|name", "10.0.0.1"), None);
        assert_eq!(parse_reply(b"hello printer", "10.0.0.1"), None);
        assert_eq!(parse_reply(&[0xff, 0xfe, b'|', b'|'], "10.0.0.1"), None);
    }

    #[test]
    fn fallback_identity() {
        let p = PrinterIdentity::fallback("192.168.1.9");
        assert_eq!(p.id, "generic-id");
        assert_eq!(p.name, "generic");
        assert_eq!(p.address, "192.168.1.9");
        assert_eq!(p.connection_kind, CONNECTION_KIND);
    }
}
