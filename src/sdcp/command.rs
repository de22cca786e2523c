use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::discovery::PrinterIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// General status
    Status,
    /// Detailed status
    Detail,
    PrintInfo,
    Temperature,
    Raw(u32),
}

impl Command {
    /// Sent together on every poll tick
    pub const POLL_BATCH: [Command; 4] = [
        Command::Status,
        Command::Detail,
        Command::PrintInfo,
        Command::Temperature,
    ];

    pub fn code(&self) -> u32 {
        match self {
            Self::Status => 0,
            Self::Detail => 100,
            Self::PrintInfo => 200,
            Self::Temperature => 300,
            Self::Raw(code) => *code,
        }
    }

    pub fn envelope(&self, identity: &PrinterIdentity) -> RequestEnvelope {
        self.envelope_at(identity, Utc::now().timestamp())
    }

    pub fn envelope_at(&self, identity: &PrinterIdentity, timestamp: i64) -> RequestEnvelope {
        RequestEnvelope {
            id: identity.connection_kind.clone(),
            data: RequestData {
                cmd: self.code(),
                data: Map::new(),
                request_id: request_id(),
                mainboard_id: identity.id.clone(),
                time_stamp: timestamp,
                from: 0,
            },
            topic: request_topic(&identity.id),
        }
    }

    pub(crate) fn get_payload(&self, identity: &PrinterIdentity) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.envelope(identity))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestEnvelope {
    pub id: String,
    pub data: RequestData,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestData {
    pub cmd: u32,
    pub data: Map<String, Value>,
    #[serde(rename = "RequestID")]
    pub request_id: String,
    #[serde(rename = "MainboardID")]
    pub mainboard_id: String,
    pub time_stamp: i64,
    pub from: u32,
}

pub fn request_topic(mainboard_id: &str) -> String {
    format!("sdcp/request/{}", mainboard_id)
}

/// 16 lowercase hex chars, only needs to be unique enough to tell requests apart
pub fn request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
