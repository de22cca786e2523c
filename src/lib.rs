pub mod config;
pub mod conn_manager;
pub mod logging;
pub mod sdcp;
pub mod status;
pub mod utils;

pub use crate::{
    conn_manager::{PrinterConnCmd, PrinterConnManager, PrinterConnMsg, PrinterId},
    sdcp::{ElegooClient, SessionError, SessionState, SessionTiming},
    status::{CoarseStatus, PrintInfo, PrinterStatus, StatusSnapshot, Temperature},
};
