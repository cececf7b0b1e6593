//! Advisory free-port probing for the remote debugging endpoint.

use std::net::TcpListener;

use crate::error::{CdpError, Result};

/// Returns the lowest port in `[start, end]` a TCP listener could be bound
/// on. The probe listener is closed immediately, so the choice is advisory:
/// the browser's own stderr announcement remains the source of truth for the
/// port actually in use.
pub fn pick_free_port(start: u16, end: u16) -> Result<u16> {
    for port in start..=end {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    Err(CdpError::NoFreePort { start, end })
}
