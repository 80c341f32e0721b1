//! Error types for the monitor.

use thiserror::Error;

/// Errors raised by the netlink socket layer.
///
/// The monitor decides the policy per call site: socket setup and dump sends
/// are fatal, steady-state receive failures are logged and survived.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Creating the NETLINK_ROUTE socket failed
    #[error("failed to create netlink socket: {0}")]
    Create(std::io::Error),

    /// Binding or joining a multicast group failed
    #[error("failed to bind netlink socket: {0}")]
    Bind(std::io::Error),

    /// Sending a dump request failed
    #[error("failed to send netlink request: {0}")]
    Send(std::io::Error),

    /// Receiving from the socket failed
    #[error("failed to receive from netlink socket: {0}")]
    Receive(std::io::Error),
}

impl MonitorError {
    /// The kernel's `errno` value, when the underlying failure carried one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            MonitorError::Create(e)
            | MonitorError::Bind(e)
            | MonitorError::Send(e)
            | MonitorError::Receive(e) => e.raw_os_error(),
        }
    }

    /// True if receiving would have blocked on a non-blocking socket.
    pub fn is_would_block(&self) -> bool {
        matches!(self, MonitorError::Receive(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }
}

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
