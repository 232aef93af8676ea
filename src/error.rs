//! Rejections returned synchronously by the controller's command entry points.
//!
//! A `CommandError` always means nothing was sent to the device. Failures of
//! requests that did reach the network are never reported here; they show up
//! as unchanged state (see `control::client`).

/// Reason a command was not permitted.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Voltage text did not parse or fell outside the configured range.
    InvalidVoltage(String),
    /// Host or port could not be used as a connection target.
    InvalidTarget(String),
    NotConnected,
    AlreadyConnected,
    /// A connection attempt is running or its failure is still being shown.
    ConnectionInProgress,
    /// Output can only be switched after a voltage has been applied.
    NoVoltageApplied,
    /// The same kind of write is still waiting for the device.
    CommandPending,
    /// The link task is gone or its command queue is full.
    LinkStopped,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::InvalidVoltage(raw) => write!(f, "Invalid voltage: {:?}", raw),
            CommandError::InvalidTarget(msg) => write!(f, "Invalid target: {}", msg),
            CommandError::NotConnected => write!(f, "Not connected"),
            CommandError::AlreadyConnected => write!(f, "Already connected"),
            CommandError::ConnectionInProgress => write!(f, "Connection attempt in progress"),
            CommandError::NoVoltageApplied => write!(f, "No voltage applied yet"),
            CommandError::CommandPending => write!(f, "Previous command still pending"),
            CommandError::LinkStopped => write!(f, "Link task is not accepting commands"),
        }
    }
}

impl std::error::Error for CommandError {}
