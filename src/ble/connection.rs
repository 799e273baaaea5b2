//! Connection Management
//!
//! Link state of the custom service. A single central at a time.

/// SoftDevice "no connection" handle
pub const INVALID_CONN_HANDLE: u16 = 0xFFFF;

/// Service lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServiceState {
    /// Attribute table not registered yet
    Off,
    /// Registered, waiting for a central
    Ready,
    Connected { handle: u16 },
}

/// Connection management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionError {
    InvalidHandle,
    ServiceOff,
    AlreadyConnected,
    ConnectionNotFound,
}

pub struct LinkState {
    state: ServiceState,
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkState {
    pub const fn new() -> Self {
        Self {
            state: ServiceState::Off,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Attribute table registered
    pub fn set_ready(&mut self) {
        if self.state == ServiceState::Off {
            self.state = ServiceState::Ready;
            debug!("CONNECTION: service ready");
        }
    }

    pub fn connect(&mut self, handle: u16) -> Result<(), ConnectionError> {
        if handle == INVALID_CONN_HANDLE {
            error!("CONNECTION: Invalid connection handle {}", handle);
            return Err(ConnectionError::InvalidHandle);
        }

        match self.state {
            ServiceState::Off => {
                error!("CONNECTION: connect {} before service registration", handle);
                Err(ConnectionError::ServiceOff)
            }
            ServiceState::Connected { handle: current } => {
                warn!("CONNECTION: {} rejected, already connected to {}", handle, current);
                Err(ConnectionError::AlreadyConnected)
            }
            ServiceState::Ready => {
                self.state = ServiceState::Connected { handle };
                debug!("CONNECTION: Added connection {}", handle);
                Ok(())
            }
        }
    }

    /// `reason` is the HCI reason when the stack reports one.
    pub fn disconnect(&mut self, handle: u16, reason: Option<u8>) -> Result<(), ConnectionError> {
        match self.state {
            ServiceState::Connected { handle: current } if current == handle => {
                self.state = ServiceState::Ready;
                debug!("CONNECTION: Removed connection {} (reason: {:?})", handle, reason);
                Ok(())
            }
            _ => {
                error!("CONNECTION: Attempted to remove unknown connection {}", handle);
                Err(ConnectionError::ConnectionNotFound)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ServiceState::Connected { .. })
    }
}
