//! High-level interface to the DW1000
//!
//! The entry point to this API is the [DW1000] struct. It walks the device
//! through its lifecycle as a type state (`Uninitialized` to `Ready`), and a
//! `Ready` device is handed to a [Transceiver], which runs the
//! send/receive transactions and consumes the hardware completion events.
//!
//! This module implements a high-level interface to the DW1000. This is the
//! recommended way to access the DW1000 using this crate, unless you need the
//! greater flexibility provided by the [register-level interface].
//!
//! [register-level interface]: ../ll/index.html

use core::{fmt, num::Wrapping};

pub use error::*;
pub use frame::*;
pub use state_impls::*;
pub use transceiver::*;

use crate::{ll, time::Instant};

#[cfg(feature = "defmt")]
use defmt::Format;

mod awake;
mod error;
mod frame;
mod ready;
mod state_impls;
mod transceiver;
mod uninitialized;

/// Entry point to the DW1000 driver API
pub struct DW1000<B, State> {
    ll: ll::DW1000<B>,
    seq: Wrapping<u8>,
    info: DeviceInfo,
    state: State,
}

// Can't be derived without putting requirements on `B`.
impl<B, State> fmt::Debug for DW1000<B, State>
where
    State: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DW1000 {{ state: ")?;
        self.state.fmt(f)?;
        write!(f, ", info: {:?}, .. }}", self.info)?;

        Ok(())
    }
}

/// Identity of an initialized device
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct DeviceInfo {
    /// Content of the DEV_ID register
    pub device_id: u32,
    /// System time read during initialization
    pub timestamp: Option<Instant>,
    /// The PAN id in use
    pub pan_id: u16,
    /// The short address in use
    pub short_addr: u16,
}

/// Status bits shared between the caller and the completion-event context
#[derive(Clone, Copy, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status(u16);

impl Status {
    /// The device passed initialization
    pub const INITIALIZED: Status = Status(1 << 0);
    /// The transmitter could not be started in time
    pub const START_TX_ERROR: Status = Status(1 << 1);
    /// The response did not arrive within the receive timeout
    pub const RX_TIMEOUT_ERROR: Status = Status(1 << 2);
    /// The receiver reported an error, or the frame was not for us
    pub const RX_ERROR: Status = Status(1 << 3);
    /// The caller stopped waiting before the transaction finished
    pub const REQUEST_TIMEOUT: Status = Status(1 << 4);

    /// All bits describing the outcome of the last transaction
    pub const FAULTS: Status = Status(
        Self::START_TX_ERROR.0 | Self::RX_TIMEOUT_ERROR.0 | Self::RX_ERROR.0 | Self::REQUEST_TIMEOUT.0,
    );

    /// No bits set
    pub const fn empty() -> Self {
        Status(0)
    }

    /// The raw bits
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// Whether all bits of `other` are set
    pub const fn contains(&self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any fault bit is set
    pub const fn has_fault(&self) -> bool {
        self.0 & Self::FAULTS.0 != 0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: Status) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: Status) {
        self.0 &= !other.0;
    }

    /// `initialized` bit
    pub const fn initialized(&self) -> bool {
        self.contains(Self::INITIALIZED)
    }

    /// `start_tx_error` bit
    pub const fn start_tx_error(&self) -> bool {
        self.contains(Self::START_TX_ERROR)
    }

    /// `rx_timeout_error` bit
    pub const fn rx_timeout_error(&self) -> bool {
        self.contains(Self::RX_TIMEOUT_ERROR)
    }

    /// `rx_error` bit
    pub const fn rx_error(&self) -> bool {
        self.contains(Self::RX_ERROR)
    }

    /// `request_timeout` bit
    pub const fn request_timeout(&self) -> bool {
        self.contains(Self::REQUEST_TIMEOUT)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Status")
            .field("initialized", &self.initialized())
            .field("start_tx_error", &self.start_tx_error())
            .field("rx_timeout_error", &self.rx_timeout_error())
            .field("rx_error", &self.rx_error())
            .field("request_timeout", &self.request_timeout())
            .finish()
    }
}

/// A hardware completion event
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Event {
    /// The frame has been sent
    TxDone,
    /// A good frame is waiting in the receive buffer
    RxDone,
    /// The receiver gave up waiting for a frame
    RxTimeout,
    /// The receiver saw a broken frame
    RxError,
}

/// Where the transaction engine is in the current or last transaction
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum TransactionState {
    /// No transaction in flight
    Idle,
    /// The frame is being transmitted
    Sending,
    /// The frame is out, the receiver waits for the response
    WaitingResponse,
    /// The last transaction finished successfully
    Completed,
    /// The last transaction ended with a receive timeout or the caller
    /// stopped waiting
    TimedOut,
    /// The last transaction ended with a transmit or receive fault
    Faulted,
}
