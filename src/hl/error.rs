use core::fmt::{self, Display, Formatter};

#[cfg(feature = "defmt")]
use defmt::Format;

use crate::ll;

/// An error that can occur when driving the DW1000
pub enum Error<E> {
    /// Error occured while using the register bus
    Bus(ll::Error<E>),

    /// The device did not answer with the expected device id
    InitializationFault {
        /// The id that was read instead
        device_id: u32,
    },

    /// The transmitter could not be started in time
    TransmitFault,

    /// The response did not arrive within the receive timeout
    ReceiveTimeout,

    /// The receiver reported an error, or the response was not a link frame
    ReceiveFault,

    /// The caller stopped waiting before the transaction completed
    RequestTimeout,

    /// Buffer too small
    BufferTooSmall {
        /// Indicates how large a buffer would have been required
        required_len: usize,
    },

    /// Frame could not be decoded
    Frame(byte::Error),

    /// The ranging table was reinitialized with a different node count
    TableResize {
        /// Number of entries the table has
        expected: usize,
        /// Number of entries the new node count needs
        found: usize,
    },

    /// The ranging table can't hold all node pairs
    TableCapacity {
        /// Number of entries the node count needs
        required: usize,
    },
}

impl<E> From<ll::Error<E>> for Error<E> {
    fn from(error: ll::Error<E>) -> Self {
        Error::Bus(error)
    }
}

impl<E> From<byte::Error> for Error<E> {
    fn from(error: byte::Error) -> Self {
        Error::Frame(error)
    }
}

impl<E> Display for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(feature = "std")]
impl<E> std::error::Error for Error<E> where E: fmt::Debug {}

// We can't derive this implementation, as `Debug` is only implemented
// conditionally for `ll::Error`.
impl<E> fmt::Debug for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Error::Bus(error) => write!(f, "Bus({:?})", error),
            Error::InitializationFault { device_id } => {
                write!(f, "InitializationFault {{ device_id: {:#010x} }}", device_id)
            }
            Error::TransmitFault => write!(f, "TransmitFault"),
            Error::ReceiveTimeout => write!(f, "ReceiveTimeout"),
            Error::ReceiveFault => write!(f, "ReceiveFault"),
            Error::RequestTimeout => write!(f, "RequestTimeout"),
            Error::BufferTooSmall { required_len } => {
                write!(f, "BufferTooSmall {{ required_len: {:?} }}", required_len)
            }
            Error::Frame(error) => write!(f, "Frame({:?})", error),
            Error::TableResize { expected, found } => write!(
                f,
                "TableResize {{ expected: {}, found: {} }}",
                expected, found
            ),
            Error::TableCapacity { required } => {
                write!(f, "TableCapacity {{ required: {} }}", required)
            }
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> Format for Error<E> {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Bus(error) => defmt::write!(f, "Bus({:?})", error),
            Error::InitializationFault { device_id } => {
                defmt::write!(f, "InitializationFault {{ device_id: {=u32:#x} }}", device_id)
            }
            Error::TransmitFault => defmt::write!(f, "TransmitFault"),
            Error::ReceiveTimeout => defmt::write!(f, "ReceiveTimeout"),
            Error::ReceiveFault => defmt::write!(f, "ReceiveFault"),
            Error::RequestTimeout => defmt::write!(f, "RequestTimeout"),
            Error::BufferTooSmall { required_len } => {
                defmt::write!(f, "BufferTooSmall {{ required_len: {} }}", required_len)
            }
            Error::Frame(error) => defmt::write!(f, "Frame({:?})", defmt::Debug2Format(error)),
            Error::TableResize { expected, found } => defmt::write!(
                f,
                "TableResize {{ expected: {}, found: {} }}",
                expected,
                found
            ),
            Error::TableCapacity { required } => {
                defmt::write!(f, "TableCapacity {{ required: {} }}", required)
            }
        }
    }
}

impl<E> Error<E> {
    /// Whether the error ended a transaction rather than the bus or the
    /// device failing
    pub fn is_transaction_fault(&self) -> bool {
        matches!(
            self,
            Error::TransmitFault
                | Error::ReceiveTimeout
                | Error::ReceiveFault
                | Error::RequestTimeout
        )
    }
}
