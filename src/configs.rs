//! Configuration structs for the device, the transaction engine and ranging
//!
//! The PHY/MAC setup of the radio (channel, preamble, data rate) is not
//! modelled here. It is handed to [`DW1000::init`] as an opaque list of
//! register writes and applied once.
//!
//! [`DW1000::init`]: ../hl/struct.DW1000.html#method.init

#[cfg(feature = "defmt")]
use defmt::Format;

/// A raw register write
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterWrite {
    /// The register id
    pub id: u8,
    /// The sub-address within the register
    pub sub_id: u16,
    /// The value, written little-endian
    pub value: u64,
    /// How many bytes of `value` to write
    pub len: usize,
}

/// Device configuration
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Config {
    /// The PAN id written to PANADR
    pub pan_id: u16,
    /// The short address written to PANADR
    pub short_addr: u16,
    /// Bus speed in Hz while the device is still running from its RC clock
    pub baudrate_low: u32,
    /// Bus speed in Hz for normal operation
    pub baudrate_high: u32,
    /// PHY and MAC setup, applied verbatim during initialization
    pub phy: &'static [RegisterWrite],
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pan_id: 0xdeca,
            short_addr: 0x0000,
            baudrate_low: 2_000_000,
            baudrate_high: 8_000_000,
            phy: &[],
        }
    }
}

/// Transaction engine configuration
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkConfig {
    /// Receive response timeout of pings, in UWB microseconds. 0 disables it.
    pub resp_timeout: u16,
    /// How long control traffic (pings, outbound packets) waits for
    /// completion, in milliseconds
    pub request_timeout_ms: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            resp_timeout: 0xffff,
            request_timeout_ms: 500,
        }
    }
}

/// Ranging scheduler configuration
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangingConfig {
    /// Delay before the first tick after `start`, in milliseconds
    pub first_tick_ms: u32,
    /// Period between ticks, in milliseconds
    pub period_ms: u32,
    /// How long one ranging request may wait for completion, in milliseconds
    pub request_timeout_ms: u32,
    /// Receive response timeout, in UWB microseconds
    pub resp_timeout: u16,
    /// Hand completed exchanges to the deferred-work queue
    pub postprocess: bool,
}

impl Default for RangingConfig {
    fn default() -> Self {
        RangingConfig {
            first_tick_ms: 10,
            period_ms: 1000 / 32,
            request_timeout_ms: 10_000,
            resp_timeout: 0xffff,
            postprocess: true,
        }
    }
}
