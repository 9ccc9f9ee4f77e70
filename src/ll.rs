//! Low-level interface to the DW1000
//!
//! This module implements a register-level interface to the DW1000. Users of
//! this library should typically not need to use this. Please consider using
//! the [high-level interface] instead.
//!
//! Every access starts with a 1 to 3 byte command header, see
//! [`encode_header`]. The bytes that follow are register contents, least
//! significant byte first.
//!
//! **NOTE**: Register values are exchanged as raw little-endian integers. If
//! you pass a value that has more bits than the register access is wide, the
//! upper bytes are dropped.
//!
//! [high-level interface]: ../hl/index.html

use core::{fmt, marker::PhantomData};

use embedded_hal::digital::OutputPin;
use embedded_hal_async::{
    delay::DelayNs,
    spi::{Operation, SpiDevice},
};

#[cfg(feature = "defmt")]
use defmt::Format;

/// The highest register id the command header can address
pub const MAX_REGISTER_ID: u8 = 0x3f;

/// The end of the sub-addressable area of a register
pub const MAX_SUB_ADDRESS: u16 = 0x7fff;

/// Request/response contract of the bus the DW1000 sits on
///
/// Implementations must have finished the byte transfer when the returned
/// future resolves. [`SpiBus`] is the implementation for `embedded-hal-async`
/// SPI devices.
#[allow(async_fn_in_trait)]
pub trait RegisterBus {
    /// Error reported by the bus
    type Error;

    /// Send `header`, then clock `buffer.len()` bytes in from the device
    async fn read(&mut self, header: &[u8], buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Send `header`, then `data`
    async fn write(&mut self, header: &[u8], data: &[u8]) -> Result<(), Self::Error>;

    /// Pulse the device's reset line and wait for it to come back up
    async fn reset(&mut self) -> Result<(), Self::Error>;

    /// (Re)configure and enable the bus at the given baud rate in Hz
    async fn configure(&mut self, baudrate: u32) -> Result<(), Self::Error>;

    /// Disable the bus channel
    fn disable(&mut self);
}

/// Direction of a register access
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Direction {
    /// Read from the device
    Read = 0,
    /// Write to the device
    Write = 1,
}

/// An encoded command header
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Header {
    bytes: [u8; 3],
    len: usize,
}

impl Header {
    /// The header bytes that go onto the bus
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Number of header bytes, 1 to 3
    pub fn len(&self) -> usize {
        self.len
    }
}

/// Encodes the command header for a register access
///
/// Byte 0 carries the direction bit, the sub-index bit and the 6-bit
/// register id. A non-zero `sub_id` adds byte 1 with the extended-address bit
/// and the low 7 bits of the sub-address. Sub-addresses above 128 are
/// extended and add byte 2 with the remaining high bits.
///
/// Rejects register ids above `0x3f` and accesses that would run past the
/// 15-bit sub-addressable area, instead of truncating them.
pub fn encode_header<E>(
    id: u8,
    sub_id: u16,
    len: usize,
    direction: Direction,
) -> Result<Header, Error<E>> {
    if id > MAX_REGISTER_ID || sub_id as usize + len > MAX_SUB_ADDRESS as usize {
        return Err(Error::InvalidRegister { id, sub_id, len });
    }

    let sub_indexed = sub_id != 0;
    let extended = sub_id > 128;

    let mut bytes = [0; 3];
    bytes[0] = ((direction as u8) << 7) | ((sub_indexed as u8) << 6) | (id & 0x3f);

    if !sub_indexed {
        return Ok(Header { bytes, len: 1 });
    }

    bytes[1] = ((extended as u8) << 7) | (sub_id as u8 & 0x7f);

    if !extended {
        return Ok(Header { bytes, len: 2 });
    }

    bytes[2] = (sub_id >> 7) as u8;

    Ok(Header { bytes, len: 3 })
}

/// Entry point to the DW1000 driver's low-level API
///
/// Please consider using [hl::DW1000] instead.
///
/// [hl::DW1000]: ../hl/struct.DW1000.html
pub struct DW1000<B> {
    bus: B,
}

impl<B> DW1000<B> {
    /// Create a new instance of `DW1000`
    ///
    /// Requires the bus the DW1000 is connected to.
    pub fn new(bus: B) -> Self {
        DW1000 { bus }
    }

    /// Allow access to the bus
    pub fn bus(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Give the bus back
    pub fn release(self) -> B {
        self.bus
    }
}

impl<B> DW1000<B>
where
    B: RegisterBus,
{
    /// Read `buffer.len()` bytes starting at `sub_id` of register `id`
    pub async fn read(
        &mut self,
        id: u8,
        sub_id: u16,
        buffer: &mut [u8],
    ) -> Result<(), Error<B::Error>> {
        let header = encode_header(id, sub_id, buffer.len(), Direction::Read)?;
        self.bus
            .read(header.as_bytes(), buffer)
            .await
            .map_err(Error::Bus)
    }

    /// Write `data` starting at `sub_id` of register `id`
    pub async fn write(&mut self, id: u8, sub_id: u16, data: &[u8]) -> Result<(), Error<B::Error>> {
        let header = encode_header(id, sub_id, data.len(), Direction::Write)?;
        self.bus
            .write(header.as_bytes(), data)
            .await
            .map_err(Error::Bus)
    }

    /// Read an `nbytes` wide little-endian value
    pub async fn read_reg(
        &mut self,
        id: u8,
        sub_id: u16,
        nbytes: usize,
    ) -> Result<u64, Error<B::Error>> {
        if nbytes > 8 {
            return Err(Error::InvalidWidth { nbytes });
        }

        let mut buffer = [0; 8];
        self.read(id, sub_id, &mut buffer[..nbytes]).await?;

        Ok(u64::from_le_bytes(buffer))
    }

    /// Write the low `nbytes` bytes of `value`, little-endian
    pub async fn write_reg(
        &mut self,
        id: u8,
        sub_id: u16,
        value: u64,
        nbytes: usize,
    ) -> Result<(), Error<B::Error>> {
        if nbytes > 8 {
            return Err(Error::InvalidWidth { nbytes });
        }

        let buffer = value.to_le_bytes();
        self.write(id, sub_id, &buffer[..nbytes]).await
    }
}

/// Provides access to a register
///
/// You can get an instance for a given register using one of the methods on
/// [`DW1000`].
pub struct RegAccessor<'s, R, B>(&'s mut DW1000<B>, PhantomData<R>);

impl<'s, R, B> RegAccessor<'s, R, B>
where
    R: Register,
    B: RegisterBus,
{
    /// Read the register value
    #[inline]
    pub async fn read(&mut self) -> Result<u64, Error<B::Error>>
    where
        R: Readable,
    {
        self.0.read_reg(R::ID, R::SUB_ID, R::LEN).await
    }

    /// Write the register value
    #[inline]
    pub async fn write(&mut self, value: u64) -> Result<(), Error<B::Error>>
    where
        R: Writable,
    {
        self.0.write_reg(R::ID, R::SUB_ID, value, R::LEN).await
    }

    /// Modify the register value
    #[inline]
    pub async fn modify<F>(&mut self, f: F) -> Result<(), Error<B::Error>>
    where
        R: Readable + Writable,
        F: FnOnce(u64) -> u64,
    {
        let value = self.read().await?;
        self.write(f(value)).await
    }

    /// Read part of a buffer register, starting `offset` bytes in
    pub async fn read_bytes(
        &mut self,
        offset: u16,
        buffer: &mut [u8],
    ) -> Result<(), Error<B::Error>>
    where
        R: Readable,
    {
        if offset as usize + buffer.len() > R::LEN {
            return Err(Error::InvalidRegister {
                id: R::ID,
                sub_id: R::SUB_ID + offset,
                len: buffer.len(),
            });
        }
        self.0.read(R::ID, R::SUB_ID + offset, buffer).await
    }

    /// Write part of a buffer register, starting `offset` bytes in
    pub async fn write_bytes(&mut self, offset: u16, data: &[u8]) -> Result<(), Error<B::Error>>
    where
        R: Writable,
    {
        if offset as usize + data.len() > R::LEN {
            return Err(Error::InvalidRegister {
                id: R::ID,
                sub_id: R::SUB_ID + offset,
                len: data.len(),
            });
        }
        self.0.write(R::ID, R::SUB_ID + offset, data).await
    }
}

/// An error that can occur when communicating with the DW1000
pub enum Error<E> {
    /// The bus reported an error
    Bus(E),

    /// The access does not fit the command header's address space
    InvalidRegister {
        /// The register id
        id: u8,
        /// The sub-address the access starts at
        sub_id: u16,
        /// The number of bytes accessed
        len: usize,
    },

    /// Register values are at most 8 bytes wide
    InvalidWidth {
        /// The requested width
        nbytes: usize,
    },
}

// We can't derive this implementation, as the compiler will complain that the
// bus error doesn't implement `Debug`.
impl<E> fmt::Debug for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Bus(error) => write!(f, "Bus({:?})", error),
            Error::InvalidRegister { id, sub_id, len } => write!(
                f,
                "InvalidRegister {{ id: {:#04x}, sub_id: {:#06x}, len: {} }}",
                id, sub_id, len
            ),
            Error::InvalidWidth { nbytes } => write!(f, "InvalidWidth {{ nbytes: {} }}", nbytes),
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for Error<E> {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Bus(_) => defmt::write!(f, "Bus()"),
            Error::InvalidRegister { id, sub_id, len } => defmt::write!(
                f,
                "InvalidRegister {{ id: {=u8:#x}, sub_id: {=u16:#x}, len: {} }}",
                id,
                sub_id,
                len
            ),
            Error::InvalidWidth { nbytes } => {
                defmt::write!(f, "InvalidWidth {{ nbytes: {} }}", nbytes)
            }
        }
    }
}

/// Implemented for all registers
///
/// This is a mostly internal trait that should not be implemented or used
/// directly by users of this crate. It is exposed through the public API
/// though, so it can't be made private.
///
/// The DW1000 user manual, section 7.1, specifies what the values of the
/// constants should be for each register. `LEN` is the width the driver
/// accesses, which for a few registers is less than the full register.
pub trait Register {
    /// The register index
    const ID: u8;

    /// The registers's sub-index
    const SUB_ID: u16;

    /// The number of bytes accessed
    const LEN: usize;
}

/// Marker trait for registers that can be read from
pub trait Readable {}

/// Marker trait for registers that can be written to
pub trait Writable {}

macro_rules! impl_rw {
    (RO, $name:ident) => {
        impl Readable for $name {}
    };
    (WO, $name:ident) => {
        impl Writable for $name {}
    };
    (RW, $name:ident) => {
        impl Readable for $name {}
        impl Writable for $name {}
    };
}

/// Generates register implementations
macro_rules! impl_register {
    (
        $(
            $id:expr,
            $sub_id:expr,
            $len:expr,
            $rw:tt,
            $name:ident($name_lower:ident)
            #[$doc:meta]
        )*
    ) => {
        $(
            #[$doc]
            #[allow(non_camel_case_types)]
            pub struct $name;

            impl Register for $name {
                const ID:     u8    = $id;
                const SUB_ID: u16   = $sub_id;
                const LEN:    usize = $len;
            }

            impl_rw!($rw, $name);
        )*

        impl<B> DW1000<B> {
            $(
                #[$doc]
                pub fn $name_lower(&mut self) -> RegAccessor<$name, B> {
                    RegAccessor(self, PhantomData)
                }
            )*
        }
    }
}

impl_register! {
    0x00, 0x00,    4, RO, DEV_ID(dev_id)               /// Device identifier
    0x03, 0x00,    4, RW, PANADR(panadr)               /// PAN identifier and short address
    0x04, 0x00,    4, RW, SYS_CFG(sys_cfg)             /// System configuration
    0x06, 0x00,    5, RO, SYS_TIME(sys_time)           /// System time counter
    0x08, 0x00,    4, RW, TX_FCTRL(tx_fctrl)           /// TX frame control
    0x09, 0x00, 1024, WO, TX_BUFFER(tx_buffer)         /// Transmit data buffer
    0x0c, 0x00,    2, RW, RX_FWTO(rx_fwto)             /// Receive frame wait timeout period
    0x0d, 0x00,    4, RW, SYS_CTRL(sys_ctrl)           /// System control
    0x0e, 0x00,    4, RW, SYS_MASK(sys_mask)           /// System event mask
    0x0f, 0x00,    4, RW, SYS_STATUS(sys_status)       /// System event status
    0x10, 0x00,    4, RO, RX_FINFO(rx_finfo)           /// RX frame information
    0x11, 0x00, 1024, RO, RX_BUFFER(rx_buffer)         /// Receive data buffer
    0x2c, 0x00,    2, RW, AON_WCFG(aon_wcfg)           /// AON wake-up configuration
    0x2c, 0x02,    1, RW, AON_CTRL(aon_ctrl)           /// AON control
    0x2c, 0x06,    1, RW, AON_CFG0(aon_cfg0)           /// AON configuration register 0, low byte
    0x36, 0x00,    1, RW, PMSC_CTRL0(pmsc_ctrl0)       /// PMSC control register 0, clock select byte
    0x36, 0x03,    1, RW, PMSC_SOFTRESET(pmsc_softreset) /// PMSC control register 0, soft reset byte
    0x36, 0x04,    2, RW, PMSC_CTRL1(pmsc_ctrl1)       /// PMSC control register 1
}

/// Bit definitions for the registers above
pub mod bits {
    /// Expected content of DEV_ID
    pub const DEVICE_ID: u32 = 0xdeca_0130;

    /// SYS_CFG: receive wait timeout enable
    pub const SYS_CFG_RXWTOE: u64 = 1 << 28;

    /// TX_FCTRL: frame length including the extension bits
    pub const TX_FCTRL_TFLEN_MASK: u64 = 0x3ff;
    /// TX_FCTRL: ranging frame
    pub const TX_FCTRL_TR: u64 = 1 << 15;
    /// TX_FCTRL: transmit buffer index offset
    pub const TX_FCTRL_TXBOFFS_MASK: u64 = 0x3ff << 22;

    /// SYS_CTRL: transmit start
    pub const SYS_CTRL_TXSTRT: u64 = 1 << 1;
    /// SYS_CTRL: transceiver off
    pub const SYS_CTRL_TRXOFF: u64 = 1 << 6;
    /// SYS_CTRL: wait for response
    pub const SYS_CTRL_WAIT4RESP: u64 = 1 << 7;
    /// SYS_CTRL: enable receiver
    pub const SYS_CTRL_RXENAB: u64 = 1 << 8;

    /// SYS_STATUS: transmit frame sent
    pub const TXFRS: u64 = 1 << 7;
    /// SYS_STATUS: receiver PHY header error
    pub const RXPHE: u64 = 1 << 12;
    /// SYS_STATUS: receiver FCS good
    pub const RXFCG: u64 = 1 << 14;
    /// SYS_STATUS: receiver FCS error
    pub const RXFCE: u64 = 1 << 15;
    /// SYS_STATUS: receiver Reed Solomon frame sync loss
    pub const RXRFSL: u64 = 1 << 16;
    /// SYS_STATUS: receive frame wait timeout
    pub const RXRFTO: u64 = 1 << 17;
    /// SYS_STATUS: preamble detection timeout
    pub const RXPTO: u64 = 1 << 21;
    /// SYS_STATUS: receive SFD timeout
    pub const RXSFDTO: u64 = 1 << 26;
    /// SYS_STATUS: half period delay warning
    pub const HPDWARN: u64 = 1 << 27;
    /// SYS_STATUS: automatic frame filtering rejection
    pub const AFFREJ: u64 = 1 << 29;

    /// Every status bit that ends a receive with a timeout
    pub const RX_TIMEOUTS: u64 = RXRFTO | RXPTO | RXSFDTO;
    /// Every status bit that ends a receive with an error
    pub const RX_ERRORS: u64 = RXPHE | RXFCE | RXRFSL | AFFREJ;
    /// Every status bit the transaction engine consumes
    pub const ENGINE_EVENTS: u64 = TXFRS | RXFCG | RX_TIMEOUTS | RX_ERRORS;

    /// RX_FINFO: received frame length including the extension bits
    pub const RX_FINFO_RXFLEN_MASK: u64 = 0x3ff;

    /// PMSC_CTRL0: system clock selection bits
    pub const PMSC_CTRL0_SYSCLKS_MASK: u64 = 0x03;
    /// PMSC_CTRL0: force the system clock to the 19.2 MHz XTI
    pub const PMSC_CTRL0_SYSCLKS_19M: u64 = 0x01;
    /// PMSC_CTRL1: no automatic control of the RF and RX clock blocks
    pub const PMSC_CTRL1_PKTSEQ_DISABLE: u64 = 0x0000;
    /// PMSC soft reset byte: assert reset of HIF, TX, RX and PMSC
    pub const PMSC_RESET_ALL: u64 = 0x00;
    /// PMSC soft reset byte: release reset
    pub const PMSC_RESET_CLEAR: u64 = 0xf0;
    /// AON_CTRL: upload the AON block configuration to the AON memory
    pub const AON_CTRL_SAVE: u64 = 0x02;
}

/// [`RegisterBus`] implementation for an `embedded-hal-async` SPI device
///
/// The DW1000 reset line is driven through `reset`. Since `SpiDevice` has no
/// notion of bus speed, baud rate changes are forwarded to `set_baudrate`,
/// which is expected to reconfigure the SPI peripheral.
pub struct SpiBus<SPI, RST, D, F> {
    spi: SPI,
    reset: RST,
    delay: D,
    set_baudrate: F,
    enabled: bool,
}

impl<SPI, RST, D, F> SpiBus<SPI, RST, D, F> {
    /// Create a new instance of `SpiBus`
    pub fn new(spi: SPI, reset: RST, delay: D, set_baudrate: F) -> Self {
        SpiBus {
            spi,
            reset,
            delay,
            set_baudrate,
            enabled: false,
        }
    }

    /// Whether the bus is currently enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Give back the SPI device and the reset pin
    pub fn release(self) -> (SPI, RST) {
        (self.spi, self.reset)
    }
}

impl<SPI, RST, D, F> RegisterBus for SpiBus<SPI, RST, D, F>
where
    SPI: SpiDevice<u8>,
    RST: OutputPin,
    D: DelayNs,
    F: FnMut(u32),
{
    type Error = SpiBusError<SPI::Error, RST::Error>;

    async fn read(&mut self, header: &[u8], buffer: &mut [u8]) -> Result<(), Self::Error> {
        if !self.enabled {
            return Err(SpiBusError::Disabled);
        }
        self.spi
            .transaction(&mut [Operation::Write(header), Operation::Read(buffer)])
            .await
            .map_err(SpiBusError::Spi)
    }

    async fn write(&mut self, header: &[u8], data: &[u8]) -> Result<(), Self::Error> {
        if !self.enabled {
            return Err(SpiBusError::Disabled);
        }
        self.spi
            .transaction(&mut [Operation::Write(header), Operation::Write(data)])
            .await
            .map_err(SpiBusError::Spi)
    }

    async fn reset(&mut self) -> Result<(), Self::Error> {
        // RSTn has to be held low for at least 10 ns. The device is back in
        // INIT after about 5 ms.
        self.reset.set_low().map_err(SpiBusError::Reset)?;
        self.delay.delay_us(1).await;
        self.reset.set_high().map_err(SpiBusError::Reset)?;
        self.delay.delay_ms(5).await;

        Ok(())
    }

    async fn configure(&mut self, baudrate: u32) -> Result<(), Self::Error> {
        (self.set_baudrate)(baudrate);
        self.enabled = true;

        Ok(())
    }

    fn disable(&mut self) {
        self.enabled = false;
    }
}

/// An error reported by [`SpiBus`]
#[derive(Debug)]
pub enum SpiBusError<S, P> {
    /// SPI error occured during a transaction
    Spi(S),

    /// Error occured while driving the reset line
    Reset(P),

    /// The bus was used while disabled
    Disabled,
}

#[cfg(feature = "defmt")]
impl<S, P> defmt::Format for SpiBusError<S, P> {
    fn format(&self, f: defmt::Formatter) {
        match self {
            SpiBusError::Spi(_) => defmt::write!(f, "Spi()"),
            SpiBusError::Reset(_) => defmt::write!(f, "Reset()"),
            SpiBusError::Disabled => defmt::write!(f, "Disabled"),
        }
    }
}
