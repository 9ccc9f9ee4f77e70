//! Test doubles shared by the unit tests

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    vec::Vec,
};

use embedded_hal_async::delay::DelayNs;

use crate::{hl::PayloadSink, ll::RegisterBus};

/// `DelayNs` on top of tokio's clock, so paused-time tests advance instantly
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioDelay;

impl DelayNs for TokioDelay {
    async fn delay_ns(&mut self, ns: u32) {
        tokio::time::sleep(std::time::Duration::from_nanos(ns as u64)).await;
    }

    async fn delay_us(&mut self, us: u32) {
        tokio::time::sleep(std::time::Duration::from_micros(us as u64)).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        tokio::time::sleep(std::time::Duration::from_millis(ms as u64)).await;
    }
}

const SYS_STATUS: u8 = 0x0f;

/// In-memory DW1000 register file
///
/// Registers start zeroed except DEV_ID. SYS_STATUS is write-1-to-clear like
/// the real one.
pub struct Registers {
    files: RefCell<HashMap<u8, Vec<u8>>>,
    writes: RefCell<Vec<(u8, u16, Vec<u8>)>>,
    baudrates: RefCell<Vec<u32>>,
    resets: Cell<usize>,
    failing: Cell<bool>,
}

impl Registers {
    pub fn new() -> Self {
        let registers = Registers {
            files: RefCell::new(HashMap::new()),
            writes: RefCell::new(Vec::new()),
            baudrates: RefCell::new(Vec::new()),
            resets: Cell::new(0),
            failing: Cell::new(false),
        };
        registers.set(0x00, 0, &crate::ll::bits::DEVICE_ID.to_le_bytes());
        registers
    }

    /// Store `data` at `sub_id` of register `id`, bypassing write semantics
    pub fn set(&self, id: u8, sub_id: u16, data: &[u8]) {
        let mut files = self.files.borrow_mut();
        let file = files.entry(id).or_default();
        let end = sub_id as usize + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[sub_id as usize..end].copy_from_slice(data);
    }

    pub fn get(&self, id: u8, sub_id: u16, len: usize) -> Vec<u8> {
        let files = self.files.borrow();
        let mut out = vec![0; len];
        if let Some(file) = files.get(&id) {
            for (i, byte) in out.iter_mut().enumerate() {
                if let Some(value) = file.get(sub_id as usize + i) {
                    *byte = *value;
                }
            }
        }
        out
    }

    pub fn get_u64(&self, id: u8, sub_id: u16, len: usize) -> u64 {
        let mut buffer = [0; 8];
        buffer[..len].copy_from_slice(&self.get(id, sub_id, len));
        u64::from_le_bytes(buffer)
    }

    /// Raise SYS_STATUS bits as the hardware would
    pub fn raise(&self, bits: u64) {
        let status = self.get_u64(SYS_STATUS, 0, 4) | bits;
        self.set(SYS_STATUS, 0, &(status as u32).to_le_bytes());
    }

    /// Place a received frame in RX_BUFFER and its length, FCS included, in
    /// RX_FINFO
    pub fn load_rx_frame(&self, frame: &[u8]) {
        self.set(0x11, 0, frame);
        let len = (frame.len() + crate::hl::FCS_LEN) as u32;
        self.set(0x10, 0, &len.to_le_bytes());
    }

    /// (register, sub-address) of every write, in order
    pub fn writes(&self) -> Vec<(u8, u16)> {
        self.writes
            .borrow()
            .iter()
            .map(|(id, sub_id, _)| (*id, *sub_id))
            .collect()
    }

    /// Data of every write to register `id`, in order
    pub fn writes_to(&self, id: u8) -> Vec<Vec<u8>> {
        self.writes
            .borrow()
            .iter()
            .filter(|(i, _, _)| *i == id)
            .map(|(_, _, data)| data.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        self.writes.borrow_mut().clear();
    }

    pub fn baudrates(&self) -> Vec<u32> {
        self.baudrates.borrow().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.get()
    }

    /// Make every following bus access fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }
}

#[derive(Debug, PartialEq)]
pub enum MockError {
    Disabled,
    Injected,
}

/// `RegisterBus` backed by a [`Registers`] file
pub struct MockBus<'r> {
    registers: &'r Registers,
    enabled: bool,
}

impl<'r> MockBus<'r> {
    pub fn new(registers: &'r Registers) -> Self {
        MockBus {
            registers,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn check(&self) -> Result<(), MockError> {
        if !self.enabled {
            return Err(MockError::Disabled);
        }
        if self.registers.failing.get() {
            return Err(MockError::Injected);
        }
        Ok(())
    }
}

/// Split a command header into (write, register id, sub-address)
fn decode_header(header: &[u8]) -> (bool, u8, u16) {
    let write = header[0] & 0x80 != 0;
    let id = header[0] & 0x3f;
    let sub_id = if header[0] & 0x40 == 0 {
        0
    } else if header[1] & 0x80 == 0 {
        (header[1] & 0x7f) as u16
    } else {
        (header[1] & 0x7f) as u16 | (header[2] as u16) << 7
    };
    (write, id, sub_id)
}

impl RegisterBus for MockBus<'_> {
    type Error = MockError;

    async fn read(&mut self, header: &[u8], buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.check()?;
        let (write, id, sub_id) = decode_header(header);
        assert!(!write, "read with a write header");
        buffer.copy_from_slice(&self.registers.get(id, sub_id, buffer.len()));
        Ok(())
    }

    async fn write(&mut self, header: &[u8], data: &[u8]) -> Result<(), Self::Error> {
        self.check()?;
        let (write, id, sub_id) = decode_header(header);
        assert!(write, "write with a read header");

        self.registers
            .writes
            .borrow_mut()
            .push((id, sub_id, data.to_vec()));

        if id == SYS_STATUS {
            let current = self.registers.get(id, sub_id, data.len());
            let cleared: Vec<u8> = current
                .iter()
                .zip(data)
                .map(|(value, clear)| value & !clear)
                .collect();
            self.registers.set(id, sub_id, &cleared);
        } else {
            self.registers.set(id, sub_id, data);
        }
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), Self::Error> {
        self.registers.resets.set(self.registers.resets.get() + 1);
        Ok(())
    }

    async fn configure(&mut self, baudrate: u32) -> Result<(), Self::Error> {
        self.registers.baudrates.borrow_mut().push(baudrate);
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) {
        self.enabled = false;
    }
}

/// `PayloadSink` that keeps a copy of every delivered payload
#[derive(Default)]
pub struct RecordingSink {
    payloads: RefCell<Vec<Vec<u8>>>,
}

impl RecordingSink {
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.borrow().clone()
    }
}

impl PayloadSink for RecordingSink {
    fn deliver(&self, payload: &[u8]) {
        self.payloads.borrow_mut().push(payload.to_vec());
    }
}

#[test]
fn header_decoding_matches_the_encoder() {
    use crate::ll::{encode_header, Direction};

    for sub_id in [0u16, 5, 127, 129, 0x7ff0] {
        let header = encode_header::<()>(0x11, sub_id, 4, Direction::Write).unwrap();
        assert_eq!(decode_header(header.as_bytes()), (true, 0x11, sub_id));
    }
}
