//! Driver crate for the DW1000 UWB transceiver
//!
//! This crate turns the DW1000's interrupt-driven completion model into a
//! request/response API. The [high-level interface] owns the device handle
//! and the transaction engine, the [receive buffer pool] bounds how many
//! received frames can be in flight, and the [ranging scheduler] runs a
//! periodic peer-to-peer ranging exchange on top of the engine.
//!
//! The bus is abstracted by [`ll::RegisterBus`]. [`ll::SpiBus`] implements it
//! on top of [`embedded-hal-async`], which means the driver is portable and
//! can be used on any platform that implements that API.
//!
//! [high-level interface]: hl/index.html
//! [receive buffer pool]: pool/index.html
//! [ranging scheduler]: ranging/index.html
//! [`embedded-hal-async`]: https://crates.io/crates/embedded-hal-async
#![cfg_attr(not(any(test, feature = "std")), no_std)]

// This must go first so the macros are visible to the other modules.
mod fmt;

pub mod configs;
pub mod hl;
pub mod ll;
pub mod pool;
pub mod ranging;
pub mod time;

#[cfg(test)]
mod mock;

pub use crate::{
    configs::{Config, LinkConfig, RangingConfig},
    hl::{
        Error, Event, Handler, Mode, PayloadSink, PayloadSource, Ready, Request, Status,
        TransactionState, Transceiver, Uninitialized, DW1000,
    },
    pool::{FramePool, Slot},
    ranging::{RangingSession, RangingTable, RangingTableEntry, TwrFrame, WorkItem, WorkQueue},
};
