//! # embedded-sdhc
//!
//! > A slot driver for SD Host Controllers, written in Embedded Rust
//!
//! This crate drives a controller that follows the SD Host Controller
//! Specification through its memory-mapped register block. It issues
//! commands, moves data by PIO or ADMA2 DMA, completes requests from the
//! interrupt path, and sequences bus changes (clock, power, width, speed and
//! signaling voltage). It is `#![no_std]` and does not use `alloc`.
//!
//! Two controller flavours are provided:
//!
//! * [`Brcme88c`] is the BCM2711 EMMC2 controller. DMA goes through a
//!   preallocated bounce buffer, and 1.8V signaling needs a GPIO-expander
//!   regulator that is switched through the firmware mailbox.
//! * [`StandardHost`] is a plain SDHCI controller that uses scatter/gather
//!   ADMA2.
//!
//! ## Using the crate
//!
//! You will need something that implements [`Registers`] (for real hardware,
//! [`Mmio`]), something that implements `embedded_hal::delay::DelayNs`, and
//! something that implements [`HostPort`] to receive completed requests.
//!
//! ```rust
//! use embedded_sdhc::{BusOperation, Error, Registers, Slot, StandardHost};
//!
//! fn bring_up<R, D>(regs: R, delay: D) -> Result<(), Error>
//! where
//!     R: Registers,
//!     D: embedded_hal::delay::DelayNs,
//! {
//!     let mut slot = Slot::new(regs, delay, StandardHost::default());
//!     slot.initialize(0xFE34_0000, 0x100, false)?;
//!     slot.issue_bus_operation(BusOperation::ResetHost(embedded_sdhc::ResetType::All))?;
//!     slot.issue_bus_operation(BusOperation::SetClock(400))?;
//!     println!("Base clock is {} kHz", slot.capabilities().base_clock_khz);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//! * `embassy-sync-06`: Enabled by default. Provides a regulator channel that
//!   can be shared through an `embassy-sync` blocking mutex.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

#[macro_use]
mod structure;

pub mod adma;
pub mod capabilities;
pub mod controller;
pub mod driver;
pub mod regs;
pub mod regulator;
pub mod request;
pub mod slot;

#[doc(inline)]
pub use adma::{
    Adma2Descriptor, BounceBuffer, DmaAllocator, NoBounceBuffer, ScatterGatherList, SgElement,
};

#[doc(inline)]
pub use capabilities::SlotCapabilities;

#[doc(inline)]
pub use controller::{Brcme88c, ChipRevision, Controller, DmaSelect, StandardHost};

#[doc(inline)]
pub use driver::{Driver, SlotMiniport};

#[doc(inline)]
pub use regs::{Mmio, Registers};

#[doc(inline)]
pub use regulator::{
    ExecutionContext, IoPropertyChannel, NoRegulator, PassiveExecutor, PassiveMarshal,
    RefCellRegulatorChannel, RegulatorChannel, RegulatorError,
};

#[cfg(feature = "embassy-sync-06")]
#[doc(inline)]
pub use regulator::EmbassyMutexRegulatorChannel;

#[doc(inline)]
pub use request::{
    Command, CommandType, HostPort, Progress, Request, RequestStatus, RequestType, ResponseType,
    TransferDirection, TransferMethod, TransferType,
};

#[doc(inline)]
pub use slot::{
    BusOperation, BusSpeed, BusVoltage, DriverType, InterruptSnapshot, ResetType, SignalingVoltage,
    Slot, SlotOptions,
};

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// All the ways the functions in this crate can fail.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The caller asked for something this controller can't do, or passed a
    /// value we don't recognise
    NotSupported,
    /// The controller didn't reach the expected state in time
    IoTimeout,
    /// The controller didn't latch a setting we verified
    Unsuccessful,
    /// This operation has no implementation for this controller
    NotImplemented,
    /// We couldn't get the DMA memory we needed
    InsufficientResources,
    /// The signaling-voltage regulator failed
    Regulator(RegulatorError),
}

impl From<RegulatorError> for Error {
    fn from(value: RegulatorError) -> Error {
        Error::Regulator(value)
    }
}

// ****************************************************************************
//
// Logging
//
// ****************************************************************************

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, error, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::error! but does nothing at all
macro_rules! error {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
