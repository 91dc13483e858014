//! The driver-wide object, and the callbacks a host framework drives each
//! slot through.

use core::cell::RefCell;

use embedded_hal::delay::DelayNs;

use crate::adma::DmaAllocator;
use crate::capabilities::SlotCapabilities;
use crate::controller::Controller;
use crate::regs::Registers;
use crate::regulator::{RefCellRegulatorChannel, RegulatorChannel};
use crate::request::{Command, HostPort, Progress, Request};
use crate::slot::{BusOperation, InterruptSnapshot, Slot};
use crate::{debug, error, warn, Error};

/// State shared by every slot the driver runs: the channel to the
/// signaling-voltage regulator.
///
/// Slots borrow the channel through [`Driver::regulator`].
#[derive(Debug)]
pub struct Driver<C> {
    regulator: Option<RefCell<C>>,
    crash_dump: bool,
}

impl<C> Driver<C>
where
    C: RegulatorChannel,
{
    /// Set up the driver.
    ///
    /// In crash-dump mode the regulator is left alone and `channel` is
    /// dropped.
    pub fn open(channel: Option<C>, crash_dump: bool) -> Driver<C> {
        let regulator = if crash_dump {
            debug!("Crash dump mode: not using the regulator");
            None
        } else {
            channel.map(RefCell::new)
        };
        if regulator.is_none() && !crash_dump {
            warn!("No regulator channel: 1.8V signaling unavailable");
        }
        Driver {
            regulator,
            crash_dump,
        }
    }

    /// Is there a regulator channel?
    pub fn regulator_available(&self) -> bool {
        self.regulator.is_some()
    }

    /// A handle on the regulator channel for one slot.
    pub fn regulator(&self) -> Option<RefCellRegulatorChannel<'_, C>> {
        self.regulator.as_ref().map(RefCellRegulatorChannel::new)
    }

    /// Was the driver opened in crash-dump mode?
    pub fn is_crash_dump(&self) -> bool {
        self.crash_dump
    }

    /// How many slots the controller has.
    pub fn slot_count(&self) -> u32 {
        1
    }

    /// Runtime power management hook. Not implemented.
    pub fn power_control_callback(&self) -> Result<(), Error> {
        error!("Power control callback is not implemented");
        Err(Error::NotImplemented)
    }

    /// Drop the regulator channel.
    pub fn cleanup(&mut self) {
        if self.regulator.take().is_some() {
            debug!("Regulator channel released");
        }
    }

    /// Shut the driver down, handing back the regulator channel.
    pub fn close(self) -> Option<C> {
        self.regulator.map(RefCell::into_inner)
    }
}

/// The callbacks a host framework uses to drive one slot.
///
/// Every [`Slot`] implements this, whichever [`Controller`] it runs.
pub trait SlotMiniport {
    /// Bring the slot up.
    fn initialize(
        &mut self,
        physical_base: u64,
        length: usize,
        crash_dump: bool,
    ) -> Result<(), Error>;

    /// What the slot can do.
    fn capabilities(&self) -> &SlotCapabilities;

    /// Change the bus.
    fn issue_bus_operation(&mut self, operation: BusOperation) -> Result<(), Error>;

    /// Is a card present?
    fn card_detect_state(&self) -> bool;

    /// Is the card write protected?
    fn write_protect_state(&self) -> bool;

    /// Check for and acknowledge an interrupt.
    fn interrupt(&self) -> Option<InterruptSnapshot>;

    /// Start the next step of a request.
    fn issue_request(
        &mut self,
        request: &mut Request<'_>,
        port: &mut dyn HostPort,
    ) -> Result<Progress, Error>;

    /// Read a command's response.
    fn get_response(&self, command: &Command<'_>, response: &mut [u32; 4]) -> usize;

    /// Enable or disable interrupts.
    fn toggle_events(&self, mask: u32, enable: bool);

    /// Acknowledge interrupts.
    fn clear_events(&self, mask: u32);

    /// Account for interrupt events against a request.
    fn request_dpc(
        &self,
        request: &Request<'_>,
        events: u32,
        errors: u32,
        port: &mut dyn HostPort,
    );

    /// Save controller state.
    fn save_context(&self) -> Result<(), Error>;

    /// Restore controller state.
    fn restore_context(&self) -> Result<(), Error>;

    /// Release the slot's resources.
    fn cleanup(&mut self);
}

impl<R, D, H, C, M> SlotMiniport for Slot<R, D, H, C, M>
where
    R: Registers,
    D: DelayNs,
    H: Controller,
    C: RegulatorChannel,
    M: DmaAllocator,
{
    fn initialize(
        &mut self,
        physical_base: u64,
        length: usize,
        crash_dump: bool,
    ) -> Result<(), Error> {
        Slot::initialize(self, physical_base, length, crash_dump)
    }

    fn capabilities(&self) -> &SlotCapabilities {
        Slot::capabilities(self)
    }

    fn issue_bus_operation(&mut self, operation: BusOperation) -> Result<(), Error> {
        Slot::issue_bus_operation(self, operation)
    }

    fn card_detect_state(&self) -> bool {
        Slot::card_detect_state(self)
    }

    fn write_protect_state(&self) -> bool {
        Slot::write_protect_state(self)
    }

    fn interrupt(&self) -> Option<InterruptSnapshot> {
        Slot::interrupt(self)
    }

    fn issue_request(
        &mut self,
        request: &mut Request<'_>,
        port: &mut dyn HostPort,
    ) -> Result<Progress, Error> {
        Slot::issue_request(self, request, port)
    }

    fn get_response(&self, command: &Command<'_>, response: &mut [u32; 4]) -> usize {
        Slot::get_response(self, command, response)
    }

    fn toggle_events(&self, mask: u32, enable: bool) {
        Slot::toggle_events(self, mask, enable)
    }

    fn clear_events(&self, mask: u32) {
        Slot::clear_events(self, mask)
    }

    fn request_dpc(
        &self,
        request: &Request<'_>,
        events: u32,
        errors: u32,
        port: &mut dyn HostPort,
    ) {
        Slot::request_dpc(self, request, events, errors, port)
    }

    fn save_context(&self) -> Result<(), Error> {
        Slot::save_context(self)
    }

    fn restore_context(&self) -> Result<(), Error> {
        Slot::restore_context(self)
    }

    fn cleanup(&mut self) {
        Slot::cleanup(self)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
