//! The interrupt path: reading and acknowledging events, and completing
//! requests once everything they wait for has happened.
//!
//! Everything here takes `&self` and never blocks, so it can run from an
//! interrupt handler or a deferred procedure.

use embedded_hal::delay::DelayNs;

use super::{InterruptSnapshot, Slot};
use crate::adma::DmaAllocator;
use crate::controller::Controller;
use crate::regs::{
    NormalInterrupts, PresentState, Registers, AUTO_CMD_ERROR_STATUS, ERROR_INTERRUPT_SIGNAL_ENABLE,
    ERROR_INTERRUPT_STATUS, ERROR_INTERRUPT_STATUS_ENABLE, NORMAL_INTERRUPT_SIGNAL_ENABLE,
    NORMAL_INTERRUPT_STATUS, NORMAL_INTERRUPT_STATUS_ENABLE,
};
use crate::regulator::RegulatorChannel;
use crate::request::{HostPort, Request, RequestStatus};
use crate::{debug, error, trace, Error};

/// Status bits reported as flags rather than as request events.
const NOT_REQUEST_EVENTS: u16 = NormalInterrupts::CARD_INSERTION
    | NormalInterrupts::CARD_REMOVAL
    | NormalInterrupts::CARD_INTERRUPT
    | NormalInterrupts::RETUNING
    | NormalInterrupts::ERROR_INTERRUPT;

impl<R, D, H, C, M> Slot<R, D, H, C, M>
where
    R: Registers,
    D: DelayNs,
    H: Controller,
    C: RegulatorChannel,
    M: DmaAllocator,
{
    /// Check whether this slot is interrupting, and acknowledge what it
    /// raised.
    ///
    /// Returns `None` if nothing is pending, or if the register block reads
    /// as all-ones (the controller has gone away).
    pub fn interrupt(&self) -> Option<InterruptSnapshot> {
        let status = self.regs.read_u16(NORMAL_INTERRUPT_STATUS);
        if status == 0 || status == 0xFFFF {
            return None;
        }

        let normal = NormalInterrupts(status);
        let errors = if normal.error_interrupt() {
            self.regs.read_u16(ERROR_INTERRUPT_STATUS)
        } else {
            0
        };
        let snapshot = InterruptSnapshot {
            events: status & !NOT_REQUEST_EVENTS,
            errors,
            card_change: normal.card_insertion() || normal.card_removal(),
            sdio_interrupt: normal.card_interrupt(),
            tuning: normal.retuning(),
        };

        self.acknowledge_interrupts(u32::from(status));
        trace!(
            "Interrupt status {:#x}, errors {:#x}",
            status,
            errors
        );
        Some(snapshot)
    }

    /// Acknowledge the normal interrupts in `mask`, and every error if the
    /// error summary bit is among them.
    pub fn acknowledge_interrupts(&self, mask: u32) {
        let mut mask = mask as u16;
        if NormalInterrupts(mask).error_interrupt() {
            // Auto CMD errors don't always clear unless the register is
            // written both ways
            self.regs.write_u16(AUTO_CMD_ERROR_STATUS, 0xFFFF);
            self.regs.write_u16(AUTO_CMD_ERROR_STATUS, 0);
            self.regs.write_u16(ERROR_INTERRUPT_STATUS, 0xFFFF);
            // The summary bit is read-only and clears with the errors
            mask &= !NormalInterrupts::ERROR_INTERRUPT;
        }
        self.regs.write_u16(NORMAL_INTERRUPT_STATUS, mask);
    }

    /// Clear interrupt status bits on behalf of the framework.
    pub fn clear_events(&self, mask: u32) {
        self.acknowledge_interrupts(mask);
    }

    /// Account for `events` and `errors` against a request, completing it
    /// when nothing it waits for is left, or straight away on an error.
    pub fn request_dpc<P>(&self, request: &Request<'_>, events: u32, errors: u32, port: &mut P)
    where
        P: HostPort + ?Sized,
    {
        let previous = request.clear_required_events(events);
        if errors != 0 {
            request.store_required_events(0);
            let status = RequestStatus::from_errors(errors as u16);
            debug!(
                "CMD{} failed: errors {:#x}, events {:#x}, status {:?}",
                request.command.index, errors, events, status
            );
            request.set_status(status);
            request.complete(status, port);
        } else if previous & !events == 0 {
            let status = match request.status() {
                RequestStatus::MoreProcessingRequired => RequestStatus::MoreProcessingRequired,
                _ => RequestStatus::Success,
            };
            request.set_status(status);
            request.complete(status, port);
        } else {
            trace!(
                "CMD{} still waiting for {:#x}",
                request.command.index,
                previous & !events
            );
        }
    }

    /// Enable or disable the interrupts in `mask`.
    ///
    /// Enabling also enables every error interrupt. In crash-dump mode
    /// interrupts are never signalled, only latched in the status register.
    pub fn toggle_events(&self, mask: u32, enable: bool) {
        let mask = mask as u16;
        let old = self.regs.read_u16(NORMAL_INTERRUPT_SIGNAL_ENABLE);
        if enable {
            if !self.crash_dump {
                self.regs.write_u16(NORMAL_INTERRUPT_SIGNAL_ENABLE, old | mask);
                self.regs.write_u16(ERROR_INTERRUPT_SIGNAL_ENABLE, 0xFFFF);
            }
            self.regs.write_u16(NORMAL_INTERRUPT_STATUS_ENABLE, old | mask);
            self.regs.write_u16(ERROR_INTERRUPT_STATUS_ENABLE, 0xFFFF);
        } else {
            self.regs.write_u16(NORMAL_INTERRUPT_STATUS_ENABLE, old & !mask);
            self.regs.write_u16(ERROR_INTERRUPT_STATUS_ENABLE, 0);
            self.regs.write_u16(NORMAL_INTERRUPT_SIGNAL_ENABLE, old & !mask);
            self.regs.write_u16(ERROR_INTERRUPT_SIGNAL_ENABLE, 0);
        }
    }

    /// Is a card in the slot?
    pub fn card_detect_state(&self) -> bool {
        PresentState::read(&self.regs).card_inserted()
    }

    /// Is the card write protected?
    pub fn write_protect_state(&self) -> bool {
        !PresentState::read(&self.regs).write_enabled()
    }

    /// Save the controller state across a power transition.
    pub fn save_context(&self) -> Result<(), Error> {
        error!("Saving controller context is not implemented");
        Err(Error::NotImplemented)
    }

    /// Restore the controller state saved by [`Slot::save_context`].
    pub fn restore_context(&self) -> Result<(), Error> {
        error!("Restoring controller context is not implemented");
        Err(Error::NotImplemented)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
