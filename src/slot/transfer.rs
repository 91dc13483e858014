//! Sending commands and moving their data.

use byteorder::{ByteOrder, LittleEndian};
use embedded_hal::delay::DelayNs;

use super::Slot;
use crate::adma::{self, DmaAllocator};
use crate::controller::Controller;
use crate::regs::{
    CommandRegister, NormalInterrupts, Registers, TransferMode, ADMA_SYSTEM_ADDRESS,
    ADMA_SYSTEM_ADDRESS_HIGH, ARGUMENT, BLOCK_COUNT, BLOCK_SIZE, DATA_PORT, RESPONSE,
    SDMA_SYSTEM_ADDRESS,
};
use crate::regulator::RegulatorChannel;
use crate::request::{
    Command, HostPort, Progress, Request, RequestStatus, RequestType, ResponseType,
    TransferDirection, TransferMethod, TransferType,
};
use crate::{debug, error, trace, warn, Error};

/// The largest block the Block Size register can describe.
const MAX_BLOCK_SIZE: u16 = 2048;

const COMMAND_COMPLETE: u32 = NormalInterrupts::COMMAND_COMPLETE as u32;
const TRANSFER_COMPLETE: u32 = NormalInterrupts::TRANSFER_COMPLETE as u32;
const BUFFER_READ_READY: u32 = NormalInterrupts::BUFFER_READ_READY as u32;
const BUFFER_WRITE_READY: u32 = NormalInterrupts::BUFFER_WRITE_READY as u32;

fn buffer_ready(direction: TransferDirection) -> u32 {
    match direction {
        TransferDirection::Read => BUFFER_READ_READY,
        TransferDirection::Write => BUFFER_WRITE_READY,
    }
}

impl<R, D, H, C, M> Slot<R, D, H, C, M>
where
    R: Registers,
    D: DelayNs,
    H: Controller,
    C: RegulatorChannel,
    M: DmaAllocator,
{
    /// Start the next step of a request.
    ///
    /// Never blocks. Returns [`Progress::Pending`] when the request will be
    /// completed from [`Slot::request_dpc`], or [`Progress::Completed`] when
    /// `port` has already been told.
    pub fn issue_request<P>(
        &mut self,
        request: &mut Request<'_>,
        port: &mut P,
    ) -> Result<Progress, Error>
    where
        P: HostPort + ?Sized,
    {
        request.begin_step();
        match request.request_type {
            RequestType::CommandNoTransfer | RequestType::CommandWithTransfer => {
                self.send_command(request)
            }
            RequestType::StartTransfer => match request.command.method {
                TransferMethod::Pio if self.bounce_in_progress.is_some() => {
                    self.start_bounce_dma_transfer(request, port)
                }
                TransferMethod::Pio => self.start_pio_transfer(request),
                TransferMethod::SgDma => self.start_sg_dma_transfer(request, port),
            },
        }
    }

    /// Read the command's response into `response`, returning the number of
    /// words read.
    pub fn get_response(&self, command: &Command<'_>, response: &mut [u32; 4]) -> usize {
        let words = command.response_type.words();
        for (i, word) in response.iter_mut().take(words).enumerate() {
            *word = self.regs.read_u32(RESPONSE + i * 4);
        }
        words
    }

    fn send_command(&mut self, request: &mut Request<'_>) -> Result<Progress, Error> {
        self.bounce_in_progress = None;
        request.set_status(RequestStatus::Success);

        let index = request.command.index;
        let argument = request.command.argument;
        let block_size = request.command.block_size;
        let block_count = request.command.block_count;
        let response_type = request.command.response_type;

        let (response, crc, index_check, busy) = match response_type {
            ResponseType::None => (CommandRegister::RESPONSE_NONE, false, false, false),
            ResponseType::R1 | ResponseType::R5 | ResponseType::R6 => {
                (CommandRegister::RESPONSE_48, true, true, false)
            }
            ResponseType::R1b | ResponseType::R5b => {
                (CommandRegister::RESPONSE_48_BUSY, true, true, true)
            }
            ResponseType::R2 => (CommandRegister::RESPONSE_136, true, false, false),
            ResponseType::R3 | ResponseType::R4 => {
                (CommandRegister::RESPONSE_48, false, false, false)
            }
        };

        let mut command = CommandRegister(0);
        command
            .set_index(index)
            .set_command_type(request.command.command_type_value())
            .set_response_type(response)
            .set_crc_check(crc)
            .set_index_check(index_check);

        let mut events = COMMAND_COMPLETE;
        if busy {
            events |= TRANSFER_COMPLETE;
        }

        let mut mode = TransferMode(0);
        if request.command.transfer_type != TransferType::None {
            if block_size > MAX_BLOCK_SIZE {
                error!("CMD{} block size {} too large", index, block_size);
                return Err(Error::NotSupported);
            }
            if let Err(e) = request.command.check_blocks() {
                error!(
                    "CMD{}: {} bytes isn't a valid count of {} byte blocks",
                    index, request.command.length, block_size
                );
                return Err(e);
            }
            let direction = request.command.direction().ok_or(Error::NotSupported)?;
            command.set_data_present(true);
            mode.set_direction_read(direction == TransferDirection::Read);
            events |= match request.command.method {
                TransferMethod::Pio => self.prepare_pio(&request.command, direction, &mut mode)?,
                TransferMethod::SgDma => self.prepare_sg_dma(&mut request.command, &mut mode)?,
            };
            if block_count > 1 {
                mode.set_block_count_enable(true)
                    .set_multiple_block(true)
                    .set_auto_cmd(TransferMode::AUTO_CMD12);
            }
        }

        request.store_required_events(events);

        self.regs.write_u32_nofence(SDMA_SYSTEM_ADDRESS, 0);
        self.regs.write_u16_nofence(BLOCK_SIZE, block_size);
        self.regs.write_u16_nofence(BLOCK_COUNT, block_count);
        self.regs.write_u32_nofence(ARGUMENT, argument);
        mode.write_nofence(&self.regs);

        trace!(
            "CMD{} arg {:#x}: command {:#x}, mode {:#x}, events {:#x}",
            index,
            argument,
            command.0,
            mode.0,
            events
        );
        command.write(&self.regs);
        Ok(Progress::Pending)
    }

    /// Set up a PIO request's data phase, returning the events it needs.
    ///
    /// Large requests are moved through the bounce buffer instead, when the
    /// controller has one.
    fn prepare_pio(
        &mut self,
        command: &Command<'_>,
        direction: TransferDirection,
        mode: &mut TransferMode,
    ) -> Result<u32, Error> {
        let length = command.length;
        if command.data().len() < length {
            error!(
                "CMD{} buffer holds {} of {} bytes",
                command.index,
                command.data().len(),
                length
            );
            return Err(Error::NotSupported);
        }

        if self.should_bounce(length) {
            if let Some(pages) = self.bounce.as_mut() {
                pages.prepare(length);
                mode.set_dma_enable(true);
                if direction == TransferDirection::Write {
                    let source = command
                        .write_buffer()
                        .and_then(|buf| buf.get(..length))
                        .ok_or(Error::NotSupported)?;
                    pages.data()[..length].copy_from_slice(source);
                }
                self.bounce_in_progress = Some(direction);
                self.regs
                    .write_u32_nofence(ADMA_SYSTEM_ADDRESS, pages.table_address());
                trace!("Bouncing {} bytes", length);
                return Ok(TRANSFER_COMPLETE);
            }
        }

        Ok(buffer_ready(direction))
    }

    /// Should a PIO request of `length` bytes go through the bounce buffer?
    ///
    /// Grows the buffer if it's too small. If that fails, we use PIO.
    fn should_bounce(&mut self, length: usize) -> bool {
        if !self.controller.uses_bounce_dma() || length <= self.options.pio_threshold {
            return false;
        }
        if self.bounce_capacity().is_some_and(|capacity| length <= capacity) {
            return true;
        }
        match self.allocate_bounce(length) {
            Ok(()) => true,
            Err(_) => {
                warn!("Using PIO for {} bytes", length);
                false
            }
        }
    }

    /// Build the ADMA2 table for a scatter/gather request, returning the
    /// events it needs.
    fn prepare_sg_dma(
        &mut self,
        command: &mut Command<'_>,
        mode: &mut TransferMode,
    ) -> Result<u32, Error> {
        if !self.controller.supports_sg_dma() {
            error!("{} can't do scatter/gather DMA", self.controller.name());
            return Err(Error::NotSupported);
        }
        let elements = command
            .sg_list
            .filter(|list| !list.is_empty())
            .ok_or(Error::NotSupported)?;
        let table = command.dma_table.as_mut().ok_or(Error::NotSupported)?;

        let address_64bit = self.capabilities.address_64bit;
        let info = adma::build_descriptor_table(elements, address_64bit, table.memory)?;
        debug!(
            "ADMA2 table at {:#x}: {} descriptors, {} bytes",
            table.address, info.descriptors, info.total_length
        );

        mode.set_dma_enable(true);
        self.regs
            .write_u32_nofence(ADMA_SYSTEM_ADDRESS, table.address as u32);
        if address_64bit {
            self.regs
                .write_u32_nofence(ADMA_SYSTEM_ADDRESS_HIGH, (table.address >> 32) as u32);
        }
        Ok(TRANSFER_COMPLETE)
    }

    /// Move one block through the data port.
    fn start_pio_transfer(&mut self, request: &mut Request<'_>) -> Result<Progress, Error> {
        if request.command.block_count == 0 {
            error!("CMD{}: no blocks left to move", request.command.index);
            return Err(Error::NotSupported);
        }
        let words = usize::from(request.command.block_size) / 4;
        let direction = request.command.direction().ok_or(Error::NotSupported)?;
        match direction {
            TransferDirection::Read => {
                let block = request.command.read_block().ok_or(Error::NotSupported)?;
                let (whole, tail) = block.split_at_mut(words * 4);
                for (i, chunk) in whole.chunks_exact_mut(4).enumerate() {
                    let value = if i == 0 {
                        self.regs.read_u32(DATA_PORT)
                    } else {
                        self.regs.read_u32_nofence(DATA_PORT)
                    };
                    LittleEndian::write_u32(chunk, value);
                }
                for byte in tail {
                    *byte = self.regs.read_u8(DATA_PORT);
                }
            }
            TransferDirection::Write => {
                let block = request.command.write_block().ok_or(Error::NotSupported)?;
                let (whole, tail) = block.split_at(words * 4);
                for (i, chunk) in whole.chunks_exact(4).enumerate() {
                    let value = LittleEndian::read_u32(chunk);
                    if i + 1 == words {
                        self.regs.write_u32(DATA_PORT, value);
                    } else {
                        self.regs.write_u32_nofence(DATA_PORT, value);
                    }
                }
                for byte in tail {
                    self.regs.write_u8(DATA_PORT, *byte);
                }
            }
        }

        request.command.advance();
        if request.command.block_count > 0 {
            request.add_required_events(buffer_ready(direction));
            request.set_status(RequestStatus::MoreProcessingRequired);
        } else {
            request.add_required_events(TRANSFER_COMPLETE);
            request.set_status(RequestStatus::Success);
        }
        trace!(
            "CMD{}: {} blocks left",
            request.command.index,
            request.command.block_count
        );
        Ok(Progress::Pending)
    }

    /// Finish a bounced transfer. The DMA already happened.
    fn start_bounce_dma_transfer<P>(
        &mut self,
        request: &mut Request<'_>,
        port: &mut P,
    ) -> Result<Progress, Error>
    where
        P: HostPort + ?Sized,
    {
        if self.bounce_in_progress.take() == Some(TransferDirection::Read) {
            let length = request.command.length;
            let pages = self.bounce.as_mut().ok_or(Error::InsufficientResources)?;
            let source = pages.data().get(..length).ok_or(Error::NotSupported)?;
            let dest = request
                .command
                .read_buffer()
                .and_then(|buf| buf.get_mut(..length))
                .ok_or(Error::NotSupported)?;
            dest.copy_from_slice(source);
        }
        request.set_status(RequestStatus::Success);
        request.complete(RequestStatus::Success, port);
        Ok(Progress::Completed)
    }

    /// Finish a scatter/gather transfer. The DMA already happened.
    fn start_sg_dma_transfer<P>(
        &mut self,
        request: &mut Request<'_>,
        port: &mut P,
    ) -> Result<Progress, Error>
    where
        P: HostPort + ?Sized,
    {
        if !self.controller.supports_sg_dma() {
            error!("{} has no scatter/gather path", self.controller.name());
            return Err(Error::NotImplemented);
        }
        request.set_status(RequestStatus::Success);
        request.complete(RequestStatus::Success, port);
        Ok(Progress::Completed)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
