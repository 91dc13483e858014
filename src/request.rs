//! Requests issued to a slot, and how they are completed.
//!
//! A [`Request`] is one command, optionally followed by a data transfer. The
//! slot mutates it across several interrupt-driven steps and hands it back
//! to the [`HostPort`] once it is done.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::adma::{ScatterGatherList, SgElement};
use crate::regs::ErrorInterrupts;
use crate::{warn, Error};

// ****************************************************************************
// Types and Implementations
// ****************************************************************************

/// What the framework is asking the slot to do with a request.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestType {
    /// Send a command that has no data phase
    CommandNoTransfer,
    /// Send a command that is followed by a data phase
    CommandWithTransfer,
    /// Move the next part of the data phase
    StartTransfer,
}

/// The response a command expects from the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseType {
    /// No response
    None,
    /// Normal response
    R1,
    /// Normal response, with busy signalled on DAT0
    R1b,
    /// CID/CSD register (136 bits)
    R2,
    /// OCR register
    R3,
    /// SDIO OCR register
    R4,
    /// SDIO direct I/O response
    R5,
    /// SDIO direct I/O response, with busy
    R5b,
    /// Published RCA
    R6,
}

impl TryFrom<u32> for ResponseType {
    type Error = Error;

    /// Convert a framework response-type code.
    fn try_from(value: u32) -> Result<ResponseType, Error> {
        match value {
            1 => Ok(ResponseType::None),
            2 => Ok(ResponseType::R1),
            3 => Ok(ResponseType::R1b),
            4 => Ok(ResponseType::R2),
            5 => Ok(ResponseType::R3),
            6 => Ok(ResponseType::R4),
            7 => Ok(ResponseType::R5),
            8 => Ok(ResponseType::R5b),
            9 => Ok(ResponseType::R6),
            _ => Err(Error::NotSupported),
        }
    }
}

impl ResponseType {
    /// How many 32-bit response words this response fills.
    pub fn words(self) -> usize {
        match self {
            ResponseType::None => 0,
            ResponseType::R2 => 4,
            _ => 1,
        }
    }
}

/// The Command Type field of the command register.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CommandType {
    /// An ordinary command
    #[default]
    Normal,
    /// CMD52 writing Bus Suspend
    Suspend,
    /// CMD52 writing Function Select
    Resume,
    /// CMD12, CMD52 writing I/O Abort
    Abort,
}

impl TryFrom<u32> for CommandType {
    type Error = Error;

    /// Convert a framework command-type code.
    fn try_from(value: u32) -> Result<CommandType, Error> {
        match value {
            0 => Ok(CommandType::Normal),
            1 => Ok(CommandType::Suspend),
            2 => Ok(CommandType::Resume),
            3 => Ok(CommandType::Abort),
            _ => Err(Error::NotSupported),
        }
    }
}

impl CommandType {
    fn register_value(self) -> u8 {
        match self {
            CommandType::Normal => 0,
            CommandType::Suspend => 1,
            CommandType::Resume => 2,
            CommandType::Abort => 3,
        }
    }
}

/// Whether a command has a data phase, and how many blocks.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferType {
    /// No data phase
    None,
    /// Exactly one block
    SingleBlock,
    /// Several blocks, stopped with Auto CMD12
    MultiBlock,
    /// Several blocks, with no stop command
    MultiBlockNoStop,
}

impl TryFrom<u32> for TransferType {
    type Error = Error;

    /// Convert a framework transfer-type code.
    fn try_from(value: u32) -> Result<TransferType, Error> {
        match value {
            1 => Ok(TransferType::None),
            2 => Ok(TransferType::SingleBlock),
            3 => Ok(TransferType::MultiBlock),
            4 => Ok(TransferType::MultiBlockNoStop),
            _ => Err(Error::NotSupported),
        }
    }
}

/// Direction of the data phase, from the host's point of view.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferDirection {
    /// Card to host
    Read,
    /// Host to card
    Write,
}

/// How the framework wants the data phase carried out.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferMethod {
    /// Through the data port. Controllers with a bounce buffer may still
    /// use DMA for large transfers.
    Pio,
    /// Through an ADMA2 table built from the scatter/gather list
    SgDma,
}

/// The data buffer of a request.
#[derive(Debug)]
pub enum DataBuffer<'a> {
    /// No data phase
    None,
    /// The card's data lands here
    Read(&'a mut [u8]),
    /// This goes to the card
    Write(&'a [u8]),
}

impl DataBuffer<'_> {
    /// The buffer's length in bytes.
    pub fn len(&self) -> usize {
        match self {
            DataBuffer::None => 0,
            DataBuffer::Read(buf) => buf.len(),
            DataBuffer::Write(buf) => buf.len(),
        }
    }

    /// Is the buffer empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Memory the framework provides for a scatter/gather descriptor table.
#[derive(Debug)]
pub struct DmaTable<'a> {
    /// The table, mapped for the CPU.
    pub memory: &'a mut [u8],
    /// The table's bus address.
    pub address: u64,
}

/// An SD command and its data phase.
#[derive(Debug)]
pub struct Command<'a> {
    /// Command index (0..=63)
    pub index: u8,
    /// Command argument
    pub argument: u32,
    /// Expected response
    pub response_type: ResponseType,
    /// Command Type field
    pub command_type: CommandType,
    /// Whether there is a data phase
    pub transfer_type: TransferType,
    /// How the data phase is carried out
    pub method: TransferMethod,
    /// Bytes per block
    pub block_size: u16,
    /// Blocks still to move. Counts down during PIO transfers.
    pub block_count: u16,
    /// Total bytes in the data phase
    pub length: usize,
    /// Scatter/gather list, for [`TransferMethod::SgDma`]
    pub sg_list: Option<&'a [SgElement]>,
    /// Descriptor memory, for [`TransferMethod::SgDma`]
    pub dma_table: Option<DmaTable<'a>>,
    data: DataBuffer<'a>,
    direction: Option<TransferDirection>,
    cursor: usize,
}

impl<'a> Command<'a> {
    /// A command with no data phase.
    pub fn new(index: u8, argument: u32, response_type: ResponseType) -> Command<'a> {
        Command {
            index,
            argument,
            response_type,
            command_type: CommandType::Normal,
            transfer_type: TransferType::None,
            method: TransferMethod::Pio,
            block_size: 0,
            block_count: 0,
            length: 0,
            sg_list: None,
            dma_table: None,
            data: DataBuffer::None,
            direction: None,
            cursor: 0,
        }
    }

    /// A command that reads `buffer.len() / block_size` blocks into `buffer`.
    pub fn read(
        index: u8,
        argument: u32,
        response_type: ResponseType,
        block_size: u16,
        buffer: &'a mut [u8],
    ) -> Command<'a> {
        Self::with_data(
            index,
            argument,
            response_type,
            block_size,
            DataBuffer::Read(buffer),
        )
    }

    /// A command that writes `buffer.len() / block_size` blocks from `buffer`.
    pub fn write(
        index: u8,
        argument: u32,
        response_type: ResponseType,
        block_size: u16,
        buffer: &'a [u8],
    ) -> Command<'a> {
        Self::with_data(
            index,
            argument,
            response_type,
            block_size,
            DataBuffer::Write(buffer),
        )
    }

    fn with_data(
        index: u8,
        argument: u32,
        response_type: ResponseType,
        block_size: u16,
        data: DataBuffer<'a>,
    ) -> Command<'a> {
        let data_len = data.len();
        let direction = match data {
            DataBuffer::Read(_) => Some(TransferDirection::Read),
            DataBuffer::Write(_) => Some(TransferDirection::Write),
            DataBuffer::None => None,
        };
        Command {
            data,
            direction,
            ..Self::with_length(index, argument, response_type, block_size, data_len)
        }
    }

    /// A command whose data phase is carried out with scatter/gather DMA.
    ///
    /// The data phase covers every byte of `sg_list`, which holds at most
    /// [`MAX_SG_ELEMENTS`](crate::adma::MAX_SG_ELEMENTS) runs. The ADMA2
    /// table is built into `table` when the command is sent.
    pub fn sg_dma(
        index: u8,
        argument: u32,
        response_type: ResponseType,
        block_size: u16,
        direction: TransferDirection,
        sg_list: &'a ScatterGatherList,
        table: DmaTable<'a>,
    ) -> Command<'a> {
        let length = sg_list.iter().map(|e| e.length as usize).sum();
        Command {
            method: TransferMethod::SgDma,
            sg_list: Some(sg_list.as_slice()),
            dma_table: Some(table),
            direction: Some(direction),
            ..Self::with_length(index, argument, response_type, block_size, length)
        }
    }

    fn with_length(
        index: u8,
        argument: u32,
        response_type: ResponseType,
        block_size: u16,
        length: usize,
    ) -> Command<'a> {
        // Zero when the length doesn't fit; the command is rejected when sent
        let block_count = length
            .checked_div(usize::from(block_size))
            .and_then(|blocks| u16::try_from(blocks).ok())
            .unwrap_or(0);
        Command {
            transfer_type: if block_count > 1 {
                TransferType::MultiBlock
            } else {
                TransferType::SingleBlock
            },
            block_size,
            block_count,
            length,
            ..Command::new(index, argument, response_type)
        }
    }

    /// Set the Command Type field.
    pub fn with_command_type(mut self, command_type: CommandType) -> Command<'a> {
        self.command_type = command_type;
        self
    }

    /// The direction of the data phase, if there is one.
    pub fn direction(&self) -> Option<TransferDirection> {
        self.direction
    }

    /// The data buffer.
    pub fn data(&self) -> &DataBuffer<'a> {
        &self.data
    }

    /// Bytes of the data phase already moved by PIO.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn command_type_value(&self) -> u8 {
        self.command_type.register_value()
    }

    /// The block at the cursor, for a read.
    pub(crate) fn read_block(&mut self) -> Option<&mut [u8]> {
        let range = self.cursor..self.cursor + usize::from(self.block_size);
        match &mut self.data {
            DataBuffer::Read(buf) => buf.get_mut(range),
            _ => None,
        }
    }

    /// The block at the cursor, for a write.
    pub(crate) fn write_block(&self) -> Option<&[u8]> {
        let range = self.cursor..self.cursor + usize::from(self.block_size);
        match &self.data {
            DataBuffer::Write(buf) => buf.get(range),
            _ => None,
        }
    }

    /// Check that the data phase is a whole number of blocks, and that the
    /// Block Count register can hold that number.
    pub(crate) fn check_blocks(&self) -> Result<(), Error> {
        let block_size = usize::from(self.block_size);
        if block_size == 0 || self.length % block_size != 0 {
            return Err(Error::NotSupported);
        }
        match u16::try_from(self.length / block_size) {
            Ok(blocks) if blocks > 0 && blocks == self.block_count => Ok(()),
            _ => Err(Error::NotSupported),
        }
    }

    /// Step past one block.
    pub(crate) fn advance(&mut self) {
        self.block_count = self.block_count.saturating_sub(1);
        self.cursor += usize::from(self.block_size);
    }

    /// The whole read buffer.
    pub(crate) fn read_buffer(&mut self) -> Option<&mut [u8]> {
        match &mut self.data {
            DataBuffer::Read(buf) => Some(buf),
            _ => None,
        }
    }

    /// The whole write buffer.
    pub(crate) fn write_buffer(&self) -> Option<&[u8]> {
        match &self.data {
            DataBuffer::Write(buf) => Some(buf),
            _ => None,
        }
    }
}

/// The outcome the framework sees for a request.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestStatus {
    /// Everything worked
    Success,
    /// The current step worked but more blocks remain
    MoreProcessingRequired,
    /// Command or data timeout
    IoTimeout,
    /// Command or data CRC error
    CrcError,
    /// Command or data end bit error
    DeviceDataError,
    /// The response had the wrong command index
    DeviceProtocolError,
    /// The controller hit its current limit
    DevicePowerFailure,
    /// Any other controller error
    IoDeviceError,
}

impl RequestStatus {
    /// Every status, indexed by discriminant.
    const ALL: [RequestStatus; 8] = [
        RequestStatus::Success,
        RequestStatus::MoreProcessingRequired,
        RequestStatus::IoTimeout,
        RequestStatus::CrcError,
        RequestStatus::DeviceDataError,
        RequestStatus::DeviceProtocolError,
        RequestStatus::DevicePowerFailure,
        RequestStatus::IoDeviceError,
    ];

    fn from_code(code: u8) -> RequestStatus {
        Self::ALL
            .get(usize::from(code))
            .copied()
            .unwrap_or(RequestStatus::IoDeviceError)
    }

    /// Map error interrupt bits to a status.
    ///
    /// Timeouts win over CRC errors, which win over end bit errors, then
    /// index errors, then current limit errors.
    pub fn from_errors(errors: u16) -> RequestStatus {
        let e = ErrorInterrupts(errors);
        if errors == 0 {
            RequestStatus::Success
        } else if e.command_timeout() || e.data_timeout() {
            RequestStatus::IoTimeout
        } else if e.command_crc() || e.data_crc() {
            RequestStatus::CrcError
        } else if e.command_end_bit() || e.data_end_bit() {
            RequestStatus::DeviceDataError
        } else if e.command_index() {
            RequestStatus::DeviceProtocolError
        } else if e.current_limit() {
            RequestStatus::DevicePowerFailure
        } else {
            RequestStatus::IoDeviceError
        }
    }
}

/// How far [`issue_request`](crate::SlotMiniport::issue_request) got.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The hardware is busy; an interrupt will follow
    Pending,
    /// The request was completed before returning
    Completed,
}

/// The framework that receives completed requests.
pub trait HostPort {
    /// A request is finished, with this status.
    fn complete_request(&mut self, request: &Request<'_>, status: RequestStatus);
}

/// One command, optionally followed by a data transfer.
///
/// The required-events mask is shared between the code issuing the request
/// and the interrupt path completing it, so it is only ever changed
/// atomically.
#[derive(Debug)]
pub struct Request<'a> {
    /// What to do next with this request
    pub request_type: RequestType,
    /// The command
    pub command: Command<'a>,
    required_events: AtomicU32,
    status: AtomicU8,
    completions: AtomicU32,
}

impl<'a> Request<'a> {
    /// Wrap a command, picking the request type from its data phase.
    pub fn new(command: Command<'a>) -> Request<'a> {
        let request_type = if command.transfer_type == TransferType::None {
            RequestType::CommandNoTransfer
        } else {
            RequestType::CommandWithTransfer
        };
        Request {
            request_type,
            command,
            required_events: AtomicU32::new(0),
            status: AtomicU8::new(RequestStatus::Success as u8),
            completions: AtomicU32::new(0),
        }
    }

    /// The interrupt events still needed before this request can complete.
    pub fn required_events(&self) -> u32 {
        self.required_events.load(Ordering::Acquire)
    }

    /// The status recorded by the last step.
    pub fn status(&self) -> RequestStatus {
        RequestStatus::from_code(self.status.load(Ordering::Acquire))
    }

    /// How many times the current step of this request has been completed.
    ///
    /// More than one means the error and completion paths raced.
    pub fn completions(&self) -> u32 {
        self.completions.load(Ordering::Acquire)
    }

    /// Start a new step: issuing the command, or moving more data.
    pub(crate) fn begin_step(&self) {
        self.completions.store(0, Ordering::Release);
    }

    pub(crate) fn set_status(&self, status: RequestStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn store_required_events(&self, events: u32) {
        self.required_events.store(events, Ordering::Release);
    }

    pub(crate) fn add_required_events(&self, events: u32) {
        self.required_events.fetch_or(events, Ordering::AcqRel);
    }

    /// Clear `events`, returning the mask as it was before.
    pub(crate) fn clear_required_events(&self, events: u32) -> u32 {
        self.required_events.fetch_and(!events, Ordering::AcqRel)
    }

    /// Hand the request back to the framework.
    pub(crate) fn complete<P>(&self, status: RequestStatus, port: &mut P)
    where
        P: HostPort + ?Sized,
    {
        let previous = self.completions.fetch_add(1, Ordering::AcqRel);
        if previous != 0 {
            warn!(
                "CMD{} completed again with {:?} ({} earlier completions)",
                self.command.index, status, previous
            );
        }
        port.complete_request(self, status);
    }
}

// ****************************************************************************
// Unit Tests
// ****************************************************************************


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
