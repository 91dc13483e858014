//! The signaling-voltage regulator, and the channel used to reach it.
//!
//! On the Raspberry Pi 4 the SD card's I/O voltage comes from a regulator
//! hanging off the firmware's GPIO expander. We switch it by sending a
//! mailbox property message to the VideoCore firmware.

use core::cell::RefCell;

use byteorder::{ByteOrder, LittleEndian};

use crate::debug;

// ****************************************************************************
// Constants
// ****************************************************************************

/// Size of a GPIO-expander property message, in bytes.
pub const MESSAGE_SIZE: usize = 32;

/// Property tag to read an expander GPIO.
pub const TAG_GET_GPIO_EXPANDER: u32 = 0x0003_0041;

/// Property tag to drive an expander GPIO.
pub const TAG_SET_GPIO_EXPANDER: u32 = 0x0003_8041;

/// Request code the firmware replaces with a response code.
pub const REQUEST_CODE: u32 = 0;

/// Response code for a successful property call.
pub const RESPONSE_SUCCESS: u32 = 0x8000_0000;

/// The expander pin driving the signaling-voltage regulator (pin 4, plus 128).
pub const SIGNALING_VOLTAGE_GPIO: u32 = 132;

/// GPIO state selecting 3.3V signaling.
pub const GPIO_STATE_3_3: u32 = 0;

/// GPIO state selecting 1.8V signaling.
pub const GPIO_STATE_1_8: u32 = 1;

// ****************************************************************************
// Types and Implementations
// ****************************************************************************

/// Errors talking to the regulator.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegulatorError {
    /// There is no channel to the firmware
    NotFound,
    /// The channel failed to carry the message
    Transport,
    /// The firmware answered with this response code
    Rejected(u32),
}

/// A synchronous firmware property call.
pub trait RegulatorChannel {
    /// Send `message` and wait for the answer, which overwrites it.
    fn property(&mut self, message: &mut [u8]) -> Result<(), RegulatorError>;
}

/// A regulator channel that can never exist.
#[derive(Debug)]
pub enum NoRegulator {}

impl RegulatorChannel for NoRegulator {
    fn property(&mut self, _message: &mut [u8]) -> Result<(), RegulatorError> {
        match *self {}
    }
}

/// A get or set of one GPIO-expander pin.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GpioExpanderMessage {
    /// [`TAG_GET_GPIO_EXPANDER`] or [`TAG_SET_GPIO_EXPANDER`]
    pub tag: u32,
    /// The pin
    pub gpio: u32,
    /// The pin state
    pub state: u32,
}

impl GpioExpanderMessage {
    /// Ask for the state of `gpio`.
    pub fn get(gpio: u32) -> GpioExpanderMessage {
        GpioExpanderMessage {
            tag: TAG_GET_GPIO_EXPANDER,
            gpio,
            state: 0,
        }
    }

    /// Drive `gpio` to `state`.
    pub fn set(gpio: u32, state: u32) -> GpioExpanderMessage {
        GpioExpanderMessage {
            tag: TAG_SET_GPIO_EXPANDER,
            gpio,
            state,
        }
    }

    /// Render as a property buffer.
    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut buffer = [0u8; MESSAGE_SIZE];
        LittleEndian::write_u32(&mut buffer[0..4], MESSAGE_SIZE as u32);
        LittleEndian::write_u32(&mut buffer[4..8], REQUEST_CODE);
        LittleEndian::write_u32(&mut buffer[8..12], self.tag);
        // Value buffer size, then request length
        LittleEndian::write_u32(&mut buffer[12..16], 8);
        LittleEndian::write_u32(&mut buffer[16..20], 8);
        LittleEndian::write_u32(&mut buffer[20..24], self.gpio);
        LittleEndian::write_u32(&mut buffer[24..28], self.state);
        // End tag is zero
        buffer
    }

    /// Parse a property buffer the firmware has answered.
    pub fn decode(buffer: &[u8]) -> Result<GpioExpanderMessage, RegulatorError> {
        if buffer.len() < MESSAGE_SIZE {
            return Err(RegulatorError::Transport);
        }
        let code = LittleEndian::read_u32(&buffer[4..8]);
        if code != RESPONSE_SUCCESS {
            return Err(RegulatorError::Rejected(code));
        }
        Ok(GpioExpanderMessage {
            tag: LittleEndian::read_u32(&buffer[8..12]),
            gpio: LittleEndian::read_u32(&buffer[20..24]),
            state: LittleEndian::read_u32(&buffer[24..28]),
        })
    }
}

/// Read the state of an expander pin.
pub fn get_gpio_state<C>(channel: &mut C, gpio: u32) -> Result<u32, RegulatorError>
where
    C: RegulatorChannel + ?Sized,
{
    let mut buffer = GpioExpanderMessage::get(gpio).encode();
    channel.property(&mut buffer)?;
    Ok(GpioExpanderMessage::decode(&buffer)?.state)
}

/// Drive an expander pin.
pub fn set_gpio_state<C>(channel: &mut C, gpio: u32, state: u32) -> Result<(), RegulatorError>
where
    C: RegulatorChannel + ?Sized,
{
    let mut buffer = GpioExpanderMessage::set(gpio, state).encode();
    channel.property(&mut buffer)?;
    GpioExpanderMessage::decode(&buffer)?;
    Ok(())
}

/// A property channel over a byte stream, such as a mailbox character
/// device.
///
/// The message is written in full and the answer read back into it.
pub struct IoPropertyChannel<T> {
    io: T,
}

impl<T> IoPropertyChannel<T>
where
    T: embedded_io::Read + embedded_io::Write,
{
    /// Wrap a byte stream.
    pub fn new(io: T) -> IoPropertyChannel<T> {
        IoPropertyChannel { io }
    }

    /// Give the byte stream back.
    pub fn free(self) -> T {
        self.io
    }
}

impl<T> RegulatorChannel for IoPropertyChannel<T>
where
    T: embedded_io::Read + embedded_io::Write,
{
    fn property(&mut self, message: &mut [u8]) -> Result<(), RegulatorError> {
        self.io
            .write_all(message)
            .map_err(|_| RegulatorError::Transport)?;
        self.io.flush().map_err(|_| RegulatorError::Transport)?;
        self.io
            .read_exact(message)
            .map_err(|_| RegulatorError::Transport)?;
        Ok(())
    }
}

/// A wrapper around a regulator channel, using a `RefCell`.
///
/// This allows sharing the channel within the same thread.
pub struct RefCellRegulatorChannel<'a, C> {
    channel: &'a RefCell<C>,
}

impl<'a, C> RefCellRegulatorChannel<'a, C> {
    /// Create a new `RefCellRegulatorChannel`.
    pub fn new(channel: &'a RefCell<C>) -> Self {
        Self { channel }
    }
}

impl<C> RegulatorChannel for RefCellRegulatorChannel<'_, C>
where
    C: RegulatorChannel,
{
    fn property(&mut self, message: &mut [u8]) -> Result<(), RegulatorError> {
        let mut channel = self.channel.borrow_mut();
        channel.property(message)
    }
}

#[cfg(feature = "embassy-sync-06")]
mod embassy_sync_06 {
    use core::cell::RefCell;

    use ::embassy_sync_06::blocking_mutex;

    use super::*;

    /// A wrapper around a regulator channel, using an `embassy-sync` blocking mutex.
    ///
    /// This allows sharing the channel according to the `embassy-sync` mutex model.
    /// See [`blocking_mutex::Mutex`] for more details.
    pub struct EmbassyMutexRegulatorChannel<'a, C, M> {
        channel: &'a blocking_mutex::Mutex<M, RefCell<C>>,
    }

    impl<'a, C, M> EmbassyMutexRegulatorChannel<'a, C, M> {
        /// Create a new `EmbassyMutexRegulatorChannel`.
        pub fn new(channel: &'a blocking_mutex::Mutex<M, RefCell<C>>) -> Self {
            Self { channel }
        }
    }

    impl<C, M> RegulatorChannel for EmbassyMutexRegulatorChannel<'_, C, M>
    where
        C: RegulatorChannel,
        M: blocking_mutex::raw::RawMutex,
    {
        fn property(&mut self, message: &mut [u8]) -> Result<(), RegulatorError> {
            self.channel.lock(|channel| {
                let mut channel = channel.borrow_mut();
                channel.property(message)
            })
        }
    }
}

#[cfg(feature = "embassy-sync-06")]
pub use embassy_sync_06::*;

/// The execution context the caller is running in.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Ordinary thread context; may block
    Passive,
    /// Asynchronous procedure call context
    Apc,
    /// Dispatch context
    Dispatch,
}

/// Something that can run work in [`ExecutionContext::Passive`].
pub trait PassiveExecutor {
    /// Where the caller is running right now.
    fn current_context(&self) -> ExecutionContext;

    /// Run `work` on a passive-context worker, returning once it has
    /// finished.
    fn run_passive(&self, work: &mut (dyn FnMut() + Send));
}

/// A regulator channel that only talks to the firmware from passive context.
///
/// Called from anywhere else, it queues the call onto a passive worker and
/// blocks until the worker is done. The caller waits on lower-priority work
/// while it does.
pub struct PassiveMarshal<C, E> {
    channel: C,
    executor: E,
}

impl<C, E> PassiveMarshal<C, E>
where
    C: RegulatorChannel + Send,
    E: PassiveExecutor,
{
    /// Wrap a channel that needs passive context.
    pub fn new(channel: C, executor: E) -> PassiveMarshal<C, E> {
        PassiveMarshal { channel, executor }
    }

    /// Take the channel and executor back.
    pub fn free(self) -> (C, E) {
        (self.channel, self.executor)
    }
}

impl<C, E> RegulatorChannel for PassiveMarshal<C, E>
where
    C: RegulatorChannel + Send,
    E: PassiveExecutor,
{
    fn property(&mut self, message: &mut [u8]) -> Result<(), RegulatorError> {
        let context = self.executor.current_context();
        if context == ExecutionContext::Passive {
            return self.channel.property(message);
        }

        let channel = &mut self.channel;
        let mut result = Err(RegulatorError::Transport);
        let mut work = || {
            result = channel.property(message);
        };
        self.executor.run_passive(&mut work);
        debug!("Marshaled property call from {:?}: {:?}", context, result);
        result
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
