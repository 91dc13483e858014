//! The slot engine.
//!
//! A [`Slot`] owns one controller's register block. It is configured through
//! [`Slot::issue_bus_operation`], runs requests through
//! [`Slot::issue_request`], and finishes them from the interrupt path with
//! [`Slot::interrupt`] and [`Slot::request_dpc`].
//!
//! Configuration may block, polling the hardware with the supplied delay.
//! Issuing commands and moving PIO blocks never blocks: anything that has to
//! wait for the hardware waits for the next interrupt instead.

mod bus;
mod interrupt;
mod transfer;

pub use bus::clock_divisor;

use embedded_hal::delay::DelayNs;

use crate::adma::{BouncePages, DmaAllocator, NoBounceBuffer, PAGE_SIZE};
use crate::capabilities::SlotCapabilities;
use crate::controller::Controller;
use crate::regs::{self, Capabilities, Registers, MAXIMUM_CURRENT, REGISTER_BLOCK_SIZE};
use crate::regulator::{
    self, NoRegulator, RegulatorChannel, RegulatorError, GPIO_STATE_1_8, GPIO_STATE_3_3,
    SIGNALING_VOLTAGE_GPIO,
};
use crate::request::TransferDirection;
use crate::{debug, error, warn, Error};

// ****************************************************************************
// Types and Implementations
// ****************************************************************************

/// Options for running a slot.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SlotOptions {
    /// Transfers of up to this many bytes use PIO, even when the controller
    /// could bounce them through DMA.
    pub pio_threshold: usize,

    /// Size of the DMA bounce buffer allocated at initialization.
    pub bounce_size: usize,

    /// Size of the DMA bounce buffer in crash-dump mode, where transfers are
    /// limited to 64 KiB.
    pub crash_dump_bounce_size: usize,

    /// How many times a configuration operation re-checks the hardware before
    /// giving up with [`Error::IoTimeout`].
    pub poll_retries: u32,

    /// Microseconds between those checks.
    pub poll_interval_us: u32,

    /// Microseconds to let the SD clock settle after it is stopped or started.
    pub clock_settle_us: u32,

    /// Microseconds to let the signaling voltage settle.
    pub signaling_settle_us: u32,
}

impl Default for SlotOptions {
    fn default() -> Self {
        SlotOptions {
            pio_threshold: 64,
            bounce_size: 0x10_0000,
            crash_dump_bounce_size: 0x1_0000,
            poll_retries: 100,
            poll_interval_us: 1000,
            clock_settle_us: 10_000,
            signaling_settle_us: 5_000,
        }
    }
}

/// Which part of the controller to reset.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResetType {
    /// The whole controller
    All,
    /// The command line circuit
    Cmd,
    /// The data line circuit
    Dat,
}

impl TryFrom<u32> for ResetType {
    type Error = Error;

    /// Convert a framework reset-type code.
    fn try_from(value: u32) -> Result<ResetType, Error> {
        match value {
            1 => Ok(ResetType::All),
            2 => Ok(ResetType::Cmd),
            3 => Ok(ResetType::Dat),
            _ => Err(Error::NotSupported),
        }
    }
}

/// Card supply voltage.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusVoltage {
    /// Power off
    Off,
    /// 3.3V
    V3_3,
    /// 3.0V
    V3_0,
    /// 1.8V
    V1_8,
}

impl TryFrom<u32> for BusVoltage {
    type Error = Error;

    /// Convert a framework bus-voltage code.
    fn try_from(value: u32) -> Result<BusVoltage, Error> {
        match value {
            1 => Ok(BusVoltage::Off),
            2 => Ok(BusVoltage::V3_3),
            3 => Ok(BusVoltage::V3_0),
            4 => Ok(BusVoltage::V1_8),
            _ => Err(Error::NotSupported),
        }
    }
}

/// Bus timing mode.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusSpeed {
    /// Default Speed
    Normal,
    /// High Speed
    High,
    /// UHS SDR12
    Sdr12,
    /// UHS SDR25
    Sdr25,
    /// UHS SDR50
    Sdr50,
    /// UHS DDR50
    Ddr50,
    /// UHS SDR104
    Sdr104,
    /// eMMC HS200
    Hs200,
    /// eMMC HS400
    Hs400,
}

impl TryFrom<u32> for BusSpeed {
    type Error = Error;

    /// Convert a framework bus-speed code.
    fn try_from(value: u32) -> Result<BusSpeed, Error> {
        match value {
            1 => Ok(BusSpeed::Normal),
            2 => Ok(BusSpeed::High),
            3 => Ok(BusSpeed::Sdr12),
            4 => Ok(BusSpeed::Sdr25),
            5 => Ok(BusSpeed::Sdr50),
            6 => Ok(BusSpeed::Ddr50),
            7 => Ok(BusSpeed::Sdr104),
            8 => Ok(BusSpeed::Hs200),
            9 => Ok(BusSpeed::Hs400),
            _ => Err(Error::NotSupported),
        }
    }
}

/// I/O signaling voltage.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SignalingVoltage {
    /// 3.3V signaling
    V3_3,
    /// 1.8V signaling
    V1_8,
}

impl TryFrom<u32> for SignalingVoltage {
    type Error = Error;

    /// Convert a framework signaling-voltage code.
    fn try_from(value: u32) -> Result<SignalingVoltage, Error> {
        match value {
            1 => Ok(SignalingVoltage::V3_3),
            2 => Ok(SignalingVoltage::V1_8),
            _ => Err(Error::NotSupported),
        }
    }
}

/// Output driver strength.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriverType {
    /// Type B, the default
    B,
    /// Type A
    A,
    /// Type C
    C,
    /// Type D
    D,
}

impl TryFrom<u32> for DriverType {
    type Error = Error;

    /// Convert a framework driver-type code.
    fn try_from(value: u32) -> Result<DriverType, Error> {
        match value {
            1 => Ok(DriverType::B),
            2 => Ok(DriverType::A),
            3 => Ok(DriverType::C),
            4 => Ok(DriverType::D),
            _ => Err(Error::NotSupported),
        }
    }
}

impl DriverType {
    /// The Driver Strength Select value for this type.
    pub fn register_value(self) -> u8 {
        match self {
            DriverType::B => 0,
            DriverType::A => 1,
            DriverType::C => 2,
            DriverType::D => 3,
        }
    }
}

/// A change to the bus, or to how the controller drives it.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusOperation {
    /// Reset the card's hardware. Nothing to do on these controllers.
    ResetHw,
    /// Reset part of the controller
    ResetHost(ResetType),
    /// Set the SD clock, in kHz. Zero stops it.
    SetClock(u32),
    /// Set the supply voltage
    SetVoltage(BusVoltage),
    /// Switch power without changing voltage. Not supported.
    SetPower(bool),
    /// Set the data bus width: 1, 4 or 8 (0 means 1)
    SetBusWidth(u8),
    /// Set the timing mode
    SetBusSpeed(BusSpeed),
    /// Switch the I/O signaling voltage
    SetSignalingVoltage(SignalingVoltage),
    /// Set the drive strength. Not supported; use `SetDriverType`.
    SetDriveStrength(u32),
    /// Set the output driver type
    SetDriverType(DriverType),
    /// Let the controller pick clock and driver settings from its presets
    SetPresetValue(bool),
    /// Interrupt at block gaps
    SetBlockGapInterrupt(bool),
    /// Run the tuning procedure
    ExecuteTuning,
    /// Switch the activity LED
    SetLed(bool),
}

/// What one pass of [`Slot::interrupt`] found.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct InterruptSnapshot {
    /// Normal interrupt events, excluding those reported as flags below
    pub events: u16,
    /// Error interrupt bits
    pub errors: u16,
    /// A card was inserted or removed
    pub card_change: bool,
    /// The card raised an SDIO interrupt
    pub sdio_interrupt: bool,
    /// The controller wants re-tuning
    pub tuning: bool,
}

/// One SD Host Controller slot.
///
/// * `R` is the register block.
/// * `D` is the delay provider used by configuration operations.
/// * `H` is the controller variant.
/// * `C` is the channel to the signaling-voltage regulator, if there is one.
/// * `M` hands out DMA bounce buffers, for controllers that need them.
pub struct Slot<R, D, H, C = NoRegulator, M = NoBounceBuffer>
where
    M: DmaAllocator,
{
    regs: R,
    delay: D,
    controller: H,
    regulator: Option<C>,
    allocator: M,
    options: SlotOptions,
    capabilities: SlotCapabilities,
    crash_dump: bool,
    regulator_1_8: bool,
    translation: u32,
    bounce: Option<BouncePages<M::Buffer>>,
    bounce_in_progress: Option<TransferDirection>,
}

impl<R, D, H> Slot<R, D, H>
where
    R: Registers,
    D: DelayNs,
    H: Controller,
{
    /// Create a slot with no regulator and no bounce buffers.
    ///
    /// Uses the default options.
    pub fn new(regs: R, delay: D, controller: H) -> Slot<R, D, H> {
        Self::new_with_options(
            regs,
            delay,
            controller,
            None,
            NoBounceBuffer,
            SlotOptions::default(),
        )
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
    /// Create a slot with the given regulator channel, DMA allocator and
    /// options.
    pub fn new_with_options(
        regs: R,
        delay: D,
        controller: H,
        regulator: Option<C>,
        allocator: M,
        options: SlotOptions,
    ) -> Slot<R, D, H, C, M> {
        Slot {
            regs,
            delay,
            controller,
            regulator,
            allocator,
            options,
            capabilities: SlotCapabilities::default(),
            crash_dump: false,
            regulator_1_8: false,
            translation: 0,
            bounce: None,
            bounce_in_progress: None,
        }
    }

    /// Bring the slot up.
    ///
    /// Sets up DMA, puts the regulator back to 3.3V, works out the slot's
    /// capabilities and disables every interrupt.
    pub fn initialize(
        &mut self,
        physical_base: u64,
        length: usize,
        crash_dump: bool,
    ) -> Result<(), Error> {
        if length < REGISTER_BLOCK_SIZE {
            error!(
                "Register block at {:#x} is only {} bytes",
                physical_base, length
            );
            return Err(Error::NotSupported);
        }

        self.crash_dump = crash_dump;
        self.translation = self.controller.dma_translation();

        if self.controller.uses_bounce_dma() {
            let size = if crash_dump {
                self.options.crash_dump_bounce_size
            } else {
                self.options.bounce_size
            };
            self.allocate_bounce(size)?;
        }

        self.regulator_1_8 = false;
        if let Some(channel) = self.regulator.as_mut() {
            match regulator::get_gpio_state(channel, SIGNALING_VOLTAGE_GPIO) {
                Ok(state) => {
                    debug!("Regulator GPIO state was {}", state);
                }
                Err(e) => {
                    warn!("Couldn't read regulator state: {:?}", e);
                }
            }
            if let Err(e) = self.set_regulator_voltage_1_8(false) {
                warn!("Couldn't reset regulator to 3.3V: {:?}", e);
            }
        }

        let spec_version = regs::spec_version(&self.regs);
        let max_current = self.regs.read_u32(MAXIMUM_CURRENT);
        let raw = Capabilities::read(&self.regs);
        debug_assert!(raw.base_clock_mhz() != 0);
        debug_assert!(raw.max_block_length() < 3);

        let corrected = self.controller.correct_raw_capabilities(raw);
        let mut caps =
            SlotCapabilities::from_registers(corrected, spec_version, self.options.pio_threshold);
        self.controller
            .correct_capabilities(&mut caps, corrected, self.regulator.is_some());
        caps.apply_current_limits(corrected, max_current);
        self.capabilities = caps;

        self.toggle_events(0xFFFF, false);

        debug!(
            "{} slot at {:#x}: spec {}, caps {:#x}, max current {:#x}",
            self.controller.name(),
            physical_base,
            spec_version,
            raw.0,
            max_current
        );
        Ok(())
    }

    /// The slot's capabilities, as worked out by [`Slot::initialize`].
    pub fn capabilities(&self) -> &SlotCapabilities {
        &self.capabilities
    }

    /// The options this slot runs with.
    pub fn options(&self) -> &SlotOptions {
        &self.options
    }

    /// The register block.
    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// The controller variant.
    pub fn controller(&self) -> &H {
        &self.controller
    }

    /// Is the external regulator currently at 1.8V?
    pub fn regulator_voltage_1_8(&self) -> bool {
        self.regulator_1_8
    }

    /// Was the slot initialized for crash-dump mode?
    pub fn is_crash_dump(&self) -> bool {
        self.crash_dump
    }

    /// The offset added to bus addresses handed to the controller.
    pub fn dma_translation(&self) -> u32 {
        self.translation
    }

    /// How many bytes the bounce buffer can hold, if there is one.
    pub fn bounce_capacity(&self) -> Option<usize> {
        self.bounce.as_ref().map(|pages| pages.capacity())
    }

    /// Release the DMA buffers.
    pub fn cleanup(&mut self) {
        if self.bounce.take().is_some() {
            debug!("Freed bounce buffer");
        }
        self.bounce_in_progress = None;
    }

    /// Allocate a bounce buffer of at least `length` bytes, replacing the
    /// current one.
    ///
    /// The current buffer is kept if allocation fails.
    fn allocate_bounce(&mut self, length: usize) -> Result<(), Error> {
        let length = length.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let Some(buffer) = self.allocator.allocate(length) else {
            error!("Couldn't allocate {} byte bounce buffer", length);
            return Err(Error::InsufficientResources);
        };
        self.bounce = Some(BouncePages::new(buffer, self.translation)?);
        debug!("Allocated {} byte bounce buffer", length);
        Ok(())
    }

    /// Switch the external regulator, recording the new state only if the
    /// firmware accepted it.
    fn set_regulator_voltage_1_8(&mut self, enable: bool) -> Result<(), Error> {
        let channel = self.regulator.as_mut().ok_or(RegulatorError::NotFound)?;
        let state = if enable { GPIO_STATE_1_8 } else { GPIO_STATE_3_3 };
        let result = regulator::set_gpio_state(channel, SIGNALING_VOLTAGE_GPIO, state);
        debug!("Set regulator 1.8V={}: {:?}", enable, result);
        result?;
        self.regulator_1_8 = enable;
        Ok(())
    }

    /// Poll until `done` says the hardware is ready, or the retries run out.
    fn poll_until<F>(&mut self, mut done: F) -> Result<(), Error>
    where
        F: FnMut(&R) -> bool,
    {
        let mut delay = Delay::new(&self.options);
        loop {
            if done(&self.regs) {
                return Ok(());
            }
            delay.delay(&mut self.delay, Error::IoTimeout)?;
        }
    }
}

/// Bounds a polling loop.
struct Delay {
    retries_left: u32,
    interval_us: u32,
}

impl Delay {
    /// Create a new Delay object with the retries and interval from the
    /// options.
    fn new(options: &SlotOptions) -> Delay {
        Delay {
            retries_left: options.poll_retries,
            interval_us: options.poll_interval_us,
        }
    }

    /// Wait for a while.
    ///
    /// Checks the retry counter first, and if we hit the max retry limit, the
    /// value `err` is returned. Otherwise we wait for one interval and then
    /// return `Ok(())`.
    fn delay<T>(&mut self, delayer: &mut T, err: Error) -> Result<(), Error>
    where
        T: DelayNs,
    {
        if self.retries_left == 0 {
            Err(err)
        } else {
            delayer.delay_us(self.interval_us);
            self.retries_left -= 1;
            Ok(())
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
