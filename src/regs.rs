//! The SD Host Controller register block.
//!
//! Offsets and bit layouts follow the SD Host Controller Simplified
//! Specification. Every register is an integer newtype with named accessors,
//! so nothing outside this module needs to know where a field lives.

use core::sync::atomic::{fence, Ordering};

// ****************************************************************************
// Constants
// ****************************************************************************

/// Size of the standard register block, in bytes.
pub const REGISTER_BLOCK_SIZE: usize = 0x100;

/// SDMA System Address (also the 32-bit Block Count on v4 hosts).
pub const SDMA_SYSTEM_ADDRESS: usize = 0x00;
/// Block Size register.
pub const BLOCK_SIZE: usize = 0x04;
/// 16-bit Block Count register.
pub const BLOCK_COUNT: usize = 0x06;
/// Command Argument register.
pub const ARGUMENT: usize = 0x08;
/// First of the four 32-bit Response registers.
pub const RESPONSE: usize = 0x10;
/// Buffer Data Port register.
pub const DATA_PORT: usize = 0x20;
/// Normal Interrupt Status register.
pub const NORMAL_INTERRUPT_STATUS: usize = 0x30;
/// Error Interrupt Status register.
pub const ERROR_INTERRUPT_STATUS: usize = 0x32;
/// Normal Interrupt Status Enable register.
pub const NORMAL_INTERRUPT_STATUS_ENABLE: usize = 0x34;
/// Error Interrupt Status Enable register.
pub const ERROR_INTERRUPT_STATUS_ENABLE: usize = 0x36;
/// Normal Interrupt Signal Enable register.
pub const NORMAL_INTERRUPT_SIGNAL_ENABLE: usize = 0x38;
/// Error Interrupt Signal Enable register.
pub const ERROR_INTERRUPT_SIGNAL_ENABLE: usize = 0x3A;
/// Auto CMD Error Status register.
pub const AUTO_CMD_ERROR_STATUS: usize = 0x3C;
/// Low half of the Capabilities register.
pub const CAPABILITIES: usize = 0x40;
/// High half of the Capabilities register.
pub const CAPABILITIES_HIGH: usize = 0x44;
/// Maximum Current Capabilities register.
pub const MAXIMUM_CURRENT: usize = 0x48;
/// Force Event for Auto CMD Error Status.
pub const FORCE_AUTO_CMD_ERROR: usize = 0x50;
/// Force Event for Error Interrupt Status.
pub const FORCE_ERROR_INTERRUPT: usize = 0x52;
/// ADMA Error Status register.
pub const ADMA_ERROR_STATUS: usize = 0x54;
/// Low 32 bits of the ADMA System Address.
pub const ADMA_SYSTEM_ADDRESS: usize = 0x58;
/// High 32 bits of the ADMA System Address.
pub const ADMA_SYSTEM_ADDRESS_HIGH: usize = 0x5C;
/// First of the Preset Value registers.
pub const PRESET_VALUES: usize = 0x60;
/// Slot Interrupt Status register.
pub const SLOT_INTERRUPT_STATUS: usize = 0xFC;
/// Specification Version Number (low byte of Host Controller Version).
pub const SPEC_VERSION: usize = 0xFE;
/// Vendor Version Number (high byte of Host Controller Version).
pub const VENDOR_VERSION: usize = 0xFF;

/// Value written to Timeout Control after a reset (TMCLK x 2^27).
pub const MAX_DATA_TIMEOUT: u8 = 14;

/// Spec version register value for a v3.00 host.
pub const SPEC_VERSION_3: u8 = 2;

// ****************************************************************************
// Access Traits
// ****************************************************************************

/// Width-matched access to a mapped register block.
///
/// The `_nofence` methods are the raw accesses. The fenced versions issue
/// [`Registers::barrier`] first, so that every earlier access is observed by
/// the controller before this one.
pub trait Registers {
    /// Read a byte without a barrier.
    fn read_u8_nofence(&self, offset: usize) -> u8;
    /// Read a half-word without a barrier.
    fn read_u16_nofence(&self, offset: usize) -> u16;
    /// Read a word without a barrier.
    fn read_u32_nofence(&self, offset: usize) -> u32;
    /// Write a byte without a barrier.
    fn write_u8_nofence(&self, offset: usize, value: u8);
    /// Write a half-word without a barrier.
    fn write_u16_nofence(&self, offset: usize, value: u16);
    /// Write a word without a barrier.
    fn write_u32_nofence(&self, offset: usize, value: u32);

    /// Order all earlier register accesses before any that follow.
    fn barrier(&self) {
        fence(Ordering::SeqCst);
    }

    /// Read a byte.
    fn read_u8(&self, offset: usize) -> u8 {
        self.barrier();
        self.read_u8_nofence(offset)
    }

    /// Read a half-word.
    fn read_u16(&self, offset: usize) -> u16 {
        self.barrier();
        self.read_u16_nofence(offset)
    }

    /// Read a word.
    fn read_u32(&self, offset: usize) -> u32 {
        self.barrier();
        self.read_u32_nofence(offset)
    }

    /// Write a byte.
    fn write_u8(&self, offset: usize, value: u8) {
        self.barrier();
        self.write_u8_nofence(offset, value)
    }

    /// Write a half-word.
    fn write_u16(&self, offset: usize, value: u16) {
        self.barrier();
        self.write_u16_nofence(offset, value)
    }

    /// Write a word.
    fn write_u32(&self, offset: usize, value: u32) {
        self.barrier();
        self.write_u32_nofence(offset, value)
    }
}

/// An integer that can be moved to or from a register of the same width.
pub trait RegisterValue: Copy {
    /// Fenced read.
    fn read<R: Registers + ?Sized>(regs: &R, offset: usize) -> Self;
    /// Unfenced read.
    fn read_nofence<R: Registers + ?Sized>(regs: &R, offset: usize) -> Self;
    /// Fenced write.
    fn write<R: Registers + ?Sized>(self, regs: &R, offset: usize);
    /// Unfenced write.
    fn write_nofence<R: Registers + ?Sized>(self, regs: &R, offset: usize);
}

macro_rules! impl_register_value {
    ($type:ty, $read:ident, $read_nofence:ident, $write:ident, $write_nofence:ident) => {
        impl RegisterValue for $type {
            fn read<R: Registers + ?Sized>(regs: &R, offset: usize) -> Self {
                regs.$read(offset)
            }

            fn read_nofence<R: Registers + ?Sized>(regs: &R, offset: usize) -> Self {
                regs.$read_nofence(offset)
            }

            fn write<R: Registers + ?Sized>(self, regs: &R, offset: usize) {
                regs.$write(offset, self)
            }

            fn write_nofence<R: Registers + ?Sized>(self, regs: &R, offset: usize) {
                regs.$write_nofence(offset, self)
            }
        }
    };
}

impl_register_value!(u8, read_u8, read_u8_nofence, write_u8, write_u8_nofence);
impl_register_value!(u16, read_u16, read_u16_nofence, write_u16, write_u16_nofence);
impl_register_value!(u32, read_u32, read_u32_nofence, write_u32, write_u32_nofence);

/// A register block mapped into our address space.
pub struct Mmio {
    base: *mut u8,
    len: usize,
}

impl Mmio {
    /// Wrap a mapped register block.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `len` bytes of device memory that stays
    /// mapped for the lifetime of this object, aligned to four bytes, and not
    /// accessed through any other path that assumes normal memory semantics.
    pub unsafe fn new(base: *mut u8, len: usize) -> Mmio {
        Mmio { base, len }
    }

    /// The number of bytes mapped.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the mapping empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn ptr<T>(&self, offset: usize) -> *mut T {
        assert!(offset + core::mem::size_of::<T>() <= self.len);
        // Safety: in bounds of the mapping, checked above
        unsafe { self.base.add(offset) as *mut T }
    }
}

impl Registers for Mmio {
    fn read_u8_nofence(&self, offset: usize) -> u8 {
        // Safety: `Mmio::new` guarantees the mapping
        unsafe { self.ptr::<u8>(offset).read_volatile() }
    }

    fn read_u16_nofence(&self, offset: usize) -> u16 {
        // Safety: `Mmio::new` guarantees the mapping and alignment
        unsafe { self.ptr::<u16>(offset).read_volatile() }
    }

    fn read_u32_nofence(&self, offset: usize) -> u32 {
        // Safety: `Mmio::new` guarantees the mapping and alignment
        unsafe { self.ptr::<u32>(offset).read_volatile() }
    }

    fn write_u8_nofence(&self, offset: usize, value: u8) {
        // Safety: `Mmio::new` guarantees the mapping
        unsafe { self.ptr::<u8>(offset).write_volatile(value) }
    }

    fn write_u16_nofence(&self, offset: usize, value: u16) {
        // Safety: `Mmio::new` guarantees the mapping and alignment
        unsafe { self.ptr::<u16>(offset).write_volatile(value) }
    }

    fn write_u32_nofence(&self, offset: usize, value: u32) {
        // Safety: `Mmio::new` guarantees the mapping and alignment
        unsafe { self.ptr::<u32>(offset).write_volatile(value) }
    }
}

// ****************************************************************************
// Register Types
// ****************************************************************************

define_register!(
    /// Transfer Mode register (0x0C).
    TransferMode,
    u16,
    0x0C
);

impl TransferMode {
    define_field!(dma_enable, set_dma_enable, u16, bool, 0);
    define_field!(block_count_enable, set_block_count_enable, u16, bool, 1);
    define_field!(auto_cmd, set_auto_cmd, u16, u8, 2, 2);
    define_field!(direction_read, set_direction_read, u16, bool, 4);
    define_field!(multiple_block, set_multiple_block, u16, bool, 5);

    /// Auto CMD field value selecting Auto CMD12.
    pub const AUTO_CMD12: u8 = 1;
    /// Auto CMD field value selecting Auto CMD23.
    pub const AUTO_CMD23: u8 = 2;
}

define_register!(
    /// Command register (0x0E). Writing it starts the command.
    CommandRegister,
    u16,
    0x0E
);

impl CommandRegister {
    define_field!(response_type, set_response_type, u16, u8, 0, 2);
    define_field!(crc_check, set_crc_check, u16, bool, 3);
    define_field!(index_check, set_index_check, u16, bool, 4);
    define_field!(data_present, set_data_present, u16, bool, 5);
    define_field!(command_type, set_command_type, u16, u8, 6, 2);
    define_field!(index, set_index, u16, u8, 8, 6);

    /// Response Type Select: no response.
    pub const RESPONSE_NONE: u8 = 0;
    /// Response Type Select: 136-bit response.
    pub const RESPONSE_136: u8 = 1;
    /// Response Type Select: 48-bit response.
    pub const RESPONSE_48: u8 = 2;
    /// Response Type Select: 48-bit response, check busy.
    pub const RESPONSE_48_BUSY: u8 = 3;
}

define_register!(
    /// Present State register (0x24).
    PresentState,
    u32,
    0x24
);

impl PresentState {
    define_field!(command_inhibit, set_command_inhibit, u32, bool, 0);
    define_field!(data_inhibit, set_data_inhibit, u32, bool, 1);
    define_field!(dat_line_active, set_dat_line_active, u32, bool, 2);
    define_field!(write_transfer_active, set_write_transfer_active, u32, bool, 8);
    define_field!(read_transfer_active, set_read_transfer_active, u32, bool, 9);
    define_field!(buffer_write_enable, set_buffer_write_enable, u32, bool, 10);
    define_field!(buffer_read_enable, set_buffer_read_enable, u32, bool, 11);
    define_field!(card_inserted, set_card_inserted, u32, bool, 16);
    define_field!(card_state_stable, set_card_state_stable, u32, bool, 17);
    define_field!(card_detect_level, set_card_detect_level, u32, bool, 18);
    define_field!(write_enabled, set_write_enabled, u32, bool, 19);
    define_field!(dat_lines, set_dat_lines, u32, u8, 20, 4);
    define_field!(cmd_line, set_cmd_line, u32, bool, 24);
}

define_register!(
    /// Host Control 1 register (0x28).
    HostControl1,
    u8,
    0x28
);

impl HostControl1 {
    define_field!(led, set_led, u8, bool, 0);
    define_field!(width_4, set_width_4, u8, bool, 1);
    define_field!(high_speed, set_high_speed, u8, bool, 2);
    define_field!(dma_select, set_dma_select, u8, u8, 3, 2);
    define_field!(width_8, set_width_8, u8, bool, 5);
    define_field!(card_detect_test, set_card_detect_test, u8, bool, 6);
    define_field!(card_detect_signal, set_card_detect_signal, u8, bool, 7);
}

define_register!(
    /// Power Control register (0x29).
    PowerControl,
    u8,
    0x29
);

impl PowerControl {
    define_field!(power_on, set_power_on, u8, bool, 0);
    define_field!(voltage_select, set_voltage_select, u8, u8, 1, 3);

    /// Voltage Select value for 3.3 V.
    pub const VOLTAGE_3_3: u8 = 7;
    /// Voltage Select value for 3.0 V.
    pub const VOLTAGE_3_0: u8 = 6;
    /// Voltage Select value for 1.8 V.
    pub const VOLTAGE_1_8: u8 = 5;
}

define_register!(
    /// Block Gap Control register (0x2A).
    BlockGapControl,
    u8,
    0x2A
);

impl BlockGapControl {
    define_field!(stop_at_gap, set_stop_at_gap, u8, bool, 0);
    define_field!(continue_request, set_continue_request, u8, bool, 1);
    define_field!(read_wait, set_read_wait, u8, bool, 2);
    define_field!(interrupt_at_gap, set_interrupt_at_gap, u8, bool, 3);
}

define_register!(
    /// Clock Control register (0x2C).
    ClockControl,
    u16,
    0x2C
);

impl ClockControl {
    define_field!(internal_clock_enable, set_internal_clock_enable, u16, bool, 0);
    define_field!(internal_clock_stable, set_internal_clock_stable, u16, bool, 1);
    define_field!(sd_clock_enable, set_sd_clock_enable, u16, bool, 2);
    define_field!(pll_enable, set_pll_enable, u16, bool, 3);
    define_field!(clock_generator_select, set_clock_generator_select, u16, bool, 5);
    define_field!(frequency_select_upper, set_frequency_select_upper, u16, u16, 6, 2);
    define_field!(frequency_select, set_frequency_select, u16, u16, 8, 8);

    /// The divisor these fields program, where zero means "base clock".
    pub fn divisor(&self) -> u32 {
        let upper = u32::from(self.frequency_select_upper());
        ((upper << 8) | u32::from(self.frequency_select())) * 2
    }
}

define_register!(
    /// Timeout Control register (0x2E).
    TimeoutControl,
    u8,
    0x2E
);

impl TimeoutControl {
    define_field!(data_timeout_counter, set_data_timeout_counter, u8, u8, 0, 4);
}

define_register!(
    /// Software Reset register (0x2F). The bits clear themselves.
    SoftwareReset,
    u8,
    0x2F
);

impl SoftwareReset {
    define_field!(all, set_all, u8, bool, 0);
    define_field!(cmd_line, set_cmd_line, u8, bool, 1);
    define_field!(dat_line, set_dat_line, u8, bool, 2);
}

define_register!(
    /// A value of the Normal Interrupt Status, Status Enable or Signal Enable registers.
    NormalInterrupts,
    u16
);

impl NormalInterrupts {
    /// Command Complete.
    pub const COMMAND_COMPLETE: u16 = 1 << 0;
    /// Transfer Complete.
    pub const TRANSFER_COMPLETE: u16 = 1 << 1;
    /// Block Gap Event.
    pub const BLOCK_GAP: u16 = 1 << 2;
    /// DMA Interrupt.
    pub const DMA: u16 = 1 << 3;
    /// Buffer Write Ready.
    pub const BUFFER_WRITE_READY: u16 = 1 << 4;
    /// Buffer Read Ready.
    pub const BUFFER_READ_READY: u16 = 1 << 5;
    /// Card Insertion.
    pub const CARD_INSERTION: u16 = 1 << 6;
    /// Card Removal.
    pub const CARD_REMOVAL: u16 = 1 << 7;
    /// Card Interrupt.
    pub const CARD_INTERRUPT: u16 = 1 << 8;
    /// Re-Tuning Event.
    pub const RETUNING: u16 = 1 << 12;
    /// Error Interrupt summary bit.
    pub const ERROR_INTERRUPT: u16 = 1 << 15;

    define_field!(command_complete, set_command_complete, u16, bool, 0);
    define_field!(transfer_complete, set_transfer_complete, u16, bool, 1);
    define_field!(block_gap, set_block_gap, u16, bool, 2);
    define_field!(dma, set_dma, u16, bool, 3);
    define_field!(buffer_write_ready, set_buffer_write_ready, u16, bool, 4);
    define_field!(buffer_read_ready, set_buffer_read_ready, u16, bool, 5);
    define_field!(card_insertion, set_card_insertion, u16, bool, 6);
    define_field!(card_removal, set_card_removal, u16, bool, 7);
    define_field!(card_interrupt, set_card_interrupt, u16, bool, 8);
    define_field!(int_a, set_int_a, u16, bool, 9);
    define_field!(int_b, set_int_b, u16, bool, 10);
    define_field!(int_c, set_int_c, u16, bool, 11);
    define_field!(retuning, set_retuning, u16, bool, 12);
    define_field!(fx, set_fx, u16, bool, 13);
    define_field!(error_interrupt, set_error_interrupt, u16, bool, 15);
}

define_register!(
    /// A value of the Error Interrupt Status, Status Enable or Signal Enable registers.
    ErrorInterrupts,
    u16
);

impl ErrorInterrupts {
    define_field!(command_timeout, set_command_timeout, u16, bool, 0);
    define_field!(command_crc, set_command_crc, u16, bool, 1);
    define_field!(command_end_bit, set_command_end_bit, u16, bool, 2);
    define_field!(command_index, set_command_index, u16, bool, 3);
    define_field!(data_timeout, set_data_timeout, u16, bool, 4);
    define_field!(data_crc, set_data_crc, u16, bool, 5);
    define_field!(data_end_bit, set_data_end_bit, u16, bool, 6);
    define_field!(current_limit, set_current_limit, u16, bool, 7);
    define_field!(auto_cmd, set_auto_cmd, u16, bool, 8);
    define_field!(adma, set_adma, u16, bool, 9);
    define_field!(tuning, set_tuning, u16, bool, 10);
    define_field!(response, set_response, u16, bool, 11);
}

define_register!(
    /// Host Control 2 register (0x3E).
    HostControl2,
    u16,
    0x3E
);

impl HostControl2 {
    define_field!(uhs_mode, set_uhs_mode, u16, u8, 0, 3);
    define_field!(signaling_1_8, set_signaling_1_8, u16, bool, 3);
    define_field!(driver_strength, set_driver_strength, u16, u8, 4, 2);
    define_field!(execute_tuning, set_execute_tuning, u16, bool, 6);
    define_field!(sampling_clock_select, set_sampling_clock_select, u16, bool, 7);
    define_field!(async_interrupt_enable, set_async_interrupt_enable, u16, bool, 14);
    define_field!(preset_value_enable, set_preset_value_enable, u16, bool, 15);
}

define_register!(
    /// The Capabilities register (0x40), both halves.
    Capabilities,
    u64
);

impl Capabilities {
    define_field!(timeout_clock_frequency, set_timeout_clock_frequency, u64, u8, 0, 6);
    define_field!(timeout_clock_unit_mhz, set_timeout_clock_unit_mhz, u64, bool, 7);
    define_field!(base_clock_mhz, set_base_clock_mhz, u64, u8, 8, 8);
    define_field!(max_block_length, set_max_block_length, u64, u8, 16, 2);
    define_field!(bus_8bit, set_bus_8bit, u64, bool, 18);
    define_field!(adma2, set_adma2, u64, bool, 19);
    define_field!(high_speed, set_high_speed, u64, bool, 21);
    define_field!(sdma, set_sdma, u64, bool, 22);
    define_field!(suspend_resume, set_suspend_resume, u64, bool, 23);
    define_field!(voltage_3_3, set_voltage_3_3, u64, bool, 24);
    define_field!(voltage_3_0, set_voltage_3_0, u64, bool, 25);
    define_field!(voltage_1_8, set_voltage_1_8, u64, bool, 26);
    define_field!(system_bus_64_v4, set_system_bus_64_v4, u64, bool, 27);
    define_field!(system_bus_64_v3, set_system_bus_64_v3, u64, bool, 28);
    define_field!(async_interrupt, set_async_interrupt, u64, bool, 29);
    define_field!(slot_type, set_slot_type, u64, u8, 30, 2);
    define_field!(sdr50, set_sdr50, u64, bool, 32);
    define_field!(sdr104, set_sdr104, u64, bool, 33);
    define_field!(ddr50, set_ddr50, u64, bool, 34);
    define_field!(uhs2, set_uhs2, u64, bool, 35);
    define_field!(driver_type_a, set_driver_type_a, u64, bool, 36);
    define_field!(driver_type_c, set_driver_type_c, u64, bool, 37);
    define_field!(driver_type_d, set_driver_type_d, u64, bool, 38);
    define_field!(retuning_timer_count, set_retuning_timer_count, u64, u8, 40, 4);
    define_field!(tuning_for_sdr50, set_tuning_for_sdr50, u64, bool, 45);
    define_field!(retuning_modes, set_retuning_modes, u64, u8, 46, 2);
    define_field!(clock_multiplier, set_clock_multiplier, u64, u8, 48, 8);

    /// Read both halves of the Capabilities register.
    pub fn read<R: Registers + ?Sized>(regs: &R) -> Capabilities {
        let low = regs.read_u32(CAPABILITIES);
        let high = regs.read_u32(CAPABILITIES_HIGH);
        Capabilities(u64::from(low) | (u64::from(high) << 32))
    }
}

/// Read the Specification Version Number.
pub fn spec_version<R: Registers + ?Sized>(regs: &R) -> u8 {
    regs.read_u8(SPEC_VERSION)
}

// ****************************************************************************
// Unit Tests
// ****************************************************************************

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_word_layout() {
        let mut cmd = CommandRegister(0);
        cmd.set_index(17)
            .set_data_present(true)
            .set_response_type(CommandRegister::RESPONSE_48)
            .set_crc_check(true)
            .set_index_check(true);
        assert_eq!(cmd.0, 0x113A);
        assert_eq!(cmd.index(), 17);
        // Out-of-range values are masked, not spilled into neighbours
        cmd.set_index(0xFF);
        assert_eq!(cmd.index(), 0x3F);
        assert_eq!(cmd.0 & 0xFF, 0x3A);
    }

    #[test]
    fn capabilities_fields() {
        // Base clock 100 MHz, 1024 byte blocks, ADMA2, HS, 3.3V, 64-bit V3,
        // SDR50, DDR50, retune count 3.
        let caps = Capabilities(0x0000_0305_1169_6400);
        assert_eq!(caps.base_clock_mhz(), 100);
        assert_eq!(caps.max_block_length(), 1);
        assert!(caps.adma2());
        assert!(caps.high_speed());
        assert!(caps.voltage_3_3());
        assert!(!caps.voltage_3_0());
        assert!(caps.system_bus_64_v3());
        assert!(caps.sdr50());
        assert!(!caps.sdr104());
        assert!(caps.ddr50());
        assert_eq!(caps.retuning_timer_count(), 3);
    }

    #[test]
    fn clock_divisor_fields() {
        let mut clock = ClockControl(0);
        clock
            .set_frequency_select(0x34)
            .set_frequency_select_upper(0x2)
            .set_internal_clock_enable(true);
        assert_eq!(clock.0, 0x3481);
        assert_eq!(clock.divisor(), 0x234 * 2);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
