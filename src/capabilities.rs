//! What a slot can do, as reported to the host framework.

use crate::regs::{Capabilities, SPEC_VERSION_3};

/// The most requests a slot can have in flight.
pub const MAXIMUM_OUTSTANDING_REQUESTS: u32 = 1;

/// Slot capabilities, corrected for the controller's errata.
///
/// This is derived once by `initialize` and never changes after that.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SlotCapabilities {
    /// Specification Version Number register
    pub spec_version: u8,
    /// Requests that can be in flight at once
    pub maximum_outstanding_requests: u32,
    /// Largest block, in bytes
    pub maximum_block_size: u32,
    /// Most blocks in one transfer
    pub maximum_block_count: u32,
    /// Base clock, in kHz
    pub base_clock_khz: u32,
    /// Re-tuning timer, in seconds (0 means disabled)
    pub tuning_timer_count_seconds: u32,
    /// Transfers up to this many bytes always use PIO
    pub pio_threshold: usize,
    /// Ask the framework to use PIO requests for reads
    pub use_pio_for_read: bool,
    /// Ask the framework to use PIO requests for writes
    pub use_pio_for_write: bool,
    /// The controller can address more than 4 GiB
    pub address_64bit: bool,
    /// Address alignment mask for DMA buffers
    pub alignment: u32,
    /// Bytes per DMA descriptor
    pub dma_descriptor_size: usize,
    /// Scatter/gather DMA requests are accepted
    pub scatter_gather_dma: bool,
    /// 8-bit data bus
    pub bus_width_8: bool,
    /// High Speed mode
    pub high_speed: bool,
    /// 1.8V signaling
    pub signaling_1_8: bool,
    /// UHS SDR50
    pub sdr50: bool,
    /// UHS SDR104
    pub sdr104: bool,
    /// UHS DDR50
    pub ddr50: bool,
    /// eMMC HS200
    pub hs200: bool,
    /// eMMC HS400
    pub hs400: bool,
    /// Driver Type A
    pub driver_type_a: bool,
    /// Driver Type B
    pub driver_type_b: bool,
    /// Driver Type C
    pub driver_type_c: bool,
    /// Driver Type D
    pub driver_type_d: bool,
    /// SDR50 needs tuning
    pub tuning_for_sdr50: bool,
    /// Re-tuning is left to software
    pub software_tuning: bool,
    /// Auto CMD12
    pub auto_cmd12: bool,
    /// Auto CMD23
    pub auto_cmd23: bool,
    /// 1.8V supply
    pub voltage_1_8: bool,
    /// 3.0V supply
    pub voltage_3_0: bool,
    /// 3.3V supply
    pub voltage_3_3: bool,
    /// Can supply 200 mA
    pub limit_200ma: bool,
    /// Can supply 400 mA
    pub limit_400ma: bool,
    /// Can supply 600 mA
    pub limit_600ma: bool,
    /// Can supply 800 mA
    pub limit_800ma: bool,
    /// Controller context can be saved and restored
    pub save_context: bool,
}

impl SlotCapabilities {
    /// Derive capabilities from the raw registers, without any corrections.
    pub fn from_registers(
        raw: Capabilities,
        spec_version: u8,
        pio_threshold: usize,
    ) -> SlotCapabilities {
        let retune = u32::from(raw.retuning_timer_count());
        let sg_dma = raw.adma2();
        let address_64bit = raw.system_bus_64_v3();
        SlotCapabilities {
            spec_version,
            maximum_outstanding_requests: MAXIMUM_OUTSTANDING_REQUESTS,
            maximum_block_size: 512 << raw.max_block_length(),
            maximum_block_count: 0xFFFF,
            base_clock_khz: u32::from(raw.base_clock_mhz()) * 1000,
            tuning_timer_count_seconds: if retune == 0 { 0 } else { 1 << (retune - 1) },
            pio_threshold,
            use_pio_for_read: true,
            use_pio_for_write: true,
            address_64bit,
            alignment: if address_64bit { 7 } else { 3 },
            dma_descriptor_size: if sg_dma && address_64bit {
                crate::adma::DESCRIPTOR_SIZE_64
            } else {
                crate::adma::DESCRIPTOR_SIZE_32
            },
            scatter_gather_dma: sg_dma,
            bus_width_8: raw.bus_8bit(),
            high_speed: raw.high_speed(),
            signaling_1_8: raw.sdr50() || raw.ddr50() || raw.sdr104(),
            sdr50: raw.sdr50(),
            sdr104: raw.sdr104(),
            ddr50: raw.ddr50(),
            hs200: false,
            hs400: false,
            driver_type_a: raw.driver_type_a(),
            driver_type_b: true,
            driver_type_c: raw.driver_type_c(),
            driver_type_d: raw.driver_type_d(),
            tuning_for_sdr50: raw.tuning_for_sdr50(),
            software_tuning: raw.retuning_modes() == 0,
            auto_cmd12: true,
            auto_cmd23: spec_version >= SPEC_VERSION_3,
            voltage_1_8: raw.voltage_1_8(),
            voltage_3_0: raw.voltage_3_0(),
            voltage_3_3: raw.voltage_3_3(),
            limit_200ma: false,
            limit_400ma: false,
            limit_600ma: false,
            limit_800ma: false,
            save_context: false,
        }
    }

    /// Work out the current limits from the Maximum Current register.
    ///
    /// Current is assumed to be most restricted at the highest supported
    /// voltage, so that voltage's byte is used.
    pub fn apply_current_limits(&mut self, raw: Capabilities, max_current: u32) {
        let units = if raw.voltage_3_3() {
            max_current & 0xFF
        } else if raw.voltage_3_0() {
            (max_current >> 8) & 0xFF
        } else if raw.voltage_1_8() {
            (max_current >> 16) & 0xFF
        } else {
            0
        };
        let milliamps = units * 4;
        self.limit_200ma = milliamps >= 200;
        self.limit_400ma = milliamps >= 400;
        self.limit_600ma = milliamps >= 600;
        self.limit_800ma = milliamps >= 800;
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
