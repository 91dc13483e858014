//! The controller variants a [`Slot`](crate::Slot) can drive.
//!
//! Every variant speaks the same register interface. They differ in how
//! much of the Capabilities register can be trusted, and how data gets moved
//! by DMA.

use crate::capabilities::SlotCapabilities;
use crate::regs::{Capabilities, Registers};
use crate::warn;

/// The DMA Select field of Host Control 1.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmaSelect {
    /// SDMA
    Sdma = 0,
    /// ADMA2 with 32-bit addresses
    Adma32 = 2,
    /// ADMA2 with 64-bit addresses
    Adma64 = 3,
}

/// How one controller variant differs from the standard.
pub trait Controller {
    /// A short name for logs.
    fn name(&self) -> &'static str;

    /// Fix up the raw Capabilities register before anything is derived from
    /// it.
    fn correct_raw_capabilities(&self, raw: Capabilities) -> Capabilities {
        raw
    }

    /// Fix up the derived capabilities.
    fn correct_capabilities(
        &self,
        _caps: &mut SlotCapabilities,
        _raw: Capabilities,
        _regulator_available: bool,
    ) {
    }

    /// Offset added to every bus address the controller is given.
    fn dma_translation(&self) -> u32 {
        0
    }

    /// Whether large PIO requests are moved by DMA through a preallocated
    /// bounce buffer.
    fn uses_bounce_dma(&self) -> bool {
        false
    }

    /// Whether scatter/gather DMA requests can be carried out.
    fn supports_sg_dma(&self) -> bool;

    /// Whether 1.8V signaling needs the external regulator switched.
    fn external_regulator(&self) -> bool {
        false
    }

    /// Whether a reset should also clear the normal interrupt status.
    fn clears_status_on_reset(&self) -> bool {
        false
    }

    /// The DMA mode to program after a reset.
    fn dma_select(&self, caps: &SlotCapabilities) -> DmaSelect;
}

define_register!(
    /// The BCM2711 chip revision word, from the ID block.
    ChipRevision,
    u32
);

impl ChipRevision {
    /// Physical address of the ID block holding the revision word.
    pub const ADDRESS: u64 = 0xFC40_4000;
    /// Model number of the BCM2711.
    pub const MODEL_BCM2711: u16 = 0x2711;
    /// Stepping B0.
    pub const STEPPING_B0: u8 = 0x10;
    /// Stepping C0.
    pub const STEPPING_C0: u8 = 0x20;

    define_field!(stepping, set_stepping, u32, u8, 0, 8);
    define_field!(model, set_model, u32, u16, 16, 16);

    /// Read the revision word from a mapped ID block.
    pub fn read<R: Registers + ?Sized>(id_block: &R) -> ChipRevision {
        ChipRevision(id_block.read_u32(0))
    }

    /// The bus address offset the EMMC2 DMA engine needs on this chip.
    ///
    /// Steppings before C0 see DRAM at 0xC000_0000. An unknown model is
    /// treated like B0.
    pub fn dma_translation(&self) -> u32 {
        if self.model() != Self::MODEL_BCM2711 {
            warn!("Unknown chip model in revision {:#x}", self.0);
            0xC000_0000
        } else if self.stepping() < Self::STEPPING_C0 {
            0xC000_0000
        } else {
            0
        }
    }
}

/// The BCM2711 EMMC2 controller.
///
/// Its Capabilities register overstates what the board wires up: there are
/// only four data lines, and 1.8V is only for signaling, through a regulator
/// on the firmware's GPIO expander. Framework DMA doesn't work on this bus,
/// so every request arrives as PIO and large ones are moved through a
/// bounce buffer with ADMA2.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Brcme88c {
    chip_rev: ChipRevision,
}

impl Brcme88c {
    /// Drive an EMMC2 controller on a chip with this revision.
    pub fn new(chip_rev: ChipRevision) -> Brcme88c {
        Brcme88c { chip_rev }
    }

    /// The chip revision.
    pub fn chip_revision(&self) -> ChipRevision {
        self.chip_rev
    }
}

impl Controller for Brcme88c {
    fn name(&self) -> &'static str {
        "BRCME88C"
    }

    fn correct_capabilities(
        &self,
        caps: &mut SlotCapabilities,
        raw: Capabilities,
        regulator_available: bool,
    ) {
        caps.scatter_gather_dma = false;
        caps.bus_width_8 = false;
        caps.voltage_1_8 = false;
        caps.sdr50 = false;
        caps.hs200 = false;
        caps.hs400 = false;
        caps.ddr50 = raw.ddr50() && regulator_available;
        caps.signaling_1_8 = caps.ddr50;
        caps.sdr104 = caps.signaling_1_8 && raw.sdr104();
        caps.dma_descriptor_size = crate::adma::DESCRIPTOR_SIZE_32;
    }

    fn dma_translation(&self) -> u32 {
        self.chip_rev.dma_translation()
    }

    fn uses_bounce_dma(&self) -> bool {
        true
    }

    fn supports_sg_dma(&self) -> bool {
        false
    }

    fn external_regulator(&self) -> bool {
        true
    }

    fn dma_select(&self, _caps: &SlotCapabilities) -> DmaSelect {
        DmaSelect::Adma32
    }
}

/// A standard SD Host Controller, using scatter/gather ADMA2.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StandardHost {
    /// Ignore the DMA and DDR50 bits of the Capabilities register, as they
    /// are wrong on the BCM2711 EMMC2 controller.
    pub broken_dma_caps: bool,
}

impl StandardHost {
    /// Settings for running the EMMC2 controller as a standard host.
    pub const BRCME88C_ERRATA: StandardHost = StandardHost {
        broken_dma_caps: true,
    };
}

impl Controller for StandardHost {
    fn name(&self) -> &'static str {
        "SDHC"
    }

    fn correct_raw_capabilities(&self, raw: Capabilities) -> Capabilities {
        let mut raw = raw;
        if self.broken_dma_caps {
            raw.set_adma2(false).set_sdma(false).set_ddr50(false);
        }
        raw
    }

    fn supports_sg_dma(&self) -> bool {
        true
    }

    fn clears_status_on_reset(&self) -> bool {
        true
    }

    fn dma_select(&self, caps: &SlotCapabilities) -> DmaSelect {
        match (caps.scatter_gather_dma, caps.address_64bit) {
            (true, true) => DmaSelect::Adma64,
            (true, false) => DmaSelect::Adma32,
            (false, _) => DmaSelect::Sdma,
        }
    }
}

// ****************************************************************************
// Unit Tests
// ****************************************************************************

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chip_revision_translation() {
        assert_eq!(ChipRevision(0x2711_0010).dma_translation(), 0xC000_0000);
        assert_eq!(ChipRevision(0x2711_0020).dma_translation(), 0);
        assert_eq!(ChipRevision(0x2711_0021).dma_translation(), 0);
        // Unknown models behave like B0
        assert_eq!(ChipRevision(0x2835_0020).dma_translation(), 0xC000_0000);
        assert_eq!(ChipRevision(0x2711_0020).model(), 0x2711);
        assert_eq!(ChipRevision(0x2711_0020).stepping(), 0x20);
    }

    #[test]
    fn brcme88c_corrections() {
        // Everything in the raw register claims to be there
        let raw = Capabilities(0x0000_0077_1FEF_FFFF);
        let mut caps = SlotCapabilities::from_registers(raw, 2, 64);
        let ctrl = Brcme88c::new(ChipRevision(0x2711_0020));

        ctrl.correct_capabilities(&mut caps, raw, false);
        assert!(!caps.scatter_gather_dma);
        assert!(!caps.bus_width_8);
        assert!(!caps.voltage_1_8);
        assert!(!caps.ddr50);
        assert!(!caps.signaling_1_8);
        assert!(!caps.sdr104);
        assert!(!caps.sdr50);
        assert_eq!(caps.dma_descriptor_size, 8);
        // 64-bit V3 addressing is set in the raw register
        assert_eq!(caps.alignment, 7);

        ctrl.correct_capabilities(&mut caps, raw, true);
        assert!(caps.ddr50);
        assert!(caps.signaling_1_8);
        assert!(caps.sdr104);
        assert!(!caps.sdr50);
    }

    #[test]
    fn brcme88c_alignment_follows_the_register() {
        let ctrl = Brcme88c::new(ChipRevision(0x2711_0020));
        let mut raw = Capabilities(0);
        raw.set_adma2(true).set_system_bus_64_v3(true);
        let mut caps = SlotCapabilities::from_registers(raw, 2, 64);
        ctrl.correct_capabilities(&mut caps, raw, false);
        assert_eq!(caps.alignment, 7);
        // 32-bit descriptors regardless
        assert_eq!(caps.dma_descriptor_size, 8);

        raw.set_system_bus_64_v3(false);
        let mut caps = SlotCapabilities::from_registers(raw, 2, 64);
        ctrl.correct_capabilities(&mut caps, raw, false);
        assert_eq!(caps.alignment, 3);
    }

    #[test]
    fn standard_dma_select() {
        let host = StandardHost::default();
        let mut caps = SlotCapabilities {
            scatter_gather_dma: true,
            address_64bit: true,
            ..Default::default()
        };
        assert_eq!(host.dma_select(&caps), DmaSelect::Adma64);
        caps.address_64bit = false;
        assert_eq!(host.dma_select(&caps), DmaSelect::Adma32);
        caps.scatter_gather_dma = false;
        assert_eq!(host.dma_select(&caps), DmaSelect::Sdma);
    }

    #[test]
    fn errata_clears_raw_bits() {
        let mut raw = Capabilities(0);
        raw.set_adma2(true)
            .set_sdma(true)
            .set_ddr50(true)
            .set_sdr104(true);
        let fixed = StandardHost::BRCME88C_ERRATA.correct_raw_capabilities(raw);
        assert!(!fixed.adma2());
        assert!(!fixed.sdma());
        assert!(!fixed.ddr50());
        assert!(fixed.sdr104());
        assert_eq!(StandardHost::default().correct_raw_capabilities(raw), raw);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
