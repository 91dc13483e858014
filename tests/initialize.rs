//! Slot initialization and capability derivation

use std::cell::RefCell;

use embedded_sdhc::{
    Brcme88c, ChipRevision, Error, NoBounceBuffer, NoRegulator, RefCellRegulatorChannel, Slot,
    StandardHost,
};

mod utils;

use utils::{FakeController, FakeDelay, FakeDma, FakeRegulator};

#[test]
fn standard_host_capabilities() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let slot = utils::standard_slot(&hw, &delay);
    let caps = slot.capabilities();
    assert_eq!(caps.spec_version, 2);
    assert_eq!(caps.base_clock_khz, 200_000);
    assert_eq!(caps.maximum_block_size, 512);
    assert_eq!(caps.maximum_outstanding_requests, 1);
    assert!(caps.scatter_gather_dma);
    assert!(caps.address_64bit);
    assert_eq!(caps.dma_descriptor_size, 12);
    assert!(caps.high_speed);
    assert!(caps.sdr50 && caps.sdr104 && caps.ddr50);
    assert!(caps.signaling_1_8);
    assert!(caps.voltage_3_3 && caps.voltage_1_8 && !caps.voltage_3_0);
    // 256 mA at 3.3V
    assert!(caps.limit_200ma);
    assert!(!caps.limit_400ma);
    assert!(caps.auto_cmd23);
    assert_eq!(caps.pio_threshold, 64);
    assert_eq!(slot.bounce_capacity(), None);
    assert!(!slot.is_crash_dump());
}

#[test]
fn initialize_disables_events() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    hw.poke(0x38, 2, 0x00FF);
    let mut slot = Slot::new(&hw, &delay, StandardHost::default());
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    assert_eq!(hw.writes_to(0x34), [0]);
    assert_eq!(hw.writes_to(0x36), [0]);
    assert_eq!(hw.writes_to(0x38), [0]);
    assert_eq!(hw.writes_to(0x3A), [0]);
}

#[test]
fn initialize_is_idempotent() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let mut slot = Slot::new(&hw, &delay, StandardHost::default());
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    let first = *slot.capabilities();
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    assert_eq!(*slot.capabilities(), first);
}

#[test]
fn short_register_block() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let mut slot = Slot::new(&hw, &delay, StandardHost::default());
    let r = slot.initialize(0xFE34_0000, 0xFF, false);
    let Err(Error::NotSupported) = r else {
        panic!("Should have rejected a short register block {:?}", r);
    };
    assert!(hw.log().is_empty());
}

#[test]
fn errata_hides_dma() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let mut slot = Slot::new(&hw, &delay, StandardHost::BRCME88C_ERRATA);
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    let caps = slot.capabilities();
    assert!(!caps.scatter_gather_dma);
    assert!(!caps.ddr50);
    assert!(caps.sdr104);
    assert_eq!(caps.dma_descriptor_size, 8);
}

#[test]
fn brcme88c_needs_a_bounce_buffer() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let mut slot = Slot::new_with_options(
        &hw,
        &delay,
        Brcme88c::new(ChipRevision(0x2711_0020)),
        None::<NoRegulator>,
        NoBounceBuffer,
        utils::test_options(),
    );
    let r = slot.initialize(0xFE34_0000, 0x100, false);
    let Err(Error::InsufficientResources) = r else {
        panic!("Should have failed to get a bounce buffer {:?}", r);
    };
}

#[test]
fn brcme88c_bounce_sizes() {
    for (crash_dump, expected) in [(false, 0x10_0000), (true, 0x1_0000)] {
        let hw = FakeController::new();
        let delay = FakeDelay::default();
        let mut slot = Slot::new_with_options(
            &hw,
            &delay,
            Brcme88c::new(ChipRevision(0x2711_0010)),
            None::<NoRegulator>,
            FakeDma::new(0x40_0000),
            utils::test_options(),
        );
        slot.initialize(0xFE34_0000, 0x100, crash_dump).unwrap();
        assert_eq!(slot.bounce_capacity(), Some(expected));
        assert_eq!(slot.is_crash_dump(), crash_dump);
        // B0 stepping sees DRAM at 0xC000_0000
        assert_eq!(slot.dma_translation(), 0xC000_0000);
    }
}

#[test]
fn brcme88c_without_regulator() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let mut slot = Slot::new_with_options(
        &hw,
        &delay,
        Brcme88c::new(ChipRevision(0x2711_0020)),
        None::<NoRegulator>,
        FakeDma::new(0x40_0000),
        utils::test_options(),
    );
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    let caps = slot.capabilities();
    assert!(!caps.scatter_gather_dma);
    assert!(!caps.bus_width_8);
    assert!(!caps.voltage_1_8);
    assert!(!caps.sdr50);
    assert!(!caps.ddr50);
    assert!(!caps.signaling_1_8);
    assert!(!caps.sdr104);
    assert_eq!(caps.dma_descriptor_size, 8);
    assert_eq!(slot.dma_translation(), 0);
}

#[test]
fn brcme88c_resets_regulator() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let firmware = RefCell::new(FakeRegulator {
        state: 1,
        ..Default::default()
    });
    let mut slot = Slot::new_with_options(
        &hw,
        &delay,
        Brcme88c::new(ChipRevision(0x2711_0020)),
        Some(RefCellRegulatorChannel::new(&firmware)),
        FakeDma::new(0x40_0000),
        utils::test_options(),
    );
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();

    let firmware = firmware.borrow();
    assert_eq!(firmware.state, 0);
    let tags: Vec<u32> = firmware.messages.iter().map(|m| m.tag).collect();
    assert_eq!(tags, [0x0003_0041, 0x0003_8041]);
    assert!(firmware.messages.iter().all(|m| m.gpio == 132));
    assert!(!slot.regulator_voltage_1_8());

    let caps = slot.capabilities();
    assert!(caps.ddr50);
    assert!(caps.signaling_1_8);
    assert!(caps.sdr104);
    assert!(!caps.sdr50);
}

#[test]
fn regulator_failure_is_not_fatal() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let firmware = RefCell::new(FakeRegulator {
        reject: Some(0x8000_0001),
        ..Default::default()
    });
    let mut slot = Slot::new_with_options(
        &hw,
        &delay,
        Brcme88c::new(ChipRevision(0x2711_0020)),
        Some(RefCellRegulatorChannel::new(&firmware)),
        FakeDma::new(0x40_0000),
        utils::test_options(),
    );
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    assert!(!slot.regulator_voltage_1_8());
    assert_eq!(firmware.borrow().messages.len(), 2);
}

#[test]
fn cleanup_frees_bounce_buffer() {
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let mut slot = Slot::new_with_options(
        &hw,
        &delay,
        Brcme88c::new(ChipRevision(0x2711_0020)),
        None::<NoRegulator>,
        FakeDma::new(0x40_0000),
        utils::test_options(),
    );
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    assert!(slot.bounce_capacity().is_some());
    slot.cleanup();
    assert_eq!(slot.bounce_capacity(), None);
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
