//! The driver-wide object and the miniport callbacks

use std::sync::atomic::{AtomicUsize, Ordering};

use embedded_sdhc::{
    Brcme88c, BusOperation, ChipRevision, Command, Driver, Error, ExecutionContext, HostPort,
    PassiveExecutor, PassiveMarshal, Request, RequestStatus, RequestType, ResetType, ResponseType,
    SignalingVoltage, Slot, SlotMiniport, StandardHost,
};

mod utils;

use utils::{FakeController, FakeDelay, FakeDma, FakeRegulator, RecordingHostPort};

/// Runs marshaled work on a scoped thread, counting how often it had to.
struct ThreadExecutor<'a> {
    context: ExecutionContext,
    marshaled: &'a AtomicUsize,
}

impl PassiveExecutor for ThreadExecutor<'_> {
    fn current_context(&self) -> ExecutionContext {
        self.context
    }

    fn run_passive(&self, work: &mut (dyn FnMut() + Send)) {
        self.marshaled.fetch_add(1, Ordering::SeqCst);
        std::thread::scope(|s| {
            s.spawn(|| work());
        });
    }
}

#[test]
fn open_and_close() {
    let _ = env_logger::try_init();
    let driver = Driver::open(Some(FakeRegulator::default()), false);
    assert!(driver.regulator_available());
    assert!(!driver.is_crash_dump());
    assert_eq!(driver.slot_count(), 1);
    assert_eq!(driver.power_control_callback(), Err(Error::NotImplemented));

    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let mut slot = Slot::new_with_options(
        &hw,
        &delay,
        Brcme88c::new(ChipRevision(0x2711_0020)),
        driver.regulator(),
        FakeDma::new(0x40_0000),
        utils::test_options(),
    );
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    assert!(slot.capabilities().signaling_1_8);
    drop(slot);

    let firmware = driver.close().unwrap();
    assert_eq!(firmware.messages.len(), 2);
}

#[test]
fn crash_dump_skips_the_regulator() {
    let driver = Driver::open(Some(FakeRegulator::default()), true);
    assert!(driver.is_crash_dump());
    assert!(!driver.regulator_available());
    assert!(driver.regulator().is_none());
    assert!(driver.close().is_none());
}

#[test]
fn power_control_is_not_implemented() {
    let _ = env_logger::try_init();
    for crash_dump in [false, true] {
        let driver = Driver::open(Some(FakeRegulator::default()), crash_dump);
        let r = driver.power_control_callback();
        let Err(Error::NotImplemented) = r else {
            panic!("Should have refused power control {:?}", r);
        };
    }
}

#[test]
fn open_without_a_channel() {
    let mut driver = Driver::<FakeRegulator>::open(None, false);
    assert!(!driver.regulator_available());
    driver.cleanup();
    assert!(driver.close().is_none());
}

#[test]
fn cleanup_releases_the_channel() {
    let mut driver = Driver::open(Some(FakeRegulator::default()), false);
    driver.cleanup();
    assert!(!driver.regulator_available());
    assert!(driver.regulator().is_none());
}

#[test]
fn slot_through_the_miniport_interface() {
    let _ = env_logger::try_init();
    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let mut slot = Slot::new(&hw, &delay, StandardHost::default());
    let miniport: &mut dyn SlotMiniport = &mut slot;

    miniport.initialize(0xFE34_0000, 0x100, false).unwrap();
    assert_eq!(miniport.capabilities().base_clock_khz, 200_000);
    miniport
        .issue_bus_operation(BusOperation::ResetHost(ResetType::All))
        .unwrap();
    miniport
        .issue_bus_operation(BusOperation::SetClock(400))
        .unwrap();
    assert!(miniport.card_detect_state());
    assert!(!miniport.write_protect_state());
    miniport.toggle_events(0x0003, true);

    let mut recorder = RecordingHostPort::default();
    let port: &mut dyn HostPort = &mut recorder;
    let mut request = Request::new(Command::new(8, 0x1AA, ResponseType::R1));
    miniport.issue_request(&mut request, port).unwrap();
    hw.poke(0x10, 4, 0x1AA);
    hw.raise(0x0001, 0);
    let snapshot = miniport.interrupt().unwrap();
    miniport.request_dpc(&request, u32::from(snapshot.events), 0, port);

    let mut response = [0u32; 4];
    assert_eq!(miniport.get_response(&request.command, &mut response), 1);
    assert_eq!(response[0], 0x1AA);
    miniport.clear_events(0x0001);
    assert_eq!(miniport.save_context(), Err(Error::NotImplemented));
    assert_eq!(miniport.restore_context(), Err(Error::NotImplemented));
    miniport.cleanup();

    assert_eq!(recorder.completions, [(8, RequestStatus::Success)]);
    assert_eq!(request.request_type, RequestType::CommandNoTransfer);
}

#[test]
fn regulator_calls_are_marshaled_to_passive_context() {
    let _ = env_logger::try_init();
    let marshaled = AtomicUsize::new(0);
    let channel = PassiveMarshal::new(
        FakeRegulator::default(),
        ThreadExecutor {
            context: ExecutionContext::Dispatch,
            marshaled: &marshaled,
        },
    );
    let driver = Driver::open(Some(channel), false);

    let hw = FakeController::new();
    let delay = FakeDelay::default();
    let mut slot = Slot::new_with_options(
        &hw,
        &delay,
        Brcme88c::new(ChipRevision(0x2711_0020)),
        driver.regulator(),
        FakeDma::new(0x40_0000),
        utils::test_options(),
    );
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    slot.issue_bus_operation(BusOperation::SetSignalingVoltage(SignalingVoltage::V1_8))
        .unwrap();
    assert!(slot.regulator_voltage_1_8());
    drop(slot);

    assert_eq!(marshaled.load(Ordering::SeqCst), 3);
    let (firmware, _) = driver.close().unwrap().free();
    assert_eq!(firmware.state, 1);
    assert_eq!(firmware.messages.len(), 3);
}

#[test]
fn passive_callers_use_the_channel_directly() {
    let marshaled = AtomicUsize::new(0);
    let mut channel = PassiveMarshal::new(
        FakeRegulator::default(),
        ThreadExecutor {
            context: ExecutionContext::Passive,
            marshaled: &marshaled,
        },
    );
    embedded_sdhc::regulator::set_gpio_state(&mut channel, 132, 1).unwrap();
    assert_eq!(
        embedded_sdhc::regulator::get_gpio_state(&mut channel, 132),
        Ok(1)
    );
    assert_eq!(marshaled.load(Ordering::SeqCst), 0);
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
