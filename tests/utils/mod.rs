//! Useful library code for tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use embedded_hal::delay::DelayNs;
use embedded_sdhc::adma::{Adma2Descriptor, BounceBuffer, DmaAllocator, PAGE_SIZE};
use embedded_sdhc::regulator::{GpioExpanderMessage, RESPONSE_SUCCESS};
use embedded_sdhc::{
    HostPort, Registers, Request, RegulatorChannel, RegulatorError, RequestStatus, Slot,
    SlotOptions, StandardHost,
};

/// Capabilities of a typical v3 host: 200 MHz base clock, 512 byte blocks,
/// SDMA and ADMA2 with 64-bit addressing, high speed, 3.3V and 1.8V supply,
/// SDR50, SDR104 and DDR50.
pub const CAPS_V3: u64 = 0x0000_0007_1568_C800;

/// 0x40 * 4 mA = 256 mA at 3.3V.
pub const MAX_CURRENT: u32 = 0x0000_0040;

/// One register access seen by [`FakeController`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    /// A barrier before the next access
    Barrier,
    /// A read of `width` bytes
    Read { offset: usize, width: usize },
    /// A write of `width` bytes
    Write {
        offset: usize,
        width: usize,
        value: u32,
    },
}

/// Simulated controller state.
#[derive(Debug)]
pub struct FakeState {
    /// The register file
    pub bytes: [u8; 256],
    /// Every access, in order
    pub log: Vec<Access>,
    /// Bytes the data port will produce
    pub read_fifo: VecDeque<u8>,
    /// Bytes written to the data port
    pub write_fifo: Vec<u8>,
    /// Software reset bits never clear
    pub stuck_reset: bool,
    /// The internal clock never becomes stable
    pub stuck_clock: bool,
    /// Power never latches
    pub stuck_power: bool,
    /// The signaling bit never latches
    pub stuck_signaling: bool,
    /// DAT[3:0] while the SD clock is stopped
    pub dat_clock_off: u8,
    /// DAT[3:0] while the SD clock is running
    pub dat_clock_on: u8,
}

/// A fake SD Host Controller.
///
/// Reset bits clear themselves, the internal clock becomes stable as soon as
/// it is enabled, interrupt status bits are write-one-to-clear and the data
/// port is a pair of FIFOs.
#[derive(Debug)]
pub struct FakeController {
    pub state: RefCell<FakeState>,
}

impl FakeController {
    /// A v3 controller with [`CAPS_V3`] and an inserted, writable card.
    pub fn new() -> FakeController {
        Self::with_caps(CAPS_V3, 2)
    }

    /// A controller with the given Capabilities register and spec version.
    pub fn with_caps(caps: u64, spec_version: u8) -> FakeController {
        let fake = FakeController {
            state: RefCell::new(FakeState {
                bytes: [0u8; 256],
                log: Vec::new(),
                read_fifo: VecDeque::new(),
                write_fifo: Vec::new(),
                stuck_reset: false,
                stuck_clock: false,
                stuck_power: false,
                stuck_signaling: false,
                dat_clock_off: 0,
                dat_clock_on: 0xF,
            }),
        };
        fake.poke(0x40, 4, caps as u32);
        fake.poke(0x44, 4, (caps >> 32) as u32);
        fake.poke(0x48, 4, MAX_CURRENT);
        fake.poke(0xFE, 1, u32::from(spec_version));
        // Card inserted, stable, write enabled
        fake.poke(0x24, 4, (1 << 16) | (1 << 17) | (1 << 19));
        fake
    }

    /// Set a register without logging.
    pub fn poke(&self, offset: usize, width: usize, value: u32) {
        let mut state = self.state.borrow_mut();
        state.bytes[offset..offset + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }

    /// Get a register without logging.
    pub fn peek(&self, offset: usize, width: usize) -> u32 {
        let state = self.state.borrow();
        let mut value = [0u8; 4];
        value[..width].copy_from_slice(&state.bytes[offset..offset + width]);
        u32::from_le_bytes(value)
    }

    /// Latch interrupt status, as the hardware would.
    pub fn raise(&self, normal: u16, errors: u16) {
        let mut normal = normal;
        if errors != 0 {
            normal |= 1 << 15;
        }
        self.poke(0x30, 2, self.peek(0x30, 2) | u32::from(normal));
        self.poke(0x32, 2, self.peek(0x32, 2) | u32::from(errors));
    }

    /// Forget every access so far.
    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    /// Every access so far.
    pub fn log(&self) -> Vec<Access> {
        self.state.borrow().log.clone()
    }

    /// Just the writes, as `(offset, value)`.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.log()
            .into_iter()
            .filter_map(|a| match a {
                Access::Write { offset, value, .. } => Some((offset, value)),
                _ => None,
            })
            .collect()
    }

    /// The writes to one register.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| v)
            .collect()
    }

    /// The reads of one register, as widths.
    pub fn reads_of(&self, offset: usize) -> Vec<usize> {
        self.log()
            .into_iter()
            .filter_map(|a| match a {
                Access::Read { offset: o, width } if o == offset => Some(width),
                _ => None,
            })
            .collect()
    }

    /// Queue bytes for the data port.
    pub fn feed(&self, data: &[u8]) {
        self.state.borrow_mut().read_fifo.extend(data.iter().copied());
    }

    /// Bytes written to the data port.
    pub fn drained(&self) -> Vec<u8> {
        self.state.borrow().write_fifo.clone()
    }

    fn read(&self, offset: usize, width: usize) -> u32 {
        self.state
            .borrow_mut()
            .log
            .push(Access::Read { offset, width });
        match offset {
            0x20 => {
                let mut state = self.state.borrow_mut();
                let mut value = [0u8; 4];
                for byte in value.iter_mut().take(width) {
                    *byte = state.read_fifo.pop_front().unwrap_or(0);
                }
                u32::from_le_bytes(value)
            }
            0x24 => {
                let clock_on = self.peek(0x2C, 2) & (1 << 2) != 0;
                let state = self.state.borrow();
                let dat = if clock_on {
                    state.dat_clock_on
                } else {
                    state.dat_clock_off
                };
                drop(state);
                let present = self.peek(0x24, 4) & !(0xF << 20);
                present | (u32::from(dat) << 20)
            }
            _ => self.peek(offset, width),
        }
    }

    fn write(&self, offset: usize, width: usize, value: u32) {
        self.state.borrow_mut().log.push(Access::Write {
            offset,
            width,
            value,
        });
        let (stuck_reset, stuck_clock, stuck_power, stuck_signaling) = {
            let state = self.state.borrow();
            (
                state.stuck_reset,
                state.stuck_clock,
                state.stuck_power,
                state.stuck_signaling,
            )
        };
        match (offset, width) {
            (0x20, _) => {
                let bytes = value.to_le_bytes();
                self.state
                    .borrow_mut()
                    .write_fifo
                    .extend_from_slice(&bytes[..width]);
            }
            (0x2F, 1) => {
                if stuck_reset {
                    self.poke(0x2F, 1, value);
                }
            }
            (0x2C, 2) => {
                let mut value = value & !(1 << 1);
                if value & 1 != 0 && !stuck_clock {
                    value |= 1 << 1;
                }
                self.poke(0x2C, 2, value);
            }
            (0x29, 1) => {
                let value = if stuck_power { value & !1 } else { value };
                self.poke(0x29, 1, value);
            }
            (0x3E, 2) => {
                let value = if stuck_signaling {
                    (value & !(1 << 3)) | (self.peek(0x3E, 2) & (1 << 3))
                } else {
                    value
                };
                self.poke(0x3E, 2, value);
            }
            (0x30, 2) | (0x32, 2) => {
                self.poke(offset, 2, self.peek(offset, 2) & !value);
                // Error Interrupt is the read-only summary of the error status
                let summary = if self.peek(0x32, 2) != 0 { 1 << 15 } else { 0 };
                self.poke(0x30, 2, (self.peek(0x30, 2) & 0x7FFF) | summary);
            }
            _ => self.poke(offset, width, value),
        }
    }
}

impl Default for FakeController {
    fn default() -> Self {
        FakeController::new()
    }
}

impl Registers for &FakeController {
    fn barrier(&self) {
        self.state.borrow_mut().log.push(Access::Barrier);
    }

    fn read_u8_nofence(&self, offset: usize) -> u8 {
        self.read(offset, 1) as u8
    }

    fn read_u16_nofence(&self, offset: usize) -> u16 {
        self.read(offset, 2) as u16
    }

    fn read_u32_nofence(&self, offset: usize) -> u32 {
        self.read(offset, 4)
    }

    fn write_u8_nofence(&self, offset: usize, value: u8) {
        self.write(offset, 1, u32::from(value))
    }

    fn write_u16_nofence(&self, offset: usize, value: u16) {
        self.write(offset, 2, u32::from(value))
    }

    fn write_u32_nofence(&self, offset: usize, value: u32) {
        self.write(offset, 4, value)
    }
}

/// A delay that records how long it was asked to wait, in nanoseconds.
#[derive(Debug, Default)]
pub struct FakeDelay {
    pub waits: RefCell<Vec<u32>>,
}

impl FakeDelay {
    /// The waits so far, in microseconds.
    pub fn waits_us(&self) -> Vec<u32> {
        self.waits.borrow().iter().map(|ns| ns / 1000).collect()
    }
}

impl DelayNs for &FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.waits.borrow_mut().push(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.waits.borrow_mut().push(us * 1000);
    }
}

/// Firmware answering GPIO expander property calls.
#[derive(Debug, Default)]
pub struct FakeRegulator {
    /// The regulator pin state
    pub state: u32,
    /// Every message received
    pub messages: Vec<GpioExpanderMessage>,
    /// Fail the next calls with this
    pub fail: Option<RegulatorError>,
    /// Answer with this response code instead of success
    pub reject: Option<u32>,
}

impl RegulatorChannel for FakeRegulator {
    fn property(&mut self, message: &mut [u8]) -> Result<(), RegulatorError> {
        if let Some(e) = self.fail {
            return Err(e);
        }
        let tag = u32::from_le_bytes(message[8..12].try_into().unwrap());
        let gpio = u32::from_le_bytes(message[20..24].try_into().unwrap());
        let state = u32::from_le_bytes(message[24..28].try_into().unwrap());
        self.messages.push(GpioExpanderMessage { tag, gpio, state });
        let code = self.reject.unwrap_or(RESPONSE_SUCCESS);
        message[4..8].copy_from_slice(&code.to_le_bytes());
        if code == RESPONSE_SUCCESS {
            if tag == embedded_sdhc::regulator::TAG_SET_GPIO_EXPANDER {
                self.state = state;
            } else {
                message[24..28].copy_from_slice(&self.state.to_le_bytes());
            }
        }
        Ok(())
    }
}

/// Records every completion.
#[derive(Debug, Default)]
pub struct RecordingHostPort {
    pub completions: Vec<(u8, RequestStatus)>,
}

impl RecordingHostPort {
    /// Just the statuses.
    pub fn statuses(&self) -> Vec<RequestStatus> {
        self.completions.iter().map(|(_, s)| *s).collect()
    }
}

impl HostPort for RecordingHostPort {
    fn complete_request(&mut self, request: &Request<'_>, status: RequestStatus) {
        self.completions.push((request.command.index, status));
    }
}

/// DMA memory backed by vectors, at made-up bus addresses.
#[derive(Debug)]
pub struct FakeDmaBuffer {
    pub data: Vec<u8>,
    pub descriptors: Vec<Adma2Descriptor>,
    pub base: u32,
}

/// Where [`FakeDmaBuffer`] descriptors live on the bus, relative to the data.
pub const DESCRIPTOR_OFFSET: u32 = 0x0100_0000;

impl BounceBuffer for FakeDmaBuffer {
    fn data(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn page_address(&self, page: usize) -> u32 {
        self.base + (page * PAGE_SIZE) as u32
    }

    fn descriptors(&mut self) -> &mut [Adma2Descriptor] {
        &mut self.descriptors
    }

    fn descriptor_address(&self) -> u32 {
        self.base + DESCRIPTOR_OFFSET
    }
}

/// Hands out [`FakeDmaBuffer`]s, up to a limit.
#[derive(Debug)]
pub struct FakeDma {
    /// The largest buffer we'll hand out
    pub limit: usize,
    /// Sizes of every allocation
    pub allocations: Vec<usize>,
    /// Hand out one descriptor too few
    pub short_descriptors: bool,
}

impl FakeDma {
    pub fn new(limit: usize) -> FakeDma {
        FakeDma {
            limit,
            allocations: Vec::new(),
            short_descriptors: false,
        }
    }
}

impl DmaAllocator for FakeDma {
    type Buffer = FakeDmaBuffer;

    fn allocate(&mut self, length: usize) -> Option<FakeDmaBuffer> {
        if length > self.limit {
            return None;
        }
        self.allocations.push(length);
        let pages = length / PAGE_SIZE - usize::from(self.short_descriptors);
        Some(FakeDmaBuffer {
            data: vec![0u8; length],
            descriptors: vec![Adma2Descriptor(0); pages],
            base: 0x0800_0000,
        })
    }
}

/// Options that keep the tests quick to read.
pub fn test_options() -> SlotOptions {
    SlotOptions {
        poll_retries: 3,
        ..SlotOptions::default()
    }
}

/// A standard host, initialized, with the log cleared.
pub fn standard_slot<'a>(
    hw: &'a FakeController,
    delay: &'a FakeDelay,
) -> Slot<&'a FakeController, &'a FakeDelay, StandardHost> {
    let _ = env_logger::try_init();
    let mut slot = Slot::new(hw, delay, StandardHost::default());
    slot.initialize(0xFE34_0000, 0x100, false).unwrap();
    hw.clear_log();
    slot
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
