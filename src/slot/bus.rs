//! Bus configuration: resets, clocks, power and timing.

use embedded_hal::delay::DelayNs;

use super::{BusOperation, BusSpeed, BusVoltage, ResetType, SignalingVoltage, Slot};
use crate::adma::DmaAllocator;
use crate::controller::Controller;
use crate::regs::{
    BlockGapControl, ClockControl, HostControl1, HostControl2, PowerControl, PresentState,
    Registers, SoftwareReset, TimeoutControl, MAX_DATA_TIMEOUT, NORMAL_INTERRUPT_STATUS,
    SPEC_VERSION_3,
};
use crate::regulator::RegulatorChannel;
use crate::{debug, error, warn, Error};

/// The largest divisor a v3 host can program.
const MAX_DIVISOR_V3: u32 = 2046;

/// Work out the clock divisor that gets closest to `target_khz` without going
/// over it.
///
/// A result of 1 means "undivided". Older hosts can only divide by a power of
/// two up to 256, v3 hosts by any even number up to 2046.
pub fn clock_divisor(base_khz: u32, target_khz: u32, spec_version: u8) -> Result<u32, Error> {
    if target_khz == 0 {
        return Err(Error::NotSupported);
    }
    if base_khz <= target_khz {
        return Ok(1);
    }
    if spec_version < SPEC_VERSION_3 {
        match (1..=8).find(|shift| (base_khz >> shift) <= target_khz) {
            Some(shift) => Ok(1 << shift),
            None => {
                error!("Can't divide {} kHz down to {} kHz", base_khz, target_khz);
                Err(Error::NotSupported)
            }
        }
    } else {
        let mut divisor = (base_khz / target_khz) & !1;
        // That rounded down, and we need to round up
        if base_khz > target_khz * divisor {
            divisor += 2;
        }
        if divisor > MAX_DIVISOR_V3 {
            error!("Can't divide {} kHz down to {} kHz", base_khz, target_khz);
            return Err(Error::NotSupported);
        }
        Ok(divisor)
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
    /// Carry out a bus operation.
    ///
    /// These may block, polling the controller until it has done what was
    /// asked.
    pub fn issue_bus_operation(&mut self, operation: BusOperation) -> Result<(), Error> {
        debug!("Bus operation {:?}", operation);
        match operation {
            BusOperation::ResetHw => {
                debug!("Nothing to do for a hardware reset");
                Ok(())
            }
            BusOperation::ResetHost(reset_type) => self.reset_host(reset_type),
            BusOperation::SetClock(khz) => self.set_clock(khz),
            BusOperation::SetVoltage(voltage) => self.set_voltage(voltage),
            BusOperation::SetBusWidth(width) => {
                self.set_bus_width(width);
                Ok(())
            }
            BusOperation::SetBusSpeed(speed) => self.set_bus_speed(speed),
            BusOperation::SetSignalingVoltage(voltage) => self.set_signaling_voltage(voltage),
            BusOperation::SetDriverType(driver_type) => {
                let mut hc2 = HostControl2::read(&self.regs);
                hc2.set_driver_strength(driver_type.register_value());
                hc2.write(&self.regs);
                Ok(())
            }
            BusOperation::SetPresetValue(enable) => {
                let mut hc2 = HostControl2::read(&self.regs);
                hc2.set_preset_value_enable(enable);
                hc2.write(&self.regs);
                Ok(())
            }
            BusOperation::SetBlockGapInterrupt(enable) => {
                let mut gap = BlockGapControl::read(&self.regs);
                gap.set_interrupt_at_gap(enable);
                gap.write(&self.regs);
                Ok(())
            }
            BusOperation::ExecuteTuning => {
                warn!("Tuning requested but not implemented");
                Ok(())
            }
            BusOperation::SetLed(on) => {
                let mut hc1 = HostControl1::read(&self.regs);
                hc1.set_led(on);
                hc1.write(&self.regs);
                Ok(())
            }
            BusOperation::SetPower(_) | BusOperation::SetDriveStrength(_) => {
                error!("Unsupported bus operation {:?}", operation);
                Err(Error::NotSupported)
            }
        }
    }

    fn reset_host(&mut self, reset_type: ResetType) -> Result<(), Error> {
        let mut reset = SoftwareReset(0);
        match reset_type {
            ResetType::All => reset.set_all(true),
            ResetType::Cmd => reset.set_cmd_line(true),
            ResetType::Dat => reset.set_dat_line(true),
        };
        reset.write(&self.regs);
        self.poll_until(|regs| SoftwareReset::read(regs).0 & reset.0 == 0)
            .inspect_err(|_| {
                error!("Reset {:?} didn't finish", reset_type);
            })?;

        let mut timeout = TimeoutControl(0);
        timeout.set_data_timeout_counter(MAX_DATA_TIMEOUT);
        timeout.write(&self.regs);

        if self.controller.clears_status_on_reset() {
            self.regs.write_u16(NORMAL_INTERRUPT_STATUS, 0xFFFF);
        }

        if self.regulator_1_8 {
            let mut hc2 = HostControl2::read(&self.regs);
            hc2.set_signaling_1_8(true);
            hc2.write(&self.regs);
        }

        let mut hc1 = HostControl1::read(&self.regs);
        hc1.set_dma_select(self.controller.dma_select(&self.capabilities) as u8);
        hc1.write(&self.regs);

        debug!(
            "Reset {:?}: state {:#x}, hc1 {:#x}, hc2 {:#x}",
            reset_type,
            PresentState::read(&self.regs).0,
            HostControl1::read(&self.regs).0,
            HostControl2::read(&self.regs).0
        );
        Ok(())
    }

    fn set_clock(&mut self, khz: u32) -> Result<(), Error> {
        let mut clock = ClockControl::read(&self.regs);
        if khz == 0 {
            clock.set_sd_clock_enable(false);
            clock.write(&self.regs);
            debug!("SD clock stopped");
            return Ok(());
        }

        let divisor = clock_divisor(
            self.capabilities.base_clock_khz,
            khz,
            self.capabilities.spec_version,
        )?;

        clock
            .set_internal_clock_enable(false)
            .set_sd_clock_enable(false);
        clock.write(&self.regs);

        let mut clock = ClockControl(0);
        clock
            .set_frequency_select((divisor >> 1) as u16)
            .set_frequency_select_upper((divisor >> 9) as u16)
            .set_internal_clock_enable(true);
        clock.write(&self.regs);

        self.poll_until(|regs| ClockControl::read(regs).internal_clock_stable())
            .inspect_err(|_| {
                error!("Clock didn't stabilise at {} kHz", khz);
            })?;

        let mut clock = ClockControl::read(&self.regs);
        clock.set_sd_clock_enable(true);
        clock.write(&self.regs);

        debug!("SD clock {} kHz, control {:#x}", khz, clock.0);
        Ok(())
    }

    fn set_voltage(&mut self, voltage: BusVoltage) -> Result<(), Error> {
        let select = match voltage {
            BusVoltage::Off => None,
            BusVoltage::V3_3 => Some(PowerControl::VOLTAGE_3_3),
            BusVoltage::V3_0 => Some(PowerControl::VOLTAGE_3_0),
            BusVoltage::V1_8 => Some(PowerControl::VOLTAGE_1_8),
        };

        let mut power = PowerControl::read(&self.regs);
        if power.power_on() {
            self.poll_until(|regs| {
                power.set_power_on(false);
                power.write(regs);
                power = PowerControl::read(regs);
                !power.power_on()
            })
            .inspect_err(|_| {
                error!("Card power didn't turn off");
            })?;
        }

        if let Some(select) = select {
            power.set_voltage_select(select);
            power.write(&self.regs);
            self.poll_until(|regs| {
                power.set_voltage_select(select).set_power_on(true);
                power.write(regs);
                power = PowerControl::read(regs);
                power.power_on() && power.voltage_select() == select
            })
            .inspect_err(|_| {
                error!("Card power didn't latch {:?}", voltage);
            })?;
        }

        debug!(
            "Voltage {:?}, power control {:#x}",
            voltage,
            PowerControl::read(&self.regs).0
        );
        Ok(())
    }

    fn set_bus_width(&mut self, width: u8) {
        let mut hc1 = HostControl1::read(&self.regs);
        match width {
            0 | 1 => hc1.set_width_4(false).set_width_8(false),
            4 => hc1.set_width_4(true).set_width_8(false),
            8 => hc1.set_width_4(false).set_width_8(true),
            _ => {
                debug_assert!(false, "bad bus width {}", width);
                warn!("Ignoring bus width {}", width);
                return;
            }
        };
        hc1.write(&self.regs);
    }

    fn set_bus_speed(&mut self, speed: BusSpeed) -> Result<(), Error> {
        let mut hc1 = HostControl1::read(&self.regs);
        let mut hc2 = HostControl2::read(&self.regs);
        match speed {
            BusSpeed::Normal => {
                hc1.set_high_speed(false);
            }
            BusSpeed::High => {
                hc1.set_high_speed(true);
            }
            BusSpeed::Sdr12 => {
                hc2.set_uhs_mode(0);
            }
            BusSpeed::Sdr25 => {
                hc2.set_uhs_mode(1);
            }
            BusSpeed::Sdr50 => {
                hc2.set_uhs_mode(2);
            }
            BusSpeed::Sdr104 => {
                hc2.set_uhs_mode(3);
            }
            BusSpeed::Ddr50 => {
                hc2.set_uhs_mode(4);
            }
            BusSpeed::Hs200 | BusSpeed::Hs400 => {
                error!("Bus speed {:?} not supported", speed);
                return Err(Error::NotSupported);
            }
        }

        self.sd_clock_enable(false);
        self.delay.delay_us(self.options.clock_settle_us);

        hc1.write(&self.regs);
        hc2.write(&self.regs);

        self.sd_clock_enable(true);
        self.delay.delay_us(self.options.clock_settle_us);

        debug!("Bus speed {:?}, hc1 {:#x}, hc2 {:#x}", speed, hc1.0, hc2.0);
        Ok(())
    }

    fn set_signaling_voltage(&mut self, voltage: SignalingVoltage) -> Result<(), Error> {
        let signaling_1_8 = voltage == SignalingVoltage::V1_8;

        self.sd_clock_enable(false);
        self.delay.delay_us(self.options.clock_settle_us);

        let dat = PresentState::read(&self.regs).dat_lines();
        if dat != 0 {
            error!("DAT lines {:#x} not low before switching signaling", dat);
            return Err(Error::Unsuccessful);
        }

        let previous = self.regulator_1_8;
        if self.controller.external_regulator() && previous != signaling_1_8 {
            self.set_regulator_voltage_1_8(signaling_1_8)
                .inspect_err(|e| {
                    error!("Regulator switch failed: {:?}", e);
                })?;
        }

        let mut hc2 = HostControl2::read(&self.regs);
        hc2.set_signaling_1_8(signaling_1_8);
        hc2.write(&self.regs);
        self.delay.delay_us(self.options.signaling_settle_us);

        if HostControl2::read(&self.regs).signaling_1_8() != signaling_1_8 {
            error!("Signaling {:?} didn't latch", voltage);
            self.restore_regulator(previous);
            return Err(Error::Unsuccessful);
        }

        self.sd_clock_enable(true);
        self.delay.delay_us(self.options.clock_settle_us);

        let dat = PresentState::read(&self.regs).dat_lines();
        if dat != 0xF {
            error!("DAT lines {:#x} not high after switching signaling", dat);
            self.restore_regulator(previous);
            return Err(Error::Unsuccessful);
        }

        debug!("Signaling {:?}", voltage);
        Ok(())
    }

    fn restore_regulator(&mut self, previous: bool) {
        if self.regulator_1_8 != previous {
            if let Err(e) = self.set_regulator_voltage_1_8(previous) {
                warn!("Couldn't restore regulator: {:?}", e);
            }
        }
    }

    fn sd_clock_enable(&mut self, enable: bool) {
        let mut clock = ClockControl::read(&self.regs);
        clock.set_sd_clock_enable(enable);
        clock.write(&self.regs);
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
