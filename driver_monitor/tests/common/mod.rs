#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use driver_monitor::{
    axis::AxisId,
    halt::Halt,
    monitor::{DriverMonitor, MonitorSettings, MonitoredAxis, PollScheduler},
};
use utilities::stepper_driver::{
    ChipFamily, ConnectionTest, DriverReport, DriverStatus, DrvStatusReport, RegisterValue,
    StepperDriver, TmcError,
};

pub const OTPW: u32 = 1 << 26;
pub const OT: u32 = 1 << 25;

/// What a fake chip has seen and what it will answer next.
#[derive(Debug, Default)]
pub struct FakeChip {
    pub script: VecDeque<u32>,
    pub last_status: u32,
    pub reads: usize,
    pub milliamps: u16,
    pub current_writes: Vec<u16>,
    pub enabled: bool,
    pub disabled: bool,
    pub hybrid_threshold: Option<u32>,
    pub fail_pwm_scale: bool,
}

/// TMC2130-flavoured fake: decodes with the real TMC2130 bit layout and
/// answers the status word from a script, repeating the last one.
pub struct FakeDriver {
    pub chip: Rc<RefCell<FakeChip>>,
    decode: fn(u32) -> DriverStatus,
}

impl FakeDriver {
    pub fn new(script: impl IntoIterator<Item = u32>) -> (Self, Rc<RefCell<FakeChip>>) {
        let chip = Rc::new(RefCell::new(FakeChip {
            script: script.into_iter().collect(),
            milliamps: 800,
            enabled: true,
            ..Default::default()
        }));
        (
            Self {
                chip: chip.clone(),
                decode: tmc2130::decode,
            },
            chip,
        )
    }
}

impl StepperDriver for FakeDriver {
    fn family(&self) -> ChipFamily {
        ChipFamily::Tmc2130
    }

    fn read_drv_status(&mut self) -> Result<u32, TmcError> {
        let mut chip = self.chip.borrow_mut();
        chip.reads += 1;
        if let Some(next) = chip.script.pop_front() {
            chip.last_status = next;
        }
        Ok(chip.last_status)
    }

    fn decode_status(&self, drv_status: u32) -> DriverStatus {
        (self.decode)(drv_status)
    }

    fn pwm_scale(&mut self) -> Result<u32, TmcError> {
        if self.chip.borrow().fail_pwm_scale {
            return Err(TmcError::Unsupported {
                chip: ChipFamily::Tmc2130,
                feature: "PWM_SCALE",
            });
        }
        Ok(17)
    }

    fn status_response(&mut self, _drv_status: u32) -> Result<u8, TmcError> {
        Ok(0b1001)
    }

    fn milliamps(&self) -> u16 {
        self.chip.borrow().milliamps
    }

    fn set_rms_current(&mut self, milliamps: u16) -> Result<(), TmcError> {
        let mut chip = self.chip.borrow_mut();
        chip.milliamps = milliamps;
        chip.current_writes.push(milliamps);
        Ok(())
    }

    fn is_enabled(&mut self) -> Result<bool, TmcError> {
        Ok(self.chip.borrow().enabled)
    }

    fn disable(&mut self) -> Result<(), TmcError> {
        let mut chip = self.chip.borrow_mut();
        chip.disabled = true;
        chip.enabled = false;
        Ok(())
    }

    fn microsteps(&self) -> u16 {
        16
    }

    fn test_connection(&mut self) -> Result<ConnectionTest, TmcError> {
        let word = self.read_drv_status()?;
        Ok(ConnectionTest::from_word(word, u32::MAX))
    }

    fn report(&mut self) -> Result<DriverReport, TmcError> {
        let raw = self.read_drv_status()?;
        let status = tmc2130::decode(raw);
        Ok(DriverReport {
            enabled: self.chip.borrow().enabled,
            set_current: self.milliamps(),
            microsteps: 16,
            drv: DrvStatusReport {
                raw,
                otpw: status.otpw,
                ot: status.ot,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn registers(&mut self) -> Result<Vec<RegisterValue>, TmcError> {
        let raw = self.read_drv_status()?;
        Ok(vec![
            RegisterValue::new("GCONF", 0x4),
            RegisterValue::new("DRV_STATUS", raw),
        ])
    }

    fn hybrid_threshold(&self) -> Result<u32, TmcError> {
        self.chip
            .borrow()
            .hybrid_threshold
            .ok_or(TmcError::Unsupported {
                chip: ChipFamily::Tmc2130,
                feature: "hybrid threshold",
            })
    }

    fn set_hybrid_threshold(&mut self, tpwmthrs: u32) -> Result<(), TmcError> {
        self.chip.borrow_mut().hybrid_threshold = Some(tpwmthrs);
        Ok(())
    }
}

/// Halt that unwinds instead of aborting so tests can inspect the aftermath.
pub struct PanicHalt;

impl Halt for PanicHalt {
    fn kill(&mut self, reason: &str) -> ! {
        panic!("halted: {reason}")
    }
}

/// TMC2130 decoding with the pre-warning left out of the error flag, so the
/// `W` and debounce-digit report codes can be observed.
pub fn decode_without_prewarn_error(drv_status: u32) -> DriverStatus {
    let status = tmc2130::decode(drv_status);
    DriverStatus {
        error: status.ot || status.s2ga || status.s2gb,
        ..status
    }
}

pub fn axis(
    id: AxisId,
    script: impl IntoIterator<Item = u32>,
) -> (MonitoredAxis, Rc<RefCell<FakeChip>>) {
    axis_with_decode(id, script, tmc2130::decode)
}

pub fn axis_with_decode(
    id: AxisId,
    script: impl IntoIterator<Item = u32>,
    decode: fn(u32) -> DriverStatus,
) -> (MonitoredAxis, Rc<RefCell<FakeChip>>) {
    let (mut driver, chip) = FakeDriver::new(script);
    driver.decode = decode;
    (MonitoredAxis::new(id, Box::new(driver), 80.0), chip)
}

pub fn monitor(axes: Vec<MonitoredAxis>, settings: MonitorSettings) -> DriverMonitor<PanicHalt> {
    DriverMonitor::new(axes, settings, PollScheduler::new(500, 0), PanicHalt)
}

/// Step-down on, halting off: the TMC2130 error flag includes the
/// pre-warning, so warning scenarios must not halt.
pub fn warning_settings() -> MonitorSettings {
    MonitorSettings {
        stop_on_error: false,
        ..Default::default()
    }
}
