use std::io::{Read, Write};

use bitflags::bitflags;
use utilities::{
    stepper_driver::{
        ChipFamily, ConnectionTest, DriverReport, DriverSettings, DriverStatus, DrvStatusReport,
        RegisterValue, StepperDriver, TmcError, blank_time_to_tbl,
        current::{CurrentScale, TMC21XX, hold_scale},
        field, microsteps_to_mres, mres_to_microsteps, tbl_to_blank_time, with_field,
    },
    tmc_uart::TmcUart,
};

pub const GCONF: u8 = 0x00;
pub const GSTAT: u8 = 0x01;
pub const IOIN: u8 = 0x06;
pub const IHOLD_IRUN: u8 = 0x10;
pub const TPOWERDOWN: u8 = 0x11;
pub const TSTEP: u8 = 0x12;
pub const TPWMTHRS: u8 = 0x13;
pub const CHOPCONF: u8 = 0x6C;
pub const DRV_STATUS: u8 = 0x6F;
pub const PWMCONF: u8 = 0x70;
pub const PWM_SCALE: u8 = 0x71;

pub const VERSION: u8 = 0x20;

const IOIN_ENN: u32 = 1 << 0;

const GCONF_EN_SPREADCYCLE: u32 = 1 << 2;
const GCONF_PDN_DISABLE: u32 = 1 << 6;
const GCONF_MSTEP_REG_SELECT: u32 = 1 << 7;
const GCONF_MULTISTEP_FILT: u32 = 1 << 8;

const CHOPCONF_VSENSE: u32 = 1 << 17;
const CHOPCONF_INTPOL: u32 = 1 << 28;

const DEFAULT_TOFF: u32 = 5;
const DEFAULT_BLANK_TIME: u8 = 24;
const DEFAULT_TPOWERDOWN: u32 = 128;

/// PWM_OFS 36, PWM_GRAD 14, PWM_FREQ 1, autoscale, autograd, PWM_REG 8,
/// PWM_LIM 12.
const STEALTH_PWMCONF: u32 =
    36 | (14 << 8) | (1 << 16) | (1 << 18) | (1 << 19) | (8 << 24) | (12 << 28);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DrvStatus: u32 {
        const OTPW = 1 << 0;
        const OT = 1 << 1;
        const S2GA = 1 << 2;
        const S2GB = 1 << 3;
        const S2VSA = 1 << 4;
        const S2VSB = 1 << 5;
        const OLA = 1 << 6;
        const OLB = 1 << 7;
        const T120 = 1 << 8;
        const T143 = 1 << 9;
        const T150 = 1 << 10;
        const T157 = 1 << 11;
        const STEALTH = 1 << 30;
        const STST = 1 << 31;
    }
}

pub fn decode(drv_status: u32) -> DriverStatus {
    let flags = DrvStatus::from_bits_truncate(drv_status);

    let otpw = flags.contains(DrvStatus::OTPW);
    let ot = flags.contains(DrvStatus::OT);
    let s2ga = flags.contains(DrvStatus::S2GA);
    let s2gb = flags.contains(DrvStatus::S2GB);

    DriverStatus {
        drv_status,
        otpw,
        ot,
        s2ga,
        s2gb,
        error: otpw || ot || s2ga || s2gb,
    }
}

/// Values of the registers the chip does not let us read back.
#[derive(Debug, Clone, Copy, Default)]
struct Shadow {
    ihold_irun: u32,
    tpowerdown: u32,
    tpwmthrs: u32,
    chopconf: u32,
}

/// TMC2208 on a single-wire UART link. The driver owns its stream; each
/// axis gets its own link.
pub struct Tmc2208<S> {
    stream: S,
    uart: TmcUart,
    rsense: f32,
    milliamps: u16,
    hold_multiplier: f32,
    shadow: Shadow,
}

impl<S: Read + Write> Tmc2208<S> {
    pub fn new(stream: S, slave: u8, rsense: f32) -> Self {
        Self {
            stream,
            uart: TmcUart::new(slave),
            rsense,
            milliamps: 0,
            hold_multiplier: 0.5,
            shadow: Shadow {
                chopconf: DEFAULT_TOFF | (1 << 15) | (4 << 24) | CHOPCONF_INTPOL,
                ..Default::default()
            },
        }
    }

    pub fn init(&mut self, settings: &DriverSettings) -> Result<(), TmcError> {
        self.rsense = settings.rsense;
        self.hold_multiplier = settings.hold_multiplier;

        let mut gconf = GCONF_PDN_DISABLE | GCONF_MSTEP_REG_SELECT | GCONF_MULTISTEP_FILT;
        if !settings.stealthchop {
            gconf |= GCONF_EN_SPREADCYCLE;
        }
        self.write_register(GCONF, gconf)?;

        let chopconf = self.shadow.chopconf;
        let chopconf = with_field(chopconf, 0, 4, DEFAULT_TOFF);
        let chopconf = with_field(chopconf, 15, 2, blank_time_to_tbl(DEFAULT_BLANK_TIME).into());
        let chopconf = with_field(
            chopconf,
            24,
            4,
            microsteps_to_mres(settings.microsteps).into(),
        );
        self.write_chopconf(chopconf | CHOPCONF_INTPOL)?;

        self.set_rms_current(settings.current_ma)?;

        self.shadow.tpowerdown = DEFAULT_TPOWERDOWN;
        self.write_register(TPOWERDOWN, DEFAULT_TPOWERDOWN)?;

        if settings.stealthchop {
            self.write_register(PWMCONF, STEALTH_PWMCONF)?;
            if let Some(tpwmthrs) = settings.hybrid_threshold {
                self.set_hybrid_threshold(tpwmthrs)?;
            }
        }

        // GSTAT flags clear on writing 1
        self.write_register(GSTAT, 0b111)
    }

    pub fn slave(&self) -> u8 {
        self.uart.slave()
    }

    pub fn read_register(&mut self, register: u8) -> Result<u32, TmcError> {
        Ok(self.uart.read_register(&mut self.stream, register)?)
    }

    pub fn write_register(&mut self, register: u8, value: u32) -> Result<(), TmcError> {
        Ok(self.uart.write_register(&mut self.stream, register, value)?)
    }

    fn write_chopconf(&mut self, chopconf: u32) -> Result<(), TmcError> {
        self.shadow.chopconf = chopconf;
        self.write_register(CHOPCONF, chopconf)
    }

    fn toff(&self) -> u32 {
        field(self.shadow.chopconf, 0, 4)
    }
}

impl<S: Read + Write> StepperDriver for Tmc2208<S> {
    fn family(&self) -> ChipFamily {
        ChipFamily::Tmc2208
    }

    fn read_drv_status(&mut self) -> Result<u32, TmcError> {
        self.read_register(DRV_STATUS)
    }

    fn decode_status(&self, drv_status: u32) -> DriverStatus {
        decode(drv_status)
    }

    fn pwm_scale(&mut self) -> Result<u32, TmcError> {
        Ok(field(self.read_register(PWM_SCALE)?, 0, 8))
    }

    fn status_response(&mut self, drv_status: u32) -> Result<u8, TmcError> {
        let gstat = self.read_register(GSTAT)?;
        Ok((((drv_status >> 28) & 0b1000) | (gstat & 0b11)) as u8)
    }

    fn milliamps(&self) -> u16 {
        self.milliamps
    }

    fn set_rms_current(&mut self, milliamps: u16) -> Result<(), TmcError> {
        let scale = TMC21XX.scale_for(milliamps, self.rsense);

        let chopconf = if scale.vsense {
            self.shadow.chopconf | CHOPCONF_VSENSE
        } else {
            self.shadow.chopconf & !CHOPCONF_VSENSE
        };
        self.write_chopconf(chopconf)?;

        let ihold = hold_scale(scale.cs, self.hold_multiplier);
        let ihold_irun = with_field(
            with_field(self.shadow.ihold_irun, 0, 5, ihold.into()),
            8,
            5,
            scale.cs.into(),
        );
        self.shadow.ihold_irun = ihold_irun;
        self.write_register(IHOLD_IRUN, ihold_irun)?;

        self.milliamps = milliamps;
        Ok(())
    }

    fn is_enabled(&mut self) -> Result<bool, TmcError> {
        let ioin = self.read_register(IOIN)?;
        Ok(ioin & IOIN_ENN == 0 && self.toff() > 0)
    }

    fn disable(&mut self) -> Result<(), TmcError> {
        self.write_chopconf(with_field(self.shadow.chopconf, 0, 4, 0))
    }

    fn microsteps(&self) -> u16 {
        mres_to_microsteps(field(self.shadow.chopconf, 24, 4) as u8)
    }

    fn test_connection(&mut self) -> Result<ConnectionTest, TmcError> {
        let ioin = self.read_register(IOIN)?;
        Ok(ConnectionTest::from_word(ioin, u32::MAX))
    }

    fn report(&mut self) -> Result<DriverReport, TmcError> {
        let enabled = self.is_enabled()?;
        let chopconf = self.read_register(CHOPCONF)?;
        let tstep = self.read_register(TSTEP)?;
        let pwm_scale = self.pwm_scale()?;
        let drv_status = self.read_drv_status()?;
        let flags = DrvStatus::from_bits_truncate(drv_status);

        let irun = field(self.shadow.ihold_irun, 8, 5) as u8;
        let vsense = chopconf & CHOPCONF_VSENSE != 0;
        let cs_actual = field(drv_status, 16, 5) as u8;

        Ok(DriverReport {
            enabled,
            set_current: self.milliamps,
            rms_current: TMC21XX.rms_current(CurrentScale { cs: irun, vsense }, self.rsense),
            irun,
            ihold: Some(field(self.shadow.ihold_irun, 0, 5) as u8),
            cs_actual: Some(cs_actual),
            pwm_scale: Some(pwm_scale),
            vsense,
            stealthchop: Some(flags.contains(DrvStatus::STEALTH)),
            microsteps: mres_to_microsteps(field(chopconf, 24, 4) as u8),
            tstep: Some(tstep),
            tpwmthrs: Some(self.shadow.tpwmthrs),
            toff: field(chopconf, 0, 4) as u8,
            blank_time: tbl_to_blank_time(field(chopconf, 15, 2) as u8),
            hysteresis_end: field(chopconf, 7, 4) as i8 - 3,
            hysteresis_start: field(chopconf, 4, 3) as u8 + 1,
            sgt: None,
            drv: DrvStatusReport {
                raw: drv_status,
                stst: flags.contains(DrvStatus::STST),
                olb: flags.contains(DrvStatus::OLB),
                ola: flags.contains(DrvStatus::OLA),
                s2gb: flags.contains(DrvStatus::S2GB),
                s2ga: flags.contains(DrvStatus::S2GA),
                otpw: flags.contains(DrvStatus::OTPW),
                ot: flags.contains(DrvStatus::OT),
                cs_actual: Some(cs_actual),
                t157: Some(flags.contains(DrvStatus::T157)),
                t150: Some(flags.contains(DrvStatus::T150)),
                t143: Some(flags.contains(DrvStatus::T143)),
                t120: Some(flags.contains(DrvStatus::T120)),
                s2vsa: Some(flags.contains(DrvStatus::S2VSA)),
                s2vsb: Some(flags.contains(DrvStatus::S2VSB)),
                ..Default::default()
            },
        })
    }

    fn registers(&mut self) -> Result<Vec<RegisterValue>, TmcError> {
        Ok(vec![
            RegisterValue::new("GCONF", self.read_register(GCONF)?),
            RegisterValue::new("IHOLD_IRUN", self.shadow.ihold_irun),
            RegisterValue::new("GSTAT", self.read_register(GSTAT)?),
            RegisterValue::new("IOIN", self.read_register(IOIN)?),
            RegisterValue::new("TPOWERDOWN", self.shadow.tpowerdown),
            RegisterValue::new("TSTEP", self.read_register(TSTEP)?),
            RegisterValue::new("TPWMTHRS", self.shadow.tpwmthrs),
            RegisterValue::new("CHOPCONF", self.read_register(CHOPCONF)?),
            RegisterValue::new("PWMCONF", self.read_register(PWMCONF)?),
            RegisterValue::new("PWM_SCALE", self.read_register(PWM_SCALE)?),
            RegisterValue::new("DRV_STATUS", self.read_drv_status()?),
        ])
    }

    fn hybrid_threshold(&self) -> Result<u32, TmcError> {
        Ok(self.shadow.tpwmthrs)
    }

    fn set_hybrid_threshold(&mut self, tpwmthrs: u32) -> Result<(), TmcError> {
        let tpwmthrs = tpwmthrs.min(0xF_FFFF);
        self.shadow.tpwmthrs = tpwmthrs;
        self.write_register(TPWMTHRS, tpwmthrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use utilities::tmc_uart::calculate_crc8;

    /// Register file behind a UART link, answering read requests the way the
    /// chip does.
    #[derive(Default)]
    struct FakeChip {
        registers: HashMap<u8, u32>,
        writes: Vec<(u8, u32)>,
        pending: Vec<u8>,
        reply: VecDeque<u8>,
    }

    impl FakeChip {
        fn with(registers: &[(u8, u32)]) -> Self {
            Self {
                registers: registers.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn process(&mut self) {
            loop {
                let needed = match self.pending.get(2) {
                    Some(register) if register & 0x80 != 0 => 8,
                    Some(_) => 4,
                    None => return,
                };
                if self.pending.len() < needed {
                    return;
                }

                let datagram: Vec<u8> = self.pending.drain(..needed).collect();
                let register = datagram[2] & 0x7F;
                if needed == 8 {
                    let value = u32::from_be_bytes([
                        datagram[3],
                        datagram[4],
                        datagram[5],
                        datagram[6],
                    ]);
                    self.writes.push((register, value));
                    self.registers.insert(register, value);
                } else {
                    let value = self.registers.get(&register).copied().unwrap_or_default();
                    let mut reply = vec![0x05, 0xFF, register];
                    reply.extend_from_slice(&value.to_be_bytes());
                    reply.push(calculate_crc8(&reply));
                    self.reply.extend(reply);
                }
            }
        }
    }

    impl Read for FakeChip {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.reply.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.reply.pop_front().unwrap_or_default();
            }
            Ok(n)
        }
    }

    impl Write for FakeChip {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.pending.extend_from_slice(buf);
            self.process();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn decode_uses_low_status_bits() {
        let status = decode(0b0001);
        assert!(status.otpw && status.error);

        let status = decode(0b0100);
        assert!(status.s2ga && status.error);
        assert!(!status.otpw);

        // Temperature thresholds alone are not faults
        let status = decode(DrvStatus::T120.bits() | DrvStatus::T143.bits());
        assert!(!status.error);
    }

    #[test]
    fn error_is_any_fault_flag() {
        for bit in 0..32 {
            let status = decode(1 << bit);
            assert_eq!(
                status.error,
                status.otpw || status.ot || status.s2ga || status.s2gb
            );
            assert_eq!(status.error, bit < 4);
        }
    }

    #[test]
    fn status_response_combines_standstill_and_gstat() {
        let mut chip = FakeChip::with(&[(GSTAT, 0b101), (DRV_STATUS, 1 << 31)]);
        let mut driver = Tmc2208::new(&mut chip, 0, 0.11);

        let drv_status = driver.read_drv_status().unwrap();
        assert_eq!(driver.status_response(drv_status).unwrap(), 0b1001);
    }

    #[test]
    fn pwm_scale_is_the_sum_byte() {
        let mut chip = FakeChip::with(&[(PWM_SCALE, 0x0012_0034)]);
        let mut driver = Tmc2208::new(&mut chip, 0, 0.11);

        assert_eq!(driver.pwm_scale().unwrap(), 0x34);
    }

    #[test]
    fn init_programs_chopper_current_and_clears_gstat() {
        let mut chip = FakeChip::default();
        {
            let mut driver = Tmc2208::new(&mut chip, 0, 0.11);
            driver.init(&DriverSettings::default()).unwrap();
            assert_eq!(driver.milliamps(), 800);
            assert_eq!(driver.microsteps(), 16);
        }

        let chopconf = chip.registers[&CHOPCONF];
        assert_eq!(field(chopconf, 0, 4), 5);
        assert_eq!(tbl_to_blank_time(field(chopconf, 15, 2) as u8), 24);
        assert_ne!(chopconf & CHOPCONF_VSENSE, 0);

        assert_eq!(chip.registers[&IHOLD_IRUN], (25 << 8) | 12);
        assert_eq!(chip.registers[&TPOWERDOWN], 128);
        assert_ne!(chip.registers[&GCONF] & GCONF_EN_SPREADCYCLE, 0);
        assert_eq!(chip.writes.last(), Some(&(GSTAT, 0b111)));
    }

    #[test]
    fn disabled_by_enn_pin_or_toff() {
        let mut chip = FakeChip::with(&[(IOIN, (u32::from(VERSION) << 24) | IOIN_ENN)]);
        let mut driver = Tmc2208::new(&mut chip, 0, 0.11);
        assert!(!driver.is_enabled().unwrap());

        driver.write_register(IOIN, u32::from(VERSION) << 24).unwrap();
        assert!(driver.is_enabled().unwrap());

        driver.disable().unwrap();
        assert!(!driver.is_enabled().unwrap());
    }

    #[test]
    fn connection_test_on_silent_bus() {
        let mut chip = FakeChip::with(&[(IOIN, 0)]);
        let mut driver = Tmc2208::new(&mut chip, 0, 0.11);
        assert_eq!(driver.test_connection().unwrap(), ConnectionTest::AllZeros);
    }

    #[test]
    fn stall_threshold_is_unsupported() {
        let mut chip = FakeChip::default();
        let mut driver = Tmc2208::new(&mut chip, 0, 0.11);
        assert!(matches!(
            driver.set_stall_threshold(5),
            Err(TmcError::Unsupported {
                chip: ChipFamily::Tmc2208,
                ..
            })
        ));
    }
}
