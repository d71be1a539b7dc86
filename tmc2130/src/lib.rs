use bitflags::bitflags;
use embedded_hal::spi::SpiDevice;
use utilities::stepper_driver::{
    ChipFamily, ConnectionTest, DriverReport, DriverSettings, DriverStatus, DrvStatusReport,
    RegisterValue, StepperDriver, TmcError, blank_time_to_tbl,
    current::{CurrentScale, TMC21XX, hold_scale},
    field, microsteps_to_mres, mres_to_microsteps, tbl_to_blank_time, with_field,
};

const WRITE_BIT: u8 = 0x80;

pub const GCONF: u8 = 0x00;
pub const GSTAT: u8 = 0x01;
pub const IOIN: u8 = 0x04;
pub const IHOLD_IRUN: u8 = 0x10;
pub const TPOWERDOWN: u8 = 0x11;
pub const TSTEP: u8 = 0x12;
pub const TPWMTHRS: u8 = 0x13;
pub const TCOOLTHRS: u8 = 0x14;
pub const THIGH: u8 = 0x15;
pub const CHOPCONF: u8 = 0x6C;
pub const COOLCONF: u8 = 0x6D;
pub const DRV_STATUS: u8 = 0x6F;
pub const PWMCONF: u8 = 0x70;
pub const PWM_SCALE: u8 = 0x71;

/// Silicon version reported in IOIN[31:24].
pub const VERSION: u8 = 0x11;

const IOIN_DRV_ENN: u32 = 1 << 4;

const GCONF_EN_PWM_MODE: u32 = 1 << 2;
const GCONF_DIAG1_STALL: u32 = 1 << 8;
const GCONF_DIAG1_PUSHPULL: u32 = 1 << 13;

const CHOPCONF_VSENSE: u32 = 1 << 17;
const CHOPCONF_INTPOL: u32 = 1 << 28;

const DEFAULT_TOFF: u32 = 5;
const DEFAULT_BLANK_TIME: u8 = 24;
const DEFAULT_TPOWERDOWN: u32 = 128;

/// CHOPCONF after reset of this driver: TOFF 5, HSTRT 4, HEND 1, TBL 24
/// clocks, 16 microsteps with interpolation.
const DEFAULT_CHOPCONF: u32 = DEFAULT_TOFF
    | (3 << 4)
    | (4 << 7)
    | (1 << 15)
    | (4 << 24)
    | CHOPCONF_INTPOL;

bitflags! {
    /// Status byte clocked out with every SPI datagram.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SpiStatus: u8 {
        const RESET_FLAG = 0b0001;
        const DRIVER_ERROR = 0b0010;
        const SG2 = 0b0100;
        const STANDSTILL = 0b1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DrvStatus: u32 {
        const FSACTIVE = 1 << 15;
        const STALLGUARD = 1 << 24;
        const OT = 1 << 25;
        const OTPW = 1 << 26;
        const S2GA = 1 << 27;
        const S2GB = 1 << 28;
        const OLA = 1 << 29;
        const OLB = 1 << 30;
        const STST = 1 << 31;
    }
}

/// Decodes a TMC2130 DRV_STATUS word. Any of the four fault flags counts as
/// an error on this chip, including the pre-warning.
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

fn sgt_from_coolconf(coolconf: u32) -> i8 {
    // 7-bit two's complement
    (((field(coolconf, 16, 7) as u8) << 1) as i8) >> 1
}

#[derive(Debug, Clone, Copy)]
struct Shadow {
    gconf: u32,
    ihold_irun: u32,
    tpowerdown: u32,
    tpwmthrs: u32,
    tcoolthrs: u32,
    thigh: u32,
    chopconf: u32,
    coolconf: u32,
    pwmconf: u32,
}

impl Default for Shadow {
    fn default() -> Self {
        Self {
            gconf: 0,
            ihold_irun: 0,
            tpowerdown: 0,
            tpwmthrs: 0,
            tcoolthrs: 0,
            thigh: 0,
            chopconf: DEFAULT_CHOPCONF,
            coolconf: 0,
            // Power-on default of PWMCONF
            pwmconf: 0x0005_0480,
        }
    }
}

/// TMC2130 on an SPI bus. Write-only registers are mirrored in a shadow copy
/// so read-modify-write of single fields never touches the bus twice.
pub struct Tmc2130<SPI> {
    spi: SPI,
    rsense: f32,
    milliamps: u16,
    hold_multiplier: f32,
    status: SpiStatus,
    shadow: Shadow,
}

impl<SPI: SpiDevice> Tmc2130<SPI> {
    pub fn new(spi: SPI, rsense: f32) -> Self {
        Self {
            spi,
            rsense,
            milliamps: 0,
            hold_multiplier: 0.5,
            status: SpiStatus::empty(),
            shadow: Shadow::default(),
        }
    }

    pub fn init(&mut self, settings: &DriverSettings) -> Result<(), TmcError> {
        self.rsense = settings.rsense;
        self.hold_multiplier = settings.hold_multiplier;

        let mut chopconf = with_field(DEFAULT_CHOPCONF, 0, 4, DEFAULT_TOFF);
        chopconf = with_field(chopconf, 15, 2, blank_time_to_tbl(DEFAULT_BLANK_TIME).into());
        chopconf = with_field(
            chopconf,
            24,
            4,
            microsteps_to_mres(settings.microsteps).into(),
        );
        self.write_chopconf(chopconf)?;

        self.set_rms_current(settings.current_ma)?;

        self.shadow.tpowerdown = DEFAULT_TPOWERDOWN;
        self.write_register(TPOWERDOWN, DEFAULT_TPOWERDOWN)?;

        let mut gconf = GCONF_DIAG1_STALL | GCONF_DIAG1_PUSHPULL;
        if settings.stealthchop {
            // PWM_AMPL 255, PWM_GRAD 5, PWM_FREQ 1, autoscale
            let pwmconf = 0xFF | (5 << 8) | (1 << 16) | (1 << 18);
            self.shadow.pwmconf = pwmconf;
            self.write_register(PWMCONF, pwmconf)?;
            gconf |= GCONF_EN_PWM_MODE;

            if let Some(tpwmthrs) = settings.hybrid_threshold {
                self.set_hybrid_threshold(tpwmthrs)?;
            }
        }
        self.shadow.gconf = gconf;
        self.write_register(GCONF, gconf)?;

        // Reading GSTAT clears the reset flag left from power-up
        self.read_register(GSTAT)?;

        Ok(())
    }

    /// Last SPI status byte seen on the bus.
    pub fn spi_status(&self) -> SpiStatus {
        self.status
    }

    fn transfer(&mut self, address: u8, value: u32) -> Result<u32, TmcError> {
        let data = value.to_be_bytes();
        let mut datagram = [address, data[0], data[1], data[2], data[3]];
        self.spi
            .transfer_in_place(&mut datagram)
            .map_err(TmcError::spi)?;

        self.status = SpiStatus::from_bits_truncate(datagram[0]);
        Ok(u32::from_be_bytes([
            datagram[1],
            datagram[2],
            datagram[3],
            datagram[4],
        ]))
    }

    /// The chip answers a read request on the following datagram.
    pub fn read_register(&mut self, register: u8) -> Result<u32, TmcError> {
        self.transfer(register, 0)?;
        self.transfer(register, 0)
    }

    pub fn write_register(&mut self, register: u8, value: u32) -> Result<(), TmcError> {
        self.transfer(register | WRITE_BIT, value).map(|_| ())
    }

    fn write_chopconf(&mut self, chopconf: u32) -> Result<(), TmcError> {
        self.shadow.chopconf = chopconf;
        self.write_register(CHOPCONF, chopconf)
    }

    fn toff(&self) -> u32 {
        field(self.shadow.chopconf, 0, 4)
    }
}

impl<SPI: SpiDevice> StepperDriver for Tmc2130<SPI> {
    fn family(&self) -> ChipFamily {
        ChipFamily::Tmc2130
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

    fn status_response(&mut self, _drv_status: u32) -> Result<u8, TmcError> {
        Ok(self.status.bits() & 0x0F)
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
        Ok(ioin & IOIN_DRV_ENN == 0 && self.toff() > 0)
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
        let gconf = self.read_register(GCONF)?;
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
            stealthchop: Some(gconf & GCONF_EN_PWM_MODE != 0),
            microsteps: mres_to_microsteps(field(chopconf, 24, 4) as u8),
            tstep: Some(tstep),
            tpwmthrs: Some(self.shadow.tpwmthrs),
            toff: field(chopconf, 0, 4) as u8,
            blank_time: tbl_to_blank_time(field(chopconf, 15, 2) as u8),
            hysteresis_end: field(chopconf, 7, 4) as i8 - 3,
            hysteresis_start: field(chopconf, 4, 3) as u8 + 1,
            sgt: Some(sgt_from_coolconf(self.shadow.coolconf)),
            drv: DrvStatusReport {
                raw: drv_status,
                stst: flags.contains(DrvStatus::STST),
                olb: flags.contains(DrvStatus::OLB),
                ola: flags.contains(DrvStatus::OLA),
                s2gb: flags.contains(DrvStatus::S2GB),
                s2ga: flags.contains(DrvStatus::S2GA),
                otpw: flags.contains(DrvStatus::OTPW),
                ot: flags.contains(DrvStatus::OT),
                stallguard: Some(flags.contains(DrvStatus::STALLGUARD)),
                sg_result: Some(field(drv_status, 0, 10) as u16),
                fsactive: Some(flags.contains(DrvStatus::FSACTIVE)),
                cs_actual: Some(cs_actual),
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
            RegisterValue::new("TCOOLTHRS", self.shadow.tcoolthrs),
            RegisterValue::new("THIGH", self.shadow.thigh),
            RegisterValue::new("CHOPCONF", self.read_register(CHOPCONF)?),
            RegisterValue::new("COOLCONF", self.shadow.coolconf),
            RegisterValue::new("PWMCONF", self.shadow.pwmconf),
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

    fn stall_threshold(&self) -> Result<i8, TmcError> {
        Ok(sgt_from_coolconf(self.shadow.coolconf))
    }

    fn set_stall_threshold(&mut self, sgt: i8) -> Result<(), TmcError> {
        let sgt = sgt.clamp(-64, 63);
        let coolconf = with_field(self.shadow.coolconf, 16, 7, u32::from(sgt as u8 & 0x7F));
        self.shadow.coolconf = coolconf;
        self.write_register(COOLCONF, coolconf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction};

    fn datagram(tx: [u8; 5], rx: [u8; 5]) -> Vec<Transaction<u8>> {
        vec![
            Transaction::transaction_start(),
            Transaction::transfer_in_place(tx.to_vec(), rx.to_vec()),
            Transaction::transaction_end(),
        ]
    }

    fn read(register: u8, status: u8, value: u32) -> Vec<Transaction<u8>> {
        let v = value.to_be_bytes();
        let mut transactions = datagram([register, 0, 0, 0, 0], [status, 0, 0, 0, 0]);
        transactions.extend(datagram(
            [register, 0, 0, 0, 0],
            [status, v[0], v[1], v[2], v[3]],
        ));
        transactions
    }

    #[test]
    fn decode_maps_fault_bits() {
        let status = decode(DrvStatus::OTPW.bits());
        assert!(status.otpw && status.error);
        assert!(!status.ot && !status.s2ga && !status.s2gb);

        let status = decode(DrvStatus::S2GB.bits() | DrvStatus::STST.bits());
        assert!(status.s2gb && status.error);
        assert!(!status.otpw);

        assert_eq!(decode(0), DriverStatus::default());
    }

    #[test]
    fn error_is_any_fault_flag() {
        for bit in 0..32 {
            for extra in [0u32, 1 << 31, 0x0001_03FF] {
                let status = decode((1 << bit) | extra);
                assert_eq!(
                    status.error,
                    status.otpw || status.ot || status.s2ga || status.s2gb,
                    "word {:#010x}",
                    (1u32 << bit) | extra
                );
            }
        }
    }

    #[test]
    fn stall_threshold_sign_extends() {
        assert_eq!(sgt_from_coolconf(0x3F << 16), 63);
        assert_eq!(sgt_from_coolconf(0x40 << 16), -64);
        assert_eq!(sgt_from_coolconf(0x7F << 16), -1);
    }

    #[test]
    fn drv_status_read_keeps_spi_status() {
        let expectations = read(DRV_STATUS, 0x09, 0x0400_0000);
        let mut spi = SpiMock::new(&expectations);

        {
            let mut driver = Tmc2130::new(&mut spi, 0.11);
            let status = driver.driver_status().unwrap();
            assert!(status.otpw);
            assert_eq!(driver.status_response(status.drv_status).unwrap(), 0b1001);
            assert!(driver.spi_status().contains(SpiStatus::STANDSTILL));
        }

        spi.done();
    }

    #[test]
    fn set_rms_current_writes_chopconf_then_ihold_irun() {
        // 800 mA on 0.11 ohm needs the high sensitivity range, CS 25
        let mut expectations = datagram([0xEC, 0x14, 0x02, 0x82, 0x35], [0; 5]);
        expectations.extend(datagram([0x90, 0x00, 0x00, 0x19, 0x0C], [0; 5]));
        let mut spi = SpiMock::new(&expectations);

        {
            let mut driver = Tmc2130::new(&mut spi, 0.11);
            driver.set_rms_current(800).unwrap();
            assert_eq!(driver.milliamps(), 800);
        }

        spi.done();
    }

    #[test]
    fn enable_state_needs_drv_enn_low_and_toff() {
        let mut expectations = read(IOIN, 0, 0x1100_0000);
        expectations.extend(read(IOIN, 0, 0x1100_0010));
        let mut spi = SpiMock::new(&expectations);

        {
            let mut driver = Tmc2130::new(&mut spi, 0.11);
            assert!(driver.is_enabled().unwrap());
            assert!(!driver.is_enabled().unwrap());
        }

        spi.done();
    }

    #[test]
    fn connection_test_reads_ioin() {
        let mut expectations = read(IOIN, 0, 0xFFFF_FFFF);
        expectations.extend(read(IOIN, 0, 0x1100_0000));
        let mut spi = SpiMock::new(&expectations);

        {
            let mut driver = Tmc2130::new(&mut spi, 0.11);
            assert_eq!(driver.test_connection().unwrap(), ConnectionTest::AllOnes);
            assert_eq!(driver.test_connection().unwrap(), ConnectionTest::Ok);
        }

        spi.done();
    }

    #[test]
    fn disable_clears_toff_in_shadow() {
        let expectations = datagram([0xEC, 0x14, 0x00, 0x82, 0x30], [0; 5]);
        let mut spi = SpiMock::new(&expectations);

        {
            let mut driver = Tmc2130::new(&mut spi, 0.11);
            driver.disable().unwrap();
            assert_eq!(driver.toff(), 0);
        }

        spi.done();
    }
}
