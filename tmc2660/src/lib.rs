use bitflags::bitflags;
use embedded_hal::spi::SpiDevice;
use utilities::stepper_driver::{
    ChipFamily, ConnectionTest, DriverReport, DriverSettings, DriverStatus, DrvStatusReport,
    RegisterValue, StepperDriver, TmcError, blank_time_to_tbl,
    current::{CurrentScale, TMC2660},
    field, microsteps_to_mres, mres_to_microsteps, tbl_to_blank_time, with_field,
};

// Address bits of the 20-bit datagrams. Every register is write-only.
pub const DRVCTRL: u32 = 0b000 << 17;
pub const CHOPCONF: u32 = 0b100 << 17;
pub const SMARTEN: u32 = 0b101 << 17;
pub const SGCSCONF: u32 = 0b110 << 17;
pub const DRVCONF: u32 = 0b111 << 17;

/// Width of the status word shifted out with every datagram.
pub const STATUS_MASK: u32 = 0xF_FFFF;

const DRIVER_ERROR_MASK: u32 = 0x1E;

const DRVCTRL_INTPOL: u32 = 1 << 9;
const DRVCONF_VSENSE: u32 = 1 << 6;

const DEFAULT_TOFF: u32 = 5;
const DEFAULT_BLANK_TIME: u8 = 24;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DrvStatus: u32 {
        const SG = 1 << 0;
        const OT = 1 << 1;
        const OTPW = 1 << 2;
        const S2GA = 1 << 3;
        const S2GB = 1 << 4;
        const OLA = 1 << 5;
        const OLB = 1 << 6;
        const STST = 1 << 7;
    }
}

/// Decodes a TMC2660 status response. The short-to-ground flags are never
/// reported individually on this chip; `error` is the raw fault mask.
pub fn decode(drv_status: u32) -> DriverStatus {
    let flags = DrvStatus::from_bits_truncate(drv_status);

    DriverStatus {
        drv_status,
        otpw: flags.contains(DrvStatus::OTPW),
        ot: flags.contains(DrvStatus::OT),
        s2ga: false,
        s2gb: false,
        error: drv_status & DRIVER_ERROR_MASK != 0,
    }
}

fn sgt_from_sgcsconf(sgcsconf: u32) -> i8 {
    (((field(sgcsconf, 8, 7) as u8) << 1) as i8) >> 1
}

#[derive(Debug, Clone, Copy)]
struct Shadow {
    drvctrl: u32,
    chopconf: u32,
    smarten: u32,
    sgcsconf: u32,
    drvconf: u32,
}

impl Default for Shadow {
    fn default() -> Self {
        Self {
            drvctrl: DRVCTRL | 4,
            chopconf: CHOPCONF | DEFAULT_TOFF | (1 << 15) | (3 << 4) | (2 << 7),
            smarten: SMARTEN,
            sgcsconf: SGCSCONF,
            drvconf: DRVCONF,
        }
    }
}

/// TMC2660 on an SPI bus. None of its registers can be read back, so every
/// value reported comes from the shadow copy.
pub struct Tmc2660<SPI> {
    spi: SPI,
    rsense: f32,
    milliamps: u16,
    shadow: Shadow,
}

impl<SPI: SpiDevice> Tmc2660<SPI> {
    pub fn new(spi: SPI, rsense: f32) -> Self {
        Self {
            spi,
            rsense,
            milliamps: 0,
            shadow: Shadow::default(),
        }
    }

    pub fn init(&mut self, settings: &DriverSettings) -> Result<(), TmcError> {
        self.rsense = settings.rsense;

        let drvctrl = with_field(
            DRVCTRL | DRVCTRL_INTPOL,
            0,
            4,
            microsteps_to_mres(settings.microsteps).into(),
        );
        self.shadow.drvctrl = drvctrl;
        self.transfer(drvctrl)?;

        let chopconf = with_field(self.shadow.chopconf, 0, 4, DEFAULT_TOFF);
        let chopconf = with_field(chopconf, 15, 2, blank_time_to_tbl(DEFAULT_BLANK_TIME).into());
        self.write_chopconf(chopconf)?;

        self.set_rms_current(settings.current_ma)
    }

    /// Clocks out one datagram and returns the 20-bit response.
    fn transfer(&mut self, datagram: u32) -> Result<u32, TmcError> {
        let bytes = (datagram & STATUS_MASK).to_be_bytes();
        let mut buf = [bytes[1], bytes[2], bytes[3]];
        self.spi.transfer_in_place(&mut buf).map_err(TmcError::spi)?;

        Ok(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]) >> 4)
    }

    fn write_chopconf(&mut self, chopconf: u32) -> Result<(), TmcError> {
        self.shadow.chopconf = chopconf;
        self.transfer(chopconf).map(|_| ())
    }

    fn toff(&self) -> u32 {
        field(self.shadow.chopconf, 0, 4)
    }
}

impl<SPI: SpiDevice> StepperDriver for Tmc2660<SPI> {
    fn family(&self) -> ChipFamily {
        ChipFamily::Tmc2660
    }

    fn status_word_mask(&self) -> u32 {
        STATUS_MASK
    }

    /// Re-sends DRVCONF, which leaves the register file unchanged and
    /// clocks out a fresh status word.
    fn read_drv_status(&mut self) -> Result<u32, TmcError> {
        self.transfer(self.shadow.drvconf)
    }

    fn decode_status(&self, drv_status: u32) -> DriverStatus {
        decode(drv_status)
    }

    fn pwm_scale(&mut self) -> Result<u32, TmcError> {
        Ok(0)
    }

    fn status_response(&mut self, _drv_status: u32) -> Result<u8, TmcError> {
        Ok(0)
    }

    fn milliamps(&self) -> u16 {
        self.milliamps
    }

    fn set_rms_current(&mut self, milliamps: u16) -> Result<(), TmcError> {
        let scale = TMC2660.scale_for(milliamps, self.rsense);

        let drvconf = if scale.vsense {
            self.shadow.drvconf | DRVCONF_VSENSE
        } else {
            self.shadow.drvconf & !DRVCONF_VSENSE
        };
        self.shadow.drvconf = drvconf;
        self.transfer(drvconf)?;

        let sgcsconf = with_field(self.shadow.sgcsconf, 0, 5, scale.cs.into());
        self.shadow.sgcsconf = sgcsconf;
        self.transfer(sgcsconf)?;

        self.milliamps = milliamps;
        Ok(())
    }

    fn is_enabled(&mut self) -> Result<bool, TmcError> {
        Ok(self.toff() > 0)
    }

    fn disable(&mut self) -> Result<(), TmcError> {
        self.write_chopconf(with_field(self.shadow.chopconf, 0, 4, 0))
    }

    fn microsteps(&self) -> u16 {
        mres_to_microsteps(field(self.shadow.drvctrl, 0, 4) as u8)
    }

    fn test_connection(&mut self) -> Result<ConnectionTest, TmcError> {
        let response = self.read_drv_status()?;
        Ok(ConnectionTest::from_word(response, STATUS_MASK))
    }

    fn report(&mut self) -> Result<DriverReport, TmcError> {
        let drv_status = self.read_drv_status()?;
        let flags = DrvStatus::from_bits_truncate(drv_status);

        let cs = field(self.shadow.sgcsconf, 0, 5) as u8;
        let vsense = self.shadow.drvconf & DRVCONF_VSENSE != 0;
        let chopconf = self.shadow.chopconf;

        Ok(DriverReport {
            enabled: self.toff() > 0,
            set_current: self.milliamps,
            rms_current: TMC2660.rms_current(CurrentScale { cs, vsense }, self.rsense),
            irun: cs,
            vsense,
            microsteps: self.microsteps(),
            toff: field(chopconf, 0, 4) as u8,
            blank_time: tbl_to_blank_time(field(chopconf, 15, 2) as u8),
            hysteresis_end: field(chopconf, 7, 4) as i8 - 3,
            hysteresis_start: field(chopconf, 4, 3) as u8 + 1,
            sgt: Some(sgt_from_sgcsconf(self.shadow.sgcsconf)),
            drv: DrvStatusReport {
                raw: drv_status,
                stst: flags.contains(DrvStatus::STST),
                olb: flags.contains(DrvStatus::OLB),
                ola: flags.contains(DrvStatus::OLA),
                s2gb: flags.contains(DrvStatus::S2GB),
                s2ga: flags.contains(DrvStatus::S2GA),
                otpw: flags.contains(DrvStatus::OTPW),
                ot: flags.contains(DrvStatus::OT),
                stallguard: Some(flags.contains(DrvStatus::SG)),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn registers(&mut self) -> Result<Vec<RegisterValue>, TmcError> {
        Ok(vec![
            RegisterValue::new("DRVCTRL", self.shadow.drvctrl),
            RegisterValue::new("CHOPCONF", self.shadow.chopconf),
            RegisterValue::new("SMARTEN", self.shadow.smarten),
            RegisterValue::new("SGCSCONF", self.shadow.sgcsconf),
            RegisterValue::new("DRVCONF", self.shadow.drvconf),
            RegisterValue::new("DRVSTATUS", self.read_drv_status()?),
        ])
    }

    fn stall_threshold(&self) -> Result<i8, TmcError> {
        Ok(sgt_from_sgcsconf(self.shadow.sgcsconf))
    }

    fn set_stall_threshold(&mut self, sgt: i8) -> Result<(), TmcError> {
        let sgt = sgt.clamp(-64, 63);
        let sgcsconf = with_field(self.shadow.sgcsconf, 8, 7, u32::from(sgt as u8 & 0x7F));
        self.shadow.sgcsconf = sgcsconf;
        self.transfer(sgcsconf).map(|_| ())
    }
}
