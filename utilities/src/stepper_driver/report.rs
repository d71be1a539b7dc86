/// One named register and the value read (or shadowed) for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterValue {
    pub name: &'static str,
    pub value: u32,
}

impl RegisterValue {
    pub fn new(name: &'static str, value: u32) -> Self {
        Self { name, value }
    }
}

/// DRV_STATUS fields for the verbose report. Flags a family does not have
/// are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrvStatusReport {
    pub raw: u32,
    pub stst: bool,
    pub olb: bool,
    pub ola: bool,
    pub s2gb: bool,
    pub s2ga: bool,
    pub otpw: bool,
    pub ot: bool,
    pub stallguard: Option<bool>,
    pub sg_result: Option<u16>,
    pub fsactive: Option<bool>,
    pub cs_actual: Option<u8>,
    pub t157: Option<bool>,
    pub t150: Option<bool>,
    pub t143: Option<bool>,
    pub t120: Option<bool>,
    pub s2vsa: Option<bool>,
    pub s2vsb: Option<bool>,
}

/// Everything the full driver status report prints for one axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverReport {
    pub enabled: bool,
    /// Requested RMS current.
    pub set_current: u16,
    /// RMS current produced by the programmed current scale.
    pub rms_current: u16,
    pub irun: u8,
    pub ihold: Option<u8>,
    pub cs_actual: Option<u8>,
    pub pwm_scale: Option<u32>,
    pub vsense: bool,
    pub stealthchop: Option<bool>,
    pub microsteps: u16,
    pub tstep: Option<u32>,
    pub tpwmthrs: Option<u32>,
    pub toff: u8,
    pub blank_time: u8,
    pub hysteresis_end: i8,
    pub hysteresis_start: u8,
    pub sgt: Option<i8>,
    pub drv: DrvStatusReport,
}

impl DriverReport {
    /// Peak current for a sine wave of the reported RMS current.
    pub fn max_current(&self) -> u16 {
        (f32::from(self.rms_current) * 1.41) as u16
    }
}
