use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tmc_uart::UartError;

pub mod current;
pub mod report;

pub use report::{DriverReport, DrvStatusReport, RegisterValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipFamily {
    Tmc2130,
    Tmc2208,
    Tmc2660,
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChipFamily::Tmc2130 => "TMC2130",
            ChipFamily::Tmc2208 => "TMC2208",
            ChipFamily::Tmc2660 => "TMC2660",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TmcError {
    #[error("UART error: {0}")]
    Uart(#[from] UartError),

    #[error("SPI error: {0}")]
    Spi(embedded_hal::spi::ErrorKind),

    #[error("{chip} does not support {feature}")]
    Unsupported {
        chip: ChipFamily,
        feature: &'static str,
    },
}

impl TmcError {
    pub fn spi(error: impl embedded_hal::spi::Error) -> Self {
        TmcError::Spi(error.kind())
    }
}

/// Normalized view of one driver status word. Only valid for the poll
/// cycle it was read in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStatus {
    pub drv_status: u32,
    /// Over-temperature pre-warning.
    pub otpw: bool,
    /// Over-temperature shutdown.
    pub ot: bool,
    /// Short to ground, coil A.
    pub s2ga: bool,
    /// Short to ground, coil B.
    pub s2gb: bool,
    /// Chip-family specific combination of the fault bits.
    pub error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTest {
    Ok,
    AllOnes,
    AllZeros,
}

impl ConnectionTest {
    /// Classifies a register read. `mask` is the width of the word the chip
    /// shifts out; a floating or shorted MISO line reads as all ones or zero.
    pub fn from_word(word: u32, mask: u32) -> Self {
        match word & mask {
            0 => ConnectionTest::AllZeros,
            w if w == mask => ConnectionTest::AllOnes,
            _ => ConnectionTest::Ok,
        }
    }
}

/// True when a status read looks like no chip answered.
pub fn is_bad_response(word: u32, mask: u32) -> bool {
    ConnectionTest::from_word(word, mask) != ConnectionTest::Ok
}

/// A Trinamic stepper driver as seen by the health monitor.
///
/// Register layouts are owned by the implementing chip crate; the monitor
/// only sees decoded flags, the current setting and a few report values.
pub trait StepperDriver {
    fn family(&self) -> ChipFamily;

    /// Bits actually shifted out by the chip when reading the status word.
    fn status_word_mask(&self) -> u32 {
        u32::MAX
    }

    fn read_drv_status(&mut self) -> Result<u32, TmcError>;

    /// Pure and total: every status word yields a snapshot.
    fn decode_status(&self, drv_status: u32) -> DriverStatus;

    fn driver_status(&mut self) -> Result<DriverStatus, TmcError> {
        let drv_status = self.read_drv_status()?;
        Ok(self.decode_status(drv_status))
    }

    fn pwm_scale(&mut self) -> Result<u32, TmcError>;

    fn status_response(&mut self, drv_status: u32) -> Result<u8, TmcError>;

    /// Last requested RMS current in milliamps.
    fn milliamps(&self) -> u16;

    fn set_rms_current(&mut self, milliamps: u16) -> Result<(), TmcError>;

    fn is_enabled(&mut self) -> Result<bool, TmcError>;

    /// Switches the power stage off (TOFF = 0).
    fn disable(&mut self) -> Result<(), TmcError>;

    fn microsteps(&self) -> u16;

    fn test_connection(&mut self) -> Result<ConnectionTest, TmcError>;

    fn report(&mut self) -> Result<DriverReport, TmcError>;

    fn registers(&mut self) -> Result<Vec<RegisterValue>, TmcError>;

    fn hybrid_threshold(&self) -> Result<u32, TmcError> {
        Err(TmcError::Unsupported {
            chip: self.family(),
            feature: "hybrid threshold",
        })
    }

    fn set_hybrid_threshold(&mut self, _tpwmthrs: u32) -> Result<(), TmcError> {
        Err(TmcError::Unsupported {
            chip: self.family(),
            feature: "hybrid threshold",
        })
    }

    fn stall_threshold(&self) -> Result<i8, TmcError> {
        Err(TmcError::Unsupported {
            chip: self.family(),
            feature: "stallGuard threshold",
        })
    }

    fn set_stall_threshold(&mut self, _sgt: i8) -> Result<(), TmcError> {
        Err(TmcError::Unsupported {
            chip: self.family(),
            feature: "stallGuard threshold",
        })
    }
}

/// Settings applied by a chip driver's `init`.
#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    pub rsense: f32,
    pub current_ma: u16,
    pub hold_multiplier: f32,
    pub microsteps: u16,
    pub stealthchop: bool,
    pub hybrid_threshold: Option<u32>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            rsense: 0.11,
            current_ma: 800,
            hold_multiplier: 0.5,
            microsteps: 16,
            stealthchop: false,
            hybrid_threshold: None,
        }
    }
}

/// MRES field encoding: 256 microsteps is 0, full step is 8.
pub fn microsteps_to_mres(microsteps: u16) -> u8 {
    match microsteps {
        256 => 0,
        128 => 1,
        64 => 2,
        32 => 3,
        16 => 4,
        8 => 5,
        4 => 6,
        2 => 7,
        _ => 8,
    }
}

pub fn mres_to_microsteps(mres: u8) -> u16 {
    256 >> mres.min(8)
}

/// TBL field encoding of the comparator blank time in clock cycles.
pub fn blank_time_to_tbl(clocks: u8) -> u8 {
    match clocks {
        0..=16 => 0,
        17..=24 => 1,
        25..=36 => 2,
        _ => 3,
    }
}

pub fn tbl_to_blank_time(tbl: u8) -> u8 {
    match tbl & 0b11 {
        0 => 16,
        1 => 24,
        2 => 36,
        _ => 54,
    }
}

/// Register field helpers shared by the chip crates.
pub fn field(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & ((1 << width) - 1)
}

pub fn with_field(word: u32, shift: u32, width: u32, value: u32) -> u32 {
    let mask = ((1 << width) - 1) << shift;
    (word & !mask) | ((value << shift) & mask)
}
