//! Operator console commands. Every command is one-shot and synchronous;
//! output goes to the console sink, failures to talk to a driver are logged
//! and the remaining axes are still served.

use std::fmt;

use tracing::{debug, info, warn};
use utilities::stepper_driver::current::{speed_to_tpwmthrs, tpwmthrs_to_speed};

use crate::{
    axis::AxisFilter,
    diagnostics,
    halt::Halt,
    monitor::{DriverMonitor, MonitoredAxis},
    print_timer::PrintTimer,
};

mod parser;

pub use parser::{GcodeLine, parse_command};

/// Lowest and highest stallGuard threshold the chips accept.
const SGT_RANGE: (i8, i8) = (-64, 63);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: \"{0}\"")]
    Unknown(String),

    #[error("Malformed parameter: \"{0}\"")]
    InvalidWord(String),

    #[error("Invalid value for {letter}: \"{value}\"")]
    InvalidValue { letter: char, value: String },
}

/// Axis letters named by a get/set command and the values given to some of
/// them. No values at all means "report the selected axes".
#[derive(Debug, Clone, PartialEq)]
pub struct AxisArgs<T> {
    pub selected: AxisFilter,
    pub values: Vec<(AxisFilter, T)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// M122
    Report { filter: AxisFilter },
    /// M122 S0/S1
    SetReporting(bool),
    /// M122 V
    DumpRegisters { filter: AxisFilter },
    /// M122 T
    TestConnection { filter: AxisFilter },
    /// M906, current in mA.
    Current(AxisArgs<u16>),
    /// M911
    ReportPrewarn { filter: AxisFilter },
    /// M912
    ClearPrewarn { filter: AxisFilter },
    /// M913, hybrid threshold in mm/s.
    HybridThreshold(AxisArgs<f32>),
    /// M914, stallGuard threshold.
    StallThreshold(AxisArgs<i8>),
    /// M75
    StartTimer,
    /// M76
    PauseTimer,
    /// M77
    StopTimer,
}

/// Parses and runs one console line. Parse errors are echoed back to the
/// operator and never reach the caller.
pub fn handle_line<H: Halt>(
    line: &str,
    monitor: &mut DriverMonitor<H>,
    timer: &mut PrintTimer,
    now: u32,
    out: &mut impl fmt::Write,
) -> fmt::Result {
    match parse_command(line) {
        Ok(command) => execute(command, monitor, timer, now, out),
        Err(CommandError::Empty) => Ok(()),
        Err(CommandError::Unknown(_)) => {
            writeln!(out, "echo:Unknown command: \"{}\"", line.trim())
        }
        Err(e) => {
            debug!("Rejected console line {:?}: {}", line, e);
            writeln!(out, "echo:{}", e)
        }
    }
}

pub fn execute<H: Halt>(
    command: Command,
    monitor: &mut DriverMonitor<H>,
    timer: &mut PrintTimer,
    now: u32,
    out: &mut impl fmt::Write,
) -> fmt::Result {
    match command {
        Command::Report { filter } => diagnostics::report_all(monitor.axes_mut(), filter, out),
        Command::SetReporting(enabled) => monitor.set_reporting(enabled, out),
        Command::DumpRegisters { filter } => {
            diagnostics::get_registers(monitor.axes_mut(), filter, out)
        }
        Command::TestConnection { filter } => {
            diagnostics::test_connection(monitor.axes_mut(), filter, out)
        }
        Command::Current(args) => current(monitor.axes_mut(), args, out),
        Command::ReportPrewarn { filter } => {
            for axis in selected(monitor.axes_mut(), filter) {
                writeln!(
                    out,
                    "{} temperature prewarn triggered: {}",
                    axis.id, axis.state.otpw_triggered
                )?;
            }
            Ok(())
        }
        Command::ClearPrewarn { filter } => {
            for axis in selected(monitor.axes_mut(), filter) {
                axis.state.clear_prewarn();
                info!("{} prewarn flag cleared", axis.id);
                writeln!(out, "{} prewarn flag cleared", axis.id)?;
            }
            Ok(())
        }
        Command::HybridThreshold(args) => hybrid_threshold(monitor.axes_mut(), args, out),
        Command::StallThreshold(args) => stall_threshold(monitor.axes_mut(), args, out),
        Command::StartTimer => {
            timer.start(now);
            Ok(())
        }
        Command::PauseTimer => {
            timer.pause(now);
            Ok(())
        }
        Command::StopTimer => {
            timer.stop(now);
            Ok(())
        }
    }
}

fn selected(
    axes: &mut [MonitoredAxis],
    filter: AxisFilter,
) -> impl Iterator<Item = &mut MonitoredAxis> {
    axes.iter_mut().filter(move |axis| filter.matches(axis.id))
}

fn current(
    axes: &mut [MonitoredAxis],
    args: AxisArgs<u16>,
    out: &mut impl fmt::Write,
) -> fmt::Result {
    if args.values.is_empty() {
        for axis in selected(axes, args.selected) {
            writeln!(out, "{} driver current: {}", axis.id, axis.driver.milliamps())?;
        }
        return Ok(());
    }

    for (letter, milliamps) in args.values {
        for axis in selected(axes, letter) {
            match axis.driver.set_rms_current(milliamps) {
                Ok(()) => info!("{} current set to {}mA", axis.id, milliamps),
                Err(e) => warn!("Failed to set {} current: {}", axis.id, e),
            }
        }
    }
    Ok(())
}

fn hybrid_threshold(
    axes: &mut [MonitoredAxis],
    args: AxisArgs<f32>,
    out: &mut impl fmt::Write,
) -> fmt::Result {
    if args.values.is_empty() {
        for axis in selected(axes, args.selected) {
            let speed = axis.driver.hybrid_threshold().map(|tpwmthrs| {
                tpwmthrs_to_speed(tpwmthrs, axis.driver.microsteps(), axis.steps_per_mm)
            });
            match speed {
                Ok(Some(speed)) => {
                    writeln!(out, "{} stealthChop max speed: {}", axis.id, speed.round())?
                }
                Ok(None) => writeln!(out, "{} stealthChop max speed: 0", axis.id)?,
                Err(e) => debug!("Skipping {}: {}", axis.id, e),
            }
        }
        return Ok(());
    }

    for (letter, speed) in args.values {
        for axis in selected(axes, letter) {
            let tpwmthrs = speed_to_tpwmthrs(speed, axis.driver.microsteps(), axis.steps_per_mm);
            match axis.driver.set_hybrid_threshold(tpwmthrs) {
                Ok(()) => info!("{} hybrid threshold set to {}mm/s", axis.id, speed),
                Err(e) => warn!("Failed to set {} hybrid threshold: {}", axis.id, e),
            }
        }
    }
    Ok(())
}

fn stall_threshold(
    axes: &mut [MonitoredAxis],
    args: AxisArgs<i8>,
    out: &mut impl fmt::Write,
) -> fmt::Result {
    if args.values.is_empty() {
        for axis in selected(axes, args.selected) {
            match axis.driver.stall_threshold() {
                Ok(sgt) => writeln!(out, "{} homing sensitivity: {}", axis.id, sgt)?,
                Err(e) => debug!("Skipping {}: {}", axis.id, e),
            }
        }
        return Ok(());
    }

    for (letter, sgt) in args.values {
        let sgt = sgt.clamp(SGT_RANGE.0, SGT_RANGE.1);
        for axis in selected(axes, letter) {
            match axis.driver.set_stall_threshold(sgt) {
                Ok(()) => info!("{} stallGuard threshold set to {}", axis.id, sgt),
                Err(e) => warn!("Failed to set {} stallGuard threshold: {}", axis.id, e),
            }
        }
    }
    Ok(())
}
