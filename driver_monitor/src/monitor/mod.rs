use std::{fmt, time::Duration};

use tracing::{debug, error, info, warn};
use utilities::stepper_driver::{DriverStatus, StepperDriver};

use crate::{axis::AxisFilter, axis::AxisId, diagnostics, halt::Halt, print_timer::format_digital};

pub mod scheduler;
pub mod state;

pub use scheduler::PollScheduler;
pub use state::AxisMonitorState;

/// Consecutive warning polls tolerated before the current is stepped down.
const STEP_DOWN_AFTER: u8 = 4;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Failed to write to the console")]
    Output(#[from] fmt::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub stop_on_error: bool,
    /// mA removed per poll under a sustained pre-warning; 0 disables.
    pub current_step_down: u16,
    pub report_current_change: bool,
    /// Print the full status report before halting on a driver error.
    pub debug_dump_on_error: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            stop_on_error: true,
            current_step_down: 50,
            report_current_change: true,
            debug_dump_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// Confirmed driver fault; the controller must halt.
    Fatal,
}

/// One configured driver together with the monitor's state for it.
pub struct MonitoredAxis {
    pub id: AxisId,
    pub driver: Box<dyn StepperDriver>,
    pub state: AxisMonitorState,
    pub steps_per_mm: f32,
}

impl MonitoredAxis {
    pub fn new(id: AxisId, driver: Box<dyn StepperDriver>, steps_per_mm: f32) -> Self {
        Self {
            id,
            driver,
            state: AxisMonitorState::default(),
            steps_per_mm,
        }
    }
}

/// Runs one poll for one axis: fault check, pre-warning report, current
/// step-down, debounce update and the optional report cell.
///
/// A failed status read is logged and the axis is skipped for this cycle
/// with its state untouched.
pub fn monitor_axis(
    axis: &mut MonitoredAxis,
    settings: &MonitorSettings,
    reporting: bool,
    print_elapsed: Duration,
    out: &mut impl fmt::Write,
) -> Result<StepOutcome, MonitorError> {
    let status = match axis.driver.driver_status() {
        Ok(status) => status,
        Err(e) => {
            warn!("Failed to read {} driver status: {}", axis.id, e);
            return Ok(StepOutcome::Continue);
        }
    };

    if status.error && settings.stop_on_error {
        error!(
            "{} driver error detected, DRV_STATUS {:#010x}",
            axis.id, status.drv_status
        );

        write!(out, "\n{} driver error detected:\n", axis.id)?;
        if status.ot {
            out.write_str("overtemperature\n")?;
        }
        if status.s2ga {
            out.write_str("short to ground (coil A)\n")?;
        }
        if status.s2gb {
            out.write_str("short to ground (coil B)\n")?;
        }

        if settings.debug_dump_on_error {
            diagnostics::report_all(std::slice::from_mut(axis), AxisFilter::empty(), out)?;
        }

        return Ok(StepOutcome::Fatal);
    }

    if status.otpw && axis.state.otpw_count == 0 {
        warn!("{} driver overtemperature pre-warning", axis.id);
        write!(
            out,
            "\n{}: {} driver overtemperature warning! ({}mA)\n",
            format_digital(print_elapsed),
            axis.id,
            axis.driver.milliamps()
        )?;
    }

    if settings.current_step_down > 0
        && status.otpw
        && axis.state.otpw_count >= STEP_DOWN_AFTER
    {
        match axis.driver.is_enabled() {
            Ok(true) => step_down_current(axis, settings, out)?,
            Ok(false) => debug!("{} is disabled, keeping current", axis.id),
            Err(e) => warn!("Failed to read {} enable state: {}", axis.id, e),
        }
    }

    axis.state.record(status.otpw);

    if reporting {
        append_report_cell(axis, &status, out)?;
    }

    Ok(StepOutcome::Continue)
}

fn step_down_current(
    axis: &mut MonitoredAxis,
    settings: &MonitorSettings,
    out: &mut impl fmt::Write,
) -> Result<(), MonitorError> {
    let reduced = axis
        .driver
        .milliamps()
        .saturating_sub(settings.current_step_down);

    if let Err(e) = axis.driver.set_rms_current(reduced) {
        warn!("Failed to reduce {} current: {}", axis.id, e);
        return Ok(());
    }

    info!("{} current stepped down to {}mA", axis.id, reduced);
    if settings.report_current_change {
        writeln!(
            out,
            "{} current decreased to {}",
            axis.id,
            axis.driver.milliamps()
        )?;
    }

    Ok(())
}

/// `{axis}:{pwm_scale} |0b{status_response}| {code}` followed by a tab.
/// Values that cannot be read are shown as `-`.
fn append_report_cell(
    axis: &mut MonitoredAxis,
    status: &DriverStatus,
    out: &mut impl fmt::Write,
) -> Result<(), MonitorError> {
    let pwm_scale = axis.driver.pwm_scale();
    let response = axis.driver.status_response(status.drv_status);
    match (pwm_scale, response) {
        (Ok(pwm_scale), Ok(response)) => {
            write!(out, "{}:{} |0b{:b}| ", axis.id, pwm_scale, response)?
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to read {} report values: {}", axis.id, e);
            write!(out, "{}:- |0b-| ", axis.id)?
        }
    }

    let count = axis.state.otpw_count;
    if status.error {
        out.write_char('E')?;
    } else if status.ot {
        out.write_char('O')?;
    } else if status.otpw && count == 1 {
        out.write_char('W')?;
    } else if count > 0 {
        write!(out, "{}", count)?;
    } else if axis.state.otpw_triggered {
        out.write_char('F')?;
    }
    out.write_char('\t')?;

    Ok(())
}

/// Owns every monitored axis and the reporting flag, and runs the poll
/// when the scheduler says it is due.
pub struct DriverMonitor<H> {
    axes: Vec<MonitoredAxis>,
    settings: MonitorSettings,
    scheduler: PollScheduler,
    reporting: bool,
    halt: H,
}

impl<H: Halt> DriverMonitor<H> {
    pub fn new(
        axes: Vec<MonitoredAxis>,
        settings: MonitorSettings,
        scheduler: PollScheduler,
        halt: H,
    ) -> Self {
        Self {
            axes,
            settings,
            scheduler,
            reporting: false,
            halt,
        }
    }

    pub fn axes(&self) -> &[MonitoredAxis] {
        &self.axes
    }

    pub fn axes_mut(&mut self) -> &mut [MonitoredAxis] {
        &mut self.axes
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn is_reporting(&self) -> bool {
        self.reporting
    }

    pub fn set_reporting(&mut self, enabled: bool, out: &mut impl fmt::Write) -> fmt::Result {
        self.reporting = enabled;
        if enabled {
            out.write_str("axis:pwm_scale |status_response|\n")?;
        }
        Ok(())
    }

    /// Polls every axis if the interval has elapsed. Returns whether a
    /// poll ran.
    pub fn tick(
        &mut self,
        now: u32,
        print_elapsed: Duration,
        out: &mut impl fmt::Write,
    ) -> Result<bool, MonitorError> {
        if !self.scheduler.try_claim(now) {
            return Ok(false);
        }
        self.poll(print_elapsed, out)?;
        Ok(true)
    }

    /// Visits every axis in configured order. A fatal fault switches every
    /// power stage off and halts without visiting the remaining axes.
    pub fn poll(
        &mut self,
        print_elapsed: Duration,
        out: &mut impl fmt::Write,
    ) -> Result<(), MonitorError> {
        let mut fatal = false;
        for axis in &mut self.axes {
            let outcome = monitor_axis(axis, &self.settings, self.reporting, print_elapsed, out)?;
            if outcome == StepOutcome::Fatal {
                fatal = true;
                break;
            }
        }

        if fatal {
            self.disable_all();
            self.halt.kill("Driver error");
        }

        if self.reporting {
            out.write_char('\n')?;
        }

        Ok(())
    }

    fn disable_all(&mut self) {
        for axis in &mut self.axes {
            if let Err(e) = axis.driver.disable() {
                warn!("Failed to disable {} driver: {}", axis.id, e);
            }
        }
    }
}
