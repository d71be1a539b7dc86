use std::fmt;

use tracing::warn;
use utilities::stepper_driver::{
    DriverReport, DrvStatusReport, current::tpwmthrs_to_speed, is_bad_response,
};

use super::{format_hex, write_bad_response};
use crate::{axis::AxisFilter, axis::AxisId, monitor::MonitoredAxis};

struct Column {
    axis: AxisId,
    report: Option<DriverReport>,
    status_mask: u32,
    otpw_triggered: bool,
    steps_per_mm: f32,
}

fn yes_no(value: bool) -> String {
    (if value { "true" } else { "false" }).to_string()
}

fn mark(value: bool) -> String {
    (if value { "X" } else { "" }).to_string()
}

fn of_31(value: u8) -> String {
    format!("{}/31", value)
}

/// One table row: the label, then one tab-separated cell per axis. `None`
/// from `cell` leaves the cell empty; an axis whose report failed shows `-`.
fn row(
    out: &mut impl fmt::Write,
    label: &str,
    columns: &[Column],
    cell: impl Fn(&Column, &DriverReport) -> Option<String>,
) -> fmt::Result {
    out.write_str(label)?;
    for column in columns {
        out.write_char('\t')?;
        match &column.report {
            Some(report) => {
                if let Some(value) = cell(column, report) {
                    out.write_str(&value)?;
                }
            }
            None => out.write_char('-')?,
        }
    }
    out.write_char('\n')
}

/// DRVSTATUS row that only some families have: skipped entirely when no
/// selected axis reports it.
fn optional_flag_row(
    out: &mut impl fmt::Write,
    label: &str,
    columns: &[Column],
    flag: impl Fn(&DrvStatusReport) -> Option<bool>,
) -> fmt::Result {
    let present = columns
        .iter()
        .filter_map(|column| column.report.as_ref())
        .any(|report| flag(&report.drv).is_some());
    if !present {
        return Ok(());
    }
    row(out, label, columns, |_, report| flag(&report.drv).map(mark))
}

/// Full driver status table for the selected axes, followed by the raw
/// DRV_STATUS word of each.
pub fn report_all(
    axes: &mut [MonitoredAxis],
    filter: AxisFilter,
    out: &mut impl fmt::Write,
) -> fmt::Result {
    let columns: Vec<Column> = axes
        .iter_mut()
        .filter(|axis| filter.matches(axis.id))
        .map(|axis| {
            let report = axis
                .driver
                .report()
                .map_err(|e| warn!("Failed to read {} driver report: {}", axis.id, e))
                .ok();
            Column {
                axis: axis.id,
                report,
                status_mask: axis.driver.status_word_mask(),
                otpw_triggered: axis.state.otpw_triggered,
                steps_per_mm: axis.steps_per_mm,
            }
        })
        .collect();

    out.write_char('\t')?;
    for column in &columns {
        write!(out, "\t{}", column.axis)?;
    }
    out.write_char('\n')?;

    row(out, "Enabled\t", &columns, |_, r| Some(yes_no(r.enabled)))?;
    row(out, "Set current", &columns, |_, r| Some(r.set_current.to_string()))?;
    row(out, "RMS current", &columns, |_, r| Some(r.rms_current.to_string()))?;
    row(out, "MAX current", &columns, |_, r| Some(r.max_current().to_string()))?;
    row(out, "Run current", &columns, |_, r| Some(of_31(r.irun)))?;
    row(out, "Hold current", &columns, |_, r| r.ihold.map(of_31))?;
    row(out, "CS actual\t", &columns, |_, r| r.cs_actual.map(of_31))?;
    row(out, "PWM scale", &columns, |_, r| r.pwm_scale.map(|v| v.to_string()))?;
    row(out, "vsense\t", &columns, |_, r| {
        Some(if r.vsense { "1=.18" } else { "0=.325" }.to_string())
    })?;
    row(out, "stealthChop", &columns, |_, r| r.stealthchop.map(yes_no))?;
    row(out, "msteps\t", &columns, |_, r| Some(r.microsteps.to_string()))?;
    row(out, "tstep\t", &columns, |_, r| r.tstep.map(|v| v.to_string()))?;
    row(out, "pwm\nthreshold\t", &columns, |_, r| {
        r.tpwmthrs.map(|v| v.to_string())
    })?;
    row(out, "[mm/s]\t", &columns, |c, r| {
        r.tpwmthrs.map(|tpwmthrs| {
            tpwmthrs_to_speed(tpwmthrs, r.microsteps, c.steps_per_mm)
                .map(|speed| format!("{:.2}", speed))
                .unwrap_or_else(|| "-".to_string())
        })
    })?;
    row(out, "OT prewarn", &columns, |_, r| Some(yes_no(r.drv.otpw)))?;
    row(out, "OT prewarn has\nbeen triggered", &columns, |c, _| {
        Some(yes_no(c.otpw_triggered))
    })?;
    row(out, "off time\t", &columns, |_, r| Some(r.toff.to_string()))?;
    row(out, "blank time", &columns, |_, r| Some(r.blank_time.to_string()))?;
    row(out, "hysteresis\n-end\t", &columns, |_, r| {
        Some(r.hysteresis_end.to_string())
    })?;
    row(out, "-start\t", &columns, |_, r| Some(r.hysteresis_start.to_string()))?;
    row(out, "Stallguard thrs", &columns, |_, r| r.sgt.map(|v| v.to_string()))?;

    out.write_str("DRVSTATUS")?;
    for column in &columns {
        write!(out, "\t{}", column.axis)?;
    }
    out.write_char('\n')?;

    optional_flag_row(out, "stallguard\t", &columns, |d| d.stallguard)?;
    let has_sg_result = columns
        .iter()
        .filter_map(|c| c.report.as_ref())
        .any(|r| r.drv.sg_result.is_some());
    if has_sg_result {
        row(out, "sg_result\t", &columns, |_, r| {
            r.drv.sg_result.map(|v| v.to_string())
        })?;
    }
    optional_flag_row(out, "fsactive\t", &columns, |d| d.fsactive)?;
    row(out, "stst\t", &columns, |_, r| Some(mark(r.drv.stst)))?;
    row(out, "olb\t", &columns, |_, r| Some(mark(r.drv.olb)))?;
    row(out, "ola\t", &columns, |_, r| Some(mark(r.drv.ola)))?;
    row(out, "s2gb\t", &columns, |_, r| Some(mark(r.drv.s2gb)))?;
    row(out, "s2ga\t", &columns, |_, r| Some(mark(r.drv.s2ga)))?;
    row(out, "otpw\t", &columns, |_, r| Some(mark(r.drv.otpw)))?;
    row(out, "ot\t", &columns, |_, r| Some(mark(r.drv.ot)))?;
    optional_flag_row(out, "157C\t", &columns, |d| d.t157)?;
    optional_flag_row(out, "150C\t", &columns, |d| d.t150)?;
    optional_flag_row(out, "143C\t", &columns, |d| d.t143)?;
    optional_flag_row(out, "120C\t", &columns, |d| d.t120)?;
    optional_flag_row(out, "s2vsa\t", &columns, |d| d.s2vsa)?;
    optional_flag_row(out, "s2vsb\t", &columns, |d| d.s2vsb)?;

    out.write_str("Driver registers:\n")?;
    for column in &columns {
        write!(out, "\t{} = ", column.axis)?;
        match &column.report {
            Some(report) => {
                write!(out, "0x{}", format_hex(report.drv.raw))?;
                if is_bad_response(report.drv.raw, column.status_mask) {
                    write_bad_response(out)?;
                }
            }
            None => out.write_char('-')?,
        }
        out.write_char('\n')?;
    }
    out.write_char('\n')
}
