use std::fmt;

use tracing::warn;
use utilities::stepper_driver::{RegisterValue, is_bad_response};

use super::{format_hex, write_bad_response};
use crate::{axis::AxisFilter, monitor::MonitoredAxis};

/// Registers holding the chip's status word.
const STATUS_REGISTERS: [&str; 2] = ["DRV_STATUS", "DRVSTATUS"];

/// Raw register table for the selected axes. Rows follow the order the
/// drivers list their registers in; a family without a register shows `-`.
pub fn get_registers(
    axes: &mut [MonitoredAxis],
    filter: AxisFilter,
    out: &mut impl fmt::Write,
) -> fmt::Result {
    let mut columns = Vec::new();
    for axis in axes.iter_mut().filter(|axis| filter.matches(axis.id)) {
        let registers = match axis.driver.registers() {
            Ok(registers) => registers,
            Err(e) => {
                warn!("Failed to read {} registers: {}", axis.id, e);
                Vec::new()
            }
        };
        columns.push((axis.id, axis.driver.status_word_mask(), registers));
    }

    let mut names: Vec<&'static str> = Vec::new();
    for (_, _, registers) in &columns {
        for register in registers {
            if !names.contains(&register.name) {
                names.push(register.name);
            }
        }
    }

    out.write_char('\t')?;
    for (axis, _, _) in &columns {
        write!(out, "\t{}", axis)?;
    }
    out.write_char('\n')?;

    for name in names {
        write!(out, "{}\t", name)?;
        for (_, mask, registers) in &columns {
            out.write_char('\t')?;
            match registers.iter().find(|register| register.name == name) {
                Some(RegisterValue { value, .. }) => {
                    write!(out, "0x{}", format_hex(*value))?;
                    if STATUS_REGISTERS.contains(&name) && is_bad_response(*value, *mask) {
                        write_bad_response(out)?;
                    }
                }
                None => out.write_char('-')?,
            }
        }
        out.write_char('\n')?;
    }

    Ok(())
}
