use std::fmt;

use tracing::warn;
use utilities::stepper_driver::ConnectionTest;

use crate::{axis::AxisFilter, monitor::MonitoredAxis};

pub fn test_connection(
    axes: &mut [MonitoredAxis],
    filter: AxisFilter,
    out: &mut impl fmt::Write,
) -> fmt::Result {
    for axis in axes.iter_mut().filter(|axis| filter.matches(axis.id)) {
        write!(out, "Testing {} connection...", axis.id)?;

        match axis.driver.test_connection() {
            Ok(ConnectionTest::Ok) => out.write_str("OK")?,
            Ok(ConnectionTest::AllOnes) => out.write_str("Error(0xFFFFFFFF)")?,
            Ok(ConnectionTest::AllZeros) => out.write_str("Error(0x0)")?,
            Err(e) => {
                warn!("Connection test of {} failed: {}", axis.id, e);
                write!(out, "Error({})", e)?;
            }
        }

        out.write_char('\n')?;
    }

    Ok(())
}
