//! Operator-triggered dumps. Nothing here changes driver or monitor state;
//! read failures print `-` and are logged.

use std::fmt;

mod connection;
mod registers;
mod report;

pub use connection::test_connection;
pub use registers::get_registers;
pub use report::report_all;

/// `AA:BB:CC:DD`, most significant byte first.
pub fn format_hex(word: u32) -> String {
    let [a, b, c, d] = word.to_be_bytes();
    format!("{a:02X}:{b:02X}:{c:02X}:{d:02X}")
}

pub(crate) fn write_bad_response(out: &mut impl fmt::Write) -> fmt::Result {
    out.write_str("\t Bad response!")
}
