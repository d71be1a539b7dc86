use std::{
    fmt,
    io::{self, Write as _},
};

/// Operator console on stdout. Partial report lines are flushed right away
/// so the operator sees each axis cell as it is appended.
#[derive(Debug, Default)]
pub struct StdoutConsole;

impl fmt::Write for StdoutConsole {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut stdout = io::stdout().lock();
        stdout.write_all(s.as_bytes()).map_err(|_| fmt::Error)?;
        stdout.flush().map_err(|_| fmt::Error)
    }
}
