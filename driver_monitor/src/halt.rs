use std::io::Write as _;

use tracing::error;

/// Terminal stop of the whole controller. Never returns.
pub trait Halt {
    fn kill(&mut self, reason: &str) -> !;
}

/// Reports on the console and aborts the process.
#[derive(Debug, Default)]
pub struct ProcessHalt;

impl Halt for ProcessHalt {
    fn kill(&mut self, reason: &str) -> ! {
        error!("Halting: {}", reason);

        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "Error:{reason}");
        let _ = writeln!(stdout, "Error:Printer halted. kill() called!");
        let _ = stdout.flush();

        std::process::abort()
    }
}
