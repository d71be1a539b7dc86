use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running,
    Paused,
}

/// Print job stopwatch driven by M75/M76/M77, read on the wrapping
/// millisecond clock.
#[derive(Debug)]
pub struct PrintTimer {
    state: TimerState,
    accumulated_ms: u64,
    started_at: u32,
}

impl Default for PrintTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PrintTimer {
    pub fn new() -> Self {
        Self {
            state: TimerState::Stopped,
            accumulated_ms: 0,
            started_at: 0,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Starts a new job, or resumes a paused one.
    pub fn start(&mut self, now: u32) {
        match self.state {
            TimerState::Running => return,
            TimerState::Stopped => self.accumulated_ms = 0,
            TimerState::Paused => {}
        }
        self.started_at = now;
        self.state = TimerState::Running;
        debug!("Print timer started");
    }

    pub fn pause(&mut self, now: u32) {
        if self.state == TimerState::Running {
            self.accumulated_ms += u64::from(now.wrapping_sub(self.started_at));
            self.state = TimerState::Paused;
            debug!("Print timer paused");
        }
    }

    /// Stops the job. The duration stays readable until the next start.
    pub fn stop(&mut self, now: u32) {
        self.pause(now);
        if self.state == TimerState::Paused {
            self.state = TimerState::Stopped;
            debug!("Print timer stopped after {:?}", self.duration(now));
        }
    }

    pub fn duration(&self, now: u32) -> Duration {
        let running = if self.state == TimerState::Running {
            u64::from(now.wrapping_sub(self.started_at))
        } else {
            0
        };
        Duration::from_millis(self.accumulated_ms + running)
    }
}

/// `HH:MM`, or `Nd HH:MM` once the duration passes a full day.
pub fn format_digital(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let minutes = (seconds / 60) % 60;
    let hours = seconds / 3600;

    if seconds > 24 * 3600 {
        format!("{}d {:02}:{:02}", hours / 24, hours % 24, minutes)
    } else {
        format!("{:02}:{:02}", hours, minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_pause() {
        let mut timer = PrintTimer::new();
        timer.start(1_000);
        timer.pause(61_000);
        assert_eq!(timer.duration(500_000), Duration::from_secs(60));

        timer.start(600_000);
        assert_eq!(timer.duration(630_000), Duration::from_secs(90));

        timer.stop(660_000);
        assert_eq!(timer.state(), TimerState::Stopped);
        assert_eq!(timer.duration(900_000), Duration::from_secs(120));
    }

    #[test]
    fn restart_after_stop_resets() {
        let mut timer = PrintTimer::new();
        timer.start(0);
        timer.stop(10_000);
        timer.start(20_000);
        assert_eq!(timer.duration(25_000), Duration::from_secs(5));
    }

    #[test]
    fn survives_clock_wrap() {
        let mut timer = PrintTimer::new();
        timer.start(u32::MAX - 999);
        assert_eq!(timer.duration(1_000), Duration::from_millis(2_000));
    }

    #[test]
    fn digital_format() {
        assert_eq!(format_digital(Duration::ZERO), "00:00");
        assert_eq!(format_digital(Duration::from_secs(3 * 3600 + 25 * 60)), "03:25");
        assert_eq!(format_digital(Duration::from_secs(24 * 3600)), "24:00");
        assert_eq!(
            format_digital(Duration::from_secs(2 * 86_400 + 5 * 3600 + 7 * 60)),
            "2d 05:07"
        );
    }
}
