/// True once `now` has reached `due` on a wrapping millisecond clock.
/// Valid while the two are less than about 24.8 days apart.
pub fn elapsed(now: u32, due: u32) -> bool {
    now.wrapping_sub(due) as i32 >= 0
}

#[derive(Debug, Clone, Copy)]
pub struct PollScheduler {
    interval_ms: u32,
    next_due: u32,
}

impl PollScheduler {
    /// The first poll is due immediately.
    pub fn new(interval_ms: u32, now: u32) -> Self {
        Self {
            interval_ms,
            next_due: now,
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn next_due(&self) -> u32 {
        self.next_due
    }

    /// Claims the poll if it is due and schedules the next one a full
    /// interval after `now`.
    pub fn try_claim(&mut self, now: u32) -> bool {
        if !elapsed(now, self.next_due) {
            return false;
        }
        self.next_due = now.wrapping_add(self.interval_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_handles_wrap() {
        assert!(elapsed(5, 0xFFFF_FFF0));
        assert!(!elapsed(0xFFFF_FFF0, 5));
        assert!(elapsed(100, 100));
        assert!(!elapsed(99, 100));
    }

    #[test]
    fn polls_are_at_least_one_interval_apart() {
        let mut scheduler = PollScheduler::new(500, 0);
        let mut claimed = Vec::new();

        for now in (0..5_000).step_by(7) {
            if scheduler.try_claim(now) {
                claimed.push(now);
            }
        }

        assert_eq!(claimed[0], 0);
        assert!(claimed.windows(2).all(|w| w[1] - w[0] >= 500));
        assert!(claimed.windows(2).all(|w| w[1] - w[0] < 500 + 7));
    }

    #[test]
    fn schedule_survives_clock_wrap() {
        let start = u32::MAX - 200;
        let mut scheduler = PollScheduler::new(500, start);
        assert!(scheduler.try_claim(start));

        assert!(!scheduler.try_claim(start.wrapping_add(499)));
        assert!(scheduler.try_claim(start.wrapping_add(500)));
        assert_eq!(scheduler.next_due(), start.wrapping_add(1000));
    }

    #[test]
    fn late_tick_does_not_cause_catch_up_burst() {
        let mut scheduler = PollScheduler::new(500, 0);
        assert!(scheduler.try_claim(0));
        assert!(scheduler.try_claim(1_700));
        assert!(!scheduler.try_claim(2_000));
        assert!(scheduler.try_claim(2_200));
    }
}
