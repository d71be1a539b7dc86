use std::time::Instant;

/// Millisecond tick counter that wraps after about 49.7 days.
pub trait Clock {
    fn millis(&self) -> u32;
}

pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn millis(&self) -> u32 {
        // Truncation is the wrap-around
        self.start.elapsed().as_millis() as u32
    }
}
