/// Debounce state of one axis, owned by the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisMonitorState {
    /// Consecutive polls that reported a pre-warning.
    pub otpw_count: u8,
    /// Latched once any pre-warning is seen; cleared by M912 only.
    pub otpw_triggered: bool,
}

impl AxisMonitorState {
    pub fn record(&mut self, otpw: bool) {
        if otpw {
            self.otpw_count = self.otpw_count.saturating_add(1);
            self.otpw_triggered = true;
        } else {
            self.otpw_count = 0;
        }
    }

    pub fn clear_prewarn(&mut self) {
        self.otpw_triggered = false;
    }
}
