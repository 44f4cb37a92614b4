//! One-sided clock synchronization against the session's host.
//!
//! A client periodically pings; the host's pong echoes the client's
//! original timestamp. From `now - echo` we get a round-trip sample,
//! and assuming the return leg took half the round trip, the host
//! stamped its clock at roughly `echo + rtt/2`. The difference between
//! that and our own clock is the offset applied to host timestamps.

const SMOOTHING: f64 = 0.1;

/// Smoothed round-trip and clock-offset estimates.
///
/// Both estimates use the same exponential smoothing: the first sample
/// is taken as-is, later samples are blended in at weight 0.1, so a
/// single congested ping cannot yank the clock around.
#[derive(Debug, Default, Clone)]
pub struct ClockSync {
    rtt_ms: Option<f64>,
    offset_ms: Option<f64>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in a raw round-trip sample in milliseconds.
    pub fn record_rtt(&mut self, sample_ms: f64) {
        self.rtt_ms = Some(match self.rtt_ms {
            None => sample_ms,
            Some(rtt) => rtt * (1.0 - SMOOTHING) + sample_ms * SMOOTHING,
        });
    }

    /// Processes a pong that echoes our ping timestamp `echo_ms`,
    /// received at local time `now_ms`.
    ///
    /// The offset sample uses the round-trip estimate as it stood
    /// before this pong, then the fresh round trip is folded in.
    pub fn record_pong(&mut self, echo_ms: u64, now_ms: u64) {
        let round_trip = now_ms.saturating_sub(echo_ms) as f64;
        let rtt = self.rtt_ms.unwrap_or(round_trip);
        let sample = (echo_ms as f64 + rtt / 2.0) - now_ms as f64;
        self.offset_ms = Some(match self.offset_ms {
            None => sample,
            Some(offset) => offset * (1.0 - SMOOTHING) + sample * SMOOTHING,
        });
        self.record_rtt(round_trip);
    }

    /// Estimated offset of the host clock relative to ours, rounded to
    /// whole milliseconds. Zero before the first pong.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.map(|o| o.round() as i64).unwrap_or(0)
    }

    /// Smoothed round trip in milliseconds, clamped into the byte used
    /// by latency reporting. Zero before the first sample.
    pub fn rtt_ms(&self) -> u8 {
        self.rtt_ms
            .map(|r| r.round().clamp(0.0, 255.0) as u8)
            .unwrap_or(0)
    }

    /// Translates a local timestamp onto the host's clock.
    pub fn to_host_time(&self, local_ms: u64) -> u64 {
        local_ms.saturating_add_signed(self.offset_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_pong_uses_round_trip_as_rtt_seed() {
        let mut clock = ClockSync::new();
        // Ping echoed at 1000, received at 1100: 100ms round trip and,
        // with no prior estimate, offset (1000 + 50) - 1100 = -50.
        clock.record_pong(1000, 1100);
        assert_eq!(clock.offset_ms(), -50);
        assert_eq!(clock.rtt_ms(), 100);
    }

    #[test]
    fn test_offset_uses_preexisting_rtt_estimate() {
        let mut clock = ClockSync::new();
        clock.record_rtt(40.0);
        // offset sample = (1000 + 40/2) - 1100 = -80, taken directly.
        clock.record_pong(1000, 1100);
        assert_eq!(clock.offset_ms(), -80);
    }

    #[test]
    fn test_offset_smooths_later_samples_at_a_tenth() {
        let mut clock = ClockSync::new();
        clock.record_rtt(40.0);
        clock.record_pong(1000, 1100);
        assert_eq!(clock.offset_ms(), -80);

        // Second pong: rtt estimate is now 0.9*40 + 0.1*100 = 46;
        // sample = (2000 + 23) - 2063 = -40 → 0.9*(-80) + 0.1*(-40).
        clock.record_pong(2000, 2063);
        assert_eq!(clock.offset_ms(), -76);
    }

    #[test]
    fn test_rtt_smooths_and_clamps_to_byte() {
        let mut clock = ClockSync::new();
        clock.record_rtt(100.0);
        clock.record_rtt(200.0);
        assert_eq!(clock.rtt_ms(), 110);

        let mut slow = ClockSync::new();
        slow.record_rtt(10_000.0);
        assert_eq!(slow.rtt_ms(), 255);
    }

    #[test]
    fn test_defaults_before_any_sample() {
        let clock = ClockSync::new();
        assert_eq!(clock.offset_ms(), 0);
        assert_eq!(clock.rtt_ms(), 0);
        assert_eq!(clock.to_host_time(500), 500);
    }

    #[test]
    fn test_to_host_time_applies_offset() {
        let mut clock = ClockSync::new();
        clock.record_rtt(40.0);
        clock.record_pong(1000, 1100);
        assert_eq!(clock.to_host_time(2000), 1920);
    }
}
