//! PD evaluator with settle detection.
//!
//! Every motion call owns one controller per axis. The controller turns the
//! error of its axis into a power and decides when the motion is finished:
//!
//! 1. the motion has run for its whole timeout,
//! 2. the error stayed within `small_error` for `small_error_timeout`, or
//! 3. the error stayed within `large_error` for `large_error_timeout`.
//!
//! Band timers restart whenever the error leaves the band. Once settled the
//! controller stays settled; it is dropped at the end of the motion.
//!
//! There is no integral term.

use std::time::Duration;

use tracing::debug;

use super::ControllerGains;

/// Why a [`SettlingController`] declared its motion finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleReason {
    /// The error held inside the small band long enough.
    SmallError,
    /// The error held inside the large band long enough.
    LargeError,
    /// The motion ran out of time, regardless of error.
    Timeout,
}

#[derive(Debug, Clone)]
pub struct SettlingController {
    name: &'static str,
    gains: ControllerGains,
    timeout: Duration,
    log: bool,
    prev_error: f64,
    last_error: Option<f64>,
    small_since: Option<Duration>,
    large_since: Option<Duration>,
    exit: Option<SettleReason>,
}

impl SettlingController {
    /// A controller for a motion that gives up after `timeout`.
    ///
    /// All times passed to [`update`](Self::update) and
    /// [`is_settled`](Self::is_settled) are measured from the start of that
    /// motion.
    pub fn new(name: &'static str, gains: ControllerGains, timeout: Duration) -> Self {
        Self {
            name,
            gains,
            timeout,
            log: false,
            prev_error: 0.0,
            last_error: None,
            small_since: None,
            large_since: None,
            exit: None,
        }
    }

    /// Emit a debug event for every update.
    pub fn with_logging(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Feed the current error and get the output power.
    ///
    /// `power = kp * error + kd * (error - previous error)`.
    pub fn update(&mut self, error: f64, now: Duration) -> f64 {
        let derivative = error - self.prev_error;
        let power = self.gains.kp * error + self.gains.kd * derivative;
        self.prev_error = error;
        self.last_error = Some(error);

        self.small_since = band_entry(self.small_since, error, self.gains.small_error, now);
        self.large_since = band_entry(self.large_since, error, self.gains.large_error, now);

        if self.log {
            debug!(controller = self.name, error, derivative, power, "pid update");
        }
        power
    }

    /// Whether the motion is finished at `now`.
    pub fn is_settled(&mut self, now: Duration) -> bool {
        if self.exit.is_none() {
            self.exit = self.evaluate_exit(now);
            if let Some(reason) = self.exit {
                debug!(controller = self.name, ?reason, ?now, error = ?self.last_error, "settled");
            }
        }
        self.exit.is_some()
    }

    /// The exit condition that fired, once settled.
    pub fn exit_reason(&self) -> Option<SettleReason> {
        self.exit
    }

    /// The error passed to the most recent update.
    pub fn last_error(&self) -> Option<f64> {
        self.last_error
    }

    fn evaluate_exit(&self, now: Duration) -> Option<SettleReason> {
        if now >= self.timeout {
            return Some(SettleReason::Timeout);
        }
        let dwelled = |since: Option<Duration>, required: Duration| {
            since.is_some_and(|since| now.saturating_sub(since) >= required)
        };
        if dwelled(self.small_since, self.gains.small_error_timeout) {
            return Some(SettleReason::SmallError);
        }
        if dwelled(self.large_since, self.gains.large_error_timeout) {
            return Some(SettleReason::LargeError);
        }
        None
    }
}

/// Keeps the entry time while `error` stays inside `band`, forgets it otherwise.
fn band_entry(since: Option<Duration>, error: f64, band: f64, now: Duration) -> Option<Duration> {
    if error.abs() <= band { Some(since.unwrap_or(now)) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const TICK: Duration = Duration::from_millis(10);

    fn gains() -> ControllerGains {
        ControllerGains::lateral()
    }

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_output_is_proportional_plus_derivative() {
        let mut pid = SettlingController::new("lateral", gains(), ms(5000));
        // First update differentiates against an initial error of zero.
        assert!((pid.update(2.0, ms(0)) - (10.0 * 2.0 + 30.0 * 2.0)).abs() < 1e-9);
        assert!((pid.update(1.5, ms(10)) - (10.0 * 1.5 + 30.0 * -0.5)).abs() < 1e-9);
        assert!((pid.update(1.5, ms(20)) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_band_dwell_settles_in_time() {
        let mut pid = SettlingController::new("lateral", gains(), ms(5000));
        let mut now = ms(0);
        let entered = now;
        loop {
            pid.update(0.5, now);
            if pid.is_settled(now) {
                break;
            }
            now += TICK;
            assert!(now <= ms(1000), "never settled");
        }
        assert!(now - entered <= gains().small_error_timeout);
        assert_eq!(pid.exit_reason(), Some(SettleReason::SmallError));
    }

    #[test]
    fn test_large_band_dwell_allows_coarse_exit() {
        let mut pid = SettlingController::new("lateral", gains(), ms(5000));
        let mut now = ms(0);
        while !pid.is_settled(now) {
            pid.update(2.5, now);
            now += TICK;
        }
        assert_eq!(pid.exit_reason(), Some(SettleReason::LargeError));
        assert!(now >= gains().large_error_timeout);
        assert!(now <= gains().large_error_timeout + 2 * TICK);
    }

    #[test]
    fn test_leaving_a_band_restarts_its_timer() {
        let mut pid = SettlingController::new("lateral", gains(), ms(5000));
        pid.update(0.5, ms(0));
        assert!(!pid.is_settled(ms(50)));
        pid.update(5.0, ms(60));
        pid.update(0.5, ms(70));
        assert!(!pid.is_settled(ms(120)));
        assert!(pid.is_settled(ms(170)));
        assert_eq!(pid.exit_reason(), Some(SettleReason::SmallError));
    }

    #[test]
    fn test_timeout_fires_regardless_of_error() {
        let mut pid = SettlingController::new("angular", ControllerGains::angular(), ms(300));
        let mut now = ms(0);
        while !pid.is_settled(now) {
            pid.update(90.0, now);
            now += TICK;
        }
        assert_eq!(now, ms(300));
        assert_eq!(pid.exit_reason(), Some(SettleReason::Timeout));
    }

    #[test]
    fn test_settled_is_terminal() {
        let mut pid = SettlingController::new("lateral", gains(), ms(5000));
        pid.update(0.0, ms(0));
        assert!(pid.is_settled(ms(100)));
        pid.update(40.0, ms(110));
        assert!(pid.is_settled(ms(120)));
        assert_eq!(pid.exit_reason(), Some(SettleReason::SmallError));
    }

    #[rstest]
    #[case(0.5, SettleReason::SmallError)]
    #[case(2.0, SettleReason::LargeError)]
    fn test_zero_dwell_exits_on_band_entry(#[case] error: f64, #[case] expected: SettleReason) {
        let gains = ControllerGains {
            small_error_timeout: Duration::ZERO,
            large_error_timeout: Duration::ZERO,
            ..gains()
        };
        let mut pid = SettlingController::new("lateral", gains, ms(5000));
        pid.update(10.0, ms(0));
        assert!(!pid.is_settled(ms(0)));
        pid.update(error, ms(10));
        assert!(pid.is_settled(ms(10)));
        assert_eq!(pid.exit_reason(), Some(expected));
    }

    #[test]
    fn test_not_settled_before_any_error_is_seen() {
        let mut pid = SettlingController::new("lateral", gains(), ms(5000));
        assert!(!pid.is_settled(ms(4990)));
        assert!(pid.last_error().is_none());
    }
}
