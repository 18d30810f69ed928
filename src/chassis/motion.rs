//! Closed-loop motion to a point and turning to face a point.
//!
//! Both motions are a sense → compute → actuate loop running every
//! [`TICK_PERIOD`]: read the pose, compute the axis errors, run them through
//! [`SettlingController`]s and [`slew`], then command the two drive sides.
//! The per-tick computation lives in [`PointApproach`] and [`HeadingTurn`] so
//! it can be exercised without hardware; [`Chassis`] supplies the loop.

use std::time::Duration;

use helm_kinematics::{AngleUnit, Pose, angle_error, bearing_to, deg_to_rad, wrap_angle};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Chassis, DriveMode, TICK_PERIOD};
use crate::{
    blackboard,
    control::{ControllerGains, SettleReason, SettlingController, slew},
    error::ChassisError,
};

/// Distance under which [`PointApproach`] stops steering and commits to the
/// final approach.
pub const CLOSE_RADIUS: f64 = 7.5;

/// Speed floor of the final approach, so slew limiting cannot stall it.
pub const CLOSE_MIN_SPEED: f64 = 30.0;

/// A point motion never finishes before this, even if already settled.
pub const MIN_MOVE_DURATION: Duration = Duration::from_millis(300);

/// Heading errors larger than this are slewed; smaller ones apply instantly.
pub const ANGULAR_SLEW_THRESHOLD: f64 = 25.0;

/// What the `reversed` argument of [`Chassis::move_to`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseHandling {
    /// `reversed` makes the robot back into the point.
    #[default]
    ForceBackward,
    /// `reversed` is ignored; the robot always picks whichever of driving
    /// forwards or backwards needs the shorter rotation.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    pub reverse_handling: ReverseHandling,
    /// Default maximum speed for point motions.
    pub drive_speed: f64,
    /// Default maximum speed for turns.
    pub turn_speed: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            reverse_handling: ReverseHandling::ForceBackward,
            drive_speed: 100.0,
            turn_speed: 90.0,
        }
    }
}

/// How a motion call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    /// The controller settled; `Timeout` means the motion ran out of time.
    Settled(SettleReason),
    /// The competition status changed mid-motion.
    Aborted,
}

/// Power for the left and right drive sides.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriveCommand {
    pub left: f64,
    pub right: f64,
}

impl DriveCommand {
    pub const ZERO: Self = Self { left: 0.0, right: 0.0 };

    pub const fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    /// Mix a forward power and a clockwise turning power.
    pub fn arcade(lateral: f64, angular: f64) -> Self {
        Self::new(lateral + angular, lateral - angular)
    }

    /// Scale both sides by the same ratio so neither exceeds `max_speed`,
    /// keeping the turn radius the mix asked for.
    pub fn desaturate(self, max_speed: f64) -> Self {
        let ratio = self.left.abs().max(self.right.abs()) / max_speed;
        if ratio > 1.0 {
            Self::new(self.left / ratio, self.right / ratio)
        } else {
            self
        }
    }
}

/// One step of a closed-loop motion.
pub trait MotionAlgorithm {
    /// Compute the command for the current pose.
    fn step(&mut self, pose: Pose, elapsed: Duration) -> DriveCommand;

    /// Whether the motion is finished, and why.
    fn finished(&mut self, elapsed: Duration) -> Option<SettleReason>;
}

/// Per-tick state of a move-to-point motion.
#[derive(Debug, Clone)]
pub struct PointApproach {
    target: (f64, f64),
    max_speed: f64,
    force_backward: bool,
    lateral_gains: ControllerGains,
    angular_gains: ControllerGains,
    lateral_pid: SettlingController,
    angular_pid: SettlingController,
    prev_lateral: f64,
    prev_angular: f64,
    close: bool,
}

impl PointApproach {
    pub fn new(
        target: (f64, f64),
        timeout: Duration,
        max_speed: f64,
        lateral: ControllerGains,
        angular: ControllerGains,
    ) -> Self {
        Self {
            target,
            max_speed: max_speed.abs(),
            force_backward: false,
            lateral_gains: lateral,
            angular_gains: angular,
            lateral_pid: SettlingController::new("lateral", lateral, timeout),
            angular_pid: SettlingController::new("angular", angular, timeout),
            prev_lateral: 0.0,
            prev_angular: 0.0,
            close: false,
        }
    }

    /// Always back into the target instead of picking the shorter rotation.
    pub fn backward(mut self, force_backward: bool) -> Self {
        self.force_backward = force_backward;
        self
    }

    pub fn with_logging(mut self, log: bool) -> Self {
        self.lateral_pid = self.lateral_pid.with_logging(log);
        self.angular_pid = self.angular_pid.with_logging(log);
        self
    }

    /// Whether the final approach has been latched.
    pub fn is_close(&self) -> bool {
        self.close
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Lateral and angular power of the last step, before mixing.
    pub fn last_powers(&self) -> (f64, f64) {
        (self.prev_lateral, self.prev_angular)
    }

    /// Angular and lateral error for `pose`, heading already in `[0, 360)`.
    fn errors(&self, pose: Pose, distance: f64) -> (f64, f64) {
        let (x, y) = self.target;
        let target_heading = bearing_to(pose.x, pose.y, x, y);
        let forward = angle_error(pose.theta, target_heading, AngleUnit::Degrees);
        let backward = angle_error(pose.theta, target_heading + 180.0, AngleUnit::Degrees);

        if self.force_backward {
            return (backward, -distance * deg_to_rad(backward.abs()).cos());
        }
        let angular = if forward.abs() < backward.abs() { forward } else { backward };
        // Projected on the forward heading, so a target behind the robot
        // yields a reversing command.
        (angular, distance * deg_to_rad(forward.abs()).cos())
    }
}

impl MotionAlgorithm for PointApproach {
    fn step(&mut self, pose: Pose, elapsed: Duration) -> DriveCommand {
        let pose = Pose { theta: wrap_angle(pose.theta, AngleUnit::Degrees), ..pose };
        let distance = pose.distance(&Pose::new(self.target.0, self.target.1, 0.0));
        let (angular_error, lateral_error) = self.errors(pose, distance);

        let mut lateral = self.lateral_pid.update(lateral_error, elapsed);
        // Positive heading error means the robot points clockwise of the
        // target, which needs a counter-clockwise correction.
        let mut angular = -self.angular_pid.update(angular_error, elapsed);

        if distance < CLOSE_RADIUS && !self.close {
            debug!(distance, "Final approach latched");
            self.close = true;
        }
        if self.close {
            self.max_speed = self.prev_lateral.abs().max(CLOSE_MIN_SPEED);
        }

        if !self.close {
            lateral = slew(lateral, self.prev_lateral, self.lateral_gains.slew);
        }
        if angular_error.abs() > ANGULAR_SLEW_THRESHOLD {
            angular = slew(angular, self.prev_angular, self.angular_gains.slew);
        }

        lateral = lateral.clamp(-self.max_speed, self.max_speed);
        if self.close {
            angular = 0.0;
        }

        self.prev_lateral = lateral;
        self.prev_angular = angular;

        DriveCommand::arcade(lateral, angular).desaturate(self.max_speed)
    }

    fn finished(&mut self, elapsed: Duration) -> Option<SettleReason> {
        if self.lateral_pid.is_settled(elapsed) && elapsed >= MIN_MOVE_DURATION {
            self.lateral_pid.exit_reason()
        } else {
            None
        }
    }
}

/// Per-tick state of a turn-to-face-a-point motion.
#[derive(Debug, Clone)]
pub struct HeadingTurn {
    target: (f64, f64),
    max_speed: f64,
    reversed: bool,
    pid: SettlingController,
}

impl HeadingTurn {
    pub fn new(target: (f64, f64), timeout: Duration, max_speed: f64, angular: ControllerGains) -> Self {
        Self {
            target,
            max_speed: max_speed.abs(),
            reversed: false,
            pid: SettlingController::new("angular", angular, timeout),
        }
    }

    /// Face away from the target instead of towards it.
    pub fn reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }

    pub fn with_logging(mut self, log: bool) -> Self {
        self.pid = self.pid.with_logging(log);
        self
    }

    /// Heading error for `pose`: positive when the robot points clockwise of
    /// the bearing to the target.
    pub fn error(&self, pose: Pose) -> f64 {
        let raw = if self.reversed { pose.theta - 180.0 } else { pose.theta };
        let theta = wrap_angle(raw, AngleUnit::Degrees);
        let bearing = bearing_to(pose.x, pose.y, self.target.0, self.target.1);
        angle_error(theta, bearing, AngleUnit::Degrees)
    }
}

impl MotionAlgorithm for HeadingTurn {
    fn step(&mut self, pose: Pose, elapsed: Duration) -> DriveCommand {
        let error = self.error(pose);
        let power = self.pid.update(error, elapsed).clamp(-self.max_speed, self.max_speed);
        DriveCommand::new(-power, power)
    }

    fn finished(&mut self, elapsed: Duration) -> Option<SettleReason> {
        if self.pid.is_settled(elapsed) { self.pid.exit_reason() } else { None }
    }
}

impl Chassis {
    /// Drive until the robot reaches `(x, y)`.
    ///
    /// Blocks until the lateral controller settles (and at least 300 ms have
    /// passed), `timeout` elapses, or the competition status changes. Both
    /// sides are stopped before returning.
    ///
    /// `reversed` backs the robot into the point unless the chassis is
    /// configured with [`ReverseHandling::Ignore`].
    pub fn move_to(
        &mut self,
        x: f64,
        y: f64,
        timeout: Duration,
        max_speed: f64,
        reversed: bool,
        log: bool,
    ) -> Result<MotionOutcome, ChassisError> {
        self.require_motion("move_to")?;
        let force_backward = reversed && self.motion.reverse_handling == ReverseHandling::ForceBackward;
        info!(x, y, ?timeout, max_speed, reversed, force_backward, "Moving to point");
        let mut approach = PointApproach::new((x, y), timeout, max_speed, self.lateral, self.angular)
            .backward(force_backward)
            .with_logging(log);
        self.run_motion((x, y), &mut approach)
    }

    /// Turn in place until the robot faces `(x, y)` (or faces away from it
    /// when `reversed`).
    pub fn turn_to(
        &mut self,
        x: f64,
        y: f64,
        timeout: Duration,
        reversed: bool,
        max_speed: f64,
        log: bool,
    ) -> Result<MotionOutcome, ChassisError> {
        self.require_motion("turn_to")?;
        info!(x, y, ?timeout, max_speed, reversed, "Turning to face point");
        let mut turn = HeadingTurn::new((x, y), timeout, max_speed, self.angular)
            .reversed(reversed)
            .with_logging(log);
        self.run_motion((x, y), &mut turn)
    }

    fn require_motion(&self, operation: &'static str) -> Result<(), ChassisError> {
        if !self.is_calibrated() {
            return Err(ChassisError::NotCalibrated);
        }
        self.require_mode(operation, DriveMode::Autonomous)
    }

    fn run_motion<M: MotionAlgorithm>(
        &mut self,
        target: (f64, f64),
        algorithm: &mut M,
    ) -> Result<MotionOutcome, ChassisError> {
        let start = self.clock.now();
        let status = self.competition.status();
        let bb = self.pose.blackboard().clone();
        blackboard::set_target(&bb, Some(target));

        let result = self.motion_loop(start, status, algorithm);

        blackboard::set_target(&bb, None);
        let stopped = self.stop();
        let outcome = result?;
        stopped?;

        let pose = self.pose.get_pose(false);
        info!(?outcome, elapsed = ?self.clock.now().saturating_sub(start), %pose, "Motion finished");
        Ok(outcome)
    }

    fn motion_loop<M: MotionAlgorithm>(
        &self,
        start: Duration,
        status: helm_devices::CompetitionStatus,
        algorithm: &mut M,
    ) -> Result<MotionOutcome, ChassisError> {
        loop {
            if self.competition.status() != status {
                warn!("Competition status changed, aborting motion");
                return Ok(MotionOutcome::Aborted);
            }
            let elapsed = self.clock.now().saturating_sub(start);
            if let Some(reason) = algorithm.finished(elapsed) {
                return Ok(MotionOutcome::Settled(reason));
            }

            let pose = self.pose.get_pose(false);
            let command = algorithm.step(pose, elapsed);
            self.command(command)?;

            self.clock.sleep(TICK_PERIOD);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(5000);

    fn approach(target: (f64, f64)) -> PointApproach {
        PointApproach::new(target, TIMEOUT, 100.0, ControllerGains::lateral(), ControllerGains::angular())
    }

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_aligned_start_drives_straight_forward() {
        let mut approach = approach((0.0, 48.0));
        let command = approach.step(Pose::new(0.0, 0.0, 0.0), ms(0));
        assert!(command.left > 0.0);
        assert_eq!(command.left, command.right);
        // First tick is limited by the lateral slew.
        assert!((command.left - ControllerGains::lateral().slew).abs() < 1e-9);
    }

    #[test]
    fn test_lateral_power_ramps_by_slew() {
        let mut approach = approach((0.0, 48.0));
        let pose = Pose::new(0.0, 0.0, 0.0);
        let first = approach.step(pose, ms(0));
        let second = approach.step(pose, ms(10));
        assert!((second.left - first.left - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_heading_error_steers_towards_target() {
        // Target straight ahead along +y, robot pointed 20° clockwise of it:
        // the robot must turn counter-clockwise, so right side runs faster.
        let mut approach = approach((0.0, 48.0));
        let command = approach.step(Pose::new(0.0, 0.0, 20.0), ms(0));
        assert!(command.right > command.left);
    }

    #[test]
    fn test_angular_slew_only_above_threshold() {
        let gains = ControllerGains::angular();

        // 20° is inside the threshold: the full PD output goes out on the first tick.
        let mut small = approach((0.0, 48.0));
        small.step(Pose::new(0.0, 0.0, 20.0), ms(0));
        let expected = -(gains.kp * 20.0 + gains.kd * 20.0);
        assert!((small.last_powers().1 - expected).abs() < 1e-9);
        assert!((expected + 240.0).abs() < 1e-9);

        // 30° is past it, so the first tick is limited to one slew step.
        let mut large = approach((0.0, 48.0));
        large.step(Pose::new(0.0, 0.0, 30.0), ms(0));
        assert!((large.last_powers().1 + gains.slew).abs() < 1e-9);
    }

    #[test]
    fn test_target_behind_drives_backwards() {
        let mut approach = approach((0.0, -48.0));
        let command = approach.step(Pose::new(0.0, 0.0, 0.0), ms(0));
        assert!(command.left < 0.0 && command.right < 0.0);
        assert!((command.left - command.right).abs() < 1e-9);
    }

    #[test]
    fn test_unnormalized_heading_is_reduced() {
        let mut wrapped = approach((10.0, 40.0));
        let mut raw = approach((10.0, 40.0));
        let a = wrapped.step(Pose::new(0.0, 0.0, 15.0), ms(0));
        let b = raw.step(Pose::new(0.0, 0.0, 15.0 + 720.0), ms(0));
        assert!((a.left - b.left).abs() < 1e-9);
        assert!((a.right - b.right).abs() < 1e-9);
    }

    #[test]
    fn test_proximity_latch_zeroes_angular_power_for_rest_of_motion() {
        let mut approach = approach((0.0, 48.0));
        approach.step(Pose::new(0.0, 0.0, 0.0), ms(0));
        assert!(!approach.is_close());

        approach.step(Pose::new(1.0, 42.0, 30.0), ms(10));
        assert!(approach.is_close());
        assert_eq!(approach.last_powers().1, 0.0);

        // Moving back outside the radius does not unlatch.
        for (i, pose) in [Pose::new(5.0, 30.0, -40.0), Pose::new(-3.0, 20.0, 90.0)].into_iter().enumerate() {
            let command = approach.step(pose, ms(20 + 10 * i as u64));
            assert!(approach.is_close());
            assert_eq!(approach.last_powers().1, 0.0);
            assert!((command.left - command.right).abs() < 1e-9);
        }
    }

    #[test]
    fn test_close_speed_floor() {
        let mut approach = approach((0.0, 48.0));
        approach.step(Pose::new(0.0, 45.0, 0.0), ms(0));
        assert!(approach.is_close());
        assert!((approach.max_speed() - CLOSE_MIN_SPEED).abs() < 1e-9);
    }

    #[test]
    fn test_desaturate_preserves_ratio() {
        for (left, right) in [(150.0, 50.0), (-200.0, 120.0), (90.0, -300.0), (101.0, 100.0)] {
            let command = DriveCommand::new(left, right).desaturate(100.0);
            assert!(command.left.abs().max(command.right.abs()) <= 100.0 + 1e-9);
            assert!((command.left / command.right - left / right).abs() < 1e-9);
        }
        let untouched = DriveCommand::new(60.0, -40.0).desaturate(100.0);
        assert_eq!(untouched, DriveCommand::new(60.0, -40.0));
    }

    #[test]
    fn test_force_backward_backs_into_target_ahead() {
        let mut approach = approach((0.0, 48.0)).backward(true);
        // Robot facing the target: backing in needs half a turn, so the
        // angular power is pinned at its slew limit.
        approach.step(Pose::new(0.0, 0.0, 0.0), ms(0));
        let (_, angular) = approach.last_powers();
        assert!((angular.abs() - ControllerGains::angular().slew).abs() < 1e-9);

        // Without forcing, the same pose needs no rotation at all.
        let mut free = PointApproach::new(
            (0.0, 48.0),
            TIMEOUT,
            100.0,
            ControllerGains::lateral(),
            ControllerGains::angular(),
        );
        free.step(Pose::new(0.0, 0.0, 0.0), ms(0));
        assert_eq!(free.last_powers().1, 0.0);

        // Facing away from the target, backing in is straight.
        let mut approach = PointApproach::new(
            (0.0, 48.0),
            TIMEOUT,
            100.0,
            ControllerGains::lateral(),
            ControllerGains::angular(),
        )
        .backward(true);
        let command = approach.step(Pose::new(0.0, 0.0, 180.0), ms(0));
        assert!(command.left < 0.0);
        assert!((command.left - command.right).abs() < 1e-9);
    }

    #[test]
    fn test_point_motion_has_minimum_duration() {
        let gains = ControllerGains {
            small_error_timeout: Duration::ZERO,
            ..ControllerGains::lateral()
        };
        let mut approach = PointApproach::new((0.0, 0.5), TIMEOUT, 100.0, gains, ControllerGains::angular());
        approach.step(Pose::new(0.0, 0.0, 0.0), ms(0));
        assert_eq!(approach.finished(ms(0)), None);
        assert_eq!(approach.finished(ms(290)), None);
        assert_eq!(approach.finished(ms(300)), Some(SettleReason::SmallError));
    }

    #[test]
    fn test_turn_commands_pure_rotation() {
        let mut turn = HeadingTurn::new((10.0, 0.0), TIMEOUT, 90.0, ControllerGains::angular());
        // Target at bearing 90°, robot at 0°: clockwise turn, left forward.
        let command = turn.step(Pose::new(0.0, 0.0, 0.0), ms(0));
        assert!(command.left > 0.0);
        assert_eq!(command.left, -command.right);
        assert!(command.left <= 90.0);
    }

    #[test]
    fn test_turn_error_wraps_and_reverses() {
        let turn = HeadingTurn::new((0.0, 10.0), TIMEOUT, 90.0, ControllerGains::angular());
        assert!((turn.error(Pose::new(0.0, 0.0, 350.0)) - (-10.0)).abs() < 1e-9);
        assert!((turn.error(Pose::new(0.0, 0.0, -350.0)) - 10.0).abs() < 1e-9);

        let reversed = turn.clone().reversed(true);
        assert!(reversed.error(Pose::new(0.0, 0.0, 180.0)).abs() < 1e-9);
        assert!((reversed.error(Pose::new(0.0, 0.0, 190.0)) - 10.0).abs() < 1e-9);
    }
}
