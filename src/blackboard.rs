use parking_lot::RwLock;
use std::{sync::Arc, time::Instant};

use helm_kinematics::Pose;

/// Robot-wide state shared between the estimator, the chassis and the runner.
#[derive(Debug, Clone)]
pub struct State {
    /// Latest pose estimate, heading in degrees.
    pub pose: Pose,
    /// When the pose was last written.
    pub pose_ts: Instant,
    /// Target of the motion currently being executed, if any.
    pub target: Option<(f64, f64)>,
    pub faults: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        State {
            pose: Pose::default(),
            pose_ts: Instant::now(),
            target: None,
            faults: Vec::new(),
        }
    }
}

pub type Blackboard = Arc<RwLock<State>>;

pub fn snapshot(bb: &Blackboard) -> State {
    (*bb.read()).clone()
}

pub fn set_target(bb: &Blackboard, target: Option<(f64, f64)>) {
    bb.write().target = target;
}

pub fn raise_fault(bb: &Blackboard, msg: &str) {
    let mut g = bb.write();
    if !g.faults.iter().any(|s| s == msg) {
        g.faults.push(msg.to_string());
    }
}

/// Handle to the published pose estimate.
///
/// The estimator writes and the control loop reads from different threads.
/// A whole [`Pose`] is copied under the lock, so a reader never sees `x`, `y`
/// and `theta` from different updates.
#[derive(Debug, Clone, Default)]
pub struct PoseSource {
    bb: Blackboard,
}

impl PoseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blackboard(bb: Blackboard) -> Self {
        Self { bb }
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.bb
    }

    /// Current pose; the heading is converted to radians when `radians` is set.
    pub fn get_pose(&self, radians: bool) -> Pose {
        let pose = self.bb.read().pose;
        if radians { pose.to_radians() } else { pose }
    }

    /// Overwrite the pose; `pose.theta` is read as radians when `radians` is set.
    pub fn set_pose(&self, pose: Pose, radians: bool) {
        let pose = if radians { pose.to_degrees() } else { pose };
        let mut g = self.bb.write();
        g.pose = pose;
        g.pose_ts = Instant::now();
    }

    /// Read-modify-write of the pose under a single lock, for estimators that
    /// integrate from the previous value.
    pub fn update<F>(&self, updater: F) -> Pose
    where
        F: FnOnce(Pose) -> Pose,
    {
        let mut g = self.bb.write();
        g.pose = updater(g.pose);
        g.pose_ts = Instant::now();
        g.pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{f64::consts::PI, thread};

    #[test]
    fn test_pose_round_trips_through_radians() {
        let source = PoseSource::new();
        source.set_pose(Pose::new(1.0, 2.0, PI), true);
        let degrees = source.get_pose(false);
        assert!((degrees.theta - 180.0).abs() < 1e-9);
        assert!((source.get_pose(true).theta - PI).abs() < 1e-9);
        assert_eq!((degrees.x, degrees.y), (1.0, 2.0));
    }

    #[test]
    fn test_faults_are_deduplicated() {
        let source = PoseSource::new();
        raise_fault(source.blackboard(), "heading sensor absent");
        raise_fault(source.blackboard(), "heading sensor absent");
        assert_eq!(snapshot(source.blackboard()).faults.len(), 1);
    }

    #[test]
    fn test_readers_never_observe_torn_poses() {
        let source = PoseSource::new();
        let writer = {
            let source = source.clone();
            thread::spawn(move || {
                for i in 0..10_000 {
                    let v = i as f64;
                    source.set_pose(Pose::new(v, v, v), false);
                }
            })
        };
        for _ in 0..10_000 {
            let pose = source.get_pose(false);
            assert_eq!(pose.x, pose.y);
            assert_eq!(pose.y, pose.theta);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_update_integrates_from_latest_pose() {
        let source = PoseSource::new();
        source.set_pose(Pose::new(0.0, 10.0, 0.0), false);
        let updated = source.update(|p| Pose { y: p.y + 1.0, ..p });
        assert_eq!(updated.y, 11.0);
        assert_eq!(source.get_pose(false).y, 11.0);
    }
}
