mod graphics;

use graphics::window_conf;
use helm::{
    Chassis, ChassisError, DrivetrainConfig, MotionOutcome, PoseSource,
    blackboard::{Blackboard, raise_fault, snapshot},
    bus::{PoseSample, Topic},
    chassis::TICK_PERIOD,
    config::{self, RouteStep, Settings},
    sensors::SensorBundle,
    sim::SimDrivetrain,
};
use helm_devices::CompetitionStatus;

use spin_sleep::SpinSleeper;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// A pose older than this means the sensor loop has stalled.
const POSE_STALE_AFTER: Duration = Duration::from_millis(100);

#[macroquad::main(window_conf)]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Helm started. Loading configuration and spawning the simulated robot...");

    let settings = match config::load_config() {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Falling back to default settings: {}", e);
            Settings::default()
        }
    };

    let tokio_rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start Tokio runtime: {}", e);
            return;
        }
    };

    let bb: Blackboard = Arc::default();
    let pose_topic: Topic<PoseSample> = Topic::new(16);
    let pose_rx_for_vis = pose_topic.subscribe();

    tokio_rt.spawn({
        let bb = bb.clone();
        async move {
            match run(settings, bb, pose_topic).await {
                Ok(()) => info!("Robot tasks finished successfully."),
                Err(e) => error!("Robot tasks failed: {:?}", e),
            }
        }
    });

    graphics::run_visualization_loop(pose_rx_for_vis, bb).await;
}

async fn run(settings: Settings, bb: Blackboard, pose_topic: Topic<PoseSample>) -> anyhow::Result<()> {
    let pose = PoseSource::from_blackboard(bb.clone());
    let plant = Arc::new(SimDrivetrain::new(settings.drivetrain, settings.simulation, pose.clone())?);
    let pose_rx = pose_topic.subscribe();

    info!("Spawning sensor thread...");
    std::thread::Builder::new().name("sensor".into()).spawn({
        let plant = Arc::clone(&plant);
        move || {
            info!("Sensor thread started.");
            let sleeper = SpinSleeper::new(10_000);
            loop {
                plant.step(TICK_PERIOD);
                let sample = PoseSample {
                    pose: plant.pose_source().get_pose(false),
                    stamp: plant.time(),
                };
                pose_topic.publish(sample);
                sleeper.sleep(TICK_PERIOD);
            }
        }
    })?;

    info!("Spawning control thread...");
    let drivetrain = plant.drivetrain_config()?;
    std::thread::Builder::new().name("control".into()).spawn({
        let plant = Arc::clone(&plant);
        move || {
            info!("Control thread started.");
            if let Err(e) = control(&settings, drivetrain, &plant, pose) {
                error!("Control thread stopped: {}", e);
            }
        }
    })?;

    info!("Starting async tasks (telemetry, watchdog)...");
    tokio::try_join!(telemetry(pose_rx), watchdog(bb))?;
    Ok(())
}

/// Calibrate, run the autonomous route, then hold position under driver
/// control.
fn control(
    settings: &Settings,
    drivetrain: DrivetrainConfig,
    plant: &SimDrivetrain,
    pose: PoseSource,
) -> Result<(), ChassisError> {
    let mut chassis = Chassis::new(
        drivetrain,
        settings.lateral,
        settings.angular,
        SensorBundle::with_imu(plant.heading_sensor()),
    )
    .with_pose_source(pose)
    .with_competition(Arc::new(plant.field().clone()))
    .with_motion_settings(settings.motion)
    .with_teleop_settings(settings.teleop);

    let report = chassis.calibrate();
    if !report.is_clean() {
        warn!(?report, "Calibration degraded");
    }

    chassis.enter_autonomous()?;
    for step in &settings.route {
        let outcome = run_step(&mut chassis, settings, *step)?;
        if outcome == MotionOutcome::Aborted {
            warn!("Autonomous route aborted");
            break;
        }
    }

    plant.field().set_status(CompetitionStatus::DRIVER);
    chassis.enter_driver()?;
    let kp = chassis.teleop_settings().active_brake_kp;
    let sleeper = SpinSleeper::new(10_000);
    loop {
        // No joystick is attached to the simulation: sticks stay centered.
        chassis.drive(0.0, 0.0, kp)?;
        sleeper.sleep(TICK_PERIOD);
    }
}

fn run_step(chassis: &mut Chassis, settings: &Settings, step: RouteStep) -> Result<MotionOutcome, ChassisError> {
    match step {
        RouteStep::MoveTo { x, y, timeout, max_speed, reversed } => {
            let max_speed = max_speed.unwrap_or(settings.motion.drive_speed);
            chassis.move_to(x, y, timeout, max_speed, reversed, false)
        }
        RouteStep::TurnTo { x, y, timeout, max_speed, reversed } => {
            let max_speed = max_speed.unwrap_or(settings.motion.turn_speed);
            chassis.turn_to(x, y, timeout, reversed, max_speed, false)
        }
    }
}

async fn telemetry(mut pose_rx: broadcast::Receiver<Arc<PoseSample>>) -> anyhow::Result<()> {
    info!("Telemetry task started.");
    let mut last_report = Duration::ZERO;
    loop {
        match pose_rx.recv().await {
            Ok(sample) => {
                if sample.stamp.saturating_sub(last_report) >= Duration::from_secs(1) {
                    debug!(stamp = ?sample.stamp, pose = %sample.pose, "Pose");
                    last_report = sample.stamp;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => debug!(skipped, "Telemetry lagged"),
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

async fn watchdog(bb: Blackboard) -> anyhow::Result<()> {
    info!("Watchdog task started.");
    let mut tick = tokio::time::interval(Duration::from_millis(25));
    let mut stale = false;
    loop {
        tick.tick().await;
        let pose_ts = snapshot(&bb).pose_ts;
        let age = Instant::now() - pose_ts;
        if age > POSE_STALE_AFTER && !stale {
            warn!(?age, "Pose estimate is stale!");
            raise_fault(&bb, "pose estimate stale");
        }
        stale = age > POSE_STALE_AFTER;
    }
}
