use macroquad::prelude::*;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use helm::{
    Pose,
    blackboard::{Blackboard, snapshot},
    bus::PoseSample,
};

pub fn window_conf() -> Conf {
    Conf {
        window_title: "Helm Field View".to_string(),
        window_width: 800,
        window_height: 800,
        high_dpi: true,
        ..Default::default()
    }
}

const FIELD_SIZE: f32 = 144.0; // inches
const VIS_SCALE: f32 = 5.0; // pixels per inch
const ROBOT_SIZE: f32 = 7.0; // inches, nose to center
const TRAIL_LEN: usize = 2000; // points kept behind the robot
const TRAIL_SPACING: f32 = 2.0; // pixels between trail points

/// Field (inches, +y up) to screen (pixels, origin at the window center).
fn to_screen(x: f64, y: f64) -> Vec2 {
    Vec2::new(
        screen_width() / 2.0 + x as f32 * VIS_SCALE,
        screen_height() / 2.0 - y as f32 * VIS_SCALE,
    )
}

/// Screen direction of a compass heading in degrees.
fn heading_dir(theta: f64) -> Vec2 {
    let th = (theta as f32).to_radians();
    Vec2::new(th.sin(), -th.cos())
}

/// Append `point` unless it is within `TRAIL_SPACING` of the newest point,
/// dropping the oldest points past `cap`.
fn push_trail(trail: &mut VecDeque<Vec2>, point: Vec2, cap: usize) {
    if trail.back().is_some_and(|last| last.distance(point) <= TRAIL_SPACING) {
        return;
    }
    trail.push_back(point);
    while trail.len() > cap {
        trail.pop_front();
    }
}

pub async fn run_visualization_loop(mut pose_rx: broadcast::Receiver<Arc<PoseSample>>, bb: Blackboard) {
    let mut pose = Pose::default();
    let mut trail: VecDeque<Vec2> = VecDeque::with_capacity(TRAIL_LEN);

    info!("Visualization loop starting");

    loop {
        match pose_rx.try_recv() {
            Ok(sample) => pose = sample.pose,
            Err(broadcast::error::TryRecvError::Empty) => {}
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Visualization pose receiver lagged");
                while let Ok(sample) = pose_rx.try_recv() {
                    pose = sample.pose;
                }
            }
            Err(broadcast::error::TryRecvError::Closed) => {
                error!("Pose channel closed, stopping visualization");
                break;
            }
        }
        let state = snapshot(&bb);

        clear_background(LIGHTGRAY);
        let corner = to_screen(-FIELD_SIZE as f64 / 2.0, FIELD_SIZE as f64 / 2.0);
        draw_rectangle_lines(corner.x, corner.y, FIELD_SIZE * VIS_SCALE, FIELD_SIZE * VIS_SCALE, 2.0, DARKGRAY);

        if let Some((tx, ty)) = state.target {
            let target = to_screen(tx, ty);
            draw_circle(target.x, target.y, 8.0, RED);
        }

        let center = to_screen(pose.x, pose.y);
        push_trail(&mut trail, center, TRAIL_LEN);
        for (a, b) in trail.iter().zip(trail.iter().skip(1)) {
            draw_line(a.x, a.y, b.x, b.y, 1.0, GRAY);
        }

        let nose = heading_dir(pose.theta);
        let side = Vec2::new(-nose.y, nose.x);
        let size = ROBOT_SIZE * VIS_SCALE;
        let p1 = center + nose * size;
        let p2 = center - nose * size * 0.6 + side * size * 0.7;
        let p3 = center - nose * size * 0.6 - side * size * 0.7;
        draw_triangle(p1, p2, p3, BLUE);
        draw_line(center.x, center.y, p1.x, p1.y, 2.0, DARKBLUE);

        draw_text(&format!("Robot: {}", pose), 10.0, 20.0, 20.0, BLACK);
        let target_text = match state.target {
            Some((x, y)) => format!("Target: x={:.1} y={:.1}", x, y),
            None => "Target: none".to_string(),
        };
        draw_text(&target_text, 10.0, 40.0, 20.0, BLACK);
        for (i, fault) in state.faults.iter().enumerate() {
            draw_text(&format!("Fault: {}", fault), 10.0, 60.0 + 20.0 * i as f32, 20.0, MAROON);
        }

        next_frame().await
    }
}
