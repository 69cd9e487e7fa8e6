//! Turns noisy, intermittent ball perceptions into a single filtered ball
//! state with a predicted rolling-stop destination.
//!
//! Every perception either merges into the nearest tracked hypothesis or
//! spawns a new one; each hypothesis carries a moving and a resting Kalman
//! sub-model and switches regime with hysteresis so a noisy rolling ball does
//! not flicker to "resting" while a kicked ball is picked up within a cycle.

pub mod hypothesis;
pub mod tracker;

use std::time::{Duration, Instant};

use bevy::prelude::*;
use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

use odal::Config;

use crate::{
    config::ConfigExt,
    cycle::{Cycle, CycleTime},
    odometry::Odometry,
};

pub use hypothesis::BallHypothesis;
pub use tracker::BallTracker;

/// Measurements before a ball estimate is reported as confident.
const CONFIDENT_OBSERVATIONS: u32 = 3;

/// The ball filter plugin estimates the ball position, velocity and resting
/// destination from raw ball perceptions.
pub struct BallFilterPlugin;

impl Plugin for BallFilterPlugin {
    fn build(&self, app: &mut App) {
        if !app.world().contains_resource::<BallFilterConfig>() {
            app.init_config::<BallFilterConfig>();
        }

        app.init_resource::<BallTracker>()
            .init_resource::<BallState>()
            .add_event::<BallPerception>()
            .add_systems(
                Update,
                (prune_hypotheses, predict, measurement_update, publish_ball_state).chain(),
            );
    }
}

#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct BallFilterConfig {
    /// Process noise of the moving model's position covariance per cycle
    pub process_covariance_position: Matrix2<f32>,
    /// Process noise of the moving model's velocity-position cross covariance
    pub process_covariance_velocity_position: Matrix2<f32>,
    /// Process noise of the moving model's velocity covariance
    pub process_covariance_velocity: Matrix2<f32>,
    /// Process noise of the resting model; much smaller, a resting ball barely moves
    pub resting_process_covariance: Matrix2<f32>,
    /// Covariance of a single ball position measurement, must be positive definite
    pub measurement_covariance: Matrix2<f32>,
    /// Prior position covariance of a freshly spawned hypothesis
    pub initial_covariance_position: Matrix2<f32>,
    /// Prior velocity covariance of a freshly spawned hypothesis
    pub initial_covariance_velocity: Matrix2<f32>,
    /// Maximum distance in meters to associate a measurement to a hypothesis
    pub max_association_distance: f32,
    /// Rolling friction coefficient of the ball on the field carpet
    pub ball_friction_mu: f32,
    /// Fraction by which the resting fit must be worse than the moving fit
    /// before a resting ball is demoted back to moving
    pub moving_hysteresis: f32,
    /// Observations required before a stopped ball may latch as resting
    pub min_resting_observations: u32,
}

impl Config for BallFilterConfig {
    const PATH: &'static str = "ball_filter.toml";
}

/// A single ball position candidate from vision, in the robot-relative ground
/// frame, stamped with the source time of its camera image.
///
/// Role-specific gating (a goalkeeper dropping far detections to avoid center
/// circle false positives) is decided by the perceiving side before sending.
#[derive(Event, Debug, Clone, Copy)]
pub struct BallPerception {
    pub position: Point2<f32>,
    pub timestamp: Instant,
    pub cycle: Cycle,
}

/// The published ball estimate, overwritten wholesale every cycle.
#[derive(Resource, Debug, Clone, Default)]
pub struct BallState {
    /// Whether any hypothesis qualified for output this cycle.
    pub found: bool,
    /// The trusted sub-model is the moving one and its speed is nonzero.
    pub moved: bool,
    /// The published hypothesis has accumulated enough measurements.
    pub confident: bool,
    pub position: Point2<f32>,
    pub velocity: Vector2<f32>,
    /// Where the ball is predicted to stop rolling.
    pub destination: Point2<f32>,
    /// Time since the last measurement merged into the published hypothesis.
    pub age: Duration,
    pub last_seen: Option<Instant>,
    pub last_cycle: Option<Cycle>,
}

fn prune_hypotheses(mut tracker: ResMut<BallTracker>) {
    tracker.prune(Instant::now());
}

fn predict(
    mut tracker: ResMut<BallTracker>,
    odometry: Res<Odometry>,
    cycle_time: Res<CycleTime>,
    config: Res<BallFilterConfig>,
) {
    tracker.apply_odometry(&odometry.offset_to_last);
    tracker.predict(cycle_time.duration, &config);
}

fn measurement_update(
    mut tracker: ResMut<BallTracker>,
    mut perceptions: EventReader<BallPerception>,
    config: Res<BallFilterConfig>,
) {
    for perception in perceptions.read() {
        if let Err(error) = tracker.update(
            perception.position,
            perception.timestamp,
            perception.cycle,
            &config,
        ) {
            tracing::warn!("Failed to update ball hypothesis: {error}");
        }
    }
}

fn publish_ball_state(
    tracker: Res<BallTracker>,
    config: Res<BallFilterConfig>,
    mut ball: ResMut<BallState>,
) {
    *ball = match tracker.best() {
        Some(hypothesis) => BallState {
            found: true,
            moved: !hypothesis.is_resting && hypothesis.velocity().norm() > 0.0,
            confident: hypothesis.measurement_count >= CONFIDENT_OBSERVATIONS,
            position: hypothesis.position(),
            velocity: hypothesis.velocity(),
            destination: hypothesis.destination(&config),
            age: hypothesis.last_update.elapsed(),
            last_seen: Some(hypothesis.last_update),
            last_cycle: Some(hypothesis.last_cycle),
        },
        None => BallState::default(),
    };
}

#[cfg(test)]
pub(crate) mod tests {
    use nalgebra::point;

    use super::*;

    pub(crate) fn test_config() -> BallFilterConfig {
        BallFilterConfig {
            process_covariance_position: Matrix2::identity() * 1e-5,
            process_covariance_velocity_position: Matrix2::identity() * 1e-5,
            process_covariance_velocity: Matrix2::identity() * 1e-5,
            resting_process_covariance: Matrix2::identity() * 1e-6,
            measurement_covariance: Matrix2::identity() * 0.01,
            initial_covariance_position: Matrix2::identity() * 0.5,
            initial_covariance_velocity: Matrix2::identity() * 0.5,
            max_association_distance: 1.0,
            ball_friction_mu: 0.1,
            moving_hysteresis: 0.2,
            min_resting_observations: 5,
        }
    }

    fn test_app() -> App {
        let mut app = App::new();
        app.insert_resource(test_config())
            .insert_resource(Odometry::default())
            .insert_resource(CycleTime {
                cycle_start: Instant::now(),
                duration: Duration::from_millis(12),
            })
            .add_plugins(BallFilterPlugin);
        app
    }

    #[test]
    fn no_perceptions_publish_not_found() {
        let mut app = test_app();

        app.update();
        app.update();

        let ball = app.world().resource::<BallState>();
        assert!(!ball.found);
        assert!(!ball.moved);
        assert_eq!(ball.position, Point2::origin());
        assert_eq!(ball.velocity, Vector2::zeros());
    }

    #[test]
    fn perceptions_drive_the_published_ball_state() {
        let mut app = test_app();
        let start = Instant::now();

        app.world_mut().send_event(BallPerception {
            position: point![1.0, 0.0],
            timestamp: start,
            cycle: Cycle(0),
        });
        app.update();

        {
            let ball = app.world().resource::<BallState>();
            assert!(ball.found);
            // a single observation is not confident yet
            assert!(!ball.confident);
            assert_eq!(ball.last_cycle, Some(Cycle(0)));
        }

        for cycle in 1..4 {
            app.world_mut().send_event(BallPerception {
                position: point![1.0, 0.0],
                timestamp: Instant::now(),
                cycle: Cycle(cycle),
            });
            app.update();
        }

        let ball = app.world().resource::<BallState>();
        assert!(ball.found);
        assert!(ball.confident);
        assert!((ball.position - point![1.0, 0.0]).norm() < 0.2);
        assert_eq!(ball.last_cycle, Some(Cycle(3)));
    }

    #[test]
    fn config_file_is_loaded_through_the_plugin() {
        let mut app = App::new();
        app.add_plugins(crate::config::ConfigPlugin::new("../config"))
            .insert_resource(Odometry::default())
            .insert_resource(CycleTime {
                cycle_start: Instant::now(),
                duration: Duration::from_millis(12),
            })
            .add_plugins(BallFilterPlugin);

        let config = app.world().resource::<BallFilterConfig>();
        assert!(config.max_association_distance > 0.0);
        assert!(config.measurement_covariance.trace() > 0.0);
    }

    #[test]
    fn published_state_is_replaced_when_the_ball_disappears() {
        let mut app = test_app();

        app.world_mut().send_event(BallPerception {
            position: point![1.0, 0.0],
            timestamp: Instant::now() - Duration::from_secs(1),
            cycle: Cycle(0),
        });
        app.update();
        assert!(app.world().resource::<BallState>().found);

        // the single-observation hypothesis is already past its age budget
        app.update();
        assert!(!app.world().resource::<BallState>().found);
    }
}
