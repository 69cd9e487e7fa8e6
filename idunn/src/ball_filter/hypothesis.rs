use std::time::{Duration, Instant};

use filter::{ConstantVelocityFilter, LowPassFilter, PositionFilter, Result};
use nalgebra::{Isometry2, Point2, Vector2};

use crate::cycle::Cycle;

use super::BallFilterConfig;

/// Gravitational acceleration in m/s².
const GRAVITY: f32 = 9.81;

/// Weight of the newest residual in the smoothed sub-model error.
const RESIDUAL_BLEND: f32 = 0.2;

/// Kalman state assuming the ball rolls with a nonzero velocity.
#[derive(Debug, Clone)]
pub struct MovingModel {
    pub filter: ConstantVelocityFilter,
    /// Smoothed norm of the innovation, used for the regime hysteresis.
    pub error: LowPassFilter<f32>,
}

/// Kalman state assuming the ball lies still.
#[derive(Debug, Clone)]
pub struct RestingModel {
    pub filter: PositionFilter,
    pub error: LowPassFilter<f32>,
}

/// One candidate ball track.
///
/// Both sub-models are carried and updated every cycle regardless of the
/// regime; `is_resting` only selects which of them is trusted for output.
#[derive(Debug, Clone)]
pub struct BallHypothesis {
    pub moving: MovingModel,
    pub resting: RestingModel,
    pub is_resting: bool,
    /// Number of measurements ever merged into this hypothesis.
    pub measurement_count: u32,
    pub last_update: Instant,
    pub last_cycle: Cycle,
}

impl BallHypothesis {
    /// A fresh hypothesis spawned from a single unassociated measurement.
    #[must_use]
    pub fn new(
        measurement: Point2<f32>,
        timestamp: Instant,
        cycle: Cycle,
        config: &BallFilterConfig,
    ) -> Self {
        let residual_error = LowPassFilter::new(0.0, 1.0 - RESIDUAL_BLEND, RESIDUAL_BLEND);

        Self {
            moving: MovingModel {
                filter: ConstantVelocityFilter::new(
                    measurement,
                    config.initial_covariance_position,
                    config.initial_covariance_velocity,
                ),
                error: residual_error,
            },
            resting: RestingModel {
                filter: PositionFilter::new(measurement, config.initial_covariance_position),
                error: residual_error,
            },
            is_resting: false,
            measurement_count: 1,
            last_update: timestamp,
            last_cycle: cycle,
        }
    }

    /// Reproject both sub-models into the robot frame of the current cycle.
    ///
    /// The filter lives in the robot's own frame, so the robot's motion since
    /// the last cycle moves the ball the opposite way: positions transform by
    /// the inverse offset, the velocity only rotates.
    pub fn apply_odometry(&mut self, offset_to_last: &Isometry2<f32>) {
        let inverse = offset_to_last.inverse();

        self.moving.filter.position = inverse.transform_point(&self.moving.filter.position);
        self.moving.filter.velocity = inverse.rotation * self.moving.filter.velocity;
        self.resting.filter.position = inverse.transform_point(&self.resting.filter.position);
    }

    /// Advance both sub-models by `dt` under the rolling friction model.
    pub fn predict(&mut self, dt: Duration, config: &BallFilterConfig) {
        let dt = dt.as_secs_f32();
        let deceleration = config.ball_friction_mu * GRAVITY;
        let speed = self.moving.filter.velocity.norm();

        if speed <= deceleration * dt {
            // friction would overshoot past zero within this step, clamp
            self.moving.filter.velocity = Vector2::zeros();

            if self.measurement_count > config.min_resting_observations {
                self.is_resting = true;
                self.resting.filter.position = self.moving.filter.position;
            }
        } else {
            // semi-implicit Euler, position advances with the pre-decrement velocity
            self.moving.filter.position += self.moving.filter.velocity * dt;
            self.moving.filter.velocity -=
                self.moving.filter.velocity / speed * (deceleration * dt);
        }

        self.moving.filter.predict_covariance(
            dt,
            config.process_covariance_position,
            config.process_covariance_velocity_position,
            config.process_covariance_velocity,
        );
        self.resting
            .filter
            .predict_covariance(config.resting_process_covariance);
    }

    /// Merge a measurement into both sub-models and re-evaluate the regime.
    pub fn update(
        &mut self,
        measurement: Point2<f32>,
        timestamp: Instant,
        cycle: Cycle,
        config: &BallFilterConfig,
    ) -> Result<()> {
        let moving_residual = self
            .moving
            .filter
            .update(measurement, config.measurement_covariance)?;
        let resting_residual = self
            .resting
            .filter
            .update(measurement, config.measurement_covariance)?;

        self.moving.error.update(moving_residual);
        self.resting.error.update(resting_residual);

        self.measurement_count += 1;
        self.last_update = timestamp;
        self.last_cycle = cycle;

        // A resting ball that gets kicked shows up as a clearly better moving
        // fit within a single cycle; demote immediately. Promotion stays
        // gated behind sustained zero velocity in `predict`.
        if self.resting.error.state > (1.0 + config.moving_hysteresis) * self.moving.error.state {
            self.is_resting = false;
        }

        Ok(())
    }

    /// Position of the trusted sub-model.
    #[must_use]
    pub fn position(&self) -> Point2<f32> {
        if self.is_resting {
            self.resting.filter.position
        } else {
            self.moving.filter.position
        }
    }

    /// Velocity of the trusted sub-model; a resting ball has none.
    #[must_use]
    pub fn velocity(&self) -> Vector2<f32> {
        if self.is_resting {
            Vector2::zeros()
        } else {
            self.moving.filter.velocity
        }
    }

    /// Where the ball is predicted to stop rolling.
    ///
    /// Equating the kinetic energy to the work done by friction puts the
    /// stopping point at `v² / 2a` along the current direction of travel.
    #[must_use]
    pub fn destination(&self, config: &BallFilterConfig) -> Point2<f32> {
        if self.is_resting {
            return self.resting.filter.position;
        }

        let velocity = self.moving.filter.velocity;
        let speed = velocity.norm();
        if speed == 0.0 {
            return self.moving.filter.position;
        }

        let deceleration = config.ball_friction_mu * GRAVITY;
        let rolling_distance = speed * speed / (2.0 * deceleration);

        self.moving.filter.position + velocity / speed * rolling_distance
    }

    /// Position uncertainty of the better fitting sub-model.
    #[must_use]
    pub fn uncertainty(&self) -> f32 {
        self.moving
            .filter
            .cov_position
            .trace()
            .min(self.resting.filter.covariance.trace())
    }
}
