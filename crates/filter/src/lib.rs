use std::ops::{Add, Mul};

use nalgebra::{Matrix2, Point2, Vector2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Innovation covariance is not invertible")]
    Inversion,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Mitigate numerical instability of a covariance matrix by ensuring it is symmetric.
pub fn symmetrize(covariance: &mut Matrix2<f32>) {
    *covariance = (*covariance + covariance.transpose()) * 0.5;
}

/// First order exponential low pass filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct LowPassFilter<T: Default + Clone + Copy + Add<Output = T> + Mul<Output = T>> {
    pub state: T,
    retain: T,
    blend: T,
}

impl<T> LowPassFilter<T>
where
    T: Default + Clone + Copy + Add<Output = T> + Mul<Output = T>,
{
    pub fn new(initial: T, retain: T, blend: T) -> Self {
        LowPassFilter {
            state: initial,
            retain,
            blend,
        }
    }

    /// Update the current state of this [`LowPassFilter`] using the new value.
    pub fn update(&mut self, value: T) {
        self.state = self.retain * self.state + self.blend * value;
    }
}

/// Linear Kalman filter over a stationary 2D position.
#[derive(Debug, Clone)]
pub struct PositionFilter {
    pub position: Point2<f32>,
    pub covariance: Matrix2<f32>,
}

impl PositionFilter {
    #[must_use]
    pub fn new(position: Point2<f32>, covariance: Matrix2<f32>) -> Self {
        Self {
            position,
            covariance,
        }
    }

    /// Grow the covariance by the additive process noise of one time step.
    pub fn predict_covariance(&mut self, process_noise: Matrix2<f32>) {
        self.covariance += process_noise;
        symmetrize(&mut self.covariance);
    }

    /// Correct the position with a direct measurement of it.
    ///
    /// Returns the norm of the pre-update residual.
    pub fn update(
        &mut self,
        measurement: Point2<f32>,
        measurement_covariance: Matrix2<f32>,
    ) -> Result<f32> {
        let residual = measurement - self.position;
        let innovation_covariance = self.covariance + measurement_covariance;
        let inverse = innovation_covariance
            .try_inverse()
            .ok_or(Error::Inversion)?;

        let gain = self.covariance * inverse;

        self.position += gain * residual;
        self.covariance -= gain * self.covariance;
        symmetrize(&mut self.covariance);

        Ok(residual.norm())
    }
}

/// Linear Kalman filter over a 2D position and velocity, with the joint
/// covariance kept as explicit blocks.
///
/// `cov_velocity_position` is the cross covariance `cov(dx, x)`; the full
/// matrix never materializes, all operations work on the blocks directly.
#[derive(Debug, Clone)]
pub struct ConstantVelocityFilter {
    pub position: Point2<f32>,
    pub velocity: Vector2<f32>,
    pub cov_position: Matrix2<f32>,
    pub cov_velocity_position: Matrix2<f32>,
    pub cov_velocity: Matrix2<f32>,
}

impl ConstantVelocityFilter {
    /// A filter at rest: zero velocity and no position/velocity correlation.
    #[must_use]
    pub fn new(
        position: Point2<f32>,
        cov_position: Matrix2<f32>,
        cov_velocity: Matrix2<f32>,
    ) -> Self {
        Self {
            position,
            velocity: Vector2::zeros(),
            cov_position,
            cov_velocity_position: Matrix2::zeros(),
            cov_velocity,
        }
    }

    /// Propagate the covariance blocks through `dt` seconds of constant
    /// velocity motion, plus additive process noise per block.
    pub fn predict_covariance(
        &mut self,
        dt: f32,
        process_noise_position: Matrix2<f32>,
        process_noise_velocity_position: Matrix2<f32>,
        process_noise_velocity: Matrix2<f32>,
    ) {
        self.cov_position += dt * (self.cov_velocity_position + self.cov_velocity_position.transpose())
            + dt * dt * self.cov_velocity
            + process_noise_position;
        self.cov_velocity_position += dt * self.cov_velocity + process_noise_velocity_position;
        self.cov_velocity += process_noise_velocity;

        symmetrize(&mut self.cov_position);
        symmetrize(&mut self.cov_velocity);
    }

    /// Correct the full state with a measurement of the position only.
    ///
    /// The covariance blocks deflate in a fixed order, velocity block first
    /// and position block last, so that every step consumes the pre-update
    /// value of the blocks it reads. Reordering these corrupts the joint
    /// covariance.
    ///
    /// Returns the norm of the pre-update residual.
    pub fn update(
        &mut self,
        measurement: Point2<f32>,
        measurement_covariance: Matrix2<f32>,
    ) -> Result<f32> {
        let residual = measurement - self.position;
        let innovation_covariance = self.cov_position + measurement_covariance;
        let inverse = innovation_covariance
            .try_inverse()
            .ok_or(Error::Inversion)?;

        let position_gain = self.cov_position * inverse;
        let velocity_gain = self.cov_velocity_position * inverse;

        self.position += position_gain * residual;
        self.velocity += velocity_gain * residual;

        self.cov_velocity -=
            self.cov_velocity_position * inverse * self.cov_velocity_position.transpose();
        self.cov_velocity_position -= self.cov_velocity_position * inverse * self.cov_position;
        self.cov_position -= position_gain * self.cov_position;

        symmetrize(&mut self.cov_position);
        symmetrize(&mut self.cov_velocity);

        Ok(residual.norm())
    }
}
