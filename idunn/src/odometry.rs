use bevy::prelude::*;
use nalgebra::Isometry2;

/// The odometry of the robot, written by the motion layer once per cycle.
///
/// `offset_to_last` is the rigid motion of the robot since the previous
/// cycle, in the previous cycle's frame. Estimates that live in the robot
/// frame reproject themselves with its inverse.
#[derive(Resource, Debug, Default, Clone)]
pub struct Odometry {
    /// The accumulated odometry offset of the robot.
    pub accumulated: Isometry2<f32>,
    /// The offset to the last position of the robot.
    pub offset_to_last: Isometry2<f32>,
}

impl Odometry {
    /// Record the rigid motion of the robot since the previous cycle.
    pub fn integrate(&mut self, offset: Isometry2<f32>) {
        self.offset_to_last = offset;
        self.accumulated *= offset;
    }
}
