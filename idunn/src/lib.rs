pub mod ball_filter;
pub mod config;
pub mod cycle;
pub mod odometry;

/// The idunn prelude conveniently includes commonly needed types and traits
/// for wiring the ball filter into a framework.
pub mod prelude {
    pub use crate::{
        ball_filter::{BallFilterConfig, BallFilterPlugin, BallPerception, BallState},
        config::{ConfigExt, ConfigPlugin},
        cycle::{Cycle, CycleTime, CycleTimePlugin},
        odometry::Odometry,
    };
    pub use odal::Config;
}
