use std::time::{Duration, Instant};

use bevy::prelude::*;

/// Plugin that adds resources and systems for tracking the control cycle.
pub struct CycleTimePlugin;

impl Plugin for CycleTimePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(PreStartup, initialize_cycle_counter);
        app.add_systems(Last, update_cycle_stats);
    }
}

/// A resource that keeps track of the number of cycles since startup.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Resource, Component)]
pub struct Cycle(pub usize);

/// A resource that keeps track of the time it takes to complete a full control cycle.
///
/// This should always be around 11-12ms, as the hardware runs at around 83Hz.
/// However a slow system might result in a higher cycle time.
#[derive(Resource, Debug, Clone, Copy)]
pub struct CycleTime {
    pub cycle_start: Instant,
    pub duration: Duration,
}

fn initialize_cycle_counter(mut commands: Commands) {
    commands.insert_resource(Cycle::default());
    commands.insert_resource(CycleTime {
        cycle_start: Instant::now(),
        duration: Duration::ZERO,
    });
}

fn update_cycle_stats(mut cycle: ResMut<Cycle>, mut cycle_time: ResMut<CycleTime>) {
    cycle.0 += 1;
    cycle_time.duration = Instant::now().duration_since(cycle_time.cycle_start);
    cycle_time.cycle_start = Instant::now();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_counter_advances_every_schedule_pass() {
        let mut app = App::new();
        app.add_plugins(CycleTimePlugin);

        app.update();
        app.update();
        app.update();

        assert_eq!(app.world().resource::<Cycle>().0, 3);
    }
}
