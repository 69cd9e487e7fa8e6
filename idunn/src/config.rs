use std::path::{Path, PathBuf};

use bevy::{ecs::system::RunSystemOnce, prelude::*};
use odal::{Config, ConfigKind, Error, ErrorKind};

/// Plugin that adds functionality to load configuration structs from files.
///
/// It provides the following resources to the application:
/// - [`MainConfigDir`]
/// - [`OverlayConfigDir`] (only when an overlay directory is configured)
///
/// # Example
///
/// ```no_run
/// use bevy::prelude::*;
/// use idunn::prelude::*;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Resource, Debug, Deserialize, Serialize)]
/// #[serde(deny_unknown_fields)]
/// pub struct MeowConfig {
///     count: u32,
/// }
///
/// impl Config for MeowConfig {
///     const PATH: &'static str = "meow.toml";
/// }
///
/// pub struct MeowPlugin;
///
/// impl Plugin for MeowPlugin {
///     fn build(&self, app: &mut App) {
///         // This will load the configuration from `config/meow.toml`
///         // and insert it into the world as a resource.
///         app.init_config::<MeowConfig>();
///     }
/// }
/// ```
pub struct ConfigPlugin {
    main: PathBuf,
    overlay: Option<PathBuf>,
}

impl ConfigPlugin {
    #[must_use]
    pub fn new(main: impl Into<PathBuf>) -> Self {
        Self {
            main: main.into(),
            overlay: None,
        }
    }

    /// Use a per-robot overlay directory whose values take precedence.
    #[must_use]
    pub fn with_overlay(mut self, overlay: impl Into<PathBuf>) -> Self {
        self.overlay = Some(overlay.into());
        self
    }
}

impl Plugin for ConfigPlugin {
    fn build(&self, app: &mut App) {
        assert!(self.main.is_dir(), "main config directory does not exist");
        app.insert_resource(MainConfigDir(self.main.clone()));

        if let Some(overlay) = &self.overlay {
            assert!(overlay.is_dir(), "overlay config directory does not exist");
            app.insert_resource(OverlayConfigDir(overlay.clone()));
        }
    }
}

/// Directory where the main configs are stored
#[derive(Resource, Debug)]
pub struct MainConfigDir(PathBuf);

impl<T: Into<PathBuf>> From<T> for MainConfigDir {
    fn from(value: T) -> Self {
        Self(value.into())
    }
}

/// Directory where the overlay configs are stored
#[derive(Resource, Debug)]
pub struct OverlayConfigDir(PathBuf);

impl<T: Into<PathBuf>> From<T> for OverlayConfigDir {
    fn from(value: T) -> Self {
        Self(value.into())
    }
}

/// Trait for adding configs to an [`App`]
pub trait ConfigExt {
    /// Loads the configuration `T` and inserts it into the app.
    fn init_config<T: Resource + Config>(&mut self) -> &mut Self
    where
        Self: Sized;

    /// Reloads `T` from disk, replacing the resource.
    ///
    /// This is the hot-reload entry point: configuration only ever changes
    /// through this explicit call, never through ambient shared state.
    fn reload_config<T: Resource + Config>(&mut self) -> &mut Self
    where
        Self: Sized;
}

impl ConfigExt for App {
    fn init_config<T: Resource + Config>(&mut self) -> &mut Self {
        self.world_mut()
            .run_system_once(load_config::<T>)
            .expect("failed to run config loader");
        self
    }

    fn reload_config<T: Resource + Config>(&mut self) -> &mut Self {
        // loading overwrites the existing resource wholesale
        self.init_config::<T>()
    }
}

fn load_config<T: Resource + Config>(
    mut commands: Commands,
    main_dir: Res<MainConfigDir>,
    overlay_dir: Option<Res<OverlayConfigDir>>,
) {
    let main_path: &Path = main_dir.0.as_ref();

    let config = match overlay_dir {
        Some(overlay_dir) => match T::load_with_overlay(main_path, &overlay_dir.0) {
            Ok(t) => Ok(t),
            // failed to load any overlay
            Err(Error {
                name,
                kind:
                    ErrorKind::Load {
                        path,
                        config_kind: ConfigKind::Overlay,
                        ..
                    },
            }) => {
                // log and use only main config
                tracing::debug!("`{name}`: Failed to read overlay from `{}`", path.display());
                T::load(main_path)
            }
            Err(e) => Err(e),
        },
        None => T::load(main_path),
    }
    .unwrap_or_else(|e| panic!("failed to load config `{}`: {e}", T::PATH));

    commands.insert_resource(config);
}
