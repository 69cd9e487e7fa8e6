//! TOML configuration loading with per-robot overlay directories.
//!
//! A config struct declares the file it lives in through [`Config::PATH`].
//! Values are read from a main config directory, and an overlay directory may
//! override any subset of them, merged recursively table by table.

mod error;

pub use error::{ConfigKind, Error, ErrorKind, Result};

use std::{fs, path::Path};

use serde::{Serialize, de::DeserializeOwned};
use toml::Table;

pub trait Config: DeserializeOwned {
    /// File name of this config, relative to the config directory.
    const PATH: &'static str;

    /// Load the config from `dir`.
    fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(Self::PATH);
        let table = read_table(Self::PATH, &path, ConfigKind::Main)?;
        deserialize(Self::PATH, &path, table)
    }

    /// Load the config from `main_dir`, with values from `overlay_dir` taking
    /// precedence over the main values.
    fn load_with_overlay(main_dir: &Path, overlay_dir: &Path) -> Result<Self> {
        let main_path = main_dir.join(Self::PATH);
        let overlay_path = overlay_dir.join(Self::PATH);

        let main = read_table(Self::PATH, &main_path, ConfigKind::Main)?;
        let overlay = read_table(Self::PATH, &overlay_path, ConfigKind::Overlay)?;

        deserialize(Self::PATH, &main_path, merge(main, overlay))
    }

    /// Serialize the config and write it to its file in `dir`.
    fn store(&self, dir: &Path) -> Result<()>
    where
        Self: Serialize,
    {
        let path = dir.join(Self::PATH);
        let contents = toml::to_string_pretty(self).map_err(|source| Error {
            name: Self::PATH,
            kind: ErrorKind::Serialize { source },
        })?;

        fs::write(&path, contents).map_err(|source| Error {
            name: Self::PATH,
            kind: ErrorKind::Store { path, source },
        })
    }
}

fn read_table(name: &'static str, path: &Path, config_kind: ConfigKind) -> Result<Table> {
    let contents = fs::read_to_string(path).map_err(|source| Error {
        name,
        kind: ErrorKind::Load {
            path: path.to_path_buf(),
            config_kind,
            source,
        },
    })?;

    contents.parse::<Table>().map_err(|source| Error {
        name,
        kind: ErrorKind::Parse {
            path: path.to_path_buf(),
            source,
        },
    })
}

fn deserialize<T: DeserializeOwned>(name: &'static str, path: &Path, table: Table) -> Result<T> {
    toml::Value::Table(table).try_into().map_err(|source| Error {
        name,
        kind: ErrorKind::Deserialize {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Merge `overlay` into `main`, recursing into sub-tables.
///
/// Overlay values win; keys that only exist in the overlay are kept as well.
fn merge(main: Table, overlay: Table) -> Table {
    let mut merged = main;

    for (key, overlay_value) in overlay {
        match (merged.remove(&key), overlay_value) {
            (Some(toml::Value::Table(main_table)), toml::Value::Table(overlay_table)) => {
                merged.insert(key, toml::Value::Table(merge(main_table, overlay_table)));
            }
            (_, overlay_value) => {
                merged.insert(key, overlay_value);
            }
        }
    }

    merged
}
