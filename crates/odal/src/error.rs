//! Result and Error types for the crate.
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result containing an error variant from this module.
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised while handling the config file `name`.
#[derive(Error, Diagnostic, Debug)]
#[error("`{name}`: {kind}")]
pub struct Error {
    /// File name of the config that failed, relative to the config directory.
    pub name: &'static str,
    /// What went wrong.
    #[source]
    pub kind: ErrorKind,
}

/// Which config directory a file was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// The shared base config directory.
    Main,
    /// The per-robot overlay directory.
    Overlay,
}

/// Configuration error variants
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// Failed to read a config file from disk.
    #[error("failed to read `{}`", path.display())]
    Load {
        path: PathBuf,
        config_kind: ConfigKind,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML.
    #[error("failed to parse `{}`", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The TOML does not match the config struct.
    #[error("failed to deserialize `{}`", path.display())]
    Deserialize {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Failed to serialize the config struct.
    #[error("failed to serialize config")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },

    /// Failed to write a config file to disk.
    #[error("failed to write `{}`", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
