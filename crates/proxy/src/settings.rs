use crate::error::{ProxyError, ProxyErrorExt};
use crate::handshake::{DEFAULT_FILE_BUFFER_SIZE, DEFAULT_WAIT_WINDOW, Handshake};
use crate::retry::RetryPolicy;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tether_channel::{ByteOrder, DEFAULT_S11N_SIZE, IoRegion, OpRegion, OpTable, ResultCodes};
use tracing::info;

/// Prefix of environment overrides, e.g. `TETHER__RETRY__ATTEMPTS=6`.
pub const ENV_PREFIX: &str = "TETHER";

/// Deployment settings of a proxy and the tools driving it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub file_buffer_size: usize,
    pub s11n_size: usize,
    pub little_endian: bool,
    pub verbosity: u8,
    pub exception_level: u8,
    pub unlock_asap: bool,
    pub wait_window_ms: u64,
    pub retry: RetryPolicy,
    /// Root directory served by a filesystem backend.
    pub root: PathBuf,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            file_buffer_size: DEFAULT_FILE_BUFFER_SIZE,
            s11n_size: DEFAULT_S11N_SIZE,
            little_endian: ByteOrder::native() == ByteOrder::Little,
            verbosity: 1,
            exception_level: 2,
            unlock_asap: false,
            wait_window_ms: DEFAULT_WAIT_WINDOW.as_millis() as u64,
            retry: RetryPolicy::default(),
            root: PathBuf::from("tether-data"),
        }
    }
}

impl ProxySettings {
    /// Layers an optional TOML file and `TETHER__*` environment variables over the
    /// defaults. Nested keys use a double underscore (`TETHER__RETRY__BASE_DELAY_MS`).
    ///
    /// # Errors
    /// [`ProxyError::Config`] when the file is missing or a value does not deserialize.
    pub fn load(path: Option<&Path>) -> Result<Self, ProxyError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!("Loading proxy settings from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX).prefix_separator("__").separator("__").try_parsing(true),
        );

        builder
            .build()
            .context("Failed to build settings")?
            .try_deserialize::<Self>()
            .context("Failed to deserialize settings")
    }

    #[must_use]
    pub const fn wait_window(&self) -> Duration {
        Duration::from_millis(self.wait_window_ms)
    }

    /// A handshake over freshly allocated regions sized by these settings.
    #[must_use]
    pub fn handshake(&self) -> Handshake {
        Handshake {
            little_endian: Some(self.little_endian),
            verbosity: self.verbosity,
            exception_level: self.exception_level,
            file_buffer_size: Some(self.file_buffer_size),
            op_region: Some(Arc::new(OpRegion::new())),
            io_region: Some(Arc::new(IoRegion::new(self.file_buffer_size, self.s11n_size))),
            op_ids: OpTable::default_ids(),
            result_codes: ResultCodes::sqlite_table(),
            unlock_asap: self.unlock_asap,
            wait_window: self.wait_window(),
            retry: self.retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_without_sources() {
        let settings = ProxySettings::load(None).unwrap();
        assert_eq!(settings.file_buffer_size, DEFAULT_FILE_BUFFER_SIZE);
        assert_eq!(settings.retry.attempts, 4);
        assert_eq!(settings.wait_window(), Duration::from_millis(500));
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "file_buffer_size = 8192\nunlock_asap = true\nroot = \"/tmp/tether\"\n\n[retry]\nattempts = 2"
        )
        .unwrap();

        let settings = ProxySettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.file_buffer_size, 8192);
        assert!(settings.unlock_asap);
        assert_eq!(settings.root, PathBuf::from("/tmp/tether"));
        assert_eq!(settings.retry, RetryPolicy { attempts: 2, base_delay_ms: 300 });

        let handshake = settings.handshake();
        assert_eq!(handshake.file_buffer_size, Some(8192));
        assert!(handshake.unlock_asap);
        assert!(handshake.channel().is_ok());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = ProxySettings::load(Some(Path::new("/nonexistent/tether.toml"))).unwrap_err();
        assert!(matches!(err, ProxyError::Config { .. }));
    }
}
