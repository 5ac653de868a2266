use std::sync::LazyLock;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::shared::ValidationError;

/// Common session settings shared by all cityflow connection types.
const COMMON_DATESTYLE: &str = "ISO";
const COMMON_CLIENT_ENCODING: &str = "UTF8";
const COMMON_TIMEZONE: &str = "UTC";

const APP_NAME_SCAN: &str = "cityflow_scan";
const APP_NAME_WORKER: &str = "cityflow_worker";
const APP_NAME_CACHE: &str = "cityflow_cache";

/// Session options for discovery scans.
///
/// Discovery cursors stay open for the whole run, so the statement timeout
/// is disabled.
pub static CITYFLOW_SCAN_OPTIONS: LazyLock<SessionOptions> = LazyLock::new(|| SessionOptions {
    datestyle: COMMON_DATESTYLE.to_string(),
    client_encoding: COMMON_CLIENT_ENCODING.to_string(),
    timezone: COMMON_TIMEZONE.to_string(),
    statement_timeout: 0,
    lock_timeout: 30_000,
    application_name: APP_NAME_SCAN.to_string(),
});

/// Session options for per-worker transfer connections.
pub static CITYFLOW_WORKER_OPTIONS: LazyLock<SessionOptions> = LazyLock::new(|| SessionOptions {
    datestyle: COMMON_DATESTYLE.to_string(),
    client_encoding: COMMON_CLIENT_ENCODING.to_string(),
    timezone: COMMON_TIMEZONE.to_string(),
    statement_timeout: 300_000,
    lock_timeout: 10_000,
    application_name: APP_NAME_WORKER.to_string(),
});

/// Session options for the scratch cross-reference cache.
///
/// Cache statements are small keyed reads and writes that should fail fast.
pub static CITYFLOW_CACHE_OPTIONS: LazyLock<SessionOptions> = LazyLock::new(|| SessionOptions {
    datestyle: COMMON_DATESTYLE.to_string(),
    client_encoding: COMMON_CLIENT_ENCODING.to_string(),
    timezone: COMMON_TIMEZONE.to_string(),
    statement_timeout: 30_000,
    lock_timeout: 5_000,
    application_name: APP_NAME_CACHE.to_string(),
});

/// Postgres session settings applied at connect time.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub datestyle: String,
    pub client_encoding: String,
    pub timezone: String,
    pub statement_timeout: u32,
    pub lock_timeout: u32,
    pub application_name: String,
}

impl SessionOptions {
    pub fn to_key_value_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("datestyle".to_string(), self.datestyle.clone()),
            ("client_encoding".to_string(), self.client_encoding.clone()),
            ("timezone".to_string(), self.timezone.clone()),
            (
                "statement_timeout".to_string(),
                self.statement_timeout.to_string(),
            ),
            ("lock_timeout".to_string(), self.lock_timeout.to_string()),
            (
                "application_name".to_string(),
                self.application_name.clone(),
            ),
        ]
    }
}

/// Connection settings for the spatial store.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking the password into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConnectionConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
    pub tls: TlsConfig,
}

impl StoreConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()
    }
}

/// Same as [`StoreConnectionConfig`] but without secrets, safe to serialize
/// into logs and reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConnectionConfigWithoutSecrets {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub tls: TlsConfig,
}

impl From<StoreConnectionConfig> for StoreConnectionConfigWithoutSecrets {
    fn from(value: StoreConnectionConfig) -> Self {
        StoreConnectionConfigWithoutSecrets {
            host: value.host,
            port: value.port,
            name: value.name,
            username: value.username,
            tls: value.tls,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub trusted_root_certs: String,
    pub enabled: bool,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        Self {
            trusted_root_certs: "".to_string(),
            enabled: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Conversion from connection configuration into driver connect options.
pub trait IntoConnectOptions<Output> {
    fn without_db(&self, options: Option<&SessionOptions>) -> Output;
    fn with_db(&self, options: Option<&SessionOptions>) -> Output;
}

impl IntoConnectOptions<PgConnectOptions> for StoreConnectionConfig {
    fn without_db(&self, options: Option<&SessionOptions>) -> PgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            PgSslMode::VerifyFull
        } else {
            PgSslMode::Prefer
        };
        let mut connect_options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .username(&self.username)
            .port(self.port)
            .ssl_mode(ssl_mode)
            .ssl_root_cert_from_pem(self.tls.trusted_root_certs.clone().into_bytes());

        if let Some(password) = &self.password {
            connect_options = connect_options.password(password.expose_secret());
        }

        if let Some(opts) = options {
            connect_options = connect_options.options(opts.to_key_value_pairs());
        }

        connect_options
    }

    fn with_db(&self, options: Option<&SessionOptions>) -> PgConnectOptions {
        let connect_options: PgConnectOptions = self.without_db(options);
        connect_options.database(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_options_disable_statement_timeout() {
        assert_eq!(CITYFLOW_SCAN_OPTIONS.statement_timeout, 0);
        assert_eq!(CITYFLOW_SCAN_OPTIONS.application_name, "cityflow_scan");
    }

    #[test]
    fn session_options_round_trip_as_pairs() {
        let pairs = CITYFLOW_CACHE_OPTIONS.to_key_value_pairs();

        assert!(pairs.contains(&("statement_timeout".to_string(), "30000".to_string())));
        assert!(pairs.contains(&("application_name".to_string(), "cityflow_cache".to_string())));
    }

    #[test]
    fn tls_requires_roots_when_enabled() {
        let tls = TlsConfig {
            trusted_root_certs: String::new(),
            enabled: true,
        };

        assert!(matches!(
            tls.validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        ));
        assert!(TlsConfig::disabled().validate().is_ok());
    }
}
