//! Typed SDK configuration, loaded the way the teacher's server loads `Settings`: a base file,
//! layered with `WIRE_SDK_`-prefixed environment overrides (`phnx-im-infra/server/src/configurations.rs`'s
//! `Config::builder()`/`Environment::with_prefix` pattern), the struct shape itself following
//! `phnx-im-air/backend/src/settings.rs`.

use config::{Config, ConfigError, Environment, File, FileFormat, Source};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// This app user's identity. The device id itself is assigned by the backend during
    /// `CryptoBootstrap` registration and persisted in `AppStore`, not configured here.
    pub user_id: Uuid,
    pub application: ApplicationSettings,
    #[serde(default)]
    pub demo_login: Option<DemoLoginSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    /// Base URL of the backend API (e.g. `https://example.com/api/v9/`).
    pub api_host: String,
    /// Bearer token used when no `demo_login` section is present.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Path to the local SQLite database file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_log_directive")]
    pub log: String,
    /// Base64-encoded key material for the crypto keystore; must decode to exactly 32 bytes
    /// (`CryptoBootstrap` rejects anything else with `InvalidParameter`).
    pub cryptography_storage_key: String,
    /// Ciphertext byte cap for `AppManager::send_asset` (§4.5).
    #[serde(default = "default_max_asset_size")]
    pub max_asset_size: u64,
}

fn default_db_path() -> String {
    "wire-sdk.sqlite3".to_string()
}

fn default_log_directive() -> String {
    "info".to_string()
}

fn default_max_asset_size() -> u64 {
    25 * 1024 * 1024
}

/// Present when the SDK should authenticate against a sample/demo backend via cookie exchange
/// rather than a directly-supplied bearer token (§9's resolved Open Question).
#[derive(Debug, Clone, Deserialize)]
pub struct DemoLoginSettings {
    pub email: String,
    pub password: String,
}

/// Loads configuration from `<prefix>configuration/base.yaml` layered with
/// `<prefix>configuration/<environment>.yaml`, then `WIRE_SDK_`-prefixed environment variables
/// (e.g. `WIRE_SDK_APPLICATION_API_HOST`).
pub fn get_configuration(prefix: &str) -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| ConfigError::Message(e.to_string()))?;
    let configuration_directory = base_path.join(format!("{prefix}configuration"));
    let environment = std::env::var("WIRE_SDK_ENVIRONMENT").unwrap_or_else(|_| "local".into());

    get_configuration_impl(
        File::from(configuration_directory.join("base")).required(true),
        File::from(configuration_directory.join(environment)).required(false),
    )
}

/// Loads configuration from in-memory YAML strings, used in tests instead of a configuration
/// directory on disk.
pub fn get_configuration_from_str(base: &str, environment: &str) -> Result<Settings, ConfigError> {
    get_configuration_impl(
        File::from_str(base, FileFormat::Yaml),
        File::from_str(environment, FileFormat::Yaml),
    )
}

fn get_configuration_impl(
    base: impl Source + Send + Sync + 'static,
    environment: impl Source + Send + Sync + 'static,
) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(base)
        .add_source(environment)
        .add_source(Environment::with_prefix("WIRE_SDK").separator("_"));
    builder.build()?.try_deserialize()
}
