//! Injector configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via IMS_INJECTOR_CONFIG or --config)
//! 3. Environment variables
//! 4. Command line flags (applied by the caller)

use irm_client::worker::{DEFAULT_MAX_RESPONSE_SIZE, DEFAULT_SEND_BUFFER_SIZE};
use irm_client::{ConnectionConfig, PoolConfig, TlsClientConfig, WorkerConfig};
use irm_protocol::values::{f2, f3};
use irm_protocol::{FrameOptions, IrmHeader, IrmTimer, SocketType, DEFAULT_PORT, NAME_LEN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "IMS_INJECTOR_CONFIG";

/// Largest accepted session count.
pub const MAX_SESSIONS: usize = 999;

/// Injector configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSettings,
    pub header: HeaderSettings,
    pub pool: PoolSettings,
    pub framing: FramingSettings,
    /// Log filter used when RUST_LOG is not set.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            header: HeaderSettings::default(),
            pool: PoolSettings::default(),
            framing: FramingSettings::default(),
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Loads the config file (if any), then applies environment overrides.
    ///
    /// `path` takes precedence over IMS_INJECTOR_CONFIG.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));

        let mut config = match path {
            Some(ref path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(&|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))
    }

    /// Applies overrides looked up through `env`.
    pub fn apply_overrides(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        self.connection.apply_overrides(env);
        self.header.apply_overrides(env);
        self.pool.apply_overrides(env);
        self.framing.apply_overrides(env);
        if let Some(level) = env("IMS_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Checks ranges and field widths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.header.template()?;
        self.pool.validate()?;

        // Workers past the first append their number to the client id.
        if self.pool.sessions > 1 {
            let id = self.header.client_id.trim_end();
            let widest = format!("{}{}", id, self.pool.sessions);
            if widest.len() > NAME_LEN {
                return Err(ConfigError::ValidationError(format!(
                    "client id '{}' leaves no room for {} session numbers (max {} characters)",
                    id, self.pool.sessions, NAME_LEN
                )));
            }
        }
        Ok(())
    }

    /// Builds the header template.
    pub fn template(&self) -> Result<IrmHeader, ConfigError> {
        self.header.template()
    }

    /// Builds the worker pool configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.connection.to_connection_config())
            .with_sessions(self.pool.sessions)
            .with_queue_depth(self.pool.queue_depth)
            .with_worker(WorkerConfig {
                send_buffer_size: self.pool.send_buffer_size,
                max_response_size: self.pool.max_response_size,
                ack_nowait: self.pool.ack_nowait,
                framing: FrameOptions {
                    include_trancode: self.framing.include_trancode_in_text,
                },
            })
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub tls: TlsSettings,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 10_000,
            tls: TlsSettings::default(),
        }
    }
}

impl ConnectionSettings {
    fn apply_overrides(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        if let Some(host) = env("IMS_HOST") {
            self.host = host;
        }
        if let Some(port) = env("IMS_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(ms) = env("IMS_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.connect_timeout_ms = ms;
        }
        self.tls.apply_overrides(env);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "connection.host is empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "connection.port must be non-zero".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connection.connect_timeout_ms must be non-zero".to_string(),
            ));
        }
        self.tls.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn to_connection_config(&self) -> ConnectionConfig {
        let config = ConnectionConfig::new(self.host.clone(), self.port)
            .with_connect_timeout(self.connect_timeout());
        if self.tls.enabled {
            config.with_tls(self.tls.to_client_config())
        } else {
            config
        }
    }
}

/// TLS settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub enabled: bool,
    /// PEM CA bundle. Defaults to the webpki roots.
    pub ca_cert_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// Skip certificate verification (test systems only).
    pub insecure: bool,
    pub server_name: Option<String>,
}

impl TlsSettings {
    fn apply_overrides(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        if let Some(enabled) = env("IMS_TLS_ENABLED") {
            self.enabled = parse_bool(&enabled);
        }
        if let Some(path) = env("IMS_TLS_CA") {
            self.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env("IMS_TLS_CERT") {
            self.client_cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env("IMS_TLS_KEY") {
            self.client_key_path = Some(PathBuf::from(path));
        }
        if let Some(insecure) = env("IMS_TLS_INSECURE") {
            self.insecure = parse_bool(&insecure);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::ValidationError(
                "TLS client_cert_path and client_key_path must be set together".to_string(),
            ));
        }
        Ok(())
    }

    fn to_client_config(&self) -> TlsClientConfig {
        TlsClientConfig {
            enabled: self.enabled,
            ca_cert_path: self.ca_cert_path.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            insecure: self.insecure,
            server_name: self.server_name.clone(),
        }
    }
}

/// IRM_SOCT values accepted in the config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketSetting {
    Transaction,
    #[default]
    Persistent,
    NonPersistent,
}

impl From<SocketSetting> for SocketType {
    fn from(setting: SocketSetting) -> Self {
        match setting {
            SocketSetting::Transaction => SocketType::Transaction,
            SocketSetting::Persistent => SocketType::Persistent,
            SocketSetting::NonPersistent => SocketType::NonPersistent,
        }
    }
}

/// Sync level carried in IRM_F3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLevel {
    None,
    #[default]
    Confirm,
    Syncpt,
}

impl SyncLevel {
    fn bits(self) -> u8 {
        match self {
            SyncLevel::None => f3::SYNC_NONE,
            SyncLevel::Confirm => f3::SYNC_CONFIRM,
            SyncLevel::Syncpt => f3::SYNC_SYNCPT,
        }
    }
}

/// Commit mode carried in IRM_F2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    Cm0,
    #[default]
    Cm1,
}

impl CommitMode {
    fn bits(self) -> u8 {
        match self {
            CommitMode::Cm0 => f2::CM0,
            CommitMode::Cm1 => f2::CM1,
        }
    }
}

/// Header template settings.
///
/// Text fields are at most 8 ASCII characters and are padded with spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderSettings {
    /// IRM_ID: the IMS Connect user message exit.
    pub exit_id: String,
    pub client_id: String,
    pub datastore: String,
    pub lterm: String,
    pub userid: String,
    pub group: String,
    pub password: String,
    pub appl_name: String,
    pub reroute_name: String,
    pub alt_client_id: String,
    /// IRM_TIMER in milliseconds. 0 selects the IMS Connect default; unset
    /// keeps half a second.
    pub timer_ms: Option<u64>,
    pub socket_type: SocketSetting,
    pub sync_level: SyncLevel,
    pub commit_mode: CommitMode,
}

impl Default for HeaderSettings {
    fn default() -> Self {
        Self {
            exit_id: "*SAMPLE*".to_string(),
            client_id: String::new(),
            datastore: String::new(),
            lterm: String::new(),
            userid: String::new(),
            group: String::new(),
            password: String::new(),
            appl_name: String::new(),
            reroute_name: String::new(),
            alt_client_id: String::new(),
            timer_ms: None,
            socket_type: SocketSetting::default(),
            sync_level: SyncLevel::default(),
            commit_mode: CommitMode::default(),
        }
    }
}

impl HeaderSettings {
    fn apply_overrides(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut String); 10] = [
            ("IMS_EXIT_ID", &mut self.exit_id),
            ("IMS_CLIENT_ID", &mut self.client_id),
            ("IMS_DATASTORE", &mut self.datastore),
            ("IMS_LTERM", &mut self.lterm),
            ("IMS_USERID", &mut self.userid),
            ("IMS_GROUP", &mut self.group),
            ("IMS_PASSWORD", &mut self.password),
            ("IMS_APPL_NAME", &mut self.appl_name),
            ("IMS_REROUTE_NAME", &mut self.reroute_name),
            ("IMS_ALT_CLIENT_ID", &mut self.alt_client_id),
        ];
        for (key, field) in fields {
            if let Some(value) = env(key) {
                *field = value;
            }
        }
        if let Some(ms) = env("IMS_TIMER_MS").and_then(|v| v.parse().ok()) {
            self.timer_ms = Some(ms);
        }
    }

    /// Builds the header template, validating every field.
    pub fn template(&self) -> Result<IrmHeader, ConfigError> {
        let mut header = IrmHeader::new()
            .with_exit_id(&self.exit_id)?
            .with_client_id(&self.client_id)?
            .with_datastore(&self.datastore)?
            .with_lterm(&self.lterm)?
            .with_credentials(&self.userid, &self.group, &self.password)?
            .with_appl_name(&self.appl_name)?
            .with_reroute_name(&self.reroute_name)?
            .with_alt_client_id(&self.alt_client_id)?
            .with_socket_type(self.socket_type.into())
            .with_sync_level(self.sync_level.bits())
            .with_commit_mode(self.commit_mode.bits());
        if let Some(ms) = self.timer_ms {
            header = header.with_timer(IrmTimer::from_duration(Duration::from_millis(ms))?);
        }
        Ok(header)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of concurrent sessions.
    pub sessions: usize,
    pub queue_depth: usize,
    pub send_buffer_size: usize,
    pub max_response_size: usize,
    /// Use the NOWAIT timer on ACKs when IMS Connect allows it.
    pub ack_nowait: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            sessions: 1,
            queue_depth: 256,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            ack_nowait: true,
        }
    }
}

impl PoolSettings {
    fn apply_overrides(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        if let Some(n) = env("IMS_SESSIONS").and_then(|v| v.parse().ok()) {
            self.sessions = n;
        }
        if let Some(n) = env("IMS_QUEUE_DEPTH").and_then(|v| v.parse().ok()) {
            self.queue_depth = n;
        }
        if let Some(n) = env("IMS_MAX_RESPONSE_SIZE").and_then(|v| v.parse().ok()) {
            self.max_response_size = n;
        }
        if let Some(nowait) = env("IMS_ACK_NOWAIT") {
            self.ack_nowait = parse_bool(&nowait);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions == 0 || self.sessions > MAX_SESSIONS {
            return Err(ConfigError::ValidationError(format!(
                "pool.sessions must be between 1 and {}",
                MAX_SESSIONS
            )));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "pool.queue_depth must be non-zero".to_string(),
            ));
        }
        if self.send_buffer_size < irm_protocol::frame::request_frame_len(0) {
            return Err(ConfigError::ValidationError(format!(
                "pool.send_buffer_size {} cannot hold an empty request",
                self.send_buffer_size
            )));
        }
        if self.max_response_size < 4 {
            return Err(ConfigError::ValidationError(
                "pool.max_response_size must be at least 4".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request framing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingSettings {
    /// Send the whole request line, transaction code included, as text.
    pub include_trancode_in_text: bool,
}

impl FramingSettings {
    fn apply_overrides(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        if let Some(include) = env("IMS_INCLUDE_TRANCODE") {
            self.include_trancode_in_text = parse_bool(&include);
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<irm_protocol::ProtocolError> for ConfigError {
    fn from(err: irm_protocol::ProtocolError) -> Self {
        ConfigError::ValidationError(err.to_string())
    }
}
