use crate::error::ConfigError;
use chrono::Duration;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use sensorlog_core::{deserialize_keyed, SensorFieldSpec, TableSpec};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::Path;

#[cfg(test)]
mod test;

/// Process level settings, read once from the environment (and `.env`)
pub struct EnvSettings {
    config_path: String,
    trace_stdout: bool,
}

impl EnvSettings {
    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    pub fn trace_stdout(&self) -> bool {
        self.trace_stdout
    }
}

pub static ENV: Lazy<EnvSettings> = Lazy::new(|| {
    let _ = dotenv::dotenv();

    let config_path =
        env::var("SENSORLOG_CONFIG").unwrap_or_else(|_| "config/sensorlog.json".to_owned());
    let trace_stdout = env::var("SENSORLOG_TRACE_STDOUT")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    EnvSettings {
        config_path,
        trace_stdout,
    }
});

const DEFAULT_REPEAT_HOURS: f64 = 6.0;
const DEFAULT_WINDOW_MINUTES: f64 = 30.0;
const DEFAULT_CHECK_EVERY_HOURS: f64 = 1.0;

fn default_true() -> bool {
    true
}

fn hours(h: f64) -> Duration {
    Duration::milliseconds((h * 3_600_000.0) as i64)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(rename = "DB_FILE", default)]
    pub db_file: String,
    #[serde(rename = "MQTT_BROKER", default)]
    pub mqtt: MqttSettings,
    #[serde(rename = "STORAGE", default)]
    pub storage: StorageSettings,
    #[serde(rename = "ENGINE", default)]
    pub engine: EngineSettings,
    #[serde(rename = "NOTIFY", default)]
    pub notify: NotifySettings,
    #[serde(rename = "TABLE", default, deserialize_with = "deserialize_keyed")]
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: Option<String>,
    pub keep_alive_seconds: u64,
    pub compact_log_enabled: bool,
}

impl Default for MqttSettings {
    fn default() -> Self {
        MqttSettings {
            host: "127.0.0.1".to_owned(),
            port: 1883,
            topic: "mobilealerts/+/json".to_owned(),
            client_id: None,
            keep_alive_seconds: 30,
            compact_log_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct StorageSettings {
    pub lock_retries: u32,
    pub lock_backoff_ms: u64,
    pub max_connections: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            lock_retries: 5,
            lock_backoff_ms: 100,
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct EngineSettings {
    pub sweep_interval_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct StdoutSettings {
    pub enabled: bool,
    pub payload_preview_chars: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct LogfileSettings {
    pub enabled: bool,
    pub path: String,
    pub payload_preview_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct NtfySettings {
    pub enabled: bool,
    pub server: String,
    pub topic: String,
    pub token: Option<String>,
    pub priority: u8,
    pub payload_preview_chars: Option<usize>,
}

impl Default for NtfySettings {
    fn default() -> Self {
        NtfySettings {
            enabled: false,
            server: "https://ntfy.sh".to_owned(),
            topic: String::new(),
            token: None,
            priority: 3,
            payload_preview_chars: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct MailSettings {
    pub enabled: bool,
    pub sender: Option<String>,
    pub recipient: String,
    pub payload_preview_chars: Option<usize>,
}

/// Per trigger channel selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct ChannelFlags {
    pub stdout: bool,
    pub logfile: bool,
    pub ntfy: bool,
    pub mail: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TriggerSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channels: ChannelFlags,
    pub repeat_every_hours: Option<f64>,
    pub max_repeat_every_hours: Option<f64>,
    pub window_minutes: Option<f64>,
    pub check_every_hours: Option<f64>,
    pub warn_mb: Option<f64>,
    pub crit_mb: Option<f64>,
    pub min_count_before_mail: Option<u64>,
    #[serde(default = "default_true")]
    pub raise_on_unknown_sensor_error: bool,
    #[serde(default = "default_true")]
    pub raise_on_non_dict_payload: bool,
    #[serde(default = "default_true")]
    pub raise_on_missing_timestamp: bool,
    #[serde(default = "default_true")]
    pub raise_on_json_decode_error: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        TriggerSettings {
            enabled: false,
            channels: ChannelFlags::default(),
            repeat_every_hours: None,
            max_repeat_every_hours: None,
            window_minutes: None,
            check_every_hours: None,
            warn_mb: None,
            crit_mb: None,
            min_count_before_mail: None,
            raise_on_unknown_sensor_error: true,
            raise_on_non_dict_payload: true,
            raise_on_missing_timestamp: true,
            raise_on_json_decode_error: true,
        }
    }
}

impl TriggerSettings {
    /// An enabled trigger routed to the given channels, mostly for tests
    pub fn enabled_on(channels: ChannelFlags) -> Self {
        TriggerSettings {
            enabled: true,
            channels,
            ..TriggerSettings::default()
        }
    }

    /// Minimum distance between two notifications of the same throttle key
    pub fn min_repeat(&self) -> Duration {
        hours(
            self.max_repeat_every_hours
                .or(self.repeat_every_hours)
                .unwrap_or(DEFAULT_REPEAT_HOURS),
        )
    }

    pub fn repeat_every(&self) -> Duration {
        hours(self.repeat_every_hours.unwrap_or(DEFAULT_REPEAT_HOURS))
    }

    pub fn window(&self) -> Duration {
        Duration::milliseconds(
            (self.window_minutes.unwrap_or(DEFAULT_WINDOW_MINUTES) * 60_000.0) as i64,
        )
    }

    pub fn check_every(&self) -> Duration {
        hours(self.check_every_hours.unwrap_or(DEFAULT_CHECK_EVERY_HOURS))
    }

    pub fn min_count(&self) -> u64 {
        self.min_count_before_mail.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Info,
    MissingData,
    DbSize,
    BadValues,
    Exceptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct NotifySettings {
    pub subject_prefix: String,
    pub timezone: String,
    pub stdout: StdoutSettings,
    pub logfile: LogfileSettings,
    pub ntfy: NtfySettings,
    pub mail: MailSettings,
    pub trigger_info: TriggerSettings,
    pub trigger_alarm_on_missing_data: TriggerSettings,
    pub trigger_alarm_on_db_size: TriggerSettings,
    pub trigger_alarm_on_bad_values: TriggerSettings,
    pub trigger_alarm_on_exceptions: TriggerSettings,
}

impl Default for NotifySettings {
    fn default() -> Self {
        NotifySettings {
            subject_prefix: "[MQTT-LOGGER]".to_owned(),
            timezone: "UTC".to_owned(),
            stdout: StdoutSettings::default(),
            logfile: LogfileSettings::default(),
            ntfy: NtfySettings::default(),
            mail: MailSettings::default(),
            trigger_info: TriggerSettings::default(),
            trigger_alarm_on_missing_data: TriggerSettings::default(),
            trigger_alarm_on_db_size: TriggerSettings::default(),
            trigger_alarm_on_bad_values: TriggerSettings::default(),
            trigger_alarm_on_exceptions: TriggerSettings::default(),
        }
    }
}

impl NotifySettings {
    pub fn trigger(&self, kind: TriggerKind) -> &TriggerSettings {
        match kind {
            TriggerKind::Info => &self.trigger_info,
            TriggerKind::MissingData => &self.trigger_alarm_on_missing_data,
            TriggerKind::DbSize => &self.trigger_alarm_on_db_size,
            TriggerKind::BadValues => &self.trigger_alarm_on_bad_values,
            TriggerKind::Exceptions => &self.trigger_alarm_on_exceptions,
        }
    }

    pub fn trigger_mut(&mut self, kind: TriggerKind) -> &mut TriggerSettings {
        match kind {
            TriggerKind::Info => &mut self.trigger_info,
            TriggerKind::MissingData => &mut self.trigger_alarm_on_missing_data,
            TriggerKind::DbSize => &mut self.trigger_alarm_on_db_size,
            TriggerKind::BadValues => &mut self.trigger_alarm_on_bad_values,
            TriggerKind::Exceptions => &mut self.trigger_alarm_on_exceptions,
        }
    }

    /// Channels which are switched on globally
    pub fn global_channels(&self) -> ChannelFlags {
        ChannelFlags {
            stdout: self.stdout.enabled,
            logfile: self.logfile.enabled,
            ntfy: self.ntfy.enabled,
            mail: self.mail.enabled,
        }
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown TIMEZONE {}", self.timezone)))
    }
}

impl SystemConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        raw.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_file.trim().is_empty() {
            return Err(ConfigError::Invalid("DB_FILE must be set".to_owned()));
        }
        if self.tables.is_empty() {
            return Err(ConfigError::Invalid("no TABLE configured".to_owned()));
        }

        let mut routing_keys = HashSet::new();
        for table in self.tables.iter() {
            table.validate()?;
            if !routing_keys.insert(table.routing_key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "sensor_id {} is used by more than one table",
                    table.routing_key
                )));
            }
        }

        self.notify.tz()?;
        let db_size = &self.notify.trigger_alarm_on_db_size;
        if let (Some(warn), Some(crit)) = (db_size.warn_mb, db_size.crit_mb) {
            if warn > crit {
                return Err(ConfigError::Invalid(format!(
                    "WARN_MB {} exceeds CRIT_MB {}",
                    warn, crit
                )));
            }
        }
        Ok(())
    }

    pub fn table_by_key(&self, key: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.key == key)
    }

    pub fn table_by_alias(&self, alias: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.alias == alias)
    }

    pub fn table_by_sensor_id(&self, sensor_id: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.routing_key == sensor_id)
    }

    pub fn field_by_key(&self, table_key: &str, field_key: &str) -> Option<&SensorFieldSpec> {
        self.table_by_key(table_key)?.field(field_key)
    }

    pub fn field_by_alias(&self, table_alias: &str, field_alias: &str) -> Option<&SensorFieldSpec> {
        self.table_by_alias(table_alias)?.field_by_alias(field_alias)
    }
}

impl std::str::FromStr for SystemConfig {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let config: SystemConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }
}
