use super::*;
use sensorlog_core::FieldType;

const FULL_CONFIG: &str = r#"{
    "DB_FILE": "/var/lib/sensorlog/sensors.sqlite",
    "MQTT_BROKER": {"HOST": "broker.local", "PORT": 1884, "COMPACT_LOG_ENABLED": true},
    "STORAGE": {"LOCK_RETRIES": 2},
    "NOTIFY": {
        "TIMEZONE": "Europe/Berlin",
        "STDOUT": {"ENABLED": true},
        "MAIL": {"ENABLED": true, "RECIPIENT": "ops@example.org"},
        "TRIGGER_ALARM_ON_MISSING_DATA": {
            "ENABLED": true,
            "CHANNELS": {"STDOUT": true, "MAIL": true},
            "WINDOW_MINUTES": 15,
            "REPEAT_EVERY_HOURS": 2,
            "MAX_REPEAT_EVERY_HOURS": 0.5
        },
        "TRIGGER_ALARM_ON_DB_SIZE": {"ENABLED": true, "WARN_MB": 10, "CRIT_MB": 20},
        "TRIGGER_ALARM_ON_EXCEPTIONS": {"ENABLED": true, "RAISE_ON_JSON_DECODE_ERROR": false}
    },
    "TABLE": {
        "balcony": {
            "alias": "b",
            "sensor_id": "11566802925f",
            "SENSORS": {
                "temperature1": {"field_type": "float", "round": 1, "alias": "t1",
                                 "limits": [-40, 60], "invalid_map": {"-9999": null}},
                "humidity1": {"field_type": "int"}
            }
        },
        "cellar": {
            "name": "cellar_v2",
            "sensor_id": "0a1b2c3d4e5f",
            "TIMESTAMP": {"name": "ts"},
            "SENSORS": {"battery": {"field_type": "bool"}}
        }
    }
}"#;

fn minimal(tables: &str) -> String {
    format!(r#"{{"DB_FILE": "sensors.sqlite", "TABLE": {}}}"#, tables)
}

#[test]
fn test_parse_full_config() {
    // execute
    let config: SystemConfig = FULL_CONFIG.parse().unwrap();

    // validate
    assert_eq!("broker.local", config.mqtt.host);
    assert_eq!(1884, config.mqtt.port);
    assert_eq!("mobilealerts/+/json", config.mqtt.topic);
    assert!(config.mqtt.compact_log_enabled);
    assert_eq!(2, config.storage.lock_retries);
    assert_eq!(100, config.storage.lock_backoff_ms);
    assert_eq!(chrono_tz::Europe::Berlin, config.notify.tz().unwrap());

    let keys: Vec<&str> = config.tables.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(vec!["balcony", "cellar"], keys);
    let cellar = config.table_by_key("cellar").unwrap();
    assert_eq!("cellar_v2", cellar.storage_name);
    assert_eq!(vec!["ts", "battery"], cellar.columns());

    let missing = config.notify.trigger(TriggerKind::MissingData);
    assert!(missing.enabled);
    assert!(missing.channels.mail && !missing.channels.ntfy);
    assert_eq!(Duration::minutes(15), missing.window());
    assert_eq!(Duration::minutes(30), missing.min_repeat());
    assert_eq!(Duration::hours(2), missing.repeat_every());

    let exceptions = config.notify.trigger(TriggerKind::Exceptions);
    assert!(!exceptions.raise_on_json_decode_error);
    assert!(exceptions.raise_on_missing_timestamp);
}

#[test]
fn test_defaults() {
    // prepare
    let raw = minimal(r#"{"t": {"sensor_id": "abc"}}"#);

    // execute
    let config: SystemConfig = raw.parse().unwrap();

    // validate
    assert_eq!("127.0.0.1", config.mqtt.host);
    assert_eq!(1883, config.mqtt.port);
    assert_eq!(60, config.engine.sweep_interval_seconds);
    assert_eq!("[MQTT-LOGGER]", config.notify.subject_prefix);
    assert_eq!(chrono_tz::UTC, config.notify.tz().unwrap());
    assert_eq!(ChannelFlags::default(), config.notify.global_channels());

    let info = config.notify.trigger(TriggerKind::Info);
    assert!(!info.enabled);
    assert_eq!(Duration::hours(6), info.min_repeat());
    assert_eq!(Duration::minutes(30), info.window());
    assert_eq!(Duration::hours(1), info.check_every());
    assert_eq!(1, info.min_count());
    assert!(info.raise_on_unknown_sensor_error);
}

#[test]
fn test_duplicate_sensor_id_rejected() {
    let raw = minimal(r#"{"a": {"sensor_id": "abc"}, "b": {"sensor_id": "abc"}}"#);
    match raw.parse::<SystemConfig>() {
        Err(ConfigError::Invalid(msg)) => assert!(msg.contains("abc")),
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_missing_sensor_id_rejected() {
    let raw = minimal(r#"{"a": {"SENSORS": {"t": {}}}}"#);
    assert!(matches!(
        raw.parse::<SystemConfig>(),
        Err(ConfigError::Spec(_))
    ));
}

#[test]
fn test_invalid_band_rejected() {
    let raw = minimal(r#"{"a": {"sensor_id": "x", "SENSORS": {"t": {"warn": [5, 1]}}}}"#);
    assert!(matches!(
        raw.parse::<SystemConfig>(),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_db_size_thresholds_rejected() {
    let raw = r#"{
        "DB_FILE": "sensors.sqlite",
        "NOTIFY": {"TRIGGER_ALARM_ON_DB_SIZE": {"WARN_MB": 50, "CRIT_MB": 20}},
        "TABLE": {"a": {"sensor_id": "x"}}
    }"#;
    assert!(matches!(
        raw.parse::<SystemConfig>(),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_bad_timezone_rejected() {
    let raw = r#"{
        "DB_FILE": "sensors.sqlite",
        "NOTIFY": {"TIMEZONE": "Mars/Olympus"},
        "TABLE": {"a": {"sensor_id": "x"}}
    }"#;
    assert!(matches!(
        raw.parse::<SystemConfig>(),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_db_file_and_tables_required() {
    let raw = r#"{"DB_FILE": " ", "TABLE": {"a": {"sensor_id": "x"}}}"#;
    assert!(raw.parse::<SystemConfig>().is_err());

    let raw = minimal("{}");
    assert!(raw.parse::<SystemConfig>().is_err());
}

#[test]
fn test_lookups() {
    let config: SystemConfig = FULL_CONFIG.parse().unwrap();

    assert_eq!("balcony", config.table_by_alias("b").unwrap().key);
    assert_eq!("cellar", config.table_by_sensor_id("0a1b2c3d4e5f").unwrap().key);
    assert!(config.table_by_sensor_id("ffffffffffff").is_none());

    let t1 = config.field_by_alias("b", "t1").unwrap();
    assert_eq!("temperature1", t1.key);
    assert_eq!(FieldType::Float, t1.field_type);
    assert_eq!(Some(1), t1.round_digits);
    assert!(t1.invalid_map.contains_key("-9999"));

    assert_eq!(
        FieldType::Int,
        config.field_by_key("balcony", "humidity1").unwrap().field_type
    );
    assert!(config.field_by_key("cellar", "humidity1").is_none());
}

#[test]
fn test_load_missing_file() {
    let result = SystemConfig::load(Path::new("/nonexistent/sensorlog.json"));
    assert!(matches!(result, Err(ConfigError::Read(_, _))));
}
