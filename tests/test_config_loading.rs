//! Configuration loading and validation tests
//!
//! Covers the file layer, command-line overrides and the startup checks
//! that must fail before any connection is attempted.

use mqttcd::config::{ConfigError, ConfigOverrides, DaemonConfig, KeepaliveMode, QosLevel};
use mqttcd::{DaemonError, ExitStatus, KeepaliveCadence};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let file = write_config(
        r#"
[broker]
host = "broker.example.net"
port = 8883
client_id = "plant-7"
username = "reader"
password = "secret"

[subscription]
topic = "plant/7/#"
qos = 2

[keepalive]
interval_secs = 30
mode = "iterations"
iterations = 12
poll_timeout_ms = 250
"#,
    );

    let config = DaemonConfig::resolve(Some(file.path()), ConfigOverrides::default()).unwrap();

    assert_eq!(config.broker.host, "broker.example.net");
    assert_eq!(config.broker.port, 8883);
    assert_eq!(config.client_id(), "plant-7");
    assert_eq!(config.subscription.topic, "plant/7/#");
    assert_eq!(config.subscription.qos, QosLevel::ExactlyOnce);
    assert_eq!(config.keepalive_interval(), Duration::from_secs(30));
    assert_eq!(config.poll_timeout(), Duration::from_millis(250));
    assert_eq!(config.keepalive_cadence(), KeepaliveCadence::Iterations(12));
}

#[test]
fn test_defaults_fill_missing_sections() {
    let file = write_config(
        r#"
[subscription]
topic = "a/b"
"#,
    );

    let config = DaemonConfig::resolve(Some(file.path()), ConfigOverrides::default()).unwrap();

    assert_eq!(config.broker.host, "localhost");
    assert_eq!(config.broker.port, 1883);
    assert_eq!(config.subscription.qos, QosLevel::AtMostOnce);
    assert_eq!(config.keepalive.mode, KeepaliveMode::Interval);
    assert_eq!(
        config.keepalive_cadence(),
        KeepaliveCadence::Interval(Duration::from_secs(60))
    );
    assert!(config.client_id().starts_with("mqttcd-"));
    assert!(!config.daemon.daemonize);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = DaemonConfig::resolve(
        Some(std::path::Path::new("/nonexistent/mqttcd.toml")),
        ConfigOverrides::default(),
    );
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let file = write_config("[broker\nhost = ");
    let result = DaemonConfig::resolve(Some(file.path()), ConfigOverrides::default());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_invalid_qos_in_file_is_rejected() {
    let file = write_config(
        r#"
[subscription]
topic = "a"
qos = 3
"#,
    );
    assert!(DaemonConfig::resolve(Some(file.path()), ConfigOverrides::default()).is_err());
}

#[test]
fn test_overrides_take_precedence_over_file() {
    let file = write_config(
        r#"
[broker]
host = "from-file"

[subscription]
topic = "file/topic"
"#,
    );

    let overrides = ConfigOverrides {
        host: Some("from-cli".to_string()),
        topic: Some("cli/#".to_string()),
        qos: Some(QosLevel::AtLeastOnce),
        keepalive_secs: Some(20),
        ..Default::default()
    };
    let config = DaemonConfig::resolve(Some(file.path()), overrides).unwrap();

    assert_eq!(config.broker.host, "from-cli");
    assert_eq!(config.subscription.topic, "cli/#");
    assert_eq!(config.subscription.qos, QosLevel::AtLeastOnce);
    assert_eq!(config.keepalive_interval(), Duration::from_secs(20));
}

#[test]
fn test_resolve_without_file_needs_topic() {
    let result = DaemonConfig::resolve(None, ConfigOverrides::default());
    assert!(matches!(
        result,
        Err(ConfigError::MissingField("subscription.topic"))
    ));
}

#[test]
fn test_password_env_resolution() {
    let var = "MQTTCD_TEST_CONFIG_PASSWORD";
    std::env::set_var(var, "from-env");
    let file = write_config(&format!(
        r#"
[broker]
username = "reader"
password_env = "{var}"

[subscription]
topic = "a/#"
"#
    ));

    let config = DaemonConfig::resolve(Some(file.path()), ConfigOverrides::default()).unwrap();
    assert_eq!(config.broker.password.as_deref(), Some("from-env"));
    std::env::remove_var(var);
}

#[test]
fn test_missing_password_env_var() {
    let file = write_config(
        r#"
[broker]
username = "reader"
password_env = "MQTTCD_TEST_DEFINITELY_UNSET"

[subscription]
topic = "a/#"
"#,
    );

    let result = DaemonConfig::resolve(Some(file.path()), ConfigOverrides::default());
    assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
}

#[test]
fn test_poll_timeout_must_leave_room_in_keepalive() {
    let overrides = ConfigOverrides {
        topic: Some("a".to_string()),
        keepalive_secs: Some(1),
        poll_timeout_ms: Some(1000),
        ..Default::default()
    };
    assert!(matches!(
        DaemonConfig::resolve(None, overrides),
        Err(ConfigError::InvalidConfig(_))
    ));

    let overrides = ConfigOverrides {
        topic: Some("a".to_string()),
        keepalive_secs: Some(2),
        poll_timeout_ms: Some(1200),
        ..Default::default()
    };
    assert!(DaemonConfig::resolve(None, overrides).is_err());

    let overrides = ConfigOverrides {
        topic: Some("a".to_string()),
        keepalive_secs: Some(2),
        poll_timeout_ms: Some(1000),
        ..Default::default()
    };
    assert!(DaemonConfig::resolve(None, overrides).is_ok());
}

#[test]
fn test_config_errors_exit_with_argument_failure() {
    let error = DaemonError::from(ConfigError::MissingField("subscription.topic"));
    assert_eq!(error.exit_status(), ExitStatus::ArgumentParseFailed);
    assert_eq!(error.exit_status().code(), 1);
}

#[test]
fn test_shown_config_omits_password() {
    let overrides = ConfigOverrides {
        topic: Some("a".to_string()),
        username: Some("reader".to_string()),
        password: Some("hunter2".to_string()),
        ..Default::default()
    };
    let config = DaemonConfig::resolve(None, overrides).unwrap();
    let rendered = toml::to_string_pretty(&config).unwrap();

    assert!(rendered.contains("reader"));
    assert!(!rendered.contains("hunter2"));
}
