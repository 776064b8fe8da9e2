//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading: defaults, validation failures and
//! how the TLS section resolves into certificate material.

use mqtt_mux::config::{ConfigError, MuxConfig};
use mqtt_mux::MqttConnector;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[client]
client_id = "plant-gateway"
connect_timeout_secs = 30
keep_alive_secs = 45

[tls]
resources_dir = "/etc/mqtt-mux"
ca_cert = "root-ca.pem"
client_cert = "gateway.crt"
client_key = "gateway.key"
key_passphrase_env = "GATEWAY_KEY_PASS"
"#,
    );

    let config = MuxConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.client.client_id, "plant-gateway");
    assert_eq!(config.client.connect_timeout_secs, 30);
    assert_eq!(config.client.keep_alive_secs, 45);
    assert_eq!(config.client.operation_timeout_secs, 60);
    assert!(config.tls.enabled);
    assert_eq!(config.tls.resources_dir, PathBuf::from("/etc/mqtt-mux"));
    assert_eq!(config.tls.key_passphrase_env.as_deref(), Some("GATEWAY_KEY_PASS"));
}

#[test]
fn test_empty_file_gives_defaults() {
    let temp_file = write_config("");

    let config = MuxConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config, MuxConfig::default());
    assert_eq!(config.client.client_id, "mqtt-mux");
    assert_eq!(config.client.connect_timeout_secs, 60);
    assert_eq!(config.client.keep_alive_secs, 60);
}

#[test]
fn test_missing_file_is_file_read_error() {
    let result = MuxConfig::load_from_file(std::path::Path::new("/nonexistent/mqtt-mux.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let temp_file = write_config("[client\nclient_id = ");
    let result = MuxConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_validation_rejects_bad_values() {
    let cases = [
        "[client]\nclient_id = \"\"",
        "[client]\nclient_id = \" leading\"",
        "[client]\nconnect_timeout_secs = 0",
        "[client]\noperation_timeout_secs = 0",
        "[client]\nkeep_alive_secs = 2",
        "[tls]\nca_cert = \"  \"",
    ];

    for content in cases {
        let result = MuxConfig::from_toml_str(content);
        assert!(
            matches!(result, Err(ConfigError::InvalidConfig(_))),
            "expected validation failure for: {content}"
        );
    }
}

#[test]
fn test_blank_tls_files_allowed_when_tls_disabled() {
    let config = MuxConfig::from_toml_str("[tls]\nenabled = false\nca_cert = \"\"").unwrap();
    assert!(config.tls.material().unwrap().is_none());
}

#[test]
fn test_tls_material_resolves_paths_and_passphrase() {
    std::env::set_var("MQTT_MUX_TEST_KEY_PASS", "s3cret");
    let config = MuxConfig::from_toml_str(
        r#"
[tls]
resources_dir = "certs"
key_passphrase_env = "MQTT_MUX_TEST_KEY_PASS"
"#,
    )
    .unwrap();

    let material = config.tls.material().unwrap().unwrap();

    assert_eq!(material.ca_cert_path, PathBuf::from("certs/ca.pem"));
    assert_eq!(material.client_cert_path, PathBuf::from("certs/client-certificate.pem.crt"));
    assert_eq!(material.client_key_path, PathBuf::from("certs/client-private.pem.key"));
    assert_eq!(material.key_passphrase, "s3cret");
    assert!(!format!("{material:?}").contains("s3cret"));
}

#[test]
fn test_unset_passphrase_variable_is_an_error() {
    let config = MuxConfig::from_toml_str(
        "[tls]\nkey_passphrase_env = \"MQTT_MUX_TEST_PASS_THAT_IS_NEVER_SET\"",
    )
    .unwrap();

    let result = config.tls.material();
    assert!(matches!(
        result,
        Err(ConfigError::EnvVarNotFound(ref name)) if name.contains("NEVER_SET")
    ));
    assert!(MqttConnector::from_config(&config).is_err());
}

#[test]
fn test_config_round_trips_through_toml_for_show() {
    let config = MuxConfig::default();
    let rendered = toml::to_string_pretty(&config).unwrap();

    assert!(rendered.contains("client_id = \"mqtt-mux\""));
    assert_eq!(MuxConfig::from_toml_str(&rendered).unwrap(), config);
}
