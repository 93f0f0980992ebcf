//! Tests for loading a configuration from disk

use ha_config::{ConfigError, ConfigSource, OnActions};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_file(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

const LIVING_ROOM: &str = r#"
name: Living Room Hue Dimmer
off:
  trigger: {trigger: device, domain: mqtt, device_id: 9f9fb2dd, type: action, subtype: off-press}
  action: {domain: light, service: turn_off, target: {device_id: 07c0a512}}
on:
  trigger: {trigger: device, domain: mqtt, device_id: 9f9fb2dd, type: action, subtype: on-press}
  actions:
    - {domain: scene, service: turn_on, target: {entity_id: scene.nur_sofa}}
    - {domain: scene, service: turn_on, target: {entity_id: scene.wohnzimmer_hell}}
"#;

#[test]
fn test_load_with_include_and_secret() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "secrets.yaml", "ha_token: secret123\n");
    write_file(dir.path(), "buttons/living_room.yaml", LIVING_ROOM);
    write_file(
        dir.path(),
        "ha-multi-click.yaml",
        r#"
home_assistant_url: http://192.168.178.4:8123
long_lived_token: !secret ha_token
verbose: !env_var HA_CONFIG_TEST_UNSET_VERBOSE true
buttons:
  - !include buttons/living_room.yaml
"#,
    );

    let source = ConfigSource::new(dir.path().join("ha-multi-click.yaml"));
    let config = source.load().unwrap();

    assert_eq!(config.long_lived_token, "secret123");
    assert!(config.verbose);
    assert_eq!(config.buttons[0].name, "Living Room Hue Dimmer");
    assert!(matches!(&config.buttons[0].on.actions, OnActions::Static(a) if a.len() == 2));

    assert_eq!(config.sources.len(), 3);
    assert!(config.sources[0].ends_with("ha-multi-click.yaml"));
    assert!(config.sources[1].ends_with("buttons/living_room.yaml"));
    assert!(config.sources[2].ends_with("secrets.yaml"));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let source = ConfigSource::new(dir.path().join("nope.yaml"));

    let (result, files) = source.load_tracked();
    assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    assert!(files[0].ends_with("nope.yaml"));
}

#[test]
fn test_wrong_shape_is_schema_error() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "ha-multi-click.yaml",
        "home_assistant_url: http://localhost:8123\nlong_lived_token: x\nbuttons: 3\n",
    );

    let result = ConfigSource::new(dir.path().join("ha-multi-click.yaml")).load();
    assert!(matches!(result, Err(ConfigError::Schema { .. })));
}

#[test]
fn test_syntax_error_is_parse_error() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "ha-multi-click.yaml", "buttons: [\n");

    let result = ConfigSource::new(dir.path().join("ha-multi-click.yaml")).load();
    assert!(matches!(result, Err(ConfigError::ParseYaml { .. })));
}
