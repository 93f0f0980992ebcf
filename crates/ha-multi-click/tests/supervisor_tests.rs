//! End-to-end tests of the supervisor against an in-memory Home Assistant

use ha_config::{ConfigError, Configuration, ReloadHandler};
use ha_core::{Action, Trigger};
use ha_multi_click::{ExitReason, Supervisor, SupervisorHandle};
use ha_template::TemplateEngine;
use ha_ws_client::testing::MockHub;
use ha_ws_client::ConnectionSettings;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

fn config(buttons: &[(&str, &[&str])]) -> Configuration {
    let mut yaml = String::from(
        "home_assistant_url: http://localhost:8123\nlong_lived_token: token\nbuttons:\n",
    );
    for (name, scenes) in buttons {
        yaml.push_str(&format!(
            r#"  - name: {name}
    off:
      trigger: {{trigger: device, domain: mqtt, device_id: {name}, type: action, subtype: off-press}}
      action: {{domain: light, service: turn_off, target: {{device_id: {name}}}}}
    on:
      trigger: {{trigger: device, domain: mqtt, device_id: {name}, type: action, subtype: on-press}}
      actions:
"#
        ));
        for scene in scenes.iter() {
            yaml.push_str(&format!(
                "        - {{domain: scene, service: turn_on, target: {{entity_id: {scene}}}}}\n"
            ));
        }
    }
    serde_yaml::from_str(&yaml).unwrap()
}

fn on(name: &str) -> Trigger {
    Trigger::device("mqtt", name, "action", "on-press")
}

fn off(name: &str) -> Trigger {
    Trigger::device("mqtt", name, "action", "off-press")
}

fn scene(id: &str) -> Action {
    Action::new("scene", "turn_on").with_target(json!({"entity_id": id}))
}

fn light_off(name: &str) -> Action {
    Action::new("light", "turn_off").with_target(json!({"device_id": name}))
}

fn start(
    hub: &MockHub,
    settings: ConnectionSettings,
) -> (JoinHandle<ExitReason>, SupervisorHandle) {
    let connector = hub.clone();
    let (supervisor, handle) = Supervisor::new(
        move |_: &Configuration| connector.clone(),
        Arc::new(TemplateEngine::new()),
    );
    (tokio::spawn(supervisor.with_settings(settings).run()), handle)
}

/// Wait until the hub saw `n` service calls
async fn calls(hub: &MockHub, n: usize) -> Vec<Action> {
    tokio::time::timeout(Duration::from_secs(10), async {
        while hub.calls().len() < n {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    hub.calls()
}

#[tokio::test(start_paused = true)]
async fn test_bring_up_and_click_cycle() {
    let hub = MockHub::new();
    let (task, mut handle) = start(&hub, ConnectionSettings::default());

    handle.on_change(Ok(config(&[("desk", &["a", "b", "c"])]))).await;
    assert_eq!(hub.connect_count(), 1);
    assert_eq!(hub.active_subscriptions(), 2);

    hub.press(&on("desk")).await;
    hub.press(&on("desk")).await;
    hub.press(&off("desk")).await;
    hub.press(&on("desk")).await;

    assert_eq!(
        calls(&hub, 4).await,
        vec![scene("a"), scene("b"), light_off("desk"), scene("a")]
    );

    handle.shutdown();
    assert_eq!(task.await.unwrap(), ExitReason::Shutdown);
    assert_eq!(hub.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_probe_retries_before_subscribing() {
    let hub = MockHub::new();
    hub.swallow_next_fires(1);
    let (task, mut handle) = start(&hub, ConnectionSettings::default());

    handle.on_change(Ok(config(&[("desk", &["a"])]))).await;

    assert_eq!(hub.fired_events().len(), 2);
    assert_eq!(hub.active_subscriptions(), 2);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_invalid_initial_config_exits() {
    let hub = MockHub::new();
    let (task, mut handle) = start(&hub, ConnectionSettings::default());

    handle
        .on_change(Err(ConfigError::ValidationFailed {
            message: "at least one button must be configured".to_string(),
        }))
        .await;

    let reason = task.await.unwrap();
    assert!(matches!(reason, ExitReason::InvalidConfig(_)));
    assert_eq!(reason.exit_code(), 1);
    assert_eq!(hub.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reload_keeps_state() {
    let hub = MockHub::new();
    let (task, mut handle) = start(&hub, ConnectionSettings::default());

    handle.on_change(Ok(config(&[("desk", &["a", "b"])]))).await;
    hub.press(&on("desk")).await;
    calls(&hub, 1).await;

    handle
        .on_change(Err(ConfigError::ValidationFailed {
            message: "duplicate button name 'desk'".to_string(),
        }))
        .await;
    assert_eq!(hub.connect_count(), 1);
    assert_eq!(hub.active_subscriptions(), 2);

    // The cycle carries on where it was
    hub.press(&on("desk")).await;
    assert_eq!(calls(&hub, 2).await, vec![scene("a"), scene("b")]);

    handle.shutdown();
    assert_eq!(task.await.unwrap(), ExitReason::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_reload_replaces_buttons() {
    let hub = MockHub::new();
    let (task, mut handle) = start(&hub, ConnectionSettings::default());

    handle.on_change(Ok(config(&[("desk", &["a"])]))).await;
    handle.on_change(Ok(config(&[("hall", &["h"])]))).await;

    assert_eq!(hub.connect_count(), 2);
    assert_eq!(hub.active_subscriptions(), 2);
    assert_eq!(hub.press(&on("desk")).await, 0);
    assert_eq!(hub.press(&on("hall")).await, 1);
    assert_eq!(calls(&hub, 1).await, vec![scene("h")]);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_rejected_trigger_skips_button() {
    let hub = MockHub::new();
    hub.reject_trigger(&on("desk"));
    let (task, mut handle) = start(&hub, ConnectionSettings::default());

    handle.on_change(Ok(config(&[("desk", &["a"]), ("hall", &["h"])]))).await;
    assert_eq!(hub.connect_count(), 1);
    assert_eq!(hub.active_subscriptions(), 2);
    assert_eq!(hub.press(&on("hall")).await, 1);
    assert_eq!(calls(&hub, 1).await, vec![scene("h")]);

    // A corrected configuration still gets through
    handle.on_change(Ok(config(&[("study", &["s"]), ("hall", &["h"])]))).await;
    assert_eq!(hub.connect_count(), 2);
    assert_eq!(hub.active_subscriptions(), 4);
    assert_eq!(hub.press(&on("study")).await, 1);
    assert_eq!(calls(&hub, 2).await, vec![scene("h"), scene("s")]);

    handle.shutdown();
    assert_eq!(task.await.unwrap(), ExitReason::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_forced_reconnect_recycles_once() {
    let hub = MockHub::new();
    let (task, mut handle) = start(&hub, ConnectionSettings::default());

    handle.on_change(Ok(config(&[("desk", &["a", "b"])]))).await;
    hub.press(&on("desk")).await;
    calls(&hub, 1).await;

    sleep(Duration::from_secs(601)).await;
    assert_eq!(hub.connect_count(), 2);
    assert_eq!(hub.active_subscriptions(), 2);

    // Only the fresh subscription sees the press, and the cycle restarted
    assert_eq!(hub.press(&on("desk")).await, 1);
    assert_eq!(calls(&hub, 2).await, vec![scene("a"), scene("a")]);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_rebuilds_after_grace() {
    let hub = MockHub::new();
    let (task, mut handle) = start(&hub, ConnectionSettings::default());

    handle.on_change(Ok(config(&[("desk", &["a"])]))).await;
    hub.drop_connections();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(hub.connect_count(), 2);
    assert_eq!(hub.active_subscriptions(), 0);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(hub.active_subscriptions(), 2);
    assert_eq!(hub.press(&on("desk")).await, 1);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_failure_exits() {
    let hub = MockHub::new();
    let settings = ConnectionSettings {
        max_reconnect_attempts: Some(2),
        ..ConnectionSettings::default()
    };
    let (task, mut handle) = start(&hub, settings);

    handle.on_change(Ok(config(&[("desk", &["a"])]))).await;
    hub.refuse_connections(true);
    hub.drop_connections();

    let reason = task.await.unwrap();
    assert!(matches!(reason, ExitReason::ConnectionLost(_)));
    assert_eq!(reason.exit_code(), 2);
    assert_eq!(hub.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_connecting() {
    let hub = MockHub::new();
    hub.refuse_connections(true);
    let (task, handle) = start(&hub, ConnectionSettings::default());

    let mut reload = handle.clone();
    let initial = tokio::spawn(async move {
        reload.on_change(Ok(config(&[("desk", &["a"])]))).await;
    });

    sleep(Duration::from_secs(12)).await;
    assert!(!initial.is_finished());
    handle.shutdown();

    assert_eq!(task.await.unwrap(), ExitReason::Shutdown);
    initial.await.unwrap();
    assert_eq!(hub.connect_count(), 0);
}
