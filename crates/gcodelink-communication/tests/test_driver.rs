//! Driver behaviour against the scripted loopback server

use gcodelink_communication::{
    CommandRegistry, ConnectionParams, DriverSettings, DriverState, GcodeDriver, GcodeServer,
    MoveTarget, ServerEvent,
};
use gcodelink_core::{
    ActuatorValue, CommandKind, ConfigError, ConnectionError, Error, ProtocolError, Subject,
};
use std::sync::Arc;
use std::time::Duration;

const CONNECT: &str = "G21 ; Set millimeters mode\n\
                       G90 ; Set absolute positioning mode\n\
                       M82 ; Set absolute mode for extruder";
const HOME: &str = "G28 ; Home all axes";
const WAIT: &str = "M400 ; Wait for moves to complete before returning";

fn settings() -> DriverSettings {
    DriverSettings {
        timeout: Duration::from_millis(500),
        connect_wait: Duration::ZERO,
        keep_alive: false,
    }
}

fn registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry
        .set_command(Subject::Global, CommandKind::Connect, CONNECT)
        .unwrap();
    registry
        .set_command(Subject::Global, CommandKind::Home, HOME)
        .unwrap();
    registry
        .set_command(Subject::Global, CommandKind::MoveToComplete, WAIT)
        .unwrap();
    registry
}

async fn server() -> GcodeServer {
    let server = GcodeServer::bind().await.unwrap();
    for line in CONNECT.lines().chain([HOME, WAIT]) {
        server.add_command_response(line.trim(), "ok");
    }
    server
}

fn driver(server: &GcodeServer, registry: CommandRegistry) -> GcodeDriver {
    GcodeDriver::from_params(
        &ConnectionParams::tcp("127.0.0.1", server.listener_port()),
        registry,
        settings(),
    )
    .unwrap()
}

fn setup_lines() -> Vec<String> {
    CONNECT
        .lines()
        .chain([HOME, WAIT])
        .map(|line| line.trim().to_string())
        .collect()
}

#[tokio::test]
async fn test_enable_sends_setup_sequence_in_order() {
    let server = server().await;
    let driver = driver(&server, registry());

    driver.enable().await.unwrap();

    assert_eq!(driver.state(), DriverState::Enabled);
    assert_eq!(server.received(), setup_lines());
    server.shutdown().await;
}

#[tokio::test]
async fn test_enable_requires_home_command() {
    let server = server().await;
    let mut registry = registry();
    registry
        .set_command(Subject::Global, CommandKind::Home, "")
        .unwrap();
    let driver = driver(&server, registry);

    let err = driver.enable().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::MissingCommand { kind: CommandKind::Home, .. })
    ));
    assert_eq!(driver.state(), DriverState::Disconnected);
    assert!(server.received().is_empty());
    assert!(driver.set_command("", CommandKind::Home, HOME).is_ok());
}

#[tokio::test]
async fn test_actuator_read() {
    let server = server().await;
    server.add_command_response("READ A1", "read:a1:497\nok");

    let mut registry = registry();
    registry
        .set_command("A1", CommandKind::ActuatorRead, "READ A1")
        .unwrap();
    registry
        .set_pattern("A1", CommandKind::ActuatorRead, r"read:a1:(?<Value>-?\d+)")
        .unwrap();
    let driver = driver(&server, registry);
    driver.enable().await.unwrap();

    assert_eq!(driver.read("A1").await.unwrap(), "497");
    server.shutdown().await;
}

#[tokio::test]
async fn test_actuator_read_without_pattern() {
    let server = server().await;
    server.add_command_response("READ A1", "read:a1:497\nok");

    let mut registry = registry();
    registry
        .set_command("A1", CommandKind::ActuatorRead, "READ A1")
        .unwrap();
    let driver = driver(&server, registry);
    driver.enable().await.unwrap();

    let err = driver.read("A1").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::MissingPattern { .. })
    ));
    // nothing beyond the setup sequence reached the wire
    assert_eq!(server.received(), setup_lines());
}

#[tokio::test]
async fn test_actuator_read_without_command() {
    let server = server().await;
    server.add_command_response("READ A1", "read:a1:497\nok");

    let mut registry = registry();
    registry
        .set_pattern("A1", CommandKind::ActuatorRead, r"read:a1:(?<Value>-?\d+)")
        .unwrap();
    let driver = driver(&server, registry);
    driver.enable().await.unwrap();

    let err = driver.read("A1").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::MissingCommand {
            kind: CommandKind::ActuatorRead,
            ..
        })
    ));
    assert_eq!(server.received(), setup_lines());
}

#[tokio::test]
async fn test_actuator_read_with_non_matching_pattern() {
    let server = server().await;
    server.add_command_response("READ A1", "read:a1:497\nok");

    let mut registry = registry();
    registry
        .set_command("A1", CommandKind::ActuatorRead, "READ A1")
        .unwrap();
    registry
        .set_pattern("A1", CommandKind::ActuatorRead, r"reXXad:a1:(?<Value>-?\d+)")
        .unwrap();
    let driver = driver(&server, registry);
    driver.enable().await.unwrap();

    match driver.read("A1").await.unwrap_err() {
        Error::Protocol(ProtocolError::NoMatch { command, lines, .. }) => {
            assert_eq!(command, "READ A1");
            assert_eq!(lines, vec!["read:a1:497"]);
        }
        other => panic!("expected NoMatch, got {}", other),
    }
}

#[tokio::test]
async fn test_read_falls_back_to_global_template() {
    let server = server().await;
    server.add_command_response("M105 T2", "ok T:21.5 /0.0");

    let mut registry = registry();
    registry
        .set_command(Subject::Global, CommandKind::ActuatorRead, "M105 T{Id}")
        .unwrap();
    registry
        .set_pattern(
            Subject::Global,
            CommandKind::ActuatorRead,
            r"T:(?<Value>-?\d+\.\d+)",
        )
        .unwrap();
    let driver = driver(&server, registry);
    driver.connect().await.unwrap();

    // "ok T:..." is not the exact terminal marker, so the read times out
    // after the line matched
    let err = driver.read("2").await.unwrap_err();
    assert!(err.is_timeout());

    server.add_command_response("M105 T2", "T:21.5 /0.0\nok");
    assert_eq!(driver.read("2").await.unwrap(), "21.5");
    assert_eq!(driver.read("2").await.unwrap(), "21.5");
}

#[tokio::test]
async fn test_timeout_then_next_operation_succeeds() {
    let server = server().await;
    server.add_command_response("M114", "X:0.00 Y:0.00 Z:0.00\nok");
    let driver = driver(&server, registry());
    driver.connect().await.unwrap();

    match driver.send_command("M999").await.unwrap_err() {
        Error::Protocol(ProtocolError::Timeout {
            command,
            timeout_ms,
            lines,
        }) => {
            assert_eq!(command, "M999");
            assert_eq!(timeout_ms, 500);
            assert!(lines.is_empty());
        }
        other => panic!("expected Timeout, got {}", other),
    }

    let result = driver.send_command("M114").await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.lines, vec!["X:0.00 Y:0.00 Z:0.00"]);
}

#[tokio::test]
async fn test_error_pattern_rejects_command() {
    let server = server().await;
    server.add_command_response("G1 X9999", "error:15\nok");
    let driver = driver(&server, registry());
    driver.set_error_pattern(Some("^error:")).unwrap();
    driver.connect().await.unwrap();

    match driver.send_command("G1 X9999").await.unwrap_err() {
        Error::Protocol(ProtocolError::Rejected { line, .. }) => assert_eq!(line, "error:15"),
        other => panic!("expected Rejected, got {}", other),
    }
}

#[tokio::test]
async fn test_rejected_command_leaves_no_reply_for_the_next() {
    let server = server().await;
    server.add_command_response("G1 X9999", "error:15\nok");
    server.add_command_response("M114", "X:0.00 Y:0.00\nok");
    let driver = driver(&server, registry());
    driver.set_error_pattern(Some("^error:")).unwrap();
    driver.connect().await.unwrap();

    let err = driver.send_command("G1 X9999").await.unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::Rejected { .. })));

    let result = driver.send_command("M114").await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.lines, vec!["X:0.00 Y:0.00"]);
    assert_eq!(server.received(), vec!["G1 X9999", "M114"]);
}

#[tokio::test]
async fn test_multi_line_read_keeps_first_matched_value() {
    let server = server().await;
    server.add_command_response("M105 T0", "T:20.5 /0.0\nok");
    server.add_command_response("M105 T1", "T:99.0 /0.0\nok");
    server.add_command_response("M105 T2", "busy\nok");
    server.add_command_response("M105 T3", "T:42.0 /0.0\nok");

    let mut registry = registry();
    registry
        .set_command("H1", CommandKind::ActuatorRead, "M105 T0\nM105 T1")
        .unwrap();
    registry
        .set_command("H2", CommandKind::ActuatorRead, "M105 T2\nM105 T3")
        .unwrap();
    registry
        .set_pattern(
            Subject::Global,
            CommandKind::ActuatorRead,
            r"T:(?<Value>-?\d+\.\d+)",
        )
        .unwrap();
    let driver = driver(&server, registry);
    driver.connect().await.unwrap();

    assert_eq!(driver.read("H1").await.unwrap(), "20.5");
    assert_eq!(driver.read("H2").await.unwrap(), "42.0");
    assert_eq!(
        server.received(),
        vec!["M105 T0", "M105 T1", "M105 T2", "M105 T3"]
    );
}

#[tokio::test]
async fn test_read_template_filling_to_nothing_sends_nothing() {
    let server = server().await;
    let mut registry = registry();
    registry
        .set_command("A1", CommandKind::ActuatorRead, "{Foo}")
        .unwrap();
    registry
        .set_pattern("A1", CommandKind::ActuatorRead, r"v:(?<Value>\d+)")
        .unwrap();
    let driver = driver(&server, registry);
    driver.connect().await.unwrap();

    let err = driver.read("A1").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::InvalidTemplate { .. })
    ));

    let err = driver.send_command("  ").await.unwrap_err();
    assert!(err.is_config_error());
    assert!(server.received().is_empty());
}

#[tokio::test]
async fn test_move_to_fills_axes_and_waits() {
    let server = server().await;
    server.add_command_response("G0 X10.0000 Y-2.5000 F3000", "ok");

    let mut registry = registry();
    registry
        .set_command(
            Subject::Global,
            CommandKind::MoveTo,
            "G0 {X:X%.4f} {Y:Y%.4f} {Z:Z%.4f} F{FeedRate:%.0f}",
        )
        .unwrap();
    let driver = driver(&server, registry);
    driver.connect().await.unwrap();

    let target = MoveTarget::new().x(10.0).y(-2.5).feed_rate(3000.0);
    driver.move_to(Subject::Global, &target).await.unwrap();

    assert_eq!(
        server.received(),
        vec!["G0 X10.0000 Y-2.5000 F3000".to_string(), WAIT.to_string()]
    );
}

#[tokio::test]
async fn test_actuate_picks_command_by_value_type() {
    let server = server().await;
    server.add_command_response("M106 P1", "ok");
    server.add_command_response("M107 P1", "ok");
    server.add_command_response("M3 S12000", "ok");

    let mut registry = registry();
    registry
        .set_command(
            "1",
            CommandKind::ActuateBoolean,
            "{True:M106}{False:M107} P{Id}",
        )
        .unwrap();
    registry
        .set_command("spindle", CommandKind::ActuateDouble, "M3 S{Value:%.0f}")
        .unwrap();
    let driver = driver(&server, registry);
    driver.connect().await.unwrap();

    driver.actuate("1", &ActuatorValue::Boolean(true)).await.unwrap();
    driver.actuate("1", &ActuatorValue::Boolean(false)).await.unwrap();
    driver
        .actuate("spindle", &ActuatorValue::Double(12000.0))
        .await
        .unwrap();

    assert_eq!(server.received(), vec!["M106 P1", "M107 P1", "M3 S12000"]);
}

#[tokio::test]
async fn test_concurrent_callers_never_interleave() {
    let server = server().await;
    server.set_response_delay(Duration::from_millis(5));
    for i in 0..6 {
        server.add_command_response(format!("M{}", 100 + i), "ok");
    }
    let driver = Arc::new(driver(&server, registry()));
    driver.connect().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..6 {
        let driver = driver.clone();
        handles.push(tokio::spawn(async move {
            driver.send_command(&format!("M{}", 100 + i)).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_success());
    }

    let events = server.events();
    assert_eq!(events.len(), 12);
    for pair in events.chunks(2) {
        match (&pair[0], &pair[1]) {
            (ServerEvent::Received(sent), ServerEvent::Replied(answered)) => {
                assert_eq!(sent, answered)
            }
            other => panic!("interleaved exchange: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_concurrent_enable_runs_setup_once() {
    let server = server().await;
    server.set_response_delay(Duration::from_millis(5));
    let driver = Arc::new(driver(&server, registry()));

    let first = tokio::spawn({
        let driver = driver.clone();
        async move { driver.enable().await }
    });
    let second = tokio::spawn({
        let driver = driver.clone();
        async move { driver.enable().await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(driver.state(), DriverState::Enabled);
    assert_eq!(server.received(), setup_lines());
}

#[tokio::test]
async fn test_registry_locked_while_enabled() {
    let server = server().await;
    let driver = driver(&server, registry());
    driver.enable().await.unwrap();

    let err = driver
        .set_command(Subject::Global, CommandKind::Home, "G28 X")
        .unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::RegistryLocked)));

    driver.disable().await.unwrap();
    assert!(driver
        .set_command(Subject::Global, CommandKind::Home, "G28 X")
        .is_ok());
}

#[tokio::test]
async fn test_disable_without_keep_alive_disconnects() {
    let server = server().await;
    server.add_command_response("M84", "ok");
    let mut registry = registry();
    registry
        .set_command(Subject::Global, CommandKind::Disable, "M84")
        .unwrap();
    let driver = driver(&server, registry);
    driver.enable().await.unwrap();

    driver.disable().await.unwrap();
    assert_eq!(driver.state(), DriverState::Disconnected);
    assert_eq!(server.received().last().map(String::as_str), Some("M84"));

    let err = driver.send_command("M114").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::NotConnected)
    ));
    // closing twice is harmless
    driver.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disable_with_keep_alive_stays_connected() {
    let server = server().await;
    server.add_command_response("M114", "ok");
    let driver = GcodeDriver::from_params(
        &ConnectionParams::tcp("127.0.0.1", server.listener_port()),
        registry(),
        DriverSettings {
            keep_alive: true,
            ..settings()
        },
    )
    .unwrap();
    driver.enable().await.unwrap();

    driver.disable().await.unwrap();
    assert_eq!(driver.state(), DriverState::Connected);
    assert!(driver.send_command("M114").await.unwrap().is_success());
}
