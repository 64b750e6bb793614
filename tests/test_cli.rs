use clap::Parser;
use gcodelink::cli::{run, Cli};
use gcodelink::{CommandKind, Config, GcodeServer};
use tempfile::tempdir;

const SETUP: [&str; 5] = [
    "G21 ; Set millimeters mode",
    "G90 ; Set absolute positioning mode",
    "M82 ; Set absolute mode for extruder",
    "G28 ; Home all axes",
    "M400 ; Wait for moves to complete before returning",
];

async fn server() -> GcodeServer {
    let server = GcodeServer::bind().await.unwrap();
    for line in SETUP {
        server.add_command_response(line, "ok");
    }
    server
}

fn write_config(dir: &std::path::Path, port: u16, edit: impl FnOnce(&mut Config)) -> String {
    let mut config = Config::default();
    config.connection.host = "127.0.0.1".to_string();
    config.connection.port = port;
    config.driver.connect_wait_ms = 0;
    config.driver.timeout_ms = 500;
    edit(&mut config);

    let path = dir.join("config.toml");
    config.save_to_file(&path).unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn test_init_config_writes_loadable_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gcodelink.toml");
    let path_arg = path.display().to_string();

    let cli = Cli::try_parse_from(["gcodelink", "init-config", path_arg.as_str()]).unwrap();
    assert!(run(cli).await.unwrap().is_some());
    assert_eq!(Config::load_from_file(&path).unwrap(), Config::default());

    // refuses to overwrite without --force
    let cli = Cli::try_parse_from(["gcodelink", "init-config", path_arg.as_str()]).unwrap();
    assert!(run(cli).await.is_err());
    let cli =
        Cli::try_parse_from(["gcodelink", "init-config", path_arg.as_str(), "--force"]).unwrap();
    assert!(run(cli).await.is_ok());
}

#[tokio::test]
async fn test_read_prints_value() {
    let server = server().await;
    server.add_command_response("READ A1", "read:a1:497\nok");
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), server.listener_port(), |config| {
        config.set_command("A1", CommandKind::ActuatorRead, "READ A1");
        config.set_pattern("A1", CommandKind::ActuatorRead, r"read:a1:(?<Value>-?\d+)");
    });

    let cli = Cli::try_parse_from(["gcodelink", "--config", config.as_str(), "read", "A1"]).unwrap();
    assert_eq!(run(cli).await.unwrap().as_deref(), Some("497"));

    let mut expected: Vec<String> = SETUP.iter().map(|s| s.to_string()).collect();
    expected.push("READ A1".to_string());
    assert_eq!(server.received(), expected);
}

#[tokio::test]
async fn test_move_sends_filled_template() {
    let server = server().await;
    server.add_command_response("G0 X1.0000 Z-3.2500 F1200", "ok");
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), server.listener_port(), |_| {});

    let cli = Cli::try_parse_from([
        "gcodelink",
        "--config",
        config.as_str(),
        "move",
        "--x",
        "1",
        "--z",
        "-3.25",
        "--feed-rate",
        "1200",
    ])
    .unwrap();
    assert_eq!(run(cli).await.unwrap(), None);

    let received = server.received();
    assert_eq!(
        &received[SETUP.len()..],
        &[
            "G0 X1.0000 Z-3.2500 F1200".to_string(),
            "M400 ; Wait for moves to complete before returning".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_read_without_command_reports_kind() {
    let server = server().await;
    let dir = tempdir().unwrap();
    let config = write_config(dir.path(), server.listener_port(), |_| {});

    let cli = Cli::try_parse_from(["gcodelink", "--config", config.as_str(), "read", "A1"]).unwrap();
    let err = run(cli).await.unwrap_err();
    assert!(err.to_string().contains("actuator_read"));
}
