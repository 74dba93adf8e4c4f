use std::process::Command;
use tempfile::TempDir;

#[test]
fn test_missing_argument_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_shelfwatch"))
        .output()
        .expect("Failed to run shelfwatch");

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("CONFIG"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("absent.json");

    let output = Command::new(env!("CARGO_BIN_EXE_shelfwatch"))
        .arg(&config_path)
        .output()
        .expect("Failed to run shelfwatch");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Error reading config"));
}

#[test]
fn test_library_without_directories_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{ "mqtt": { "ip": "127.0.0.1", "port": 1883, "user": "", "password": "", "topic": "t" },
             "libraries": { "movies": [] } }"#,
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_shelfwatch"))
        .arg("--dry-run")
        .arg(&config_path)
        .output()
        .expect("Failed to run shelfwatch");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("movies"));
}

#[cfg(unix)]
#[test]
fn test_sigterm_exits_cleanly() {
    use std::time::{Duration, Instant};

    let temp_dir = TempDir::new().unwrap();
    let library_dir = temp_dir.path().join("movies");
    std::fs::create_dir(&library_dir).unwrap();

    let config_path = temp_dir.path().join("config.json");
    let config = serde_json::json!({
        "mqtt": { "ip": "127.0.0.1", "port": 1883, "user": "", "password": "", "topic": "t" },
        "libraries": { "movies": [library_dir] }
    });
    std::fs::write(&config_path, config.to_string()).unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_shelfwatch"))
        .arg("--dry-run")
        .arg(&config_path)
        .spawn()
        .expect("Failed to start shelfwatch");

    // Give the daemon time to install its signal handlers
    std::thread::sleep(Duration::from_secs(2));

    let status = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .status()
        .expect("Failed to send SIGTERM");
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let exit = loop {
        if let Some(exit) = child.try_wait().unwrap() {
            break exit;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("shelfwatch did not exit after SIGTERM");
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    assert!(exit.success());
}
