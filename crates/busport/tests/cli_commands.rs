#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/busport-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn busport() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_busport"));
    command.arg("--log-level").arg("error");
    command
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("socket {} did not appear", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn spawn_server(args: &[&str], sock_path: &Path) -> Child {
    let child = busport()
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("server should start");
    wait_for_socket(sock_path, Duration::from_secs(3));
    child
}

fn send(sock_path: &Path, extra: &[&str]) -> Output {
    busport()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(sock_path)
        .arg("--name")
        .arg("svc")
        .args(extra)
        .output()
        .expect("send should run")
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn parse_line(stdout: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().next().expect("one output line");
    serde_json::from_str(line).expect("output should be json")
}

#[test]
fn send_wait_against_echo_prints_the_echo() {
    let dir = unique_temp_dir("echo");
    let sock = dir.join("echo.sock");
    let server = spawn_server(
        &["echo", sock.to_str().unwrap(), "--name", "svc"],
        &sock,
    );

    let output = send(&sock, &["--json", "{\"hello\":\"world\"}", "--wait"]);
    assert!(output.status.success(), "send failed: {output:?}");
    let received = parse_line(&output.stdout);
    assert_eq!(received["event"], "message-received");
    assert_eq!(received["name"], "svc");
    assert_eq!(received["role"], "client");
    assert_eq!(received["payload"], serde_json::json!({"hello": "world"}));

    stop(server);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn window_transport_round_trips_over_a_socket() {
    let dir = unique_temp_dir("window");
    let sock = dir.join("window.sock");
    let server = spawn_server(
        &[
            "--transport",
            "window",
            "echo",
            sock.to_str().unwrap(),
            "--name",
            "svc",
        ],
        &sock,
    );

    let output = send(
        &sock,
        &["--transport", "window", "--data", "framed", "--wait"],
    );
    assert!(output.status.success(), "send failed: {output:?}");
    assert_eq!(parse_line(&output.stdout)["payload"], "framed");

    stop(server);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn listen_prints_sent_messages_and_exits_after_count() {
    let dir = unique_temp_dir("listen");
    let sock = dir.join("listen.sock");
    let mut listener = busport()
        .arg("--format")
        .arg("json")
        .arg("listen")
        .arg(&sock)
        .arg("--name")
        .arg("svc")
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("listen should start");
    wait_for_socket(&sock, Duration::from_secs(3));

    let output = send(&sock, &["--data", "ping"]);
    assert!(output.status.success(), "send failed: {output:?}");

    let start = Instant::now();
    let status = loop {
        if let Some(status) = listener.try_wait().expect("listen status") {
            break status;
        }
        if start.elapsed() > Duration::from_secs(5) {
            stop(listener);
            panic!("listen did not exit after --count");
        }
        thread::sleep(Duration::from_millis(25));
    };
    assert!(status.success());

    let output = listener.wait_with_output().expect("listen output");
    let received = parse_line(&output.stdout);
    assert_eq!(received["role"], "server");
    assert_eq!(received["payload"], "ping");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn unanswered_name_times_out() {
    let dir = unique_temp_dir("timeout");
    let sock = dir.join("echo.sock");
    let server = spawn_server(
        &["echo", sock.to_str().unwrap(), "--name", "other"],
        &sock,
    );

    let output = send(&sock, &["--data", "x", "--connect-timeout", "200ms"]);
    assert_eq!(output.status.code(), Some(124));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not accepted"), "stderr: {stderr}");

    stop(server);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_socket_fails_to_connect() {
    let dir = unique_temp_dir("missing");
    let output = send(&dir.join("absent.sock"), &["--data", "x"]);
    assert_eq!(output.status.code(), Some(1));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_json_payload_is_usage_error() {
    let dir = unique_temp_dir("usage");
    let output = send(&dir.join("absent.sock"), &["--json", "{nope"]);
    assert_eq!(output.status.code(), Some(64));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn proxy_relays_to_upstream_echo() {
    let dir = unique_temp_dir("proxy");
    let back = dir.join("back.sock");
    let front = dir.join("front.sock");
    let echo = spawn_server(
        &["echo", back.to_str().unwrap(), "--name", "svc"],
        &back,
    );
    let proxy = spawn_server(
        &[
            "proxy",
            front.to_str().unwrap(),
            back.to_str().unwrap(),
            "--name",
            "svc",
        ],
        &front,
    );

    let output = send(&front, &["--json", "[1,2,3]", "--wait"]);
    assert!(output.status.success(), "send through proxy failed: {output:?}");
    let received = parse_line(&output.stdout);
    assert_eq!(received["payload"], serde_json::json!([1, 2, 3]));

    stop(proxy);
    stop(echo);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn file_payload_round_trips_as_buffer() {
    let dir = unique_temp_dir("file");
    let sock = dir.join("echo.sock");
    let file = dir.join("payload.bin");
    std::fs::write(&file, b"binary-ish").expect("payload file should be writable");
    let server = spawn_server(
        &["echo", sock.to_str().unwrap(), "--name", "svc"],
        &sock,
    );

    let output = busport()
        .arg("--format")
        .arg("raw")
        .arg("send")
        .arg(&sock)
        .arg("--name")
        .arg("svc")
        .arg("--file")
        .arg(&file)
        .arg("--wait")
        .output()
        .expect("send should run");
    assert!(output.status.success(), "send failed: {output:?}");
    assert_eq!(output.stdout, b"binary-ish");

    stop(server);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_extended_lists_transports() {
    let output = busport()
        .arg("version")
        .arg("--extended")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: busport"));
    assert!(stdout.contains("transports: generic, window, worker, broadcast"));
}
