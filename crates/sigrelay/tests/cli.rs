#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use sigrelay_peer::{Initiator, InitiatorConfig, Receiver, ReceiverConfig, ReceiverEvent};
use sigrelay_transport::MemoryHub;

struct RelayProcess {
    child: Child,
    addr: String,
}

impl Drop for RelayProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_relay() -> RelayProcess {
    let mut child = Command::new(env!("CARGO_BIN_EXE_sigrelay"))
        .args(["--log-level", "error", "--format", "json", "relay", "--bind", "127.0.0.1:0"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("relay command should start");

    let stdout = child.stdout.take().expect("stdout should be piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("relay should print its address");
    let event: serde_json::Value =
        serde_json::from_str(&line).expect("listening event should be json");
    assert_eq!(event["kind"], "relay-listening");
    let addr = event["detail"]
        .as_str()
        .expect("listening event should carry the address")
        .to_string();

    RelayProcess { child, addr }
}

fn run_demo(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_sigrelay"))
        .args(["--log-level", "error", "--format", "json", "demo"])
        .args(args)
        .output()
        .expect("demo should run")
}

fn events(output: &std::process::Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect()
}

fn count(events: &[serde_json::Value], kind: &str) -> usize {
    events.iter().filter(|event| event["kind"] == kind).count()
}

#[test]
fn relay_process_pairs_receiver_and_initiator() {
    let relay = spawn_relay();
    let runtime = tokio::runtime::Runtime::new().expect("runtime should build");

    runtime.block_on(async {
        let hub = MemoryHub::new();
        let mut host = Receiver::new(ReceiverConfig::new(relay.addr.clone(), "cli1"))
            .register(Arc::new(hub.clone()))
            .await
            .expect("receiver should register");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let initiator = tokio::time::timeout(
            Duration::from_secs(5),
            Initiator::new(InitiatorConfig::new(relay.addr.clone(), "CLI1")).connect(&hub),
        )
        .await
        .expect("connect should finish in time")
        .expect("initiator should connect");

        let event = tokio::time::timeout(Duration::from_secs(5), host.next_event())
            .await
            .expect("join should arrive in time")
            .expect("receiver should be running");
        match event {
            ReceiverEvent::InitiatorJoined(joined) => assert_eq!(Some(joined.id()), initiator.id()),
            other => panic!("expected join, got {other:?}"),
        }
        host.shutdown().await;
    });
}

#[test]
fn demo_joins_and_releases_every_initiator() {
    let output = run_demo(&["--code", "demo", "--initiators", "2"]);
    assert!(
        output.status.success(),
        "demo failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let events = events(&output);
    assert_eq!(count(&events, "receiver-registered"), 1);
    assert_eq!(count(&events, "initiator-joined"), 2);
    assert_eq!(count(&events, "initiator-left"), 2);
    assert_eq!(count(&events, "receiver-received"), 2);
    assert_eq!(count(&events, "initiator-received"), 2);
    assert!(events
        .iter()
        .filter(|event| event["kind"] == "initiator-joined")
        .all(|event| event["code"] == "DEMO"));
}

#[test]
fn demo_with_unknown_code_exits_44() {
    let output = run_demo(&["--code", "here", "--join", "gone"]);

    assert_eq!(output.status.code(), Some(44));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GONE"), "stderr was: {stderr}");
}

#[test]
fn version_reports_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_sigrelay"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("sigrelay {}", env!("CARGO_PKG_VERSION"))
    );
}
