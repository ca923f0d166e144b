use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tabtrail_protocol::{EventEnvelope, EventType, Method, Request, Response, PROTOCOL_VERSION};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_tabtrail-daemon"))
        .env("HOME", home)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn tabtrail-daemon")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".tabtrail").join("daemon.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn request(method: Method, id: &str) -> Request {
    Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(id.to_string()),
        params: None,
    }
}

fn send_event(socket: &Path, id: &str, event: EventEnvelope) -> Response {
    send_request(
        socket,
        Request {
            params: Some(serde_json::to_value(event).expect("Failed to serialize event")),
            ..request(Method::Event, id)
        },
    )
}

#[test]
fn daemon_ipc_tracks_tab_lifecycle_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let _guard = DaemonGuard { child };

    wait_for_socket(&socket, Duration::from_secs(2));

    let health = send_request(&socket, request(Method::GetHealth, "health-check"));
    assert!(health.ok, "health response was not ok");
    let status = health
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(|value| value.as_str())
        .unwrap_or("missing");
    assert_eq!(status, "ok");

    let first = send_event(
        &socket,
        "nav-1",
        EventEnvelope {
            tab_id: Some(1),
            url: Some("https://news.example.com/".to_string()),
            ..EventEnvelope::new(EventType::NavigationComplete)
        },
    );
    assert!(first.ok, "navigation response was not ok");

    let activated = send_event(
        &socket,
        "activate-1",
        EventEnvelope {
            tab_id: Some(1),
            ..EventEnvelope::new(EventType::TabActivated)
        },
    );
    assert!(activated.ok, "activation response was not ok");

    let child_tab = send_event(
        &socket,
        "create-2",
        EventEnvelope {
            tab_id: Some(2),
            opener_tab_id: Some(1),
            ..EventEnvelope::new(EventType::TabCreated)
        },
    );
    assert!(child_tab.ok, "tab_created response was not ok");

    let child_nav = send_event(
        &socket,
        "nav-2",
        EventEnvelope {
            tab_id: Some(2),
            url: Some("https://docs.example.com/guide".to_string()),
            ..EventEnvelope::new(EventType::NavigationComplete)
        },
    );
    assert!(child_nav.ok, "child navigation response was not ok");

    let second = send_event(
        &socket,
        "nav-3",
        EventEnvelope {
            tab_id: Some(1),
            url: Some("https://news.example.com/story".to_string()),
            ..EventEnvelope::new(EventType::NavigationComplete)
        },
    );
    assert!(second.ok, "second navigation response was not ok");

    let current = send_request(&socket, request(Method::GetCurrentData, "current-data"));
    assert!(current.ok, "current data response was not ok");
    let data = current.data.expect("current data payload");
    assert_eq!(data["totalSessions"], 2);
    assert_eq!(data["totalVisits"], 3);
    assert_eq!(data["totalEdges"], 1);

    let sessions = data["sessions"].as_array().expect("sessions array");
    let first_tab = sessions
        .iter()
        .find(|session| session["tabId"] == 1)
        .expect("tab 1 session");
    let visits = first_tab["urlSequence"].as_array().expect("visits");
    assert_eq!(visits.len(), 2);
    assert_eq!(visits[0]["domain"], "news.example.com");
    assert!(visits[0]["dwellTime"].as_f64().expect("dwell") >= 0.1);
    assert!(visits[1]["endTime"].is_null());

    let relationships = data["tabRelationships"].as_array().expect("relationships");
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0]["parentTabId"], 1);
    assert_eq!(relationships[0]["childTabId"], 2);
    assert_eq!(relationships[0]["openerUrl"], "https://news.example.com/");
    assert_eq!(relationships[0]["targetUrl"], "https://docs.example.com/guide");

    let removed = send_event(
        &socket,
        "remove-2",
        EventEnvelope {
            tab_id: Some(2),
            ..EventEnvelope::new(EventType::TabRemoved)
        },
    );
    assert!(removed.ok, "tab_removed response was not ok");

    let after_remove = send_request(&socket, request(Method::GetCurrentData, "after-remove"));
    let data = after_remove.data.expect("current data payload");
    let removed_tab = data["sessions"]
        .as_array()
        .expect("sessions array")
        .iter()
        .find(|session| session["tabId"] == 2)
        .expect("closed session stays listed");
    assert!(removed_tab["closed"].is_string());
    assert_eq!(removed_tab["isActive"], false);

    let cleared = send_request(&socket, request(Method::ClearData, "clear"));
    assert!(cleared.ok, "clear response was not ok");

    let after_clear = send_request(&socket, request(Method::GetCurrentData, "after-clear"));
    let data = after_clear.data.expect("current data payload");
    assert_eq!(data["totalSessions"], 0);
    assert!(data["tabRelationships"]
        .as_array()
        .expect("relationships")
        .is_empty());
}
