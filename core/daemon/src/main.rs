//! Tabtrail daemon entrypoint.
//!
//! A single-writer service that tracks browsing sessions and dwell time. The
//! browser host sends lifecycle events over a Unix socket; one engine thread
//! owns all tracker state and persists it to SQLite.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serde::Serialize;
use tabtrail_protocol::{
    parse_event, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod active_page;
mod clock;
mod config;
mod edges;
mod engine;
mod error;
mod focus;
mod navigation;
mod persistence;
mod registry;
mod relationships;
mod service;
mod state;
mod store;
mod types;

use clock::SystemClock;
use config::TrackerConfig;
use engine::Tracker;
use service::EngineHandle;
use store::SqliteStore;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Tabtrail daemon started");

    let config = match config::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load tracker config; using defaults");
            TrackerConfig::default()
        }
    };
    info!(
        save_debounce_ms = config.persistence.save_debounce_ms,
        max_age_hours = config.retention.max_age_hours,
        gc_interval_secs = config.retention.gc_interval_secs,
        active_window_mins = config.sessions.active_window_mins,
        "Tracker config loaded"
    );

    let db_path = match config.persistence.db_path.clone() {
        Some(path) => path,
        None => match daemon_db_path() {
            Ok(path) => path,
            Err(err) => {
                error!(error = %err, "Failed to resolve daemon database path");
                std::process::exit(1);
            }
        },
    };

    let store = match SqliteStore::new(db_path) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let tracker = Tracker::init(Box::new(SystemClock), Box::new(store), config);
    let (engine, engine_thread) = match service::spawn_engine(tracker) {
        Ok(spawned) => spawned,
        Err(err) => {
            error!(error = %err, "Failed to start tracker engine");
            std::process::exit(1);
        }
    };

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let engine = engine.clone();
                thread::spawn(move || handle_connection(stream, engine));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }

    engine.shutdown();
    if engine_thread.join().is_err() {
        error!("Tracker engine thread panicked");
    }
}

fn init_logging() {
    let debug_enabled = env::var("TABTRAIL_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".tabtrail").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".tabtrail").join("daemon").join("state.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, engine: EngineHandle) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &engine);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, engine: &EngineHandle) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => match engine.health() {
            Ok(health) => {
                let mut data = serde_json::json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                });
                if let Ok(value) = serde_json::to_value(health) {
                    data["tracker"] = value;
                }
                Response::ok(request.id, data)
            }
            Err(err) => engine_unavailable(request.id, err),
        },
        Method::GetCurrentData => match engine.current_data() {
            Ok(data) => {
                tracing::debug!(
                    sessions = data.total_sessions,
                    relationships = data.tab_relationships.len(),
                    "Current data snapshot"
                );
                serialize_response(request.id, &data, "current data")
            }
            Err(err) => engine_unavailable(request.id, err),
        },
        Method::ClearData => match engine.clear() {
            Ok(()) => Response::ok(request.id, serde_json::json!({ "cleared": true })),
            Err(err) => engine_unavailable(request.id, err),
        },
        Method::Event => handle_event(request, engine),
    }
}

fn handle_event(request: Request, engine: &EngineHandle) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "event payload is required"),
    };

    let event = match parse_event(params) {
        Ok(event) => event,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    info!(
        event_type = ?event.event_type,
        tab_id = ?event.tab_id,
        opener_tab_id = ?event.opener_tab_id,
        url = ?event.url,
        has_focus = ?event.has_focus,
        "Received event"
    );

    match engine.send_event(event) {
        Ok(()) => Response::ok(request.id, serde_json::json!({ "accepted": true })),
        Err(err) => engine_unavailable(request.id, err),
    }
}

fn serialize_response<T: Serialize>(id: Option<String>, value: &T, what: &str) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        ),
    }
}

fn engine_unavailable(id: Option<String>, err: service::EngineGone) -> Response {
    error!(error = %err, "Tracker engine unavailable");
    Response::error(id, "engine_unavailable", err.to_string())
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
