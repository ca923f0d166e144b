//! IPC protocol types and validation for tabtrail-daemon.
//!
//! This crate is shared by the daemon and the browser-side shim that forwards
//! tab lifecycle events. The daemon remains the authority on validation, but
//! clients can reuse the same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_URL_BYTES: usize = 32 * 1024;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Event,
    GetCurrentData,
    ClearData,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum EventType {
    TabCreated,
    NavigationComplete,
    TabActivated,
    BrowserFocusChanged,
    TabRemoved,
}

/// One host lifecycle event. Which optional fields are required depends on
/// `event_type`; see [`EventEnvelope::validate`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EventEnvelope {
    pub event_type: EventType,
    #[serde(default)]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub opener_tab_id: Option<i64>,
    /// Opener URL when the host already knows it at spawn time.
    #[serde(default)]
    pub opener_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub has_focus: Option<bool>,
}

impl EventEnvelope {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            tab_id: None,
            opener_tab_id: None,
            opener_url: None,
            url: None,
            has_focus: None,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self.event_type {
            EventType::TabCreated => {
                require_tab_id(self.tab_id, "tab_id")?;
                if self.opener_tab_id.is_some() {
                    require_tab_id(self.opener_tab_id, "opener_tab_id")?;
                }
            }
            EventType::NavigationComplete => {
                require_tab_id(self.tab_id, "tab_id")?;
                let url = require_string(&self.url, "url")?;
                if url.len() > MAX_URL_BYTES {
                    return Err(ErrorInfo::new(
                        "invalid_url",
                        format!("url must be {} bytes or fewer", MAX_URL_BYTES),
                    ));
                }
                if !is_trackable_url(url) {
                    return Err(ErrorInfo::new(
                        "unsupported_url",
                        "url must be an http(s) address with a host",
                    ));
                }
            }
            EventType::TabActivated | EventType::TabRemoved => {
                require_tab_id(self.tab_id, "tab_id")?;
            }
            EventType::BrowserFocusChanged => {
                if self.has_focus.is_none() {
                    return Err(ErrorInfo::new("missing_field", "has_focus is required"));
                }
            }
        }

        Ok(())
    }
}

/// Internal pages (`chrome://`, `about:`, extension pages, `file://`) are
/// never tracked.
pub fn is_trackable_url(value: &str) -> bool {
    match Url::parse(value.trim()) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().map(|host| !host.is_empty()).unwrap_or(false)
        }
        Err(_) => false,
    }
}

pub fn parse_event(params: Value) -> Result<EventEnvelope, ErrorInfo> {
    let envelope: EventEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("event payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

fn require_string<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ErrorInfo> {
    if let Some(candidate) = value {
        if !candidate.trim().is_empty() {
            return Ok(candidate.as_str());
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}

fn require_tab_id(tab_id: Option<i64>, field: &str) -> Result<i64, ErrorInfo> {
    match tab_id {
        None => Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        )),
        Some(value) if value < 0 => Err(ErrorInfo::new(
            "invalid_tab_id",
            format!("{} must be non-negative", field),
        )),
        Some(value) => Ok(value),
    }
}
