//! Reply lines written by the dispatcher
//!
//! Replies are either plain text tokens (`PONG`, `CAM_ACKNOWLEDGED`,
//! `IP:<addr>`) or one-line JSON objects with scalar values.

use crate::command;
use alloc::string::{String, ToString};
use serde::{Deserialize, Serialize};

/// `STATUS` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub ready: bool,
    pub camera: String,
    pub wifi: String,
    #[serde(default)]
    pub ssid: String,
    pub s3_connected: bool,
    #[serde(default)]
    pub sleeping: bool,
}

impl StatusReply {
    pub fn camera_ok(&self) -> bool {
        self.camera == "ok"
    }
}

/// Metadata line for a captured frame, also the header of an image transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub success: bool,
    pub size: usize,
    pub width: u32,
    pub height: u32,
}

/// `{"success":false,"error":...}` or `{"error":...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    #[serde(default)]
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct QualityReply {
    success: bool,
    quality: u8,
}

#[derive(Debug, Serialize)]
struct MessageReply<'a> {
    success: bool,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct ReadyReply<'a> {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct EventLine<'a> {
    status: &'a str,
}

/// `GETWIFI` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiInfoReply {
    pub configured: bool,
    pub ssid: String,
    pub ip: String,
}

/// `VERSION` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
    pub board: String,
}

/// Status events emitted without a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    CameraSleeping,
    CameraAwake,
}

impl StatusEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusEvent::CameraSleeping => "camera_sleeping",
            StatusEvent::CameraAwake => "camera_awake",
        }
    }
}

/// One reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Pong,
    PeerAck,
    Ip(String),
    Status(StatusReply),
    Frame(FrameInfo),
    Quality(u8),
    Event(StatusEvent),
    Ready { ready: bool, detail: String },
    Ok(String),
    Error(String),
    Version(VersionReply),
    WifiInfo(WifiInfoReply),
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    /// Serialize to a single line without the terminator
    pub fn to_line(&self) -> String {
        let encoded = match self {
            Reply::Pong => return command::PONG.to_string(),
            Reply::PeerAck => return command::PEER_ACK.to_string(),
            Reply::Ip(ip) => return alloc::format!("{}{}", command::IP_PREFIX, ip),
            Reply::Status(status) => serde_json::to_string(status),
            Reply::Frame(info) => serde_json::to_string(info),
            Reply::Quality(quality) => serde_json::to_string(&QualityReply {
                success: true,
                quality: *quality,
            }),
            Reply::Event(event) => serde_json::to_string(&EventLine {
                status: event.as_str(),
            }),
            Reply::Ready { ready, detail } => serde_json::to_string(&ReadyReply {
                ready: *ready,
                message: ready.then_some(detail.as_str()),
                error: (!ready).then_some(detail.as_str()),
            }),
            Reply::Ok(message) => serde_json::to_string(&MessageReply {
                success: true,
                message,
            }),
            Reply::Error(error) => serde_json::to_string(&ErrorReply {
                success: false,
                error: error.clone(),
            }),
            Reply::Version(version) => serde_json::to_string(version),
            Reply::WifiInfo(info) => serde_json::to_string(info),
        };
        encoded.unwrap_or_else(|_| String::from(r#"{"success":false,"error":"encode failed"}"#))
    }
}

/// Parse a JSON reply line into `T`, `None` for text lines or other shapes
pub fn parse_line<'a, T: Deserialize<'a>>(line: &'a str) -> Option<T> {
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

impl FrameInfo {
    /// Metadata line of a successful capture
    pub fn from_line(line: &str) -> Option<Self> {
        parse_line::<FrameInfo>(line).filter(|info| info.success)
    }
}
