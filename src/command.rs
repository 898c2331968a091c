//! Command tokens of the camera link
//!
//! Tokens are case-sensitive. Two commands carry an argument after a `:`
//! prefix: `QUALITY:<n>` and `SETWIFI:<ssid>,<password>`.

use crate::config;
use alloc::string::{String, ToString};
use core::fmt;

pub const PING: &str = "PING";
pub const PONG: &str = "PONG";
pub const STATUS: &str = "STATUS";
pub const CAPTURE: &str = "CAPTURE";
pub const GETIMAGE: &str = "GETIMAGE";
pub const SLEEP: &str = "SLEEP";
pub const WAKE: &str = "WAKE";
pub const REINIT: &str = "REINIT";
pub const RESET: &str = "RESET";
pub const VERSION: &str = "VERSION";
pub const GETWIFI: &str = "GETWIFI";
pub const CLEARWIFI: &str = "CLEARWIFI";
pub const PEER_HANDSHAKE: &str = "S3_CONNECTED";
pub const PEER_ACK: &str = "CAM_ACKNOWLEDGED";
pub const GET_IP: &str = "GET_IP";
pub const QUALITY_PREFIX: &str = "QUALITY:";
pub const SETWIFI_PREFIX: &str = "SETWIFI:";

/// Unsolicited lines the camera board emits
pub const READY_ANNOUNCEMENT: &str = "ESP32_CAM_READY";
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const IP_PREFIX: &str = "IP:";

/// Announcements, heartbeats and status events the camera board emits unasked
pub fn is_unsolicited(line: &str) -> bool {
    line.starts_with(READY_ANNOUNCEMENT)
        || line.starts_with(HEARTBEAT)
        || line.starts_with(r#"{"status":"#)
}

/// One parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Status,
    Capture,
    GetImage,
    Sleep,
    Wake,
    Reinit,
    Reset,
    Version,
    GetWifi,
    ClearWifi,
    PeerConnected,
    GetIp,
    /// Raw quality value, range checked by the dispatcher
    Quality(i32),
    SetWifi { ssid: String, password: String },
}

/// Reasons a line does not parse into a `Command`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Token not in the command table; carries the input text
    Unknown(String),
    /// `QUALITY:` argument is not an integer
    InvalidQuality(String),
    /// `SETWIFI:` without a comma between SSID and password
    MalformedWifi,
    /// `SETWIFI:` with an empty SSID or password
    EmptyWifiField,
    /// SSID over 32 bytes or password over 64 bytes
    CredentialsTooLong,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(text) => write!(f, "Unknown command: {}", text),
            CommandError::InvalidQuality(arg) => write!(f, "Invalid quality value: {}", arg),
            CommandError::MalformedWifi => f.write_str("Invalid SETWIFI format, use SETWIFI:ssid,password"),
            CommandError::EmptyWifiField => f.write_str("SSID and password must not be empty"),
            CommandError::CredentialsTooLong => f.write_str("SSID max 32 bytes, password max 64 bytes"),
        }
    }
}

impl Command {
    /// Parse one line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let command = match line {
            PING => Command::Ping,
            STATUS => Command::Status,
            CAPTURE => Command::Capture,
            GETIMAGE => Command::GetImage,
            SLEEP => Command::Sleep,
            WAKE => Command::Wake,
            REINIT => Command::Reinit,
            RESET => Command::Reset,
            VERSION => Command::Version,
            GETWIFI => Command::GetWifi,
            CLEARWIFI => Command::ClearWifi,
            PEER_HANDSHAKE => Command::PeerConnected,
            GET_IP => Command::GetIp,
            _ => {
                if let Some(arg) = line.strip_prefix(QUALITY_PREFIX) {
                    let value = arg
                        .trim()
                        .parse::<i32>()
                        .map_err(|_| CommandError::InvalidQuality(arg.to_string()))?;
                    Command::Quality(value)
                } else if let Some(arg) = line.strip_prefix(SETWIFI_PREFIX) {
                    parse_wifi(arg)?
                } else {
                    return Err(CommandError::Unknown(line.to_string()));
                }
            }
        };
        Ok(command)
    }

    /// Wire form of the command, without the line terminator
    pub fn encode(&self) -> String {
        match self {
            Command::Ping => PING.to_string(),
            Command::Status => STATUS.to_string(),
            Command::Capture => CAPTURE.to_string(),
            Command::GetImage => GETIMAGE.to_string(),
            Command::Sleep => SLEEP.to_string(),
            Command::Wake => WAKE.to_string(),
            Command::Reinit => REINIT.to_string(),
            Command::Reset => RESET.to_string(),
            Command::Version => VERSION.to_string(),
            Command::GetWifi => GETWIFI.to_string(),
            Command::ClearWifi => CLEARWIFI.to_string(),
            Command::PeerConnected => PEER_HANDSHAKE.to_string(),
            Command::GetIp => GET_IP.to_string(),
            Command::Quality(value) => alloc::format!("{}{}", QUALITY_PREFIX, value),
            Command::SetWifi { ssid, password } => {
                alloc::format!("{}{},{}", SETWIFI_PREFIX, ssid, password)
            }
        }
    }

    /// Commands that count as camera activity for the idle timer
    pub fn touches_camera(&self) -> bool {
        matches!(
            self,
            Command::Capture | Command::GetImage | Command::Quality(_) | Command::Status
        )
    }
}

/// Validate a quality value against the sensor range
pub fn quality_in_range(value: i32) -> Option<u8> {
    if (config::QUALITY_MIN as i32..=config::QUALITY_MAX as i32).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

fn parse_wifi(arg: &str) -> Result<Command, CommandError> {
    // The first comma splits; a password may itself contain commas
    let (ssid, password) = arg.split_once(',').ok_or(CommandError::MalformedWifi)?;
    if ssid.is_empty() || password.is_empty() {
        return Err(CommandError::EmptyWifiField);
    }
    if ssid.len() > 32 || password.len() > 64 {
        return Err(CommandError::CredentialsTooLong);
    }
    Ok(Command::SetWifi {
        ssid: ssid.to_string(),
        password: password.to_string(),
    })
}
