#![cfg_attr(not(test), no_std)]

//! Camera link firmware library
//!
//! Protocol core shared by the ESP32-CAM camera board and the ESP32-S3
//! controller: the newline-delimited command channel, the command
//! dispatcher, the base64 image transfer, the liveness supervisor and the
//! HTTP AI relay. Hardware is reached through `embedded-io`,
//! `embedded-hal`, `embedded-storage` and `smart-leds` traits so the whole
//! crate runs under host tests.

extern crate alloc;

pub mod camera;
pub mod channel;
pub mod clock;
pub mod command;
pub mod credentials;
pub mod dispatcher;
pub mod led_control;
pub mod network;
pub mod node;
pub mod proxy;
pub mod relay;
pub mod reply;
pub mod state_machine;
pub mod supervisor;
pub mod transfer;
pub mod web;

#[cfg(feature = "esp32s3")]
pub mod wifi;

/// Project version information
pub const VERSION: &str = "0.1.0";

/// Default configuration constants
pub mod config {
    /// UART baud rate used on both ends of the camera link
    pub const SERIAL_BAUD_RATE: u32 = 115_200;

    /// Controller UART pins wired to the camera board
    pub const CAMERA_UART_TX_PIN: u8 = 17;
    pub const CAMERA_UART_RX_PIN: u8 = 18;

    /// Status LED data GPIO pin on the controller
    pub const LED_DATA_PIN: u8 = 48;

    /// Status LED frame period and breathing peak
    pub const LED_FRAME_MS: u64 = 50;
    pub const LED_BREATHING_MAX: u8 = 50;

    /// Longest line kept before the rest is discarded; fits one 4000-char chunk line
    pub const MAX_LINE_LENGTH: usize = 4096;

    /// Per-line read timeout on the camera board loop
    pub const LINE_TIMEOUT_MS: u64 = 1_000;

    /// Short command/response timeout on the controller
    pub const COMMAND_TIMEOUT_MS: u64 = 5_000;

    /// Inactivity window for an image transfer
    pub const TRANSFER_WINDOW_MS: u64 = 30_000;

    /// Raw bytes per base64 chunk line
    pub const CHUNK_SIZE: usize = 3_000;

    /// Pause between the metadata line and `BASE64_START`
    pub const TRANSFER_SETTLE_MS: u32 = 100;

    /// Pause after powering the sensor back up
    pub const WAKE_SETTLE_MS: u32 = 100;

    /// Camera idle timeout before the driver is released
    pub const IDLE_TIMEOUT_MS: u64 = 5 * 60 * 1_000;

    /// Ready announcement interval while the peer is unacknowledged
    pub const ANNOUNCE_INTERVAL_MS: u64 = 10_000;

    /// Heartbeat interval
    pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

    /// Controller PING interval for camera availability
    pub const HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;

    /// Delay between a restart acknowledgment and the reset
    pub const RESTART_GRACE_MS: u32 = 1_000;

    /// Wi-Fi association attempts and delay between them
    pub const WIFI_CONNECT_ATTEMPTS: u32 = 30;
    pub const WIFI_RETRY_DELAY_MS: u32 = 500;

    /// Per-answer timeout of the serial provisioning prompt
    pub const PROVISION_TIMEOUT_MS: u64 = 60_000;

    /// Camera driver init retries at boot
    pub const CAMERA_INIT_RETRIES: u32 = 3;
    pub const CAMERA_INIT_RETRY_DELAY_MS: u32 = 2_000;

    /// JPEG quality bounds accepted by `QUALITY:<n>`
    pub const QUALITY_MIN: u8 = 0;
    pub const QUALITY_MAX: u8 = 63;
    pub const DEFAULT_QUALITY: u8 = 12;

    /// Interval between relay uploads
    pub const RELAY_INTERVAL_MS: u64 = 15_000;

    /// Upper bound for one relay HTTP exchange
    pub const RELAY_TIMEOUT_MS: u64 = 60_000;

    /// Persisted record layout, relative to `STORAGE_BASE` (the unused nvs partition)
    pub const STORAGE_BASE: u32 = 0x9000;
    pub const CREDENTIALS_FLAG_OFFSET: u32 = 0;
    pub const SSID_OFFSET: u32 = 1;
    pub const SSID_FIELD_LEN: usize = 33;
    pub const PASSWORD_OFFSET: u32 = 34;
    pub const PASSWORD_FIELD_LEN: usize = 65;
    pub const API_BASE_URL_OFFSET: u32 = 200;
    pub const API_BASE_URL_LEN: usize = 100;
    pub const API_MESSAGE_ROUTE_OFFSET: u32 = 300;
    pub const API_HEALTH_ROUTE_OFFSET: u32 = 350;
    pub const API_ROUTE_LEN: usize = 50;

    /// Value of the configured flag when credentials are present
    pub const CREDENTIALS_MAGIC: u8 = 0xAA;

    /// Local HTTP server port
    pub const HTTP_PORT: u16 = 80;

    /// Multipart boundary for `/stream`
    pub const STREAM_BOUNDARY: &str = "123456789000000000000987654321";

    /// Compile-time defaults loaded by build.rs
    pub const AI_BASE_URL: &str = env!("AI_BASE_URL");
    pub const DEFAULT_WIFI_SSID: &str = env!("DEFAULT_WIFI_SSID");
    pub const DEFAULT_WIFI_PASSWORD: &str = env!("DEFAULT_WIFI_PASSWORD");
}

/// Error types for the camera link boards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    /// WiFi connection error
    WiFiError,
    /// Serial link read/write error
    SerialError,
    /// Camera driver error
    CameraError,
    /// Persistent storage error
    StorageError,
    /// Outbound HTTP error
    HttpError,
    /// Status LED write error
    LedError,
    /// Protocol parsing error
    ProtocolError,
    /// Peer did not answer in time
    Timeout,
    /// System error
    SystemError,
}

impl core::fmt::Display for BoardError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            BoardError::WiFiError => "wifi error",
            BoardError::SerialError => "serial error",
            BoardError::CameraError => "camera error",
            BoardError::StorageError => "storage error",
            BoardError::HttpError => "http error",
            BoardError::LedError => "led error",
            BoardError::ProtocolError => "protocol error",
            BoardError::Timeout => "timeout",
            BoardError::SystemError => "system error",
        };
        f.write_str(text)
    }
}
