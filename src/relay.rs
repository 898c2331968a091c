//! HTTP AI relay
//!
//! Every interval while running: capture a frame through a `CameraProxy`,
//! wrap it in a JSON message with the navigation prompt and POST it to the
//! configured endpoint. Failures only update the last-status string and the
//! next interval retries.
//!
//! The relay works either with a blocking [`HttpClient`] through
//! [`AiRelay::poll`], or sans-IO through [`AiRelay::prepare`] and
//! [`AiRelay::complete`] when the caller owns an async socket.

use crate::clock::Interval;
use crate::credentials::ApiConfig;
use crate::network::NetworkInfo;
use crate::proxy::CameraProxy;
use crate::{BoardError, config};
use alloc::string::{String, ToString};
use core::fmt;
use log::{debug, info, warn};
use serde::Serialize;

/// System prompt sent as `context` with every frame
pub const ROBOT_CONTEXT: &str = "\
You steer a small wheeled robot using its camera. Goal: drive up to the cat without bumping into anything.

You receive one RGB frame and sometimes extra notes below.

Guidelines:
- Find the cat. If it is visible, or probably off to one side, head that way when the path is clear.
- If no cat is in view, turn left or right to sweep the room instead of driving ahead blindly.
- Stop once the cat is closer than 0.5 m.
- Stop for obstacles, drops or gaps within 0.8 m, for moving hazards, for a dark or blurry view, or whenever you are unsure.
- Do not alternate left and right on consecutive frames; stop instead.

Answer with a single JSON object and nothing else:
{
\"description\": \"<two or three sentences naming at least four concrete details such as colours, counts, positions or distances, and why you chose the move>\",
\"direction\": \"forward\" | \"left\" | \"right\" | \"backward\" | \"stop\",
\"distance_m\": <float>,
\"goal_found\": <true|false>
}

Step limits: forward up to 0.5 m, left/right up to 0.4 m, backward up to 0.4 m.

---
EXTRA NOTES (may be empty):
";

/// Question sent as `text` with every frame
pub const ROBOT_QUESTION: &str = "Describe the scene and suggest a direction.";

/// Outbound HTTP failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    /// URL is not `http://host[:port]/path`
    InvalidUrl,
    /// DNS or TCP connect failed
    Connect,
    /// Writing the request failed
    Write,
    /// Peer closed before a full response head arrived
    Closed,
    /// Response head could not be parsed
    BadResponse,
    /// No response within the request timeout
    Timeout,
}

impl HttpError {
    /// Negative status code recorded as `Err: <code>`
    pub fn code(&self) -> i32 {
        match self {
            HttpError::Connect => -1,
            HttpError::Write => -3,
            HttpError::InvalidUrl => -4,
            HttpError::Closed => -5,
            HttpError::BadResponse => -7,
            HttpError::Timeout => -11,
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HttpError::InvalidUrl => "invalid url",
            HttpError::Connect => "connection failed",
            HttpError::Write => "request write failed",
            HttpError::Closed => "connection closed",
            HttpError::BadResponse => "malformed response",
            HttpError::Timeout => "request timed out",
        };
        f.write_str(text)
    }
}

impl From<HttpError> for BoardError {
    fn from(_: HttpError) -> Self {
        BoardError::HttpError
    }
}

/// Parsed `http://host[:port]/path`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

impl<'a> Url<'a> {
    pub fn parse(url: &'a str) -> Result<Self, HttpError> {
        let rest = url.strip_prefix("http://").ok_or(HttpError::InvalidUrl)?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, "/"),
        };
        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| HttpError::InvalidUrl)?),
            None => (authority, 80),
        };
        if host.is_empty() {
            return Err(HttpError::InvalidUrl);
        }
        Ok(Self { host, port, path })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// HTTP/1.1 request head including the blank line
pub fn request_head(method: Method, url: &Url<'_>, json_body_len: Option<usize>) -> String {
    let mut head = alloc::format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nUser-Agent: camlink/{}\r\n",
        method.as_str(),
        url.path,
        url.host,
        crate::VERSION
    );
    if let Some(len) = json_body_len {
        head.push_str("Content-Type: application/json\r\n");
        head.push_str(&alloc::format!("Content-Length: {}\r\n", len));
    }
    head.push_str("\r\n");
    head
}

/// Status and body of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Parse a complete response buffer
pub fn parse_response(raw: &[u8]) -> Result<HttpResponse, HttpError> {
    let head_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or(HttpError::Closed)?;
    let head = core::str::from_utf8(&raw[..head_end]).map_err(|_| HttpError::BadResponse)?;
    let status_line = head.lines().next().ok_or(HttpError::BadResponse)?;
    let status = parse_status_line(status_line)?;
    let body = String::from_utf8_lossy(&raw[head_end + 4..]).into_owned();
    Ok(HttpResponse { status, body })
}

/// `HTTP/1.1 200 OK` -> 200
pub fn parse_status_line(line: &str) -> Result<u16, HttpError> {
    let mut parts = line.split_ascii_whitespace();
    match parts.next() {
        Some(version) if version.starts_with("HTTP/") => {}
        _ => return Err(HttpError::BadResponse),
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or(HttpError::BadResponse)
}

/// Blocking HTTP client used by [`AiRelay::poll`]
pub trait HttpClient {
    fn get(&mut self, url: &str, timeout_ms: u64) -> Result<HttpResponse, HttpError>;

    fn post_json(&mut self, url: &str, body: &str, timeout_ms: u64)
    -> Result<HttpResponse, HttpError>;
}

/// JSON body of one relay message
#[derive(Debug, Serialize)]
pub struct MessageRequest<'a> {
    pub text: &'a str,
    pub stream: bool,
    pub context: &'a str,
    pub session_id: &'a str,
    #[serde(rename = "audioResponse")]
    pub audio_response: bool,
    pub image: &'a str,
}

/// A message ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub url: String,
    pub body: String,
}

/// Last outcome, shown on the status page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Idle,
    Running,
    Stopped,
    WiFiError,
    CamError,
    CaptureFail,
    ImageError,
    Sending,
    Ok(u16),
    Err(i32),
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayStatus::Idle => f.write_str("Idle"),
            RelayStatus::Running => f.write_str("Running"),
            RelayStatus::Stopped => f.write_str("Stopped"),
            RelayStatus::WiFiError => f.write_str("WiFi Error"),
            RelayStatus::CamError => f.write_str("Cam Error"),
            RelayStatus::CaptureFail => f.write_str("Capture Fail"),
            RelayStatus::ImageError => f.write_str("Image Error"),
            RelayStatus::Sending => f.write_str("Sending..."),
            RelayStatus::Ok(code) => write!(f, "OK: {}", code),
            RelayStatus::Err(code) => write!(f, "Err: {}", code),
        }
    }
}

pub struct AiRelay {
    api: ApiConfig,
    session_id: String,
    running: bool,
    interval: Interval,
    timeout_ms: u64,
    status: RelayStatus,
    last_response: Option<String>,
    sent: u32,
}

impl AiRelay {
    /// `seed` picks the six-digit session suffix
    pub fn new(api: ApiConfig, seed: u32, now_ms: u64) -> Self {
        Self {
            api,
            session_id: alloc::format!("camlink-bot-{}", 100_000 + seed % 900_000),
            running: false,
            interval: Interval::new(config::RELAY_INTERVAL_MS, now_ms),
            timeout_ms: config::RELAY_TIMEOUT_MS,
            status: RelayStatus::Idle,
            last_response: None,
            sent: 0,
        }
    }

    pub fn with_interval(mut self, period_ms: u64, now_ms: u64) -> Self {
        self.interval = Interval::new(period_ms, now_ms);
        self
    }

    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    pub fn set_api(&mut self, api: ApiConfig) {
        info!("[RELAY] API base set to '{}'", api.base_url());
        self.api = api;
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> RelayStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    /// Messages that received an HTTP status
    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Refused while no base URL is configured
    pub fn start(&mut self) -> bool {
        if !self.api.is_configured() {
            warn!("[RELAY] Cannot start: no API base URL");
            return false;
        }
        self.running = true;
        self.status = RelayStatus::Running;
        self.interval.expire();
        info!("[RELAY] Started, session {}", self.session_id);
        true
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.status = RelayStatus::Stopped;
        info!("[RELAY] Stopped");
    }

    /// True once per interval while running
    pub fn due(&mut self, now_ms: u64) -> bool {
        self.running && self.interval.tick(now_ms)
    }

    /// Capture a frame and build the message, or record why not
    pub fn prepare<Cam, N>(&mut self, camera: &mut Cam, network: &N) -> Option<PreparedRequest>
    where
        Cam: CameraProxy + ?Sized,
        N: NetworkInfo,
    {
        if !network.is_connected() {
            warn!("[RELAY] WiFi not connected");
            self.status = RelayStatus::WiFiError;
            return None;
        }
        if !camera.is_available() {
            warn!("[RELAY] Camera not available");
            self.status = RelayStatus::CamError;
            return None;
        }
        let image = match camera.capture_base64() {
            Ok(image) => image,
            Err(e) => {
                warn!("[RELAY] Capture failed: {}", e);
                self.status = RelayStatus::CaptureFail;
                return None;
            }
        };
        if image.is_empty() {
            warn!("[RELAY] Empty image");
            self.status = RelayStatus::ImageError;
            return None;
        }

        let message = MessageRequest {
            text: ROBOT_QUESTION,
            stream: false,
            context: ROBOT_CONTEXT,
            session_id: &self.session_id,
            audio_response: true,
            image: &image,
        };
        let body = match serde_json::to_string(&message) {
            Ok(body) => body,
            Err(_) => {
                self.status = RelayStatus::ImageError;
                return None;
            }
        };
        self.status = RelayStatus::Sending;
        debug!("[RELAY] Sending {} byte message", body.len());
        Some(PreparedRequest {
            url: self.api.message_url(),
            body,
        })
    }

    /// Record the outcome of a prepared request
    pub fn complete(&mut self, result: Result<HttpResponse, HttpError>) -> RelayStatus {
        self.status = match result {
            Ok(response) => {
                info!("[RELAY] HTTP {}: {}", response.status, response.body);
                self.sent = self.sent.wrapping_add(1);
                let status = RelayStatus::Ok(response.status);
                self.last_response = Some(response.body);
                status
            }
            Err(e) => {
                warn!("[RELAY] Request failed: {}", e);
                RelayStatus::Err(e.code())
            }
        };
        self.status
    }

    /// Blocking cycle; `Some` when a message was attempted
    pub fn poll<H, Cam, N>(
        &mut self,
        now_ms: u64,
        client: &mut H,
        camera: &mut Cam,
        network: &N,
    ) -> Option<RelayStatus>
    where
        H: HttpClient,
        Cam: CameraProxy + ?Sized,
        N: NetworkInfo,
    {
        if !self.due(now_ms) {
            return None;
        }
        let Some(request) = self.prepare(camera, network) else {
            return Some(self.status);
        };
        let result = client.post_json(&request.url, &request.body, self.timeout_ms);
        Some(self.complete(result))
    }

    /// `GET <base><health>` answered with 200
    pub fn test_connection<H, N>(&self, client: &mut H, network: &N) -> bool
    where
        H: HttpClient,
        N: NetworkInfo,
    {
        if !self.api.is_configured() || !network.is_connected() {
            return false;
        }
        let url = self.api.health_url();
        match client.get(&url, self.timeout_ms) {
            Ok(response) => {
                info!("[RELAY] Health check {}: HTTP {}", url, response.status);
                response.status == 200
            }
            Err(e) => {
                warn!("[RELAY] Health check {} failed: {}", url, e);
                false
            }
        }
    }
}

impl fmt::Debug for AiRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiRelay")
            .field("base", &self.api.base_url())
            .field("running", &self.running)
            .field("status", &self.status.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_with_port_and_path() {
        let url = Url::parse("http://10.0.0.5:8080/api/message").unwrap();
        assert_eq!(url.host, "10.0.0.5");
        assert_eq!(url.port, 8080);
        assert_eq!(url.path, "/api/message");

        let bare = Url::parse("http://example.org").unwrap();
        assert_eq!((bare.port, bare.path), (80, "/"));

        assert_eq!(Url::parse("https://example.org/"), Err(HttpError::InvalidUrl));
        assert_eq!(Url::parse("http://:80/"), Err(HttpError::InvalidUrl));
    }

    #[test]
    fn post_head_carries_length() {
        let url = Url::parse("http://host:5000/message").unwrap();
        let head = request_head(Method::Post, &url, Some(42));
        assert!(head.starts_with("POST /message HTTP/1.1\r\nHost: host\r\n"));
        assert!(head.contains("Content-Type: application/json\r\n"));
        assert!(head.contains("Content-Length: 42\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn response_status_and_body() {
        let raw = b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok";
        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body, "ok");
        assert_eq!(parse_response(b"HTTP/1.1 200"), Err(HttpError::Closed));
        assert_eq!(parse_status_line("garbage"), Err(HttpError::BadResponse));
    }

    #[test]
    fn status_strings() {
        assert_eq!(RelayStatus::Sending.to_string(), "Sending...");
        assert_eq!(RelayStatus::Ok(200).to_string(), "OK: 200");
        assert_eq!(RelayStatus::Err(-11).to_string(), "Err: -11");
        assert_eq!(RelayStatus::WiFiError.to_string(), "WiFi Error");
    }

    #[test]
    fn start_requires_base_url() {
        let mut relay = AiRelay::new(ApiConfig::new("", "", ""), 7, 0);
        assert!(!relay.start());
        assert_eq!(relay.status(), RelayStatus::Idle);
        assert_eq!(relay.session_id(), "camlink-bot-100007");

        relay.set_api(ApiConfig::new("http://ai.local/", "message", "health"));
        assert!(relay.start());
        assert!(relay.due(0));
        assert!(!relay.due(1));
        relay.stop();
        assert!(!relay.due(100_000));
        assert_eq!(relay.status().to_string(), "Stopped");
    }

    #[test]
    fn message_body_field_names() {
        let body = serde_json::to_string(&MessageRequest {
            text: "t",
            stream: false,
            context: "line\n\"quoted\"",
            session_id: "s",
            audio_response: true,
            image: "AAAA",
        })
        .unwrap();
        assert!(body.contains(r#""stream":false"#));
        assert!(body.contains(r#""audioResponse":true"#));
        assert!(body.contains(r#""context":"line\n\"quoted\"""#));
        assert!(body.contains(r#""image":"AAAA""#));
    }
}
