//! Local HTTP surface of the controller
//!
//! Request handling is transport free: the caller reads the request line
//! from its socket, passes it to [`handle_request`] and writes back the
//! returned [`Response`]. Streaming and the credential reset need the socket
//! or the storage, so they come back as a [`WebAction`].

use crate::network::NetworkInfo;
use crate::proxy::CameraProxy;
use crate::relay::AiRelay;
use crate::{VERSION, config};
use alloc::string::String;
use alloc::vec::Vec;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Root,
    Capture,
    Stream,
    Image,
    Ping,
    Test,
    ClearWifi,
    BotStart,
    BotStop,
    NotFound,
}

impl Route {
    /// Route for a request path; the query string is ignored
    pub fn from_path(path: &str) -> Self {
        let path = path.split('?').next().unwrap_or(path);
        match path {
            "/" | "" => Route::Root,
            "/capture" => Route::Capture,
            "/stream" => Route::Stream,
            "/image" => Route::Image,
            "/ping" => Route::Ping,
            "/test" => Route::Test,
            "/clearwifi" => Route::ClearWifi,
            "/bot/start" => Route::BotStart,
            "/bot/stop" => Route::BotStop,
            _ => Route::NotFound,
        }
    }

    /// Route for `GET /path HTTP/1.1`; anything but GET is not found
    pub fn from_request_line(line: &str) -> Self {
        let mut parts = line.split_ascii_whitespace();
        match (parts.next(), parts.next()) {
            (Some("GET"), Some(path)) => Self::from_path(path),
            _ => Route::NotFound,
        }
    }
}

/// Work the caller must do after writing the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebAction {
    None,
    /// Keep the socket and push frames with [`stream_part_head`]
    Stream,
    /// Clear stored Wi-Fi credentials, then restart
    ClearCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn html(status: u16, page: String) -> Self {
        Self {
            status,
            content_type: String::from("text/html"),
            body: page.into_bytes(),
        }
    }

    pub fn text(status: u16, text: &str) -> Self {
        Self {
            status,
            content_type: String::from("text/plain"),
            body: text.as_bytes().to_vec(),
        }
    }

    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: String::from("image/jpeg"),
            body: data,
        }
    }

    /// Open-ended multipart head; the body is written frame by frame
    pub fn stream() -> Self {
        Self {
            status: 200,
            content_type: alloc::format!(
                "multipart/x-mixed-replace; boundary={}",
                config::STREAM_BOUNDARY
            ),
            body: Vec::new(),
        }
    }

    pub fn is_stream(&self) -> bool {
        self.content_type.starts_with("multipart/")
    }

    /// Status line and headers including the blank line
    pub fn head(&self) -> String {
        let mut head = alloc::format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nConnection: close\r\n",
            self.status,
            status_text(self.status),
            self.content_type
        );
        if !self.is_stream() {
            head.push_str(&alloc::format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("\r\n");
        head
    }
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Boundary and part headers written before each streamed JPEG
pub fn stream_part_head(len: usize) -> String {
    alloc::format!(
        "\r\n--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        config::STREAM_BOUNDARY,
        len
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub response: Response,
    pub action: WebAction,
}

impl Handled {
    fn page(status: u16, page: String) -> Self {
        Self {
            response: Response::html(status, page),
            action: WebAction::None,
        }
    }
}

/// Collaborators a request may touch
pub struct WebContext<'a, Cam: ?Sized, N> {
    pub camera: &'a mut Cam,
    pub network: &'a N,
    pub relay: &'a mut AiRelay,
}

pub fn handle_request<Cam, N>(route: Route, ctx: &mut WebContext<'_, Cam, N>) -> Handled
where
    Cam: CameraProxy + ?Sized,
    N: NetworkInfo,
{
    info!("[WEB] {:?}", route);
    match route {
        Route::Root => Handled::page(200, render_page(ctx, "Camera Control Panel", false)),
        Route::Capture => {
            if !ctx.camera.is_available() {
                return Handled::page(
                    500,
                    render_page(ctx, "Camera not available - check connection", false),
                );
            }
            match ctx.camera.capture_base64() {
                Ok(_) => Handled::page(200, render_page(ctx, "Photo captured successfully!", true)),
                Err(e) => {
                    warn!("[WEB] Capture failed: {}", e);
                    Handled::page(500, render_page(ctx, "Failed to capture photo", false))
                }
            }
        }
        Route::Image => {
            let decoded = ctx
                .camera
                .last_image_base64()
                .map(|image| STANDARD.decode(image.as_bytes()));
            match decoded {
                Some(Ok(jpeg)) => Handled {
                    response: Response::jpeg(jpeg),
                    action: WebAction::None,
                },
                Some(Err(_)) => Handled {
                    response: Response::text(500, "Stored image is corrupt"),
                    action: WebAction::None,
                },
                None => Handled {
                    response: Response::text(404, "No image available"),
                    action: WebAction::None,
                },
            }
        }
        Route::Stream => {
            if ctx.camera.is_available() {
                Handled {
                    response: Response::stream(),
                    action: WebAction::Stream,
                }
            } else {
                Handled::page(500, render_page(ctx, "Camera not available", false))
            }
        }
        Route::Ping => {
            let ok = ctx.camera.ping().unwrap_or(false);
            info!("[WEB] PING {}", if ok { "PONG" } else { "FAILED" });
            let message = if ok {
                "PING Result: SUCCESS (PONG)"
            } else {
                "PING Result: FAILED - No response"
            };
            Handled::page(200, render_page(ctx, message, false))
        }
        Route::Test => {
            let ok = matches!(ctx.camera.check_status(), Ok(Some(status)) if status.camera_ok());
            let message = if ok { "Camera: OK" } else { "Camera: FAIL" };
            Handled::page(200, render_page(ctx, message, false))
        }
        Route::ClearWifi => Handled {
            response: Response::html(200, String::from(CLEARED_PAGE)),
            action: WebAction::ClearCredentials,
        },
        Route::BotStart => {
            let message = if ctx.relay.start() {
                "AI bot started"
            } else {
                "Cannot start AI bot: no API URL configured"
            };
            Handled::page(200, render_page(ctx, message, false))
        }
        Route::BotStop => {
            ctx.relay.stop();
            Handled::page(200, render_page(ctx, "AI bot stopped", false))
        }
        Route::NotFound => Handled {
            response: Response::text(404, "Not found"),
            action: WebAction::None,
        },
    }
}

const CLEARED_PAGE: &str = "<!DOCTYPE html><html><body><h1>WiFi Credentials Cleared</h1>\
<p>Device will restart in 3 seconds...</p></body></html>";

const PAGE_STYLE: &str = "body{font-family:Arial,sans-serif;margin:20px;text-align:center}\
button{background:#4CAF50;color:#fff;padding:10px 20px;margin:10px;border:none;border-radius:4px}\
.ping{background:#2196F3}.clear{background:#f44336}\
img{margin-top:20px;max-width:100%;border:1px solid #ddd}\
.status{background:#f0f0f0;padding:10px;margin:10px}";

fn button(class: &str, href: &str, label: &str) -> String {
    alloc::format!(
        "<button class='{}' onclick=\"location.href='{}'\">{}</button>",
        class,
        href,
        label
    )
}

/// Status page with the action buttons and, optionally, the last frame
pub fn render_page<Cam, N>(ctx: &WebContext<'_, Cam, N>, message: &str, show_image: bool) -> String
where
    Cam: CameraProxy + ?Sized,
    N: NetworkInfo,
{
    let available = ctx.camera.is_available();
    let mut html = String::from("<!DOCTYPE html><html><head><title>Camlink Control</title>");
    html.push_str("<meta name='viewport' content='width=device-width, initial-scale=1'>");
    html.push_str("<style>");
    html.push_str(PAGE_STYLE);
    html.push_str("</style></head><body><h1>Camlink Control</h1><div class='status'>");
    html.push_str(&alloc::format!(
        "<p>Camera Status: {}</p><p>WiFi SSID: {}</p><p>IP: {}</p><p>AI Bot: {} ({})</p><p>{}</p>",
        if available { "Connected" } else { "Disconnected" },
        ctx.network.ssid(),
        ctx.network.ip_text(),
        if ctx.relay.is_running() { "running" } else { "stopped" },
        ctx.relay.status(),
        message
    ));
    html.push_str("</div><div>");
    html.push_str(&button("ping", "/ping", "PING Camera"));
    if available {
        html.push_str(&button("", "/capture", "Take Photo"));
        html.push_str(&button("", "/stream", "Stream Camera"));
        html.push_str(&button("", "/test", "Test Camera"));
    }
    if ctx.relay.is_running() {
        html.push_str(&button("", "/bot/stop", "Stop AI Bot"));
    } else {
        html.push_str(&button("", "/bot/start", "Start AI Bot"));
    }
    html.push_str("</div>");

    if !available {
        html.push_str("<p>Camera not available</p>");
    } else if let Some(image) = ctx.camera.last_image_base64().filter(|_| show_image) {
        html.push_str("<div><h2>Latest Image:</h2><img src='data:image/jpeg;base64,");
        html.push_str(image);
        html.push_str("' /></div>");
    }

    html.push_str(
        "<div><button class='clear' onclick=\"if(confirm('Clear WiFi credentials and restart?')) \
         location.href='/clearwifi'\">Clear WiFi Settings</button></div>",
    );
    html.push_str(&alloc::format!(
        "<br><a href='/'>Refresh Page</a><p>v{}</p></body></html>",
        VERSION
    ));
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoardError;
    use crate::credentials::ApiConfig;
    use crate::network::NetworkStatus;
    use crate::reply::StatusReply;

    struct StubCamera {
        available: bool,
        fail_capture: bool,
        last: Option<String>,
    }

    impl CameraProxy for StubCamera {
        fn is_available(&self) -> bool {
            self.available
        }

        fn ping(&mut self) -> Result<bool, BoardError> {
            Ok(self.available)
        }

        fn check_status(&mut self) -> Result<Option<StatusReply>, BoardError> {
            Ok(None)
        }

        fn poll(&mut self) -> Result<(), BoardError> {
            Ok(())
        }

        fn capture_jpeg(&mut self) -> Result<Vec<u8>, BoardError> {
            if self.fail_capture {
                Err(BoardError::CameraError)
            } else {
                Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
            }
        }

        fn capture_base64(&mut self) -> Result<String, BoardError> {
            let encoded = STANDARD.encode(self.capture_jpeg()?);
            self.last = Some(encoded.clone());
            Ok(encoded)
        }

        fn last_image_base64(&self) -> Option<&str> {
            self.last.as_deref()
        }
    }

    fn camera() -> StubCamera {
        StubCamera {
            available: true,
            fail_capture: false,
            last: None,
        }
    }

    #[test]
    fn routes_from_request_lines() {
        assert_eq!(Route::from_request_line("GET / HTTP/1.1"), Route::Root);
        assert_eq!(Route::from_request_line("GET /stream?t=1 HTTP/1.1"), Route::Stream);
        assert_eq!(Route::from_request_line("GET /bot/start HTTP/1.1"), Route::BotStart);
        assert_eq!(Route::from_request_line("GET /favicon.ico HTTP/1.1"), Route::NotFound);
        assert_eq!(Route::from_request_line("POST /capture HTTP/1.1"), Route::NotFound);
    }

    #[test]
    fn image_is_404_until_a_capture() {
        let mut cam = camera();
        let network = NetworkStatus::new();
        let mut relay = AiRelay::new(ApiConfig::new("", "", ""), 1, 0);
        let mut ctx = WebContext {
            camera: &mut cam,
            network: &network,
            relay: &mut relay,
        };

        assert_eq!(handle_request(Route::Image, &mut ctx).response.status, 404);
        assert_eq!(handle_request(Route::Capture, &mut ctx).response.status, 200);
        let image = handle_request(Route::Image, &mut ctx).response;
        assert_eq!(image.status, 200);
        assert_eq!(image.content_type, "image/jpeg");
        assert_eq!(image.body, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[test]
    fn capture_failure_is_500() {
        let mut cam = camera();
        cam.fail_capture = true;
        let network = NetworkStatus::new();
        let mut relay = AiRelay::new(ApiConfig::new("", "", ""), 1, 0);
        let mut ctx = WebContext {
            camera: &mut cam,
            network: &network,
            relay: &mut relay,
        };
        let handled = handle_request(Route::Capture, &mut ctx);
        assert_eq!(handled.response.status, 500);
        assert_eq!(handle_request(Route::NotFound, &mut ctx).response.status, 404);
    }

    #[test]
    fn stream_and_clear_return_actions() {
        let mut cam = camera();
        let network = NetworkStatus::new();
        let mut relay = AiRelay::new(ApiConfig::new("http://ai", "", ""), 1, 0);
        let mut ctx = WebContext {
            camera: &mut cam,
            network: &network,
            relay: &mut relay,
        };
        let stream = handle_request(Route::Stream, &mut ctx);
        assert_eq!(stream.action, WebAction::Stream);
        assert!(stream.response.head().contains(config::STREAM_BOUNDARY));
        assert!(!stream.response.head().contains("Content-Length"));
        assert_eq!(
            handle_request(Route::ClearWifi, &mut ctx).action,
            WebAction::ClearCredentials
        );

        handle_request(Route::BotStart, &mut ctx);
        assert!(ctx.relay.is_running());
        handle_request(Route::BotStop, &mut ctx);
        assert!(!ctx.relay.is_running());
    }

    #[test]
    fn part_head_has_boundary_and_length() {
        let head = stream_part_head(1234);
        assert!(head.starts_with("\r\n--123456789000000000000987654321\r\n"));
        assert!(head.contains("Content-Length: 1234\r\n\r\n"));
    }
}
