mod common;

use std::net::Ipv4Addr;

use camlink_rs::camera::CameraController;
use camlink_rs::channel::CommandChannel;
use camlink_rs::credentials::{CredentialStore, WifiCredentials};
use camlink_rs::dispatcher::{DispatchContext, Dispatcher, Outcome};
use camlink_rs::network::NetworkStatus;
use camlink_rs::reply::{self, ErrorReply, FrameInfo, StatusReply, WifiInfoReply};
use camlink_rs::transfer::{BASE64_END, BASE64_START};
use common::{FakeCamera, FakeClock, RamStorage, ScriptedPort, channel};

struct Board {
    camera: CameraController<FakeCamera>,
    store: CredentialStore<RamStorage>,
    network: NetworkStatus,
    dispatcher: Dispatcher,
    channel: CommandChannel<ScriptedPort, FakeClock>,
}

impl Board {
    fn new() -> Self {
        let clock = FakeClock::new();
        let mut camera = CameraController::new(FakeCamera::new());
        camera.init(0).unwrap();
        let mut network = NetworkStatus::new();
        network.set_connected("lab", Ipv4Addr::new(192, 168, 1, 40));
        Self {
            camera,
            store: CredentialStore::new(RamStorage::new()),
            network,
            dispatcher: Dispatcher::default(),
            channel: channel(ScriptedPort::new(), &clock),
        }
    }

    fn handle(&mut self, line: &str) -> Outcome {
        self.channel.port_mut().clear_written();
        let mut ctx = DispatchContext {
            camera: &mut self.camera,
            credentials: &mut self.store,
            network: &self.network,
        };
        self.dispatcher
            .handle_line(line, &mut ctx, &mut self.channel)
            .unwrap()
    }

    fn lines(&mut self) -> Vec<String> {
        self.channel.port_mut().written_lines()
    }

    fn last_reply(&mut self) -> String {
        self.lines().pop().unwrap_or_default()
    }
}

#[test]
fn ping_answers_pong_and_acknowledges_peer() {
    let mut board = Board::new();
    assert!(!board.dispatcher.peer_acknowledged());
    assert_eq!(board.handle("PING"), Outcome::Continue);
    assert_eq!(board.last_reply(), "PONG");
    assert!(board.dispatcher.peer_acknowledged());
}

#[test]
fn handshake_is_acknowledged() {
    let mut board = Board::new();
    board.handle("S3_CONNECTED");
    assert_eq!(board.last_reply(), "CAM_ACKNOWLEDGED");
    assert!(board.dispatcher.peer_acknowledged());
}

#[test]
fn quality_in_range_is_applied() {
    let mut board = Board::new();
    for value in [0u8, 10, 63] {
        board.handle(&format!("QUALITY:{}", value));
        assert_eq!(
            board.last_reply(),
            format!(r#"{{"success":true,"quality":{}}}"#, value)
        );
        assert_eq!(board.camera.quality(), value);
        assert_eq!(board.camera.driver().quality, Some(value));
    }
}

#[test]
fn quality_out_of_range_is_rejected() {
    let mut board = Board::new();
    board.handle("QUALITY:20");
    for line in ["QUALITY:64", "QUALITY:-1", "QUALITY:high"] {
        board.handle(line);
        let reply = board.last_reply();
        let error: ErrorReply = reply::parse_line(&reply).unwrap();
        assert!(!error.success, "{} should fail", line);
        assert_eq!(board.camera.quality(), 20);
    }
}

#[test]
fn unknown_command_echoes_the_token_and_changes_nothing() {
    let mut board = Board::new();
    board.handle("SELFDESTRUCT");

    let reply = board.last_reply();
    let error: ErrorReply = reply::parse_line(&reply).unwrap();
    assert!(!error.success);
    assert!(error.error.contains("SELFDESTRUCT"));
    assert_eq!(board.camera.driver().captures, 0);
    assert_eq!(board.camera.wake_count(), 0);
    assert!(!board.dispatcher.peer_acknowledged());
    assert_eq!(board.store.storage_mut().writes, 0);
}

#[test]
fn commands_are_case_sensitive() {
    let mut board = Board::new();
    board.handle("ping");
    assert!(board.last_reply().contains("Unknown command: ping"));
}

#[test]
fn capture_while_sleeping_wakes_exactly_once() {
    let mut board = Board::new();
    assert!(board.camera.sleep());
    assert!(board.camera.is_sleeping());

    board.handle("CAPTURE");
    let reply = board.last_reply();
    let info = FrameInfo::from_line(&reply).unwrap();
    assert_eq!(info.size, 1200);
    assert_eq!((info.width, info.height), (640, 480));
    assert_eq!(board.camera.wake_count(), 1);
    assert!(!board.camera.is_sleeping());
    assert_eq!(board.camera.driver().outstanding_frames(), 0);

    board.handle("CAPTURE");
    assert_eq!(board.camera.wake_count(), 1);
}

#[test]
fn sleep_and_wake_report_events() {
    let mut board = Board::new();
    board.handle("SLEEP");
    assert_eq!(board.last_reply(), r#"{"status":"camera_sleeping"}"#);
    assert_eq!(board.camera.driver().deinits, 1);

    board.handle("WAKE");
    assert_eq!(board.last_reply(), r#"{"status":"camera_awake"}"#);
    assert_eq!(board.camera.wake_count(), 1);
}

#[test]
fn status_reports_camera_network_and_peer() {
    let mut board = Board::new();
    board.handle("PING");
    board.handle("STATUS");

    let reply = board.last_reply();
    let status: StatusReply = reply::parse_line(&reply).unwrap();
    assert!(status.ready);
    assert!(status.camera_ok());
    assert_eq!(status.wifi, "192.168.1.40");
    assert_eq!(status.ssid, "lab");
    assert!(status.s3_connected);
    assert!(!status.sleeping);
}

#[test]
fn get_ip_uses_the_text_form() {
    let mut board = Board::new();
    board.handle("GET_IP");
    assert_eq!(board.last_reply(), "IP:192.168.1.40");
}

#[test]
fn getimage_streams_and_releases_the_frame() {
    let mut board = Board::new();
    assert_eq!(board.handle("GETIMAGE"), Outcome::Continue);

    let lines = board.lines();
    let info = FrameInfo::from_line(&lines[0]).unwrap();
    assert_eq!(info.size, 1200);
    assert_eq!(lines[1], BASE64_START);
    assert_eq!(lines.last().map(String::as_str), Some(BASE64_END));
    assert!(lines.len() >= 4);
    assert_eq!(board.camera.driver().captures, 1);
    assert_eq!(board.camera.driver().outstanding_frames(), 0);
}

#[test]
fn getimage_failure_is_a_single_error_line() {
    let mut board = Board::new();
    board.camera.driver_mut().fail_capture = true;
    board.handle("GETIMAGE");

    let lines = board.lines();
    assert_eq!(lines.len(), 1);
    let error: ErrorReply = reply::parse_line(&lines[0]).unwrap();
    assert_eq!(error.error, "Capture failed");
}

#[test]
fn setwifi_persists_and_restarts() {
    let mut board = Board::new();
    assert_eq!(board.handle("SETWIFI:abc,xyz"), Outcome::Restart);
    assert!(board.last_reply().contains(r#""success":true"#));

    let stored = board.store.load().unwrap();
    assert_eq!(stored, Some(WifiCredentials::new("abc", "xyz").unwrap()));
}

#[test]
fn setwifi_without_comma_is_rejected_and_not_persisted() {
    let mut board = Board::new();
    assert_eq!(board.handle("SETWIFI:abcxyz"), Outcome::Continue);

    let reply = board.last_reply();
    let error: ErrorReply = reply::parse_line(&reply).unwrap();
    assert!(!error.success);
    assert_eq!(board.store.storage_mut().writes, 0);
    assert_eq!(board.store.load().unwrap(), None);
}

#[test]
fn getwifi_and_clearwifi() {
    let mut board = Board::new();
    board.handle("SETWIFI:home,secret,with,commas");
    board.handle("GETWIFI");
    let reply = board.last_reply();
    let info: WifiInfoReply = reply::parse_line(&reply).unwrap();
    assert!(info.configured);
    assert_eq!(info.ssid, "home");
    assert_eq!(
        board.store.load().unwrap().unwrap().password(),
        "secret,with,commas"
    );

    assert_eq!(board.handle("CLEARWIFI"), Outcome::Restart);
    assert_eq!(board.store.load().unwrap(), None);
}

#[test]
fn reset_restarts_after_acknowledging() {
    let mut board = Board::new();
    assert_eq!(board.handle("RESET"), Outcome::Restart);
    assert!(board.last_reply().contains("Restarting"));
}

#[test]
fn version_reports_board() {
    let mut board = Board::new();
    board.handle("VERSION");
    assert!(board.last_reply().contains(r#""board":"esp32-cam""#));
}
