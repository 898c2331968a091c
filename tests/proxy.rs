mod common;

use std::cell::RefCell;
use std::rc::Rc;

use camlink_rs::BoardError;
use camlink_rs::config;
use camlink_rs::proxy::{CameraProxy, RemoteCamera};
use camlink_rs::transfer;
use common::{FakeClock, ScriptedPort, channel, sample_jpeg};

const STATUS_OK: &str =
    r#"{"ready":true,"camera":"ok","wifi":"192.168.4.2","ssid":"lab","s3_connected":true,"sleeping":false}"#;

type Events = Rc<RefCell<Vec<(bool, bool)>>>;

fn remote(
    port: ScriptedPort,
    clock: &FakeClock,
) -> (RemoteCamera<ScriptedPort, FakeClock, impl FnMut(bool, bool)>, Events) {
    let events: Events = Rc::default();
    let sink = events.clone();
    let camera = RemoteCamera::new(channel(port, clock), move |connected: bool, changed: bool| {
        sink.borrow_mut().push((connected, changed))
    })
    .with_timeouts(200, 500);
    (camera, events)
}

/// What the camera board sends in answer to GETIMAGE
fn transfer_lines(jpeg: &[u8]) -> Vec<String> {
    let clock = FakeClock::new();
    let mut sender = channel(ScriptedPort::new(), &clock);
    transfer::send_image(&mut sender, jpeg, 640, 480).unwrap();
    sender.port_mut().written_lines()
}

fn linked(port: &mut ScriptedPort) {
    port.reply_with(&["PONG"]);
    port.reply_with(&["CAM_ACKNOWLEDGED"]);
    port.reply_with(&[STATUS_OK]);
}

#[test]
fn begin_runs_the_handshake() {
    let clock = FakeClock::new();
    let mut port = ScriptedPort::new();
    linked(&mut port);
    let (mut camera, events) = remote(port, &clock);

    assert!(camera.begin().unwrap());
    assert!(camera.is_available());
    assert_eq!(
        camera.channel_mut().port_mut().written_lines(),
        vec!["PING", "S3_CONNECTED", "STATUS"]
    );
    assert_eq!(events.borrow().last(), Some(&(true, true)));
}

#[test]
fn begin_without_answer_leaves_camera_unavailable() {
    let clock = FakeClock::new();
    let mut port = ScriptedPort::new();
    port.stay_silent();
    let (mut camera, events) = remote(port, &clock);

    assert!(!camera.begin().unwrap());
    assert!(!camera.is_available());
    assert_eq!(events.borrow().as_slice(), &[(false, false)]);
}

#[test]
fn chatter_is_skipped_while_waiting_for_a_reply() {
    let clock = FakeClock::new();
    let mut port = ScriptedPort::new();
    port.reply_with(&[
        "HEARTBEAT - Web: http://192.168.4.2 (Camera active)",
        r#"{"status":"camera_sleeping"}"#,
        "PONG",
    ]);
    let (mut camera, _) = remote(port, &clock);

    assert!(camera.ping().unwrap());
}

#[test]
fn capture_fetches_and_decodes_the_frame() {
    let clock = FakeClock::new();
    let jpeg = sample_jpeg(config::CHUNK_SIZE + 500);
    let lines = transfer_lines(&jpeg);
    let mut port = ScriptedPort::new();
    linked(&mut port);
    port.reply_with(&[lines[0].as_str()]);
    let wire: Vec<&str> = lines.iter().map(String::as_str).collect();
    port.reply_with(&wire);
    let (mut camera, _) = remote(port, &clock);
    camera.begin().unwrap();

    let bytes = camera.capture_jpeg().unwrap();
    assert_eq!(bytes, jpeg);
    assert_eq!(camera.last_frame_info().map(|i| i.size), Some(jpeg.len()));
    assert!(camera.last_image_base64().is_some());
    let written = camera.channel_mut().port_mut().written_lines();
    assert_eq!(&written[3..], &["CAPTURE", "GETIMAGE"]);
}

#[test]
fn capture_error_reply_skips_the_transfer() {
    let clock = FakeClock::new();
    let mut port = ScriptedPort::new();
    port.reply_with(&[r#"{"success":false,"error":"Capture failed"}"#]);
    let (mut camera, _) = remote(port, &clock);

    assert_eq!(camera.capture_base64(), Err(BoardError::CameraError));
    assert_eq!(camera.channel_mut().port_mut().written_lines(), vec!["CAPTURE"]);
    assert!(camera.last_image_base64().is_none());
}

#[test]
fn stalled_transfer_is_rejected() {
    let clock = FakeClock::new();
    let jpeg = sample_jpeg(config::CHUNK_SIZE * 2);
    let lines = transfer_lines(&jpeg);
    let mut port = ScriptedPort::new();
    port.reply_with(&[lines[0].as_str()]);
    let partial: Vec<&str> = lines.iter().take(3).map(String::as_str).collect();
    port.reply_with(&partial);
    let (mut camera, _) = remote(port, &clock);

    assert_eq!(camera.capture_jpeg(), Err(BoardError::ProtocolError));
    assert!(camera.last_image_base64().is_none());
}

#[test]
fn silent_getimage_marks_camera_unavailable() {
    let clock = FakeClock::new();
    let mut port = ScriptedPort::new();
    linked(&mut port);
    port.reply_with(&[r#"{"success":true,"size":10,"width":640,"height":480}"#]);
    port.stay_silent();
    let (mut camera, events) = remote(port, &clock);
    camera.begin().unwrap();

    assert_eq!(camera.capture_base64(), Err(BoardError::Timeout));
    assert!(!camera.is_available());
    assert_eq!(events.borrow().last(), Some(&(false, true)));
}

#[test]
fn ready_announcement_is_answered_with_handshake() {
    let clock = FakeClock::new();
    let mut port = ScriptedPort::new();
    port.push_line("ESP32_CAM_READY - IP: 192.168.4.2 (Camera active)");
    let (mut camera, events) = remote(port, &clock);

    camera.poll().unwrap();
    assert!(camera.is_available());
    assert_eq!(
        camera.channel_mut().port_mut().written_lines(),
        vec!["S3_CONNECTED"]
    );
    assert_eq!(events.borrow().as_slice(), &[(true, true)]);
}

#[test]
fn health_check_detects_a_lost_camera() {
    let clock = FakeClock::new();
    let mut port = ScriptedPort::new();
    linked(&mut port);
    port.stay_silent();
    let (mut camera, events) = remote(port, &clock);
    camera.begin().unwrap();

    camera.poll().unwrap();
    assert!(camera.is_available());

    clock.advance(config::HEALTH_CHECK_INTERVAL_MS);
    camera.poll().unwrap();
    assert!(!camera.is_available());
    assert_eq!(events.borrow().last(), Some(&(false, true)));
}

#[test]
fn quality_and_ip_queries() {
    let clock = FakeClock::new();
    let mut port = ScriptedPort::new();
    port.reply_with(&[r#"{"success":true,"quality":20}"#]);
    port.reply_with(&["IP:192.168.4.2"]);
    port.reply_with(&[r#"{"success":false,"error":"Camera not ready"}"#]);
    let (mut camera, _) = remote(port, &clock);

    assert_eq!(camera.set_quality(20), Ok(20));
    assert_eq!(camera.camera_ip().unwrap(), Some("192.168.4.2"));
    assert_eq!(camera.set_quality(30), Err(BoardError::CameraError));
}

#[test]
fn heartbeat_ahead_of_the_transfer_is_skipped() {
    let clock = FakeClock::new();
    let jpeg = sample_jpeg(config::CHUNK_SIZE + 10);
    let lines = transfer_lines(&jpeg);
    let mut port = ScriptedPort::new();
    port.reply_with(&[lines[0].as_str()]);
    let mut wire = vec![
        "HEARTBEAT - Web: http://10.0.0.5 (Camera active)",
        r#"{"status":"camera_awake"}"#,
    ];
    wire.push(lines[0].as_str());
    wire.push("ESP32_CAM_READY - IP: 10.0.0.5 (Camera active)");
    wire.extend(lines.iter().skip(1).map(String::as_str));
    port.reply_with(&wire);
    let (mut camera, _) = remote(port, &clock);

    assert_eq!(camera.capture_jpeg().unwrap(), jpeg);
}
