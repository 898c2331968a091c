//! Transport-agnostic camera access for the controller
//!
//! `LocalCamera` drives a sensor on the same board; `RemoteCamera` drives a
//! camera board over the serial command link. Availability changes are
//! pushed to a `StatusObserver` instead of a callback pointer.

use crate::camera::{CameraController, CameraDriver, Frame};
use crate::channel::CommandChannel;
use crate::clock::{Clock, Interval};
use crate::command::{self, Command};
use crate::reply::{self, FrameInfo, StatusReply};
use crate::transfer::{self, TransferOutcome};
use crate::{BoardError, config};
use alloc::string::String;
use alloc::vec::Vec;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use embedded_io::{Read, ReadReady, Write};
use log::{debug, info, warn};

/// Receives camera availability after every check
pub trait StatusObserver {
    /// `changed` is true when `connected` differs from the previous check
    fn on_status_changed(&mut self, connected: bool, changed: bool);
}

/// Observer that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoObserver;

impl StatusObserver for NoObserver {
    fn on_status_changed(&mut self, _connected: bool, _changed: bool) {}
}

impl<F: FnMut(bool, bool)> StatusObserver for F {
    fn on_status_changed(&mut self, connected: bool, changed: bool) {
        self(connected, changed)
    }
}

/// Camera operations used by the web surface and the relay
pub trait CameraProxy {
    /// Result of the most recent check
    fn is_available(&self) -> bool;

    /// Round-trip liveness check
    fn ping(&mut self) -> Result<bool, BoardError>;

    /// Full status from the camera side
    fn check_status(&mut self) -> Result<Option<StatusReply>, BoardError>;

    /// Periodic availability check; cheap when not due
    fn poll(&mut self) -> Result<(), BoardError>;

    /// Capture one frame and return the JPEG bytes
    fn capture_jpeg(&mut self) -> Result<Vec<u8>, BoardError>;

    /// Capture one frame, keep it as the last image and return it as base64
    fn capture_base64(&mut self) -> Result<String, BoardError> {
        let jpeg = self.capture_jpeg()?;
        Ok(STANDARD.encode(jpeg))
    }

    /// Base64 of the last successful capture
    fn last_image_base64(&self) -> Option<&str>;
}

/// Sensor attached to this board
pub struct LocalCamera<D, C> {
    camera: CameraController<D>,
    clock: C,
    last_image: Option<String>,
}

impl<D: CameraDriver, C: Clock> LocalCamera<D, C> {
    pub fn new(camera: CameraController<D>, clock: C) -> Self {
        Self {
            camera,
            clock,
            last_image: None,
        }
    }

    /// Init the sensor with the boot retry policy
    pub fn begin(&mut self) -> bool {
        self.camera
            .init_with_retries(
                &mut self.clock,
                config::CAMERA_INIT_RETRIES,
                config::CAMERA_INIT_RETRY_DELAY_MS,
            )
            .is_ok()
    }

    pub fn controller(&mut self) -> &mut CameraController<D> {
        &mut self.camera
    }
}

impl<D: CameraDriver, C: Clock> CameraProxy for LocalCamera<D, C> {
    fn is_available(&self) -> bool {
        self.camera.is_initialized()
    }

    fn ping(&mut self) -> Result<bool, BoardError> {
        Ok(self.camera.is_initialized())
    }

    fn check_status(&mut self) -> Result<Option<StatusReply>, BoardError> {
        Ok(Some(StatusReply {
            ready: self.camera.is_ready(),
            camera: String::from(if self.camera.is_initialized() { "ok" } else { "failed" }),
            wifi: String::new(),
            ssid: String::new(),
            s3_connected: true,
            sleeping: self.camera.is_sleeping(),
        }))
    }

    fn poll(&mut self) -> Result<(), BoardError> {
        if self.camera.check_idle(self.clock.now_ms()) {
            debug!("[CAMERA] Local camera went idle");
        }
        Ok(())
    }

    fn capture_jpeg(&mut self) -> Result<Vec<u8>, BoardError> {
        let frame = self.camera.capture(&mut self.clock)?;
        Ok(frame.data().to_vec())
    }

    fn capture_base64(&mut self) -> Result<String, BoardError> {
        let encoded = STANDARD.encode(self.capture_jpeg()?);
        self.last_image = Some(encoded.clone());
        Ok(encoded)
    }

    fn last_image_base64(&self) -> Option<&str> {
        self.last_image.as_deref()
    }
}

/// Camera board reached over the serial command link
pub struct RemoteCamera<P, C, O> {
    channel: CommandChannel<P, C>,
    observer: O,
    available: bool,
    health: Interval,
    command_timeout_ms: u64,
    transfer_window_ms: u64,
    last_info: Option<FrameInfo>,
    last_image: Option<String>,
    camera_ip: Option<String>,
}

impl<P, C, O> RemoteCamera<P, C, O>
where
    P: Read + ReadReady + Write,
    C: Clock,
    O: StatusObserver,
{
    pub fn new(channel: CommandChannel<P, C>, observer: O) -> Self {
        let now = channel.now_ms();
        Self {
            channel,
            observer,
            available: false,
            health: Interval::new(config::HEALTH_CHECK_INTERVAL_MS, now),
            command_timeout_ms: config::COMMAND_TIMEOUT_MS,
            transfer_window_ms: config::TRANSFER_WINDOW_MS,
            last_info: None,
            last_image: None,
            camera_ip: None,
        }
    }

    pub fn with_timeouts(mut self, command_timeout_ms: u64, transfer_window_ms: u64) -> Self {
        self.command_timeout_ms = command_timeout_ms;
        self.transfer_window_ms = transfer_window_ms;
        self
    }

    /// Boot handshake: PING, announce ourselves, then read STATUS
    pub fn begin(&mut self) -> Result<bool, BoardError> {
        info!("[CAMERA] Probing camera board...");
        if !self.ping()? {
            warn!("[CAMERA] Camera board did not answer PING");
            self.set_available(false);
            return Ok(false);
        }
        self.handshake()?;
        let ready = self
            .check_status()?
            .map(|status| status.camera_ok())
            .unwrap_or(false);
        self.set_available(ready);
        self.health.reset(self.channel.now_ms());
        Ok(ready)
    }

    /// Address reported by `GET_IP`
    pub fn camera_ip(&mut self) -> Result<Option<&str>, BoardError> {
        let reply = self.exchange(&Command::GetIp.encode(), self.command_timeout_ms)?;
        if let Some(ip) = reply.as_deref().and_then(|line| line.strip_prefix(command::IP_PREFIX)) {
            self.camera_ip = Some(String::from(ip));
        }
        Ok(self.camera_ip.as_deref())
    }

    /// Send `QUALITY:<n>` and return the applied value
    pub fn set_quality(&mut self, quality: u8) -> Result<u8, BoardError> {
        let line = self
            .exchange(&Command::Quality(quality as i32).encode(), self.command_timeout_ms)?
            .ok_or(BoardError::Timeout)?;
        #[derive(serde::Deserialize)]
        struct Applied {
            success: bool,
            quality: u8,
        }
        match reply::parse_line::<Applied>(&line) {
            Some(applied) if applied.success => Ok(applied.quality),
            _ => {
                warn!("[CAMERA] QUALITY rejected: {}", line);
                Err(BoardError::CameraError)
            }
        }
    }

    /// Consume lines the camera board sent on its own
    pub fn service_unsolicited(&mut self) -> Result<usize, BoardError> {
        let mut handled = 0;
        while self.channel.has_input()? {
            let Some(line) = self.channel.read_line(self.command_timeout_ms)? else {
                break;
            };
            handled += 1;
            if line.starts_with(command::READY_ANNOUNCEMENT) {
                info!("[CAMERA] {}", line);
                self.channel.write_line(command::PEER_HANDSHAKE)?;
                self.set_available(true);
            } else if line == command::PEER_ACK || line == command::PONG {
                self.set_available(true);
            } else if line.starts_with(command::HEARTBEAT) {
                debug!("[CAMERA] {}", line);
                if !self.available {
                    self.set_available(true);
                }
            } else {
                debug!("[CAMERA] Unsolicited: {}", line);
            }
        }
        Ok(handled)
    }

    pub fn last_frame_info(&self) -> Option<FrameInfo> {
        self.last_info
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel<P, C> {
        &mut self.channel
    }

    fn handshake(&mut self) -> Result<(), BoardError> {
        match self.exchange(command::PEER_HANDSHAKE, self.command_timeout_ms)? {
            Some(ref line) if line == command::PEER_ACK => {
                info!("[CAMERA] Camera board acknowledged handshake");
            }
            other => debug!("[CAMERA] Unexpected handshake reply: {:?}", other),
        }
        Ok(())
    }

    fn set_available(&mut self, available: bool) {
        let changed = available != self.available;
        self.available = available;
        if changed {
            info!(
                "[CAMERA] Camera {}",
                if available { "connected" } else { "disconnected" }
            );
        }
        self.observer.on_status_changed(available, changed);
    }

    /// Drain, send and wait for the first reply that is not chatter
    fn exchange(&mut self, command: &str, timeout_ms: u64) -> Result<Option<String>, BoardError> {
        let started = self.channel.now_ms();
        let mut reply = self.channel.request(command, timeout_ms)?;
        while let Some(line) = reply {
            if !command::is_unsolicited(&line) {
                return Ok(Some(line));
            }
            debug!("[CAMERA] Skipping unsolicited line: {}", line);
            let remaining = timeout_ms.saturating_sub(self.channel.clock().elapsed_ms(started));
            if remaining == 0 {
                return Ok(None);
            }
            reply = self.channel.read_line(remaining)?;
        }
        Ok(None)
    }
}

impl<P, C, O> CameraProxy for RemoteCamera<P, C, O>
where
    P: Read + ReadReady + Write,
    C: Clock,
    O: StatusObserver,
{
    fn is_available(&self) -> bool {
        self.available
    }

    fn ping(&mut self) -> Result<bool, BoardError> {
        let reply = self.exchange(command::PING, self.command_timeout_ms)?;
        Ok(reply.as_deref() == Some(command::PONG))
    }

    fn check_status(&mut self) -> Result<Option<StatusReply>, BoardError> {
        let reply = self.exchange(command::STATUS, self.command_timeout_ms)?;
        Ok(reply.as_deref().and_then(reply::parse_line::<StatusReply>))
    }

    fn poll(&mut self) -> Result<(), BoardError> {
        self.service_unsolicited()?;
        if self.health.tick(self.channel.now_ms()) {
            let alive = self.ping()?;
            self.set_available(alive);
        }
        Ok(())
    }

    fn capture_jpeg(&mut self) -> Result<Vec<u8>, BoardError> {
        let encoded = self.capture_base64()?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| BoardError::ProtocolError)
    }

    /// CAPTURE for metadata, then GETIMAGE for the transfer
    fn capture_base64(&mut self) -> Result<String, BoardError> {
        let metadata = self
            .exchange(command::CAPTURE, self.command_timeout_ms)?
            .ok_or(BoardError::Timeout)?;
        let Some(info) = FrameInfo::from_line(&metadata) else {
            warn!("[CAMERA] CAPTURE failed: {}", metadata);
            return Err(BoardError::CameraError);
        };
        self.last_info = Some(info);

        self.channel.drain()?;
        self.channel.write_line(command::GETIMAGE)?;
        match transfer::receive_image(&mut self.channel, self.transfer_window_ms)? {
            TransferOutcome::Image(image) => match image.decode_checked() {
                Ok(bytes) => {
                    info!(
                        "[CAMERA] Received {} byte frame in {} chunks",
                        bytes.len(),
                        image.chunks
                    );
                    if let Some(header) = image.info {
                        self.last_info = Some(header);
                    }
                    self.set_available(true);
                    self.last_image = Some(image.base64.clone());
                    Ok(image.base64)
                }
                Err(e) => {
                    warn!("[CAMERA] Incomplete transfer: {:?}", e);
                    Err(e.into())
                }
            },
            TransferOutcome::Immediate(line) => {
                warn!("[CAMERA] GETIMAGE answered without a transfer: {}", line);
                Err(BoardError::CameraError)
            }
            TransferOutcome::NoResponse => {
                warn!("[CAMERA] GETIMAGE timed out");
                self.set_available(false);
                Err(BoardError::Timeout)
            }
        }
    }

    fn last_image_base64(&self) -> Option<&str> {
        self.last_image.as_deref()
    }
}
