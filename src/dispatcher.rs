//! Command dispatcher for the camera board
//!
//! Turns one command line into one reply. Malformed input always gets an
//! error reply and never changes state. Only the restart commands end the
//! caller's loop.

use crate::camera::{CameraController, CameraDriver, CameraError, Frame};
use crate::channel::CommandChannel;
use crate::clock::Clock;
use crate::command::Command;
use crate::credentials::{CredentialStore, WifiCredentials};
use crate::network::NetworkInfo;
use crate::reply::{FrameInfo, Reply, StatusEvent, StatusReply, VersionReply, WifiInfoReply};
use crate::transfer;
use crate::{BoardError, VERSION, config};
use alloc::string::{String, ToString};
use embedded_io::{Read, ReadReady, Write};
use embedded_storage::Storage;
use log::{info, warn};

/// What the loop should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Acknowledgment sent and grace delay elapsed; reset the device now
    Restart,
}

/// Collaborators a command may act on
pub struct DispatchContext<'a, D, S, N> {
    pub camera: &'a mut CameraController<D>,
    pub credentials: &'a mut CredentialStore<S>,
    pub network: &'a N,
}

/// Holds the peer-acknowledged flag; everything else lives in the context
#[derive(Debug)]
pub struct Dispatcher {
    peer_acknowledged: bool,
    board: &'static str,
    handled: u32,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new("esp32-cam")
    }
}

impl Dispatcher {
    pub fn new(board: &'static str) -> Self {
        Self {
            peer_acknowledged: false,
            board,
            handled: 0,
        }
    }

    /// Set by `PING` or `S3_CONNECTED`, never cleared
    pub fn peer_acknowledged(&self) -> bool {
        self.peer_acknowledged
    }

    /// Lines handled so far, including rejected ones
    pub fn handled(&self) -> u32 {
        self.handled
    }

    /// Parse `line`, run the command and write its reply
    pub fn handle_line<P, C, D, S, N>(
        &mut self,
        line: &str,
        ctx: &mut DispatchContext<'_, D, S, N>,
        channel: &mut CommandChannel<P, C>,
    ) -> Result<Outcome, BoardError>
    where
        P: Read + ReadReady + Write,
        C: Clock,
        D: CameraDriver,
        S: Storage,
        N: NetworkInfo,
    {
        self.handled = self.handled.wrapping_add(1);
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("[DISPATCH] Rejected '{}': {}", line, e);
                channel.write_line(&Reply::error(e.to_string()).to_line())?;
                return Ok(Outcome::Continue);
            }
        };
        info!("[DISPATCH] {:?}", command);

        if command.touches_camera() {
            ctx.camera.touch(channel.now_ms());
        }

        let reply = match command {
            Command::Ping => {
                self.peer_acknowledged = true;
                Reply::Pong
            }
            Command::PeerConnected => {
                self.peer_acknowledged = true;
                Reply::PeerAck
            }
            Command::Status => Reply::Status(self.status(ctx)),
            Command::Capture => capture_metadata(ctx.camera, channel),
            Command::GetImage => {
                let result = ctx.camera.capture(channel.clock_mut());
                match result {
                    Ok(frame) => {
                        // `frame` is released when it drops, whatever send_image returns
                        let (width, height) = (frame.width(), frame.height());
                        return transfer::send_image(channel, frame.data(), width, height)
                            .map(|_| Outcome::Continue);
                    }
                    Err(e) => Reply::error(e.to_string()),
                }
            }
            Command::Quality(value) => match ctx.camera.set_quality(value, channel.now_ms()) {
                Ok(quality) => Reply::Quality(quality),
                Err(e) => Reply::error(e.to_string()),
            },
            Command::Sleep => {
                if !ctx.camera.is_initialized() {
                    Reply::error(CameraError::NotInitialized.to_string())
                } else {
                    ctx.camera.sleep();
                    Reply::Event(StatusEvent::CameraSleeping)
                }
            }
            Command::Wake => match ctx.camera.wake(channel.clock_mut()) {
                Ok(_) => Reply::Event(StatusEvent::CameraAwake),
                Err(e) => Reply::error(e.to_string()),
            },
            Command::Reinit => match ctx.camera.reinit(channel.clock_mut()) {
                Ok(()) => Reply::Ready {
                    ready: true,
                    detail: String::from("Camera reinitialized"),
                },
                Err(e) => Reply::Ready {
                    ready: false,
                    detail: e.to_string(),
                },
            },
            Command::Version => Reply::Version(VersionReply {
                version: VERSION.to_string(),
                board: self.board.to_string(),
            }),
            Command::GetIp => Reply::Ip(ctx.network.ip_text()),
            Command::GetWifi => match ctx.credentials.load() {
                Ok(stored) => Reply::WifiInfo(WifiInfoReply {
                    configured: stored.is_some(),
                    ssid: stored
                        .as_ref()
                        .map(|c| c.ssid().to_string())
                        .unwrap_or_default(),
                    ip: ctx.network.ip_text(),
                }),
                Err(e) => {
                    warn!("[DISPATCH] Credential read failed: {:?}", e);
                    Reply::error("Failed to read WiFi credentials")
                }
            },
            Command::SetWifi { ssid, password } => {
                let saved = WifiCredentials::new(&ssid, &password)
                    .and_then(|creds| ctx.credentials.save(&creds));
                match saved {
                    Ok(()) => {
                        return restart_after(
                            channel,
                            Reply::Ok(String::from("WiFi credentials saved, restarting")),
                        );
                    }
                    Err(e) => {
                        warn!("[DISPATCH] Could not save credentials: {:?}", e);
                        Reply::error("Failed to save WiFi credentials")
                    }
                }
            }
            Command::ClearWifi => match ctx.credentials.clear() {
                Ok(()) => {
                    return restart_after(
                        channel,
                        Reply::Ok(String::from("WiFi credentials cleared, restarting")),
                    );
                }
                Err(e) => {
                    warn!("[DISPATCH] Could not clear credentials: {:?}", e);
                    Reply::error("Failed to clear WiFi credentials")
                }
            },
            Command::Reset => {
                return restart_after(channel, Reply::Ok(String::from("Restarting")));
            }
        };

        channel.write_line(&reply.to_line())?;
        Ok(Outcome::Continue)
    }

    fn status<D, S, N>(&self, ctx: &DispatchContext<'_, D, S, N>) -> StatusReply
    where
        D: CameraDriver,
        N: NetworkInfo,
    {
        StatusReply {
            ready: ctx.camera.is_ready(),
            camera: if ctx.camera.is_initialized() { "ok" } else { "failed" }.to_string(),
            wifi: ctx
                .network
                .local_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            ssid: ctx.network.ssid().to_string(),
            s3_connected: self.peer_acknowledged,
            sleeping: ctx.camera.is_sleeping(),
        }
    }
}

/// `CAPTURE`: report frame metadata only, then release the frame
fn capture_metadata<P, C, D>(
    camera: &mut CameraController<D>,
    channel: &mut CommandChannel<P, C>,
) -> Reply
where
    P: Read + ReadReady + Write,
    C: Clock,
    D: CameraDriver,
{
    match camera.capture(channel.clock_mut()) {
        Ok(frame) => Reply::Frame(FrameInfo {
            success: true,
            size: frame.len(),
            width: frame.width(),
            height: frame.height(),
        }),
        Err(e) => Reply::error(e.to_string()),
    }
}

fn restart_after<P, C>(
    channel: &mut CommandChannel<P, C>,
    reply: Reply,
) -> Result<Outcome, BoardError>
where
    P: Read + ReadReady + Write,
    C: Clock,
{
    channel.write_line(&reply.to_line())?;
    info!("[DISPATCH] Restarting in {}ms", config::RESTART_GRACE_MS);
    channel.delay_ms(config::RESTART_GRACE_MS);
    Ok(Outcome::Restart)
}
