//! Liveness duties run on every camera-board cycle: ready announcements
//! until the peer acknowledges, periodic heartbeats and the idle sleep.

use crate::BoardError;
use crate::camera::{CameraController, CameraDriver};
use crate::channel::CommandChannel;
use crate::clock::{Clock, Interval};
use crate::command;
use crate::config;
use crate::network::NetworkInfo;
use crate::reply::{Reply, StatusEvent};
use embedded_io::{Read, ReadReady, Write};
use log::debug;

/// What one `poll` emitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub announced: bool,
    pub heartbeat: bool,
    pub camera_slept: bool,
}

pub struct Supervisor {
    announce: Interval,
    heartbeat: Interval,
}

impl Supervisor {
    pub fn new(now_ms: u64) -> Self {
        Self::with_intervals(
            now_ms,
            config::ANNOUNCE_INTERVAL_MS,
            config::HEARTBEAT_INTERVAL_MS,
        )
    }

    pub fn with_intervals(now_ms: u64, announce_ms: u64, heartbeat_ms: u64) -> Self {
        let mut announce = Interval::new(announce_ms, now_ms);
        // First announcement goes out on the first cycle after boot
        announce.expire();
        Self {
            announce,
            heartbeat: Interval::new(heartbeat_ms, now_ms),
        }
    }

    /// Non-blocking; none of these emissions count as camera activity
    pub fn poll<P, C, D, N>(
        &mut self,
        peer_acknowledged: bool,
        camera: &mut CameraController<D>,
        network: &N,
        channel: &mut CommandChannel<P, C>,
    ) -> Result<SupervisorReport, BoardError>
    where
        P: Read + ReadReady + Write,
        C: Clock,
        D: CameraDriver,
        N: NetworkInfo,
    {
        let now = channel.now_ms();
        let mut report = SupervisorReport::default();

        if !peer_acknowledged && self.announce.tick(now) {
            channel.write_line(&alloc::format!(
                "{} - IP: {}{}",
                command::READY_ANNOUNCEMENT,
                network.ip_text(),
                camera_suffix(camera)
            ))?;
            report.announced = true;
        }

        if self.heartbeat.tick(now) {
            channel.write_line(&alloc::format!(
                "{} - Web: http://{}{}",
                command::HEARTBEAT,
                network.ip_text(),
                camera_suffix(camera)
            ))?;
            report.heartbeat = true;
        }

        if camera.check_idle(now) {
            channel.write_line(&Reply::Event(StatusEvent::CameraSleeping).to_line())?;
            report.camera_slept = true;
        }

        if report != SupervisorReport::default() {
            debug!("[SUPERVISOR] {:?}", report);
        }
        Ok(report)
    }
}

fn camera_suffix<D: CameraDriver>(camera: &CameraController<D>) -> &'static str {
    if camera.is_sleeping() {
        " (Camera sleeping)"
    } else {
        " (Camera active)"
    }
}
