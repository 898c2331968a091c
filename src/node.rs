//! Camera board main cycle: read at most one command, dispatch it, then run
//! the supervisor. Everything is cooperative and single threaded.

use crate::BoardError;
use crate::camera::{CameraController, CameraDriver};
use crate::channel::CommandChannel;
use crate::clock::Clock;
use crate::config;
use crate::credentials::CredentialStore;
use crate::dispatcher::{DispatchContext, Dispatcher, Outcome};
use crate::network::NetworkInfo;
use crate::reply::Reply;
use crate::supervisor::{Supervisor, SupervisorReport};
use alloc::string::{String, ToString};
use embedded_io::{Read, ReadReady, Write};
use embedded_storage::Storage;
use log::{error, info};

pub struct CameraNode<P, C, D, S, N> {
    channel: CommandChannel<P, C>,
    camera: CameraController<D>,
    credentials: CredentialStore<S>,
    network: N,
    dispatcher: Dispatcher,
    supervisor: Supervisor,
    last_report: SupervisorReport,
}

impl<P, C, D, S, N> CameraNode<P, C, D, S, N>
where
    P: Read + ReadReady + Write,
    C: Clock,
    D: CameraDriver,
    S: Storage,
    N: NetworkInfo,
{
    pub fn new(
        channel: CommandChannel<P, C>,
        camera: CameraController<D>,
        credentials: CredentialStore<S>,
        network: N,
    ) -> Self {
        let supervisor = Supervisor::new(channel.now_ms());
        Self {
            channel,
            camera,
            credentials,
            network,
            dispatcher: Dispatcher::default(),
            supervisor,
            last_report: SupervisorReport::default(),
        }
    }

    /// Replace the supervisor, e.g. with shorter intervals
    pub fn with_supervisor(mut self, supervisor: Supervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Bring the camera up and report readiness on the link.
    /// A failed init is reported but does not stop the node.
    pub fn start(&mut self) -> Result<bool, BoardError> {
        let result = self.camera.init_with_retries(
            self.channel.clock_mut(),
            config::CAMERA_INIT_RETRIES,
            config::CAMERA_INIT_RETRY_DELAY_MS,
        );
        let reply = match result {
            Ok(()) => Reply::Ready {
                ready: true,
                detail: String::from("Camera ready for serial commands"),
            },
            Err(e) => {
                error!("[CAMERA] Giving up on init: {}", e);
                Reply::Ready {
                    ready: false,
                    detail: e.to_string(),
                }
            }
        };
        self.channel.write_line(&reply.to_line())?;
        info!("[MAIN] Camera node started, IP {}", self.network.ip_text());
        Ok(result.is_ok())
    }

    /// One cycle
    pub fn poll(&mut self) -> Result<Outcome, BoardError> {
        if self.channel.has_input()? {
            if let Some(line) = self.channel.read_line(config::LINE_TIMEOUT_MS)? {
                let mut ctx = DispatchContext {
                    camera: &mut self.camera,
                    credentials: &mut self.credentials,
                    network: &self.network,
                };
                let outcome = self
                    .dispatcher
                    .handle_line(&line, &mut ctx, &mut self.channel)?;
                if outcome == Outcome::Restart {
                    return Ok(Outcome::Restart);
                }
            }
        }

        self.last_report = self.supervisor.poll(
            self.dispatcher.peer_acknowledged(),
            &mut self.camera,
            &self.network,
            &mut self.channel,
        )?;
        Ok(Outcome::Continue)
    }

    /// Cycle until a command asks for a restart
    pub fn run_until_restart(&mut self) -> Result<(), BoardError> {
        loop {
            if self.poll()? == Outcome::Restart {
                return Ok(());
            }
            self.channel.delay_ms(1);
        }
    }

    pub fn camera(&self) -> &CameraController<D> {
        &self.camera
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn last_report(&self) -> SupervisorReport {
        self.last_report
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn channel_mut(&mut self) -> &mut CommandChannel<P, C> {
        &mut self.channel
    }

    pub fn credentials_mut(&mut self) -> &mut CredentialStore<S> {
        &mut self.credentials
    }
}
