//! Controller system state machine
//!
//! Tracks the controller board from boot to operation: credentials, Wi-Fi,
//! local services and the camera link. Events come from the firmware tasks;
//! `update` turns the current state into actions for them.

use crate::led_control::LedStatus;
use alloc::vec::Vec;
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    SystemInit,

    /// No usable credentials; serial provisioning runs
    AwaitingCredentials,

    WiFiConnecting,
    NetworkReady,

    /// Web server up, boot handshake with the camera board running
    CameraLinking,

    Operational,
    CameraLost,

    /// Connect attempts exhausted; credentials are cleared before restart
    WiFiError,
    Reconnecting,

    Restarting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    CredentialsLoaded,
    /// Nothing stored; the build-time defaults are in use
    DefaultCredentialsLoaded,
    CredentialsMissing,
    CredentialsProvisioned,
    CredentialsCleared,

    WiFiConnected,
    WiFiDisconnected,
    WiFiConnectionFailed,

    ServicesStarted,

    CameraLinked,
    CameraLinkFailed,
    CameraLost,
    CameraRecovered,

    RestartRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    Stay,
    Transition(SystemState),
    /// Transition and reset the retry counter
    TransitionWithReset(SystemState),
}

/// Work requested from the firmware tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    UpdateLEDStatus(LedStatus),
    PromptCredentials,
    ConnectWiFi,
    StartServices,
    LinkCamera,
    MonitorCamera,
    ServiceRelay,
    ClearCredentials,
    Restart,
    LogError(SystemState),
}

pub struct SystemStateMachine {
    current_state: SystemState,
    previous_state: Option<SystemState>,
    retry_count: u32,
    max_retries: u32,
    services_started: bool,
    using_defaults: bool,
}

impl Default for SystemStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: SystemState::SystemInit,
            previous_state: None,
            retry_count: 0,
            max_retries: 3,
            services_started: false,
            using_defaults: false,
        }
    }

    pub fn get_current_state(&self) -> SystemState {
        self.current_state
    }

    pub fn get_previous_state(&self) -> Option<SystemState> {
        self.previous_state
    }

    pub fn get_retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn get_led_status(&self) -> LedStatus {
        match self.current_state {
            SystemState::SystemInit => LedStatus::Starting,
            SystemState::AwaitingCredentials => LedStatus::AwaitingCredentials,
            SystemState::WiFiConnecting | SystemState::Reconnecting => LedStatus::WiFiConnecting,
            SystemState::NetworkReady | SystemState::CameraLinking => LedStatus::NetworkReady,
            SystemState::Operational => LedStatus::CameraAvailable,
            SystemState::CameraLost => LedStatus::CameraUnavailable,
            SystemState::WiFiError => LedStatus::WiFiError,
            SystemState::Restarting => LedStatus::Restarting,
        }
    }

    pub fn handle_event(&mut self, event: SystemEvent) -> StateTransition {
        if event == SystemEvent::DefaultCredentialsLoaded
            && self.current_state == SystemState::SystemInit
        {
            self.using_defaults = true;
        }
        let transition = self.get_state_transition(self.current_state, event);

        match transition {
            StateTransition::Transition(new_state) => {
                self.transition_to_state(new_state);
            }
            StateTransition::TransitionWithReset(new_state) => {
                self.retry_count = 0;
                self.transition_to_state(new_state);
            }
            StateTransition::Stay => {}
        }

        transition
    }

    /// Actions for the current state
    pub fn update(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        actions.push(Action::UpdateLEDStatus(self.get_led_status()));

        match self.current_state {
            SystemState::SystemInit => {}

            SystemState::AwaitingCredentials => {
                actions.push(Action::PromptCredentials);
            }

            SystemState::WiFiConnecting | SystemState::Reconnecting => {
                actions.push(Action::ConnectWiFi);
            }

            SystemState::NetworkReady => {
                if !self.services_started {
                    actions.push(Action::StartServices);
                }
            }

            SystemState::CameraLinking => {
                actions.push(Action::LinkCamera);
            }

            SystemState::Operational => {
                actions.push(Action::MonitorCamera);
                actions.push(Action::ServiceRelay);
            }

            SystemState::CameraLost => {
                actions.push(Action::MonitorCamera);
                // The relay records `Cam Error` on its own
                actions.push(Action::ServiceRelay);
            }

            SystemState::WiFiError => {
                actions.push(Action::LogError(self.current_state));
                actions.push(Action::ClearCredentials);
            }

            SystemState::Restarting => {
                actions.push(Action::Restart);
            }
        }

        actions
    }

    fn transition_to_state(&mut self, new_state: SystemState) {
        if new_state != self.current_state {
            match new_state {
                SystemState::Operational => info!("[STATE] System operational"),
                SystemState::WiFiError | SystemState::CameraLost => {
                    warn!("[STATE] Error state: {:?}", new_state);
                }
                SystemState::Restarting => info!("[STATE] Restart requested"),
                _ => {}
            }

            self.previous_state = Some(self.current_state);
            self.current_state = new_state;
        }
    }

    fn get_state_transition(&self, current_state: SystemState, event: SystemEvent) -> StateTransition {
        match (current_state, event) {
            (_, SystemEvent::RestartRequested) => {
                StateTransition::Transition(SystemState::Restarting)
            }

            (
                SystemState::SystemInit,
                SystemEvent::CredentialsLoaded | SystemEvent::DefaultCredentialsLoaded,
            ) => {
                StateTransition::Transition(SystemState::WiFiConnecting)
            }
            (SystemState::SystemInit, SystemEvent::CredentialsMissing) => {
                StateTransition::Transition(SystemState::AwaitingCredentials)
            }
            (SystemState::AwaitingCredentials, SystemEvent::CredentialsProvisioned) => {
                StateTransition::Transition(SystemState::Restarting)
            }

            (SystemState::WiFiConnecting, SystemEvent::WiFiConnected) => {
                StateTransition::TransitionWithReset(SystemState::NetworkReady)
            }
            (SystemState::WiFiConnecting, SystemEvent::WiFiConnectionFailed) => {
                StateTransition::Transition(self.wifi_failure_state())
            }
            (SystemState::WiFiError, SystemEvent::CredentialsCleared) => {
                StateTransition::Transition(SystemState::Restarting)
            }

            (SystemState::NetworkReady, SystemEvent::ServicesStarted) => {
                StateTransition::Transition(SystemState::CameraLinking)
            }

            (SystemState::CameraLinking, SystemEvent::CameraLinked) => {
                StateTransition::TransitionWithReset(SystemState::Operational)
            }
            (SystemState::CameraLinking, SystemEvent::CameraLinkFailed) => {
                StateTransition::Transition(SystemState::CameraLost)
            }

            (SystemState::Operational, SystemEvent::CameraLost) => {
                StateTransition::Transition(SystemState::CameraLost)
            }
            (SystemState::CameraLost, SystemEvent::CameraRecovered)
            | (SystemState::CameraLost, SystemEvent::CameraLinked) => {
                StateTransition::TransitionWithReset(SystemState::Operational)
            }

            (
                SystemState::NetworkReady
                | SystemState::CameraLinking
                | SystemState::Operational
                | SystemState::CameraLost,
                SystemEvent::WiFiDisconnected,
            ) => StateTransition::Transition(SystemState::Reconnecting),
            (SystemState::Reconnecting, SystemEvent::WiFiConnected) => {
                if self.services_started {
                    StateTransition::TransitionWithReset(SystemState::CameraLinking)
                } else {
                    StateTransition::TransitionWithReset(SystemState::NetworkReady)
                }
            }
            (SystemState::Reconnecting, SystemEvent::WiFiConnectionFailed) => {
                if self.retry_count < self.max_retries {
                    StateTransition::Stay
                } else {
                    StateTransition::Transition(self.wifi_failure_state())
                }
            }

            _ => StateTransition::Stay,
        }
    }

    /// Defaults have nothing in flash to clear, so they go to provisioning
    fn wifi_failure_state(&self) -> SystemState {
        if self.using_defaults {
            SystemState::AwaitingCredentials
        } else {
            SystemState::WiFiError
        }
    }

    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn is_error_state(&self) -> bool {
        matches!(
            self.current_state,
            SystemState::WiFiError | SystemState::CameraLost
        )
    }

    /// Wi-Fi is up and the web surface can serve requests
    pub fn is_operational(&self) -> bool {
        matches!(
            self.current_state,
            SystemState::Operational | SystemState::CameraLost
        )
    }

    pub fn mark_services_started(&mut self) {
        self.services_started = true;
    }
}
