//! Wi-Fi station for the ESP32-S3 controller
//!
//! Joins the network with the stored credentials using esp-wifi and waits
//! for the embassy-net DHCP lease. The result is published through a
//! [`NetworkStatus`] snapshot.

use crate::credentials::WifiCredentials;
use crate::network::{NetworkInfo, NetworkStatus};
use crate::{BoardError, config};
use embassy_net::Stack;
use embassy_time::{Duration, Timer};
use esp_wifi::wifi::{AuthMethod, ClientConfiguration, Configuration, WifiController};
use log::{info, warn};

pub struct WiFiManager<'a> {
    controller: WifiController<'a>,
    stack: Stack<'a>,
    status: NetworkStatus,
    started: bool,
}

impl<'a> WiFiManager<'a> {
    pub fn new(controller: WifiController<'a>, stack: Stack<'a>) -> Self {
        Self {
            controller,
            stack,
            status: NetworkStatus::new(),
            started: false,
        }
    }

    /// Associate and wait for a DHCP lease, bounded by the retry policy
    pub async fn connect(&mut self, creds: &WifiCredentials) -> Result<(), BoardError> {
        info!("[WIFI] Connecting to '{}'", creds.ssid());

        let auth_method = if creds.password().is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let client_config = ClientConfiguration {
            ssid: creds.ssid().try_into().map_err(|_| BoardError::WiFiError)?,
            password: creds.password().try_into().map_err(|_| BoardError::WiFiError)?,
            auth_method,
            ..Default::default()
        };
        self.controller
            .set_configuration(&Configuration::Client(client_config))
            .map_err(|_| BoardError::WiFiError)?;

        if !self.started {
            self.controller.start().map_err(|_| BoardError::WiFiError)?;
            self.started = true;
        }
        self.controller.connect().map_err(|_| BoardError::WiFiError)?;

        let retry = Duration::from_millis(config::WIFI_RETRY_DELAY_MS as u64);
        for attempt in 1..=config::WIFI_CONNECT_ATTEMPTS {
            if self.controller.is_connected().unwrap_or(false) {
                if let Some(v4) = self.stack.config_v4() {
                    let ip = v4.address.address();
                    self.status.set_connected(creds.ssid(), ip);
                    info!("[WIFI] Connected, IP {} after {} attempts", ip, attempt);
                    return Ok(());
                }
            }
            Timer::after(retry).await;
        }

        warn!(
            "[WIFI] No connection after {} attempts",
            config::WIFI_CONNECT_ATTEMPTS
        );
        self.status.set_disconnected();
        Err(BoardError::WiFiError)
    }

    /// Refresh the snapshot; returns false when the link dropped
    pub fn monitor_connection(&mut self) -> bool {
        let linked = self.controller.is_connected().unwrap_or(false);
        match (linked, self.stack.config_v4()) {
            (true, Some(_)) => true,
            _ => {
                if self.status.is_connected() {
                    warn!("[WIFI] WiFi connection lost");
                }
                self.status.set_disconnected();
                false
            }
        }
    }

    pub fn status(&self) -> &NetworkStatus {
        &self.status
    }

    pub fn stack(&self) -> Stack<'a> {
        self.stack
    }
}
