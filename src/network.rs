//! Network state shared with the dispatcher, and serial provisioning of
//! Wi-Fi credentials when none are stored.

use crate::BoardError;
use crate::channel::CommandChannel;
use crate::clock::Clock;
use crate::credentials::{CredentialStore, WifiCredentials};
use alloc::string::{String, ToString};
use core::net::Ipv4Addr;
use embedded_io::{Read, ReadReady, Write};
use embedded_storage::Storage;
use log::{info, warn};

/// Read-only view of the station interface
pub trait NetworkInfo {
    /// DHCP address, `None` while disconnected
    fn local_ip(&self) -> Option<Ipv4Addr>;

    /// SSID of the joined network, empty while disconnected
    fn ssid(&self) -> &str;

    fn is_connected(&self) -> bool {
        self.local_ip().is_some()
    }

    /// Dotted address, `0.0.0.0` while disconnected
    fn ip_text(&self) -> String {
        self.local_ip()
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
            .to_string()
    }
}

/// Snapshot of the station state, updated by the Wi-Fi task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    ip: Option<Ipv4Addr>,
    ssid: heapless::String<32>,
}

impl NetworkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed association with its DHCP address
    pub fn set_connected(&mut self, ssid: &str, ip: Ipv4Addr) {
        self.ssid.clear();
        // SSIDs come from WifiCredentials and always fit
        let _ = self.ssid.push_str(ssid);
        self.ip = Some(ip);
    }

    pub fn set_disconnected(&mut self) {
        self.ip = None;
        self.ssid.clear();
    }
}

impl NetworkInfo for NetworkStatus {
    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.ip
    }

    fn ssid(&self) -> &str {
        &self.ssid
    }
}

/// Result of the interactive prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Credentials confirmed and persisted; the device should restart
    Saved(WifiCredentials),
    /// User answered anything but y/yes; nothing was written
    Declined,
    /// No input within the timeout
    TimedOut,
    /// Input did not form valid credentials
    Invalid,
}

/// Ask for SSID, password and confirmation over the serial console.
pub fn provision_interactive<P, C, S>(
    channel: &mut CommandChannel<P, C>,
    store: &mut CredentialStore<S>,
    timeout_ms: u64,
) -> Result<ProvisionOutcome, BoardError>
where
    P: Read + ReadReady + Write,
    C: Clock,
    S: Storage,
{
    channel.write_line("No WiFi credentials stored.")?;
    channel.write_line("Enter WiFi SSID:")?;
    let Some(ssid) = channel.read_line(timeout_ms)? else {
        return Ok(ProvisionOutcome::TimedOut);
    };

    // Taken verbatim; an empty line selects an open network
    channel.write_line("Enter WiFi password (blank for open network):")?;
    let Some(password) = channel.read_raw_line(timeout_ms)? else {
        return Ok(ProvisionOutcome::TimedOut);
    };

    let creds = match WifiCredentials::new(&ssid, &password) {
        Ok(creds) => creds,
        Err(e) => {
            warn!("[WIFI] Rejected provisioning input: {:?}", e);
            channel.write_line("Invalid credentials (SSID 1-32 bytes, password up to 64 bytes)")?;
            return Ok(ProvisionOutcome::Invalid);
        }
    };

    channel.write_line(&alloc::format!("Save SSID '{}'? (y/n)", creds.ssid()))?;
    let Some(answer) = channel.read_line(timeout_ms)? else {
        return Ok(ProvisionOutcome::TimedOut);
    };
    let answer = answer.to_ascii_lowercase();
    if answer != "y" && answer != "yes" {
        channel.write_line("Credentials discarded.")?;
        return Ok(ProvisionOutcome::Declined);
    }

    store.save(&creds)?;
    channel.write_line("Credentials saved, restarting...")?;
    info!("[WIFI] Provisioned credentials for '{}'", creds.ssid());
    Ok(ProvisionOutcome::Saved(creds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tracks_connection() {
        let mut status = NetworkStatus::new();
        assert!(!status.is_connected());
        status.set_connected("lab", Ipv4Addr::new(192, 168, 4, 2));
        assert_eq!(status.local_ip(), Some(Ipv4Addr::new(192, 168, 4, 2)));
        assert_eq!(status.ssid(), "lab");
        status.set_disconnected();
        assert!(!status.is_connected());
        assert_eq!(status.ssid(), "");
    }
}
