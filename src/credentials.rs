//! Persisted Wi-Fi credentials and AI API configuration
//!
//! Fixed-offset records relative to the store base:
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 1    | configured flag (`0xAA`)      |
//! | 1      | 33   | SSID, zero padded             |
//! | 34     | 65   | password, zero padded         |
//! | 200    | 100  | AI base URL, zero padded      |
//! | 300    | 50   | AI message route              |
//! | 350    | 50   | AI health route               |
//!
//! Writes are synchronous and not read back.

use crate::{BoardError, config};
use alloc::string::{String, ToString};
use alloc::vec;
use embedded_storage::Storage;
use log::{info, warn};

const MAX_SSID_LEN: usize = 32;
const MAX_PASSWORD_LEN: usize = 64;

/// Storage and validation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    /// Underlying flash read/write failed
    Storage,
    /// SSID is empty
    EmptySsid,
    /// Field longer than its record slot
    TooLong,
}

impl From<CredentialError> for BoardError {
    fn from(_: CredentialError) -> Self {
        BoardError::StorageError
    }
}

/// SSID (up to 32 bytes) and password (up to 64 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    ssid: heapless::String<MAX_SSID_LEN>,
    password: heapless::String<MAX_PASSWORD_LEN>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, CredentialError> {
        if ssid.is_empty() {
            return Err(CredentialError::EmptySsid);
        }
        let mut creds = Self {
            ssid: heapless::String::new(),
            password: heapless::String::new(),
        };
        creds
            .ssid
            .push_str(ssid)
            .map_err(|_| CredentialError::TooLong)?;
        creds
            .password
            .push_str(password)
            .map_err(|_| CredentialError::TooLong)?;
        Ok(creds)
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// Where the relay sends frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    base_url: String,
    message_route: String,
    health_route: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(config::AI_BASE_URL, "", "")
    }
}

impl ApiConfig {
    pub const DEFAULT_MESSAGE_ROUTE: &'static str = "/message";
    pub const DEFAULT_HEALTH_ROUTE: &'static str = "/health";

    /// Normalize user input: trimmed, no trailing `/` on the base, leading
    /// `/` on routes, default routes when empty. A base URL that does not
    /// start with `http` is dropped.
    pub fn new(base_url: &str, message_route: &str, health_route: &str) -> Self {
        let mut base = base_url.trim();
        while let Some(stripped) = base.strip_suffix('/') {
            base = stripped;
        }
        let base = if base.starts_with("http") { base } else { "" };
        Self {
            base_url: base.to_string(),
            message_route: normalize_route(message_route, Self::DEFAULT_MESSAGE_ROUTE),
            health_route: normalize_route(health_route, Self::DEFAULT_HEALTH_ROUTE),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn message_route(&self) -> &str {
        &self.message_route
    }

    pub fn health_route(&self) -> &str {
        &self.health_route
    }

    pub fn message_url(&self) -> String {
        alloc::format!("{}{}", self.base_url, self.message_route)
    }

    pub fn health_url(&self) -> String {
        alloc::format!("{}{}", self.base_url, self.health_route)
    }
}

fn normalize_route(route: &str, default: &str) -> String {
    let route = route.trim();
    if route.is_empty() {
        default.to_string()
    } else if route.starts_with('/') {
        route.to_string()
    } else {
        alloc::format!("/{}", route)
    }
}

/// Credential and API records on any `embedded-storage` device
pub struct CredentialStore<S> {
    storage: S,
    base: u32,
}

impl<S: Storage> CredentialStore<S> {
    pub fn new(storage: S) -> Self {
        Self::with_base(storage, config::STORAGE_BASE)
    }

    pub fn with_base(storage: S, base: u32) -> Self {
        Self { storage, base }
    }

    /// Stored credentials, `None` when the flag is unset or the record is unreadable
    pub fn load(&mut self) -> Result<Option<WifiCredentials>, CredentialError> {
        let mut flag = [0u8; 1];
        self.read(config::CREDENTIALS_FLAG_OFFSET, &mut flag)?;
        if flag[0] != config::CREDENTIALS_MAGIC {
            return Ok(None);
        }

        let ssid = self.read_field(config::SSID_OFFSET, config::SSID_FIELD_LEN)?;
        let password = self.read_field(config::PASSWORD_OFFSET, config::PASSWORD_FIELD_LEN)?;
        match (ssid, password) {
            (Some(ssid), Some(password)) => match WifiCredentials::new(&ssid, &password) {
                Ok(creds) => {
                    info!("[CREDS] Loaded credentials for '{}'", creds.ssid());
                    Ok(Some(creds))
                }
                Err(_) => {
                    warn!("[CREDS] Stored credentials are invalid");
                    Ok(None)
                }
            },
            _ => {
                warn!("[CREDS] Stored credentials are not valid UTF-8");
                Ok(None)
            }
        }
    }

    /// Persist credentials; the flag is written last
    pub fn save(&mut self, creds: &WifiCredentials) -> Result<(), CredentialError> {
        self.write_field(config::SSID_OFFSET, config::SSID_FIELD_LEN, creds.ssid())?;
        self.write_field(
            config::PASSWORD_OFFSET,
            config::PASSWORD_FIELD_LEN,
            creds.password(),
        )?;
        self.write(config::CREDENTIALS_FLAG_OFFSET, &[config::CREDENTIALS_MAGIC])?;
        info!("[CREDS] Saved credentials for '{}'", creds.ssid());
        Ok(())
    }

    /// Erase the credential record
    pub fn clear(&mut self) -> Result<(), CredentialError> {
        self.write(config::CREDENTIALS_FLAG_OFFSET, &[0])?;
        self.write_field(config::SSID_OFFSET, config::SSID_FIELD_LEN, "")?;
        self.write_field(config::PASSWORD_OFFSET, config::PASSWORD_FIELD_LEN, "")?;
        info!("[CREDS] Cleared credentials");
        Ok(())
    }

    pub fn is_configured(&mut self) -> Result<bool, CredentialError> {
        Ok(self.load()?.is_some())
    }

    /// Stored API config; falls back to the build-time default base URL
    pub fn load_api_config(&mut self) -> Result<ApiConfig, CredentialError> {
        let base = self
            .read_field(config::API_BASE_URL_OFFSET, config::API_BASE_URL_LEN)?
            .unwrap_or_default();
        let message = self
            .read_field(config::API_MESSAGE_ROUTE_OFFSET, config::API_ROUTE_LEN)?
            .unwrap_or_default();
        let health = self
            .read_field(config::API_HEALTH_ROUTE_OFFSET, config::API_ROUTE_LEN)?
            .unwrap_or_default();

        let mut api = ApiConfig::new(&base, &message, &health);
        if !api.is_configured() {
            api = ApiConfig::new(config::AI_BASE_URL, &message, &health);
        }
        info!(
            "[CREDS] API config: base='{}' msg='{}' health='{}'",
            api.base_url(),
            api.message_route(),
            api.health_route()
        );
        Ok(api)
    }

    pub fn save_api_config(&mut self, api: &ApiConfig) -> Result<(), CredentialError> {
        self.write_field(
            config::API_BASE_URL_OFFSET,
            config::API_BASE_URL_LEN,
            api.base_url(),
        )?;
        self.write_field(
            config::API_MESSAGE_ROUTE_OFFSET,
            config::API_ROUTE_LEN,
            api.message_route(),
        )?;
        self.write_field(
            config::API_HEALTH_ROUTE_OFFSET,
            config::API_ROUTE_LEN,
            api.health_route(),
        )?;
        info!("[CREDS] Saved API config");
        Ok(())
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), CredentialError> {
        self.storage
            .read(self.base + offset, bytes)
            .map_err(|_| CredentialError::Storage)
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), CredentialError> {
        self.storage
            .write(self.base + offset, bytes)
            .map_err(|_| CredentialError::Storage)
    }

    /// Zero-terminated text field; `None` when not valid UTF-8
    fn read_field(&mut self, offset: u32, len: usize) -> Result<Option<String>, CredentialError> {
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        // Erased flash reads back as 0xFF
        let end = buf
            .iter()
            .position(|&b| b == 0 || b == 0xFF)
            .unwrap_or(len);
        Ok(core::str::from_utf8(&buf[..end]).ok().map(|s| s.to_string()))
    }

    /// Zero-padded text field; one byte is always kept for the terminator
    fn write_field(&mut self, offset: u32, len: usize, value: &str) -> Result<(), CredentialError> {
        if value.len() >= len {
            return Err(CredentialError::TooLong);
        }
        let mut buf = vec![0u8; len];
        buf[..value.len()].copy_from_slice(value.as_bytes());
        self.write(offset, &buf)
    }
}
