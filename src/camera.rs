//! Camera power state and frame ownership
//!
//! The sensor driver sits behind `CameraDriver`. Frames come back wrapped in
//! a `FrameGuard` that hands the buffer back to the driver when dropped, so
//! every exit path of a capture releases it.

use crate::clock::Clock;
use crate::{BoardError, config};
use core::fmt;
use core::ops::Deref;
use log::{info, warn};

/// Camera driver failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraError {
    /// Driver never initialized, or the last init failed
    NotInitialized,
    /// Camera cannot serve the request in its current state
    NotReady,
    /// Driver init returned an error code
    InitFailed(i32),
    /// No frame buffer was produced
    CaptureFailed,
    /// Sensor handle unavailable for settings
    SensorUnavailable,
    /// Quality outside 0-63
    InvalidQuality(i32),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::NotInitialized => f.write_str("Camera not initialized"),
            CameraError::NotReady => f.write_str("Camera not ready"),
            CameraError::InitFailed(code) => write!(f, "Camera init failed: 0x{:x}", code),
            CameraError::CaptureFailed => f.write_str("Capture failed"),
            CameraError::SensorUnavailable => f.write_str("Failed to get sensor"),
            CameraError::InvalidQuality(_) => write!(
                f,
                "Invalid quality range ({}-{})",
                config::QUALITY_MIN,
                config::QUALITY_MAX
            ),
        }
    }
}

impl From<CameraError> for BoardError {
    fn from(_: CameraError) -> Self {
        BoardError::CameraError
    }
}

/// One captured JPEG frame
pub trait Frame {
    fn data(&self) -> &[u8];
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// Sensor driver as seen by the controller
pub trait CameraDriver {
    type Frame: Frame;

    /// Power up the sensor and allocate frame buffers
    fn init(&mut self) -> Result<(), CameraError>;

    /// Release hardware resources
    fn deinit(&mut self);

    /// Take one frame; the caller must hand it back through `release`
    fn capture(&mut self) -> Result<Self::Frame, CameraError>;

    /// Return a frame buffer to the driver
    fn release(&mut self, frame: Self::Frame);

    /// Apply JPEG quality, already range checked
    fn set_quality(&mut self, quality: u8) -> Result<(), CameraError>;
}

/// Scoped owner of a frame buffer
pub struct FrameGuard<'a, D: CameraDriver> {
    driver: &'a mut D,
    frame: Option<D::Frame>,
}

impl<'a, D: CameraDriver> FrameGuard<'a, D> {
    fn new(driver: &'a mut D, frame: D::Frame) -> Self {
        Self {
            driver,
            frame: Some(frame),
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}

impl<D: CameraDriver> Deref for FrameGuard<'_, D> {
    type Target = D::Frame;

    fn deref(&self) -> &Self::Target {
        // Only `drop` empties the slot
        match self.frame.as_ref() {
            Some(frame) => frame,
            None => unreachable!("frame taken before drop"),
        }
    }
}

impl<D: CameraDriver> Drop for FrameGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.driver.release(frame);
        }
    }
}

/// Camera power state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Active,
    Sleeping,
}

/// Owns the driver and enforces the Active/Sleeping rules
pub struct CameraController<D> {
    driver: D,
    initialized: bool,
    power: PowerState,
    last_activity_ms: u64,
    idle_timeout_ms: u64,
    quality: u8,
    wake_count: u32,
}

impl<D: CameraDriver> CameraController<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            initialized: false,
            power: PowerState::Active,
            last_activity_ms: 0,
            idle_timeout_ms: config::IDLE_TIMEOUT_MS,
            quality: config::DEFAULT_QUALITY,
            wake_count: 0,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout_ms: u64) -> Self {
        self.idle_timeout_ms = idle_timeout_ms;
        self
    }

    /// Initialize (or re-initialize) the driver and mark the camera Active
    pub fn init(&mut self, now_ms: u64) -> Result<(), CameraError> {
        if let Err(e) = self.driver.init() {
            warn!("[CAMERA] Init failed: {}", e);
            self.initialized = false;
            return Err(e);
        }
        self.initialized = true;
        self.power = PowerState::Active;
        self.last_activity_ms = now_ms;
        if let Err(e) = self.driver.set_quality(self.quality) {
            warn!("[CAMERA] Could not restore quality {}: {}", self.quality, e);
        }
        info!("[CAMERA] Initialized");
        Ok(())
    }

    /// Boot-time init with a fixed number of retries
    pub fn init_with_retries<C: Clock>(
        &mut self,
        clock: &mut C,
        retries: u32,
        retry_delay_ms: u32,
    ) -> Result<(), CameraError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.init(clock.now_ms()) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= retries => return Err(e),
                Err(_) => {
                    info!("[CAMERA] Retrying init ({}/{})", attempt, retries);
                    clock.delay_ms(retry_delay_ms);
                }
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn power_state(&self) -> PowerState {
        self.power
    }

    pub fn is_sleeping(&self) -> bool {
        self.power == PowerState::Sleeping
    }

    /// Initialized and not sleeping
    pub fn is_ready(&self) -> bool {
        self.initialized && self.power == PowerState::Active
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Number of Sleeping to Active transitions so far
    pub fn wake_count(&self) -> u32 {
        self.wake_count
    }

    /// Record camera activity for the idle timer
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    /// Release the driver. Returns true if the camera was Active.
    pub fn sleep(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.driver.deinit();
        self.power = PowerState::Sleeping;
        info!("[CAMERA] Entered sleep mode");
        true
    }

    /// Power the driver back up after a sleep, then wait the settle delay.
    /// Returns true if a transition happened.
    pub fn wake<C: Clock>(&mut self, clock: &mut C) -> Result<bool, CameraError> {
        if !self.initialized {
            return Err(CameraError::NotInitialized);
        }
        if self.power == PowerState::Active {
            return Ok(false);
        }
        self.driver.init()?;
        if let Err(e) = self.driver.set_quality(self.quality) {
            warn!("[CAMERA] Could not restore quality {}: {}", self.quality, e);
        }
        self.power = PowerState::Active;
        self.wake_count += 1;
        clock.delay_ms(config::WAKE_SETTLE_MS);
        self.last_activity_ms = clock.now_ms();
        info!("[CAMERA] Woke up from sleep");
        Ok(true)
    }

    /// Wake if sleeping, otherwise tear down and re-initialize the driver
    pub fn reinit<C: Clock>(&mut self, clock: &mut C) -> Result<(), CameraError> {
        if self.initialized && self.is_sleeping() {
            return self.wake(clock).map(|_| ());
        }
        if self.initialized {
            self.driver.deinit();
            self.initialized = false;
        }
        self.init(clock.now_ms())
    }

    /// Put the camera to sleep once the idle timeout has passed.
    /// Returns true on the Active to Sleeping transition.
    pub fn check_idle(&mut self, now_ms: u64) -> bool {
        if self.is_ready() && now_ms.saturating_sub(self.last_activity_ms) >= self.idle_timeout_ms {
            info!(
                "[CAMERA] Idle for {}ms, sleeping",
                now_ms.saturating_sub(self.last_activity_ms)
            );
            return self.sleep();
        }
        false
    }

    /// Capture one frame, waking the camera first if it is sleeping
    pub fn capture<C: Clock>(&mut self, clock: &mut C) -> Result<FrameGuard<'_, D>, CameraError> {
        if !self.initialized {
            return Err(CameraError::NotInitialized);
        }
        if self.is_sleeping() {
            self.wake(clock)?;
        }
        self.last_activity_ms = clock.now_ms();
        let frame = self.driver.capture()?;
        Ok(FrameGuard::new(&mut self.driver, frame))
    }

    /// Validate and apply a JPEG quality value
    pub fn set_quality(&mut self, value: i32, now_ms: u64) -> Result<u8, CameraError> {
        if !self.is_ready() {
            return Err(CameraError::NotReady);
        }
        let quality =
            crate::command::quality_in_range(value).ok_or(CameraError::InvalidQuality(value))?;
        self.driver.set_quality(quality)?;
        self.quality = quality;
        self.last_activity_ms = now_ms;
        info!("[CAMERA] Quality set to {}", quality);
        Ok(quality)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
