//! Single-pixel status LED
//!
//! Rendered one frame at a time: the caller calls [`StatusLed::update`]
//! every `LED_FRAME_MS`. Camera availability breathes green or orange,
//! status changes and web clients are shown as short flash overlays.

use crate::BoardError;
use crate::config;
use crate::proxy::StatusObserver;
use log::debug;
use smart_leds::{RGB8, SmartLedsWrite, brightness};

/// Global brightness applied on write
pub const LED_LEVEL: u8 = 100;

const BREATHING_STEP: u32 = 2;
const CHANGE_FLASH_FRAMES: u32 = (200 / config::LED_FRAME_MS) as u32;
const CLIENT_FLASH_FRAMES: u32 = (100 / config::LED_FRAME_MS) as u32;
const FLASH_COUNT: u32 = 3;

const OFF: RGB8 = RGB8 { r: 0, g: 0, b: 0 };
const RED: RGB8 = RGB8 { r: 255, g: 0, b: 0 };
const GREEN: RGB8 = RGB8 { r: 0, g: 255, b: 0 };
const WHITE: RGB8 = RGB8 {
    r: 255,
    g: 255,
    b: 255,
};

/// Base pattern shown when no flash is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedStatus {
    Starting,
    AwaitingCredentials,
    WiFiConnecting,
    NetworkReady,
    CameraAvailable,
    CameraUnavailable,
    WiFiError,
    Restarting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flash {
    color: RGB8,
    phase_frames: u32,
    elapsed: u32,
}

impl Flash {
    fn new(color: RGB8, phase_frames: u32) -> Self {
        Self {
            color,
            phase_frames: phase_frames.max(1),
            elapsed: 0,
        }
    }

    fn total_frames(&self) -> u32 {
        self.phase_frames * 2 * FLASH_COUNT
    }

    fn color(&self) -> RGB8 {
        if (self.elapsed / self.phase_frames) % 2 == 0 {
            self.color
        } else {
            OFF
        }
    }
}

pub struct StatusLed<W> {
    writer: W,
    status: LedStatus,
    status_counter: u32,
    breathing_counter: u32,
    flash: Option<Flash>,
    last: Option<RGB8>,
}

impl<W> StatusLed<W>
where
    W: SmartLedsWrite<Color = RGB8>,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            status: LedStatus::Starting,
            status_counter: 0,
            breathing_counter: 0,
            flash: None,
            last: None,
        }
    }

    pub fn set_status(&mut self, status: LedStatus) {
        if self.status != status {
            debug!("[LED] {:?} -> {:?}", self.status, status);
            self.status = status;
            self.status_counter = 0;
        }
    }

    pub fn status(&self) -> LedStatus {
        self.status
    }

    /// Three green or red flashes on a change, then the matching breathing
    pub fn camera_status(&mut self, connected: bool, changed: bool) {
        self.set_status(if connected {
            LedStatus::CameraAvailable
        } else {
            LedStatus::CameraUnavailable
        });
        if changed {
            let color = if connected { GREEN } else { RED };
            self.flash = Some(Flash::new(color, CHANGE_FLASH_FRAMES));
        }
    }

    /// Three short white flashes for a web client
    pub fn client_connected(&mut self) {
        self.flash = Some(Flash::new(WHITE, CLIENT_FLASH_FRAMES));
    }

    pub fn is_flashing(&self) -> bool {
        self.flash.is_some()
    }

    /// Colour of the current frame before global brightness
    pub fn frame_color(&self) -> RGB8 {
        if let Some(flash) = self.flash {
            return flash.color();
        }
        let breath = breathing_level(self.breathing_counter);
        match self.status {
            LedStatus::Starting => blink(self.status_counter, 4, RGB8::new(0, 0, 255)),
            LedStatus::AwaitingCredentials => RGB8::new(0, 0, breath),
            LedStatus::WiFiConnecting => blink(self.status_counter, 2, RGB8::new(255, 255, 0)),
            LedStatus::NetworkReady => GREEN,
            LedStatus::CameraAvailable => RGB8::new(0, breath, 0),
            LedStatus::CameraUnavailable => RGB8::new(breath, breath / 2, 0),
            LedStatus::WiFiError => RED,
            LedStatus::Restarting => OFF,
        }
    }

    /// Render one frame and advance the counters
    pub fn update(&mut self) -> Result<RGB8, BoardError> {
        let color = self.frame_color();
        if self.last != Some(color) {
            self.writer
                .write(brightness(core::iter::once(color), LED_LEVEL))
                .map_err(|_| BoardError::LedError)?;
            self.last = Some(color);
        }

        self.status_counter = self.status_counter.wrapping_add(1);
        self.breathing_counter = self.breathing_counter.wrapping_add(1);
        if let Some(flash) = self.flash.as_mut() {
            flash.elapsed += 1;
            if flash.elapsed >= flash.total_frames() {
                self.flash = None;
            }
        }
        Ok(color)
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}

impl<W> StatusObserver for StatusLed<W>
where
    W: SmartLedsWrite<Color = RGB8>,
{
    fn on_status_changed(&mut self, connected: bool, changed: bool) {
        self.camera_status(connected, changed);
    }
}

fn blink(counter: u32, frames: u32, color: RGB8) -> RGB8 {
    if (counter / frames) % 2 == 0 { color } else { OFF }
}

/// Triangle wave 0..=max in steps of 2
fn breathing_level(counter: u32) -> u8 {
    let max = config::LED_BREATHING_MAX as u32;
    let half = max / BREATHING_STEP;
    let cycle = counter % (half * 2);
    let level = if cycle < half {
        cycle * BREATHING_STEP
    } else {
        max - (cycle - half) * BREATHING_STEP
    };
    level as u8
}

#[cfg(feature = "esp32s3")]
pub use self::task::*;

#[cfg(feature = "esp32s3")]
mod task {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::{Channel, Receiver, Sender};
    use embassy_time::{Duration, Ticker};
    use static_cell::StaticCell;

    /// Requests sent to the LED task
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LedCommand {
        Status(LedStatus),
        Camera { connected: bool, changed: bool },
        Client,
    }

    pub type LedSender = Sender<'static, CriticalSectionRawMutex, LedCommand, 8>;
    pub type LedReceiver = Receiver<'static, CriticalSectionRawMutex, LedCommand, 8>;

    static LED_CHANNEL: StaticCell<Channel<CriticalSectionRawMutex, LedCommand, 8>> =
        StaticCell::new();

    pub fn init_led_channel() -> (LedSender, LedReceiver) {
        let channel = LED_CHANNEL.init(Channel::new());
        (channel.sender(), channel.receiver())
    }

    /// Forwards camera availability to the LED task
    #[derive(Clone, Copy)]
    pub struct LedObserver(pub LedSender);

    impl StatusObserver for LedObserver {
        fn on_status_changed(&mut self, connected: bool, changed: bool) {
            // A full queue only drops one visual update
            let _ = self.0.try_send(LedCommand::Camera { connected, changed });
        }
    }

    /// Drain pending commands and render one frame per tick
    pub async fn run_led<W>(mut led: StatusLed<W>, receiver: LedReceiver) -> !
    where
        W: SmartLedsWrite<Color = RGB8>,
    {
        let mut ticker = Ticker::every(Duration::from_millis(config::LED_FRAME_MS));
        log::info!("[LED] LED task started");
        loop {
            while let Ok(command) = receiver.try_receive() {
                match command {
                    LedCommand::Status(status) => led.set_status(status),
                    LedCommand::Camera { connected, changed } => {
                        led.camera_status(connected, changed)
                    }
                    LedCommand::Client => led.client_connected(),
                }
            }
            if let Err(e) = led.update() {
                log::warn!("[LED] {}", e);
            }
            ticker.next().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder(Vec<RGB8>);

    impl SmartLedsWrite for Recorder {
        type Error = ();
        type Color = RGB8;

        fn write<T, I>(&mut self, iterator: T) -> Result<(), Self::Error>
        where
            T: IntoIterator<Item = I>,
            I: Into<Self::Color>,
        {
            self.0.extend(iterator.into_iter().map(Into::into));
            Ok(())
        }
    }

    #[test]
    fn breathing_is_a_triangle() {
        assert_eq!(breathing_level(0), 0);
        assert_eq!(breathing_level(1), 2);
        assert_eq!(breathing_level(25), 50);
        assert_eq!(breathing_level(26), 48);
        assert_eq!(breathing_level(50), 0);
    }

    #[test]
    fn orange_breathing_without_camera() {
        let mut led = StatusLed::new(Recorder::default());
        led.camera_status(false, false);
        for _ in 0..10 {
            led.update().unwrap();
        }
        assert_eq!(led.frame_color(), RGB8::new(20, 10, 0));
    }

    #[test]
    fn change_flashes_three_times_then_breathes() {
        let mut led = StatusLed::new(Recorder::default());
        led.camera_status(true, true);
        let frames: Vec<RGB8> = (0..CHANGE_FLASH_FRAMES * 6)
            .map(|_| led.update().unwrap())
            .collect();
        let on = frames.iter().filter(|c| **c == GREEN).count() as u32;
        assert_eq!(on, CHANGE_FLASH_FRAMES * 3);
        assert!(!led.is_flashing());
        assert_eq!(led.status(), LedStatus::CameraAvailable);
        assert_ne!(led.frame_color(), GREEN);
    }

    #[test]
    fn client_flash_is_white_and_writes_only_changes() {
        let mut led = StatusLed::new(Recorder::default());
        led.set_status(LedStatus::WiFiError);
        led.update().unwrap();
        led.update().unwrap();
        assert_eq!(led.writer_mut().0.len(), 1);

        led.client_connected();
        assert_eq!(led.update().unwrap(), WHITE);
        assert!(led.is_flashing());
    }

    #[test]
    fn observer_updates_status() {
        let mut led = StatusLed::new(Recorder::default());
        StatusObserver::on_status_changed(&mut led, false, true);
        assert_eq!(led.status(), LedStatus::CameraUnavailable);
        assert_eq!(led.frame_color(), RED);
    }
}
