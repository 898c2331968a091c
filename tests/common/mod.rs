//! Host doubles for the serial port, clock, flash and camera sensor.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use camlink_rs::camera::{CameraDriver, CameraError, Frame};
use camlink_rs::channel::CommandChannel;
use camlink_rs::clock::Clock;
use embedded_hal::delay::DelayNs;
use embedded_io::{ErrorKind, ErrorType, Read, ReadReady, Write};
use embedded_storage::{ReadStorage, Storage};

/// Serial port fed from a script.
///
/// Bytes pushed with `push_input` are readable immediately. Replies queued
/// with `reply_with` are released one per line the device writes, so they
/// survive the drain that precedes every request.
#[derive(Default)]
pub struct ScriptedPort {
    input: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    written: Vec<u8>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, text: &str) {
        self.input.extend(text.as_bytes());
    }

    pub fn push_line(&mut self, line: &str) {
        self.push_input(line);
        self.input.push_back(b'\n');
    }

    /// Queue lines released after the next line written by the device
    pub fn reply_with(&mut self, lines: &[&str]) {
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        self.replies.push_back(bytes);
    }

    /// Queue a silent turn: the next written line gets no answer
    pub fn stay_silent(&mut self) {
        self.replies.push_back(Vec::new());
    }

    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.written_text().lines().map(String::from).collect()
    }

    pub fn clear_written(&mut self) {
        self.written.clear();
    }
}

impl ErrorType for ScriptedPort {
    type Error = ErrorKind;
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut n = 0;
        while n < buf.len() {
            match self.input.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl ReadReady for ScriptedPort {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.input.is_empty())
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.extend_from_slice(buf);
        for _ in buf.iter().filter(|b| **b == b'\n') {
            if let Some(reply) = self.replies.pop_front() {
                self.input.extend(reply);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Serial port that releases one line every `gap_ms` of clock time,
/// like a slow sender on the far side of the link.
pub struct PacedPort {
    clock: FakeClock,
    gap_ms: u64,
    next_at_ms: u64,
    lines: VecDeque<Vec<u8>>,
    input: VecDeque<u8>,
}

impl PacedPort {
    pub fn new(clock: &FakeClock, gap_ms: u64, text: &str) -> Self {
        Self {
            clock: clock.clone(),
            gap_ms,
            next_at_ms: clock.now_ms() + gap_ms,
            lines: text
                .lines()
                .map(|line| {
                    let mut bytes = line.as_bytes().to_vec();
                    bytes.push(b'\n');
                    bytes
                })
                .collect(),
            input: VecDeque::new(),
        }
    }
}

impl ErrorType for PacedPort {
    type Error = ErrorKind;
}

impl Read for PacedPort {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut n = 0;
        while n < buf.len() {
            match self.input.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl ReadReady for PacedPort {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        let now = self.clock.now_ms();
        if self.input.is_empty() && now >= self.next_at_ms {
            if let Some(line) = self.lines.pop_front() {
                self.input.extend(line);
                self.next_at_ms = now + self.gap_ms;
            }
        }
        Ok(!self.input.is_empty())
    }
}

impl Write for PacedPort {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Manual clock; every delay advances it. Clones share the same time.
#[derive(Clone, Default)]
pub struct FakeClock {
    now_ns: Rc<Cell<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now_ns.set(self.now_ns.get() + ms * 1_000_000);
    }
}

impl DelayNs for FakeClock {
    fn delay_ns(&mut self, ns: u32) {
        self.now_ns.set(self.now_ns.get() + ns as u64);
    }

    fn delay_us(&mut self, us: u32) {
        self.now_ns.set(self.now_ns.get() + us as u64 * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance(ms as u64);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_ns.get() / 1_000_000
    }
}

/// Erased flash in RAM
pub struct RamStorage {
    bytes: Vec<u8>,
    pub writes: usize,
}

impl RamStorage {
    pub fn new() -> Self {
        Self {
            bytes: vec![0xFF; 0xA000],
            writes: 0,
        }
    }
}

impl ReadStorage for RamStorage {
    type Error = ();

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.bytes.len() {
            return Err(());
        }
        bytes.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for RamStorage {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.bytes.len() {
            return Err(());
        }
        self.bytes[start..end].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}

pub struct FakeFrame {
    pub data: Vec<u8>,
}

impl Frame for FakeFrame {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn width(&self) -> u32 {
        640
    }

    fn height(&self) -> u32 {
        480
    }
}

/// Sensor double that counts driver calls
pub struct FakeCamera {
    pub jpeg: Vec<u8>,
    pub init_failures: u32,
    pub fail_capture: bool,
    pub inits: u32,
    pub deinits: u32,
    pub captures: u32,
    pub releases: u32,
    pub quality: Option<u8>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self::with_jpeg(sample_jpeg(1200))
    }

    pub fn with_jpeg(jpeg: Vec<u8>) -> Self {
        Self {
            jpeg,
            init_failures: 0,
            fail_capture: false,
            inits: 0,
            deinits: 0,
            captures: 0,
            releases: 0,
            quality: None,
        }
    }

    pub fn outstanding_frames(&self) -> u32 {
        self.captures - self.releases
    }
}

impl CameraDriver for FakeCamera {
    type Frame = FakeFrame;

    fn init(&mut self) -> Result<(), CameraError> {
        if self.init_failures > 0 {
            self.init_failures -= 1;
            return Err(CameraError::InitFailed(0x105));
        }
        self.inits += 1;
        Ok(())
    }

    fn deinit(&mut self) {
        self.deinits += 1;
    }

    fn capture(&mut self) -> Result<Self::Frame, CameraError> {
        if self.fail_capture {
            return Err(CameraError::CaptureFailed);
        }
        self.captures += 1;
        Ok(FakeFrame {
            data: self.jpeg.clone(),
        })
    }

    fn release(&mut self, _frame: Self::Frame) {
        self.releases += 1;
    }

    fn set_quality(&mut self, quality: u8) -> Result<(), CameraError> {
        self.quality = Some(quality);
        Ok(())
    }
}

/// JPEG-looking bytes: SOI marker, a counting body, EOI marker
pub fn sample_jpeg(len: usize) -> Vec<u8> {
    let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    if len >= 4 {
        data[0] = 0xFF;
        data[1] = 0xD8;
        data[len - 2] = 0xFF;
        data[len - 1] = 0xD9;
    }
    data
}

pub fn channel(port: ScriptedPort, clock: &FakeClock) -> CommandChannel<ScriptedPort, FakeClock> {
    CommandChannel::new(port, clock.clone())
}
