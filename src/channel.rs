//! Newline-delimited command transport over a byte-stream serial link
//!
//! One record is one line terminated by `\n`. Reads are blocking with a
//! timeout; a record that is not complete when the timeout expires is
//! dropped, never carried into the next read.

use crate::clock::Clock;
use crate::{BoardError, config};
use alloc::string::String;
use alloc::vec::Vec;
use embedded_io::{Read, ReadReady, Write};
use log::{debug, warn};

/// Line transport on top of any `embedded-io` serial port.
pub struct CommandChannel<P, C> {
    port: P,
    clock: C,
    max_line: usize,
}

impl<P, C> CommandChannel<P, C>
where
    P: Read + ReadReady + Write,
    C: Clock,
{
    /// Create a channel with the default line length cap
    pub fn new(port: P, clock: C) -> Self {
        Self {
            port,
            clock,
            max_line: config::MAX_LINE_LENGTH,
        }
    }

    /// Override the longest line kept; extra bytes up to `\n` are discarded
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line.max(1);
        self
    }

    /// Discard every byte currently buffered on the port
    pub fn drain(&mut self) -> Result<usize, BoardError> {
        let mut scratch = [0u8; 64];
        let mut dropped = 0;
        while self.has_input()? {
            let n = self
                .port
                .read(&mut scratch)
                .map_err(|_| BoardError::SerialError)?;
            if n == 0 {
                break;
            }
            dropped += n;
        }
        if dropped > 0 {
            debug!("[SERIAL] Drained {} stale bytes", dropped);
        }
        Ok(dropped)
    }

    /// True when at least one byte can be read without blocking
    pub fn has_input(&mut self) -> Result<bool, BoardError> {
        self.port.read_ready().map_err(|_| BoardError::SerialError)
    }

    /// Read one line, waiting at most `timeout_ms` for it to complete.
    ///
    /// Surrounding whitespace (including `\r`) is trimmed and blank lines
    /// are skipped. Returns `Ok(None)` on timeout; bytes of an unfinished
    /// line are lost.
    pub fn read_line(&mut self, timeout_ms: u64) -> Result<Option<String>, BoardError> {
        let started = self.clock.now_ms();
        loop {
            let remaining = timeout_ms.saturating_sub(self.clock.elapsed_ms(started));
            match self.read_raw_line(remaining)? {
                Some(line) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        return Ok(Some(String::from(trimmed)));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    /// Read one line as typed, only dropping a trailing `\r`.
    ///
    /// Blank lines come back as empty strings. Used where leading spaces or
    /// an empty answer carry meaning, such as a password prompt.
    pub fn read_raw_line(&mut self, timeout_ms: u64) -> Result<Option<String>, BoardError> {
        let started = self.clock.now_ms();
        let mut line: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut byte = [0u8; 1];

        loop {
            let n = if self.has_input()? {
                self.port
                    .read(&mut byte)
                    .map_err(|_| BoardError::SerialError)?
            } else {
                0
            };

            if n > 0 {
                if byte[0] == b'\n' {
                    if truncated {
                        warn!(
                            "[SERIAL] Line exceeded {} bytes, tail discarded",
                            self.max_line
                        );
                    }
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                } else if line.len() < self.max_line {
                    line.push(byte[0]);
                } else {
                    truncated = true;
                }
                continue;
            }

            if self.clock.elapsed_ms(started) >= timeout_ms {
                if !line.is_empty() {
                    debug!("[SERIAL] Dropped {} bytes of an incomplete line", line.len());
                }
                return Ok(None);
            }
            self.clock.delay_ms(1);
        }
    }

    /// Write `line` followed by `\n` and flush
    pub fn write_line(&mut self, line: &str) -> Result<(), BoardError> {
        self.port
            .write_all(line.as_bytes())
            .map_err(|_| BoardError::SerialError)?;
        self.port
            .write_all(b"\n")
            .map_err(|_| BoardError::SerialError)?;
        self.port.flush().map_err(|_| BoardError::SerialError)
    }

    /// Drain stale input, send `command` and wait for one reply line
    pub fn request(&mut self, command: &str, timeout_ms: u64) -> Result<Option<String>, BoardError> {
        self.drain()?;
        debug!("[SERIAL] >> {}", command);
        self.write_line(command)?;
        let reply = self.read_line(timeout_ms)?;
        match reply {
            Some(ref line) => debug!("[SERIAL] << {}", line),
            None => debug!("[SERIAL] No reply to {} within {}ms", command, timeout_ms),
        }
        Ok(reply)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn delay_ms(&mut self, ms: u32) {
        self.clock.delay_ms(ms);
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Split the channel back into port and clock
    pub fn into_parts(self) -> (P, C) {
        (self.port, self.clock)
    }
}
