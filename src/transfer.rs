//! Base64 image transfer framed by sentinel lines
//!
//! ```text
//! {"success":true,"size":L,"width":W,"height":H}
//! BASE64_START
//! <base64 of bytes 0..3000>
//! <base64 of bytes 3000..6000>
//! ...
//! BASE64_END
//! ```
//!
//! Every chunk line encodes a whole number of 3-byte groups except the last,
//! so `=` padding can only appear at the very end and the concatenated
//! lines decode as one stream.

use crate::channel::CommandChannel;
use crate::clock::Clock;
use crate::command;
use crate::reply::{FrameInfo, Reply};
use crate::{BoardError, config};
use alloc::string::String;
use alloc::vec::Vec;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use embedded_io::{Read, ReadReady, Write};
use log::{debug, info, warn};

pub const BASE64_START: &str = "BASE64_START";
pub const BASE64_END: &str = "BASE64_END";

/// Failures when turning received text back into bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Text is not valid standard base64
    InvalidBase64,
    /// Decoded length differs from the announced size
    Incomplete { expected: usize, received: usize },
    /// `BASE64_END` never arrived
    Unterminated,
}

impl From<TransferError> for BoardError {
    fn from(_: TransferError) -> Self {
        BoardError::ProtocolError
    }
}

/// Base64 lines for `data`, one per `chunk_size` raw bytes
pub fn encode_chunks(data: &[u8], chunk_size: usize) -> impl Iterator<Item = String> + '_ {
    // A chunk must be a multiple of 3 for padding to stay at the tail
    let chunk_size = (chunk_size.max(3) / 3) * 3;
    data.chunks(chunk_size).map(|chunk| STANDARD.encode(chunk))
}

/// Write a frame as metadata, settle delay, sentinels and chunk lines.
///
/// The caller keeps ownership of the frame buffer and releases it once this
/// returns, on success and on error alike.
pub fn send_image<P, C>(
    channel: &mut CommandChannel<P, C>,
    data: &[u8],
    width: u32,
    height: u32,
) -> Result<(), BoardError>
where
    P: Read + ReadReady + Write,
    C: Clock,
{
    let info = FrameInfo {
        success: true,
        size: data.len(),
        width,
        height,
    };
    channel.write_line(&Reply::Frame(info).to_line())?;
    channel.delay_ms(config::TRANSFER_SETTLE_MS);

    channel.write_line(BASE64_START)?;
    let mut lines = 0usize;
    for line in encode_chunks(data, config::CHUNK_SIZE) {
        channel.write_line(&line)?;
        lines += 1;
    }
    channel.write_line(BASE64_END)?;

    info!(
        "[XFER] Sent {} bytes ({}x{}) in {} chunk lines",
        data.len(),
        width,
        height,
        lines
    );
    Ok(())
}

/// Base64 text collected between the sentinels
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceivedImage {
    /// Metadata line seen before `BASE64_START`, if any
    pub info: Option<FrameInfo>,
    /// Concatenated chunk lines
    pub base64: String,
    /// True when `BASE64_END` was received
    pub terminated: bool,
    /// Number of chunk lines received
    pub chunks: usize,
}

impl ReceivedImage {
    /// Decode the collected text as one base64 stream
    pub fn decode(&self) -> Result<Vec<u8>, TransferError> {
        STANDARD
            .decode(self.base64.as_bytes())
            .map_err(|_| TransferError::InvalidBase64)
    }

    /// Decode and check the result against the transfer metadata
    pub fn decode_checked(&self) -> Result<Vec<u8>, TransferError> {
        if !self.terminated {
            return Err(TransferError::Unterminated);
        }
        let bytes = self.decode()?;
        if let Some(info) = self.info {
            if info.size != bytes.len() {
                return Err(TransferError::Incomplete {
                    expected: info.size,
                    received: bytes.len(),
                });
            }
        }
        Ok(bytes)
    }

    pub fn is_complete(&self) -> bool {
        self.decode_checked().is_ok()
    }
}

/// Result of waiting for an image transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Nothing arrived within the window
    NoResponse,
    /// A plain reply arrived instead of a transfer
    Immediate(String),
    /// A transfer started; may be partial if the sender stalled
    Image(ReceivedImage),
}

/// Receive one transfer.
///
/// Each received line restarts the `window_ms` inactivity timer. A stall
/// returns whatever was accumulated so far; callers must check
/// `ReceivedImage::is_complete` before using the bytes.
pub fn receive_image<P, C>(
    channel: &mut CommandChannel<P, C>,
    window_ms: u64,
) -> Result<TransferOutcome, BoardError>
where
    P: Read + ReadReady + Write,
    C: Clock,
{
    let mut image = ReceivedImage::default();
    let mut started = false;

    loop {
        let line = match channel.read_line(window_ms)? {
            Some(line) => line,
            None => {
                if started {
                    warn!(
                        "[XFER] Transfer stalled after {} chunks ({} chars)",
                        image.chunks,
                        image.base64.len()
                    );
                    return Ok(TransferOutcome::Image(image));
                }
                if image.info.is_some() {
                    warn!("[XFER] Metadata received but transfer never started");
                    return Ok(TransferOutcome::Image(image));
                }
                return Ok(TransferOutcome::NoResponse);
            }
        };

        if started {
            if line == BASE64_END {
                image.terminated = true;
                debug!(
                    "[XFER] Transfer complete: {} chunks, {} chars",
                    image.chunks,
                    image.base64.len()
                );
                return Ok(TransferOutcome::Image(image));
            }
            image.base64.push_str(&line);
            image.chunks += 1;
        } else if line == BASE64_START {
            started = true;
        } else if command::is_unsolicited(&line) {
            debug!("[XFER] Skipping unsolicited line: {}", line);
        } else if image.info.is_none() {
            match FrameInfo::from_line(&line) {
                Some(info) => image.info = Some(info),
                None => return Ok(TransferOutcome::Immediate(line)),
            }
        } else {
            return Ok(TransferOutcome::Immediate(line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn concatenated_chunks_decode_to_input() {
        for len in [0usize, 1, 2, 3000, 3001, 8999] {
            let data = pattern(len);
            let joined: String = encode_chunks(&data, config::CHUNK_SIZE).collect();
            assert_eq!(STANDARD.decode(joined).unwrap(), data, "length {}", len);
        }
    }

    #[test]
    fn padding_only_in_final_chunk() {
        let data = pattern(8999);
        let lines: Vec<String> = encode_chunks(&data, config::CHUNK_SIZE).collect();
        assert_eq!(lines.len(), 3);
        for line in &lines[..lines.len() - 1] {
            assert_eq!(line.len(), 4000);
            assert!(!line.contains('='));
        }
        assert!(lines[2].ends_with('='));
    }

    #[test]
    fn empty_frame_has_no_chunk_lines() {
        assert_eq!(encode_chunks(&[], config::CHUNK_SIZE).count(), 0);
    }

    #[test]
    fn odd_chunk_size_is_rounded_to_whole_groups() {
        let data = pattern(10);
        let joined: String = encode_chunks(&data, 4).collect();
        assert_eq!(STANDARD.decode(joined).unwrap(), data);
    }

    #[test]
    fn checked_decode_compares_announced_size() {
        let image = ReceivedImage {
            info: Some(FrameInfo {
                success: true,
                size: 4,
                width: 1,
                height: 1,
            }),
            base64: STANDARD.encode([1u8, 2, 3]),
            terminated: true,
            chunks: 1,
        };
        assert_eq!(
            image.decode_checked(),
            Err(TransferError::Incomplete {
                expected: 4,
                received: 3
            })
        );
        assert!(!image.is_complete());
    }
}
