//! `tokio_util` codec for STOMP 1.2 frames.
//!
//! Decoding skips heartbeat EOLs between frames, honours `content-length`
//! (bodies may then contain NUL bytes) and otherwise reads the body up to
//! the terminating NUL.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StompError;
use crate::frame::{escape, header, unescape, Command, Frame};

/// Default upper bound on a single frame (headers + body).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StompCodec {
    max_frame_bytes: usize,
}

impl StompCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    fn check_size(&self, len: usize) -> Result<(), StompError> {
        if len > self.max_frame_bytes {
            return Err(StompError::FrameTooLarge(self.max_frame_bytes));
        }
        Ok(())
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Locate the blank line ending the header block. Returns the length of
/// the header block and the offset where the body starts.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    for (i, b) in buf.iter().enumerate() {
        if *b != b'\n' {
            continue;
        }
        match &buf[i + 1..] {
            [b'\n', ..] => return Some((i, i + 2)),
            [b'\r', b'\n', ..] => return Some((i, i + 3)),
            _ => {}
        }
    }
    None
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = StompError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StompError> {
        // heartbeats
        loop {
            if src.starts_with(b"\r\n") {
                src.advance(2);
            } else if src.first() == Some(&b'\n') {
                src.advance(1);
            } else {
                break;
            }
        }
        if src.is_empty() || src[..] == b"\r"[..] {
            return Ok(None);
        }

        let Some((head_len, body_start)) = find_header_end(src) else {
            self.check_size(src.len())?;
            return Ok(None);
        };

        let head = std::str::from_utf8(&src[..head_len])
            .map_err(|_| StompError::Protocol("frame header is not UTF-8".into()))?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command: Command = lines.next().unwrap_or_default().parse()?;
        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::Protocol(format!("malformed header line {line:?}")))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_owned(), value.to_owned()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == header::CONTENT_LENGTH)
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| StompError::Protocol(format!("invalid content-length {v:?}")))
            })
            .transpose()?;

        let (body_len, frame_len) = match content_length {
            Some(len) => {
                let frame_len = body_start + len + 1;
                self.check_size(frame_len)?;
                if src.len() < frame_len {
                    src.reserve(frame_len - src.len());
                    return Ok(None);
                }
                if src[body_start + len] != 0 {
                    return Err(StompError::Protocol(
                        "body not terminated by NUL after content-length bytes".into(),
                    ));
                }
                (len, frame_len)
            }
            None => match src[body_start..].iter().position(|b| *b == 0) {
                Some(pos) => (pos, body_start + pos + 1),
                None => {
                    self.check_size(src.len())?;
                    return Ok(None);
                }
            },
        };

        let mut raw = src.split_to(frame_len);
        raw.advance(body_start);
        let body = raw.split_to(body_len).freeze();

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = StompError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), StompError> {
        let escapes = frame.command.escapes_headers();

        dst.put_slice(frame.command.as_str().as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &frame.headers {
            if escapes {
                dst.put_slice(escape(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        if !frame.body.is_empty() && frame.header(header::CONTENT_LENGTH).is_none() {
            dst.put_slice(format!("{}:{}\n", header::CONTENT_LENGTH, frame.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}
