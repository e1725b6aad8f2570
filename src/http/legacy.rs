//! Legacy WebSocket adapter (hixie draft-75 and draft-76).
//!
//! Old clients upgrade without `Sec-WebSocket-Version`. Draft-76 clients
//! send two keys in headers and eight key bytes after the header block;
//! the server answers the 101 with a 16-byte MD5 challenge response as the
//! first bytes of the upgraded stream.
//!
//! # Framing
//! ```text
//! text   0x00 <utf-8 bytes> 0xFF
//! binary 0x80..=0xFF <7-bit length groups> <bytes>   (skipped)
//! close  0xFF 0x00
//! ```

use axum::http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};

use crate::net::connection::{FrameError, FrameReader, FrameWriter};

const TEXT_START: u8 = 0x00;
const TEXT_END: u8 = 0xFF;
const CLOSE_FRAME: [u8; 2] = [0xFF, 0x00];

const KEY1: &str = "sec-websocket-key1";
const KEY2: &str = "sec-websocket-key2";

/// Which legacy handshake the client spoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Draft {
    Hixie75,
    Hixie76 { key1: u32, key2: u32 },
}

/// Why a legacy upgrade request cannot be answered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("{0} is not a valid draft-76 key")]
    InvalidKey(&'static str),
    #[error("missing Host header")]
    MissingHost,
}

/// Value encoded by a draft-76 key: its digits divided by its space count.
pub fn key_number(key: &str) -> Option<u32> {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    let spaces = key.chars().filter(|c| *c == ' ').count() as u64;
    let number: u64 = digits.parse().ok()?;
    if spaces == 0 || number % spaces != 0 {
        return None;
    }
    u32::try_from(number / spaces).ok()
}

/// MD5 over both key numbers (big-endian) and the eight trailing key bytes.
pub fn challenge_response(key1: u32, key2: u32, key3: &[u8; 8]) -> [u8; 16] {
    let mut challenge = [0u8; 16];
    challenge[..4].copy_from_slice(&key1.to_be_bytes());
    challenge[4..8].copy_from_slice(&key2.to_be_bytes());
    challenge[8..].copy_from_slice(key3);
    md5::compute(challenge).0
}

/// Identify the draft from the upgrade request headers.
pub fn detect_draft(headers: &HeaderMap) -> Result<Draft, HandshakeError> {
    let key = |name: &'static str| -> Result<Option<u32>, HandshakeError> {
        match headers.get(name) {
            None => Ok(None),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(key_number)
                .map(Some)
                .ok_or(HandshakeError::InvalidKey(name)),
        }
    };
    match (key(KEY1)?, key(KEY2)?) {
        (Some(key1), Some(key2)) => Ok(Draft::Hixie76 { key1, key2 }),
        (None, None) => Ok(Draft::Hixie75),
        (None, Some(_)) => Err(HandshakeError::InvalidKey(KEY1)),
        (Some(_), None) => Err(HandshakeError::InvalidKey(KEY2)),
    }
}

/// The 101 response for an accepted legacy upgrade.
pub fn handshake_response(parts: &Parts, draft: Draft) -> Result<Response, HandshakeError> {
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .ok_or(HandshakeError::MissingHost)?;
    let resource = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let location = format!("ws://{host}{resource}");
    let origin = parts.headers.get(header::ORIGIN).cloned();

    let (origin_name, location_name) = match draft {
        Draft::Hixie75 => ("websocket-origin", "websocket-location"),
        Draft::Hixie76 { .. } => ("sec-websocket-origin", "sec-websocket-location"),
    };

    let mut response = StatusCode::SWITCHING_PROTOCOLS.into_response();
    let headers = response.headers_mut();
    headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Some(origin) = origin {
        headers.insert(origin_name, origin);
    }
    if let Ok(location) = HeaderValue::from_str(&location) {
        headers.insert(location_name, location);
    }
    if let Some(protocol) = parts.headers.get("sec-websocket-protocol").cloned() {
        headers.insert("sec-websocket-protocol", protocol);
    }
    Ok(response)
}

/// Raw rejection for a legacy client: status line, no upgrade, socket closed.
pub fn reject(status: StatusCode) -> Response {
    let body = match status {
        StatusCode::FORBIDDEN => "403 Forbidden".to_string(),
        other => other.to_string(),
    };
    (status, [(header::CONNECTION, "close")], body).into_response()
}

/// Finish the handshake on the upgraded stream and split it into frame halves.
pub async fn open<S>(
    io: S,
    draft: Draft,
    max_message_size: usize,
) -> Result<(LegacyReader<S>, LegacyWriter<S>), FrameError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, mut write) = tokio::io::split(io);
    let mut read = BufReader::new(read);

    if let Draft::Hixie76 { key1, key2 } = draft {
        let mut key3 = [0u8; 8];
        read.read_exact(&mut key3).await?;
        write
            .write_all(&challenge_response(key1, key2, &key3))
            .await?;
        write.flush().await?;
    }

    Ok((
        LegacyReader {
            inner: read,
            max_message_size,
        },
        LegacyWriter { inner: write },
    ))
}

pub struct LegacyReader<S> {
    inner: BufReader<ReadHalf<S>>,
    max_message_size: usize,
}

impl<S: AsyncRead + Send> LegacyReader<S> {
    async fn read_frame(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            let frame_type = match self.inner.read_u8().await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            if frame_type & 0x80 == 0 {
                if frame_type != TEXT_START {
                    return Err(FrameError::Protocol(format!("unknown frame type {frame_type:#04x}")));
                }
                return self.read_text().await.map(Some);
            }

            let length = self.read_length().await?;
            if frame_type == 0xFF && length == 0 {
                return Ok(None);
            }
            let skipped = tokio::io::copy(&mut (&mut self.inner).take(length), &mut tokio::io::sink()).await?;
            if skipped < length {
                return Ok(None);
            }
        }
    }

    async fn read_text(&mut self) -> Result<String, FrameError> {
        let limit = self.max_message_size;
        let mut buf = Vec::new();
        (&mut self.inner)
            .take(limit as u64 + 1)
            .read_until(TEXT_END, &mut buf)
            .await?;

        if buf.last() != Some(&TEXT_END) {
            return Err(if buf.len() > limit {
                FrameError::TooLarge { limit }
            } else {
                FrameError::Protocol("stream ended inside a text frame".into())
            });
        }
        buf.pop();
        String::from_utf8(buf).map_err(|_| FrameError::Protocol("text frame is not UTF-8".into()))
    }

    async fn read_length(&mut self) -> Result<u64, FrameError> {
        let mut length: u64 = 0;
        loop {
            let b = self.inner.read_u8().await?;
            length = length
                .checked_mul(128)
                .and_then(|l| l.checked_add(u64::from(b & 0x7F)))
                .ok_or_else(|| FrameError::Protocol("frame length overflow".into()))?;
            if b & 0x80 == 0 {
                return Ok(length);
            }
        }
    }
}

#[async_trait]
impl<S: AsyncRead + Send> FrameReader for LegacyReader<S> {
    async fn next_text(&mut self) -> Option<Result<String, FrameError>> {
        self.read_frame().await.transpose()
    }
}

pub struct LegacyWriter<S> {
    inner: WriteHalf<S>,
}

#[async_trait]
impl<S: AsyncWrite + Send> FrameWriter for LegacyWriter<S> {
    async fn send_text(&mut self, text: String) -> Result<(), FrameError> {
        let mut frame = Vec::with_capacity(text.len() + 2);
        frame.push(TEXT_START);
        frame.extend_from_slice(text.as_bytes());
        frame.push(TEXT_END);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FrameError> {
        self.inner.write_all(&CLOSE_FRAME).await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}
