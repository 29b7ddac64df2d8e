// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Length-prefixed text framing.
//!
//! Wire format: `[u32 big-endian payload length][payload]`, payload is UTF-8.
//! No padding, no terminator, no version byte. A zero-length payload is a
//! valid (empty) message.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::error::{BtError, Result};
use super::transport::{BoxedReader, BoxedWriter, CloseHandle, Transport, TransportGuard};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound on a single payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Encoder/decoder for one frame at a time.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Encode a message into a single frame.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let payload = text.as_bytes();
        let len = self.checked_len(payload.len())?;

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns the message and the number of bytes consumed. A buffer that
    /// ends before the frame does is reported as `RemoteClosed`.
    pub fn decode(&self, buf: &[u8]) -> Result<(String, usize)> {
        if buf.len() < LENGTH_PREFIX_LEN {
            return Err(BtError::RemoteClosed);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&buf[..LENGTH_PREFIX_LEN]);
        let len = self.declared_len(prefix)?;

        let end = LENGTH_PREFIX_LEN + len;
        if buf.len() < end {
            return Err(BtError::RemoteClosed);
        }

        let text = Self::utf8(buf[LENGTH_PREFIX_LEN..end].to_vec())?;
        Ok((text, end))
    }

    /// Write one frame and flush.
    pub async fn write_frame<W>(&self, writer: &mut W, text: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let frame = self.encode(text)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        debug!("Sent frame: {} payload bytes", frame.len() - LENGTH_PREFIX_LEN);
        Ok(())
    }

    /// Read exactly one frame.
    ///
    /// A short read on either the prefix or the payload means the peer went
    /// away and is reported as `RemoteClosed`, never as a partial message.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<String>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        reader.read_exact(&mut prefix).await?;
        let len = self.declared_len(prefix)?;

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;
        debug!("Received frame: {} payload bytes", len);

        Self::utf8(payload)
    }

    fn checked_len(&self, len: usize) -> Result<u32> {
        if len > self.max_frame_bytes {
            return Err(BtError::InvalidArgument(format!(
                "message is {} bytes (max {})",
                len, self.max_frame_bytes
            )));
        }
        u32::try_from(len).map_err(|_| {
            BtError::InvalidArgument(format!("message is {} bytes, exceeds u32 length", len))
        })
    }

    fn declared_len(&self, prefix: [u8; LENGTH_PREFIX_LEN]) -> Result<usize> {
        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_bytes {
            warn!(
                "Malformed frame: declared {} bytes (max {})",
                len, self.max_frame_bytes
            );
            return Err(BtError::RemoteClosed);
        }
        Ok(len)
    }

    fn utf8(payload: Vec<u8>) -> Result<String> {
        String::from_utf8(payload).map_err(|e| {
            warn!("Malformed frame: payload is not UTF-8: {}", e);
            BtError::RemoteClosed
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Read direction of a framed transport. Owned by exactly one read loop.
pub struct FrameReader {
    reader: BoxedReader,
    codec: FrameCodec,
    close: CloseHandle,
}

impl FrameReader {
    /// Next message, or `RemoteClosed` once the transport is closed.
    pub async fn next_message(&mut self) -> Result<String> {
        if self.close.is_closed() {
            return Err(BtError::RemoteClosed);
        }

        tokio::select! {
            biased;
            _ = self.close.closed() => Err(BtError::RemoteClosed),
            result = self.codec.read_frame(&mut self.reader) => result,
        }
    }

    /// Resolves once the transport has been closed locally.
    pub async fn closed(&mut self) {
        self.close.closed().await
    }
}

/// Write direction of a framed transport.
pub struct FrameWriter {
    writer: BoxedWriter,
    codec: FrameCodec,
    close: CloseHandle,
    _guard: Option<TransportGuard>,
}

impl FrameWriter {
    /// Write one message frame and flush.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        if self.close.is_closed() {
            return Err(BtError::NotConnected);
        }

        tokio::select! {
            biased;
            _ = self.close.closed() => Err(BtError::NotConnected),
            result = self.codec.write_frame(&mut self.writer, text) => result,
        }
    }

    /// Shut down the write direction.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Bind a codec to a transport, splitting it into its two directions.
pub fn frame(transport: Transport, codec: FrameCodec) -> (FrameReader, FrameWriter, CloseHandle) {
    let (_peer, reader, writer, close, guard) = transport.into_parts();

    let reader = FrameReader {
        reader,
        codec,
        close: close.clone(),
    };
    let writer = FrameWriter {
        writer,
        codec,
        close: close.clone(),
        _guard: guard,
    };
    (reader, writer, close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::device::DeviceAddress;
    use std::time::Duration;

    #[test]
    fn test_encode_layout() {
        let frame = FrameCodec::default().encode("hello").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_length_counts_bytes_not_chars() {
        let codec = FrameCodec::default();
        let text = "grüße 👋";
        let frame = codec.encode(text).unwrap();

        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(declared, text.len());
        assert_ne!(declared, text.chars().count());

        let (decoded, consumed) = codec.decode(&frame).unwrap();
        assert_eq!(decoded, text);
        assert_eq!(consumed, 4 + text.len());
    }

    #[test]
    fn test_empty_message_is_valid_frame() {
        let codec = FrameCodec::default();
        let frame = codec.encode("").unwrap();
        assert_eq!(frame, vec![0, 0, 0, 0]);
        assert_eq!(codec.decode(&frame).unwrap(), (String::new(), 4));
    }

    #[test]
    fn test_decode_consumes_only_first_frame() {
        let codec = FrameCodec::default();
        let mut buf = codec.encode("one").unwrap();
        buf.extend(codec.encode("two").unwrap());

        let (first, consumed) = codec.decode(&buf).unwrap();
        assert_eq!(first, "one");
        let (second, _) = codec.decode(&buf[consumed..]).unwrap();
        assert_eq!(second, "two");
    }

    #[test]
    fn test_decode_truncated() {
        let codec = FrameCodec::default();
        assert!(codec.decode(&[0, 0]).unwrap_err().is_remote_closed());

        let mut frame = codec.encode("hello").unwrap();
        frame.truncate(6);
        assert!(codec.decode(&frame).unwrap_err().is_remote_closed());
    }

    #[test]
    fn test_oversized_frames_rejected() {
        let codec = FrameCodec::new(4);
        assert!(matches!(
            codec.encode("hello"),
            Err(BtError::InvalidArgument(_))
        ));
        assert!(codec
            .decode(&[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o'])
            .unwrap_err()
            .is_remote_closed());
    }

    #[tokio::test]
    async fn test_stream_roundtrip_in_order() {
        let codec = FrameCodec::default();
        let (mut a, mut b) = tokio::io::duplex(1024);

        codec.write_frame(&mut a, "first").await.unwrap();
        codec.write_frame(&mut a, "").await.unwrap();
        codec.write_frame(&mut a, "third").await.unwrap();

        assert_eq!(codec.read_frame(&mut b).await.unwrap(), "first");
        assert_eq!(codec.read_frame(&mut b).await.unwrap(), "");
        assert_eq!(codec.read_frame(&mut b).await.unwrap(), "third");
    }

    #[tokio::test]
    async fn test_truncated_stream_is_remote_closed() {
        let codec = FrameCodec::default();
        let (mut a, mut b) = tokio::io::duplex(1024);

        // Prefix promises 10 bytes, only 3 arrive before EOF.
        a.write_all(&[0, 0, 0, 10, b'a', b'b', b'c']).await.unwrap();
        drop(a);

        let err = codec.read_frame(&mut b).await.unwrap_err();
        assert!(err.is_remote_closed());
    }

    #[tokio::test]
    async fn test_zero_length_initial_read_is_remote_closed() {
        let codec = FrameCodec::default();
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);

        assert!(codec.read_frame(&mut b).await.unwrap_err().is_remote_closed());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_terminal() {
        let codec = FrameCodec::default();
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0, 0, 2, 0xC3, 0x28]).await.unwrap();

        assert!(codec.read_frame(&mut b).await.unwrap_err().is_remote_closed());
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_read() {
        let (a, _peer) = tokio::io::duplex(64);
        let transport = Transport::from_stream(DeviceAddress::new("AA:BB:CC:DD:EE:FF"), a);
        let (mut reader, mut writer, close) = frame(transport, FrameCodec::default());

        let pending = tokio::spawn(async move { reader.next_message().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        close.close();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("read should unblock")
            .unwrap();
        assert!(result.unwrap_err().is_remote_closed());

        assert!(matches!(writer.send("late").await, Err(BtError::NotConnected)));
    }
}
