//! Frame Protocol
//!
//! Wire format shared by the ground terminal, the flight controller and the
//! plant simulator. Every message travels as exactly one frame.
//!
//! # Frame Format
//!
//! ```text
//! +------+------+------+--------+-------------------+-------------+-------------+
//! | 0xFF | 0xFF | type | length | payload (length)  | checksum hi | checksum lo |
//! +------+------+------+--------+-------------------+-------------+-------------+
//! ```
//!
//! The checksum is the sum of `type`, `length` and every payload byte,
//! truncated to 16 bits and sent big-endian. `type` enters the sum as a
//! signed byte, so tags from `0x80` up subtract from it; payload bytes are
//! always unsigned.
//!
//! Decoding first scans for the `0xFF 0xFF` marker and discards anything in
//! front of it, so a reader that attached mid-stream or lost bytes picks up
//! again at the next frame boundary.

use std::fmt;
use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Two-byte marker opening every frame
pub const SYNC_MARKER: [u8; 2] = [0xFF, 0xFF];

/// Largest payload a frame may carry
pub const MAX_PAYLOAD_SIZE: usize = 127;

/// Marker, type and length
const HEADER_SIZE: usize = SYNC_MARKER.len() + 2;

const CHECKSUM_SIZE: usize = 2;

/// Errors raised while building or decoding frames
///
/// Every truncation point has its own variant so callers can tell where the
/// stream ended.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Payload longer than [`MAX_PAYLOAD_SIZE`]
    #[error("payload of {0} bytes exceeds the maximum of 127 bytes")]
    PayloadTooLarge(usize),

    /// Stream ended before the sync marker was complete
    #[error("premature end of stream while reading the frame marker")]
    TruncatedHeader,

    /// Stream ended before the type byte
    #[error("premature end of stream while reading the frame type")]
    TruncatedType,

    /// Stream ended before the length byte
    #[error("premature end of stream while reading the payload length")]
    TruncatedLength,

    /// Stream ended inside the payload
    #[error("premature end of stream while reading the payload: type={tag}, length={expected}, received={received}")]
    TruncatedPayload {
        /// Type byte of the broken frame
        tag: u8,
        /// Announced payload length
        expected: usize,
        /// Payload bytes actually received
        received: usize,
    },

    /// Stream ended before both checksum bytes arrived
    #[error("premature end of stream while reading the checksum")]
    TruncatedChecksum,

    /// Transmitted checksum does not match the frame content
    #[error("checksum mismatch: computed {computed:#06x}, received {received:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over type, length and payload
        computed: u16,
        /// Checksum found on the wire
        received: u16,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One typed, checksummed unit of the wire protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    tag: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame, rejecting payloads longer than [`MAX_PAYLOAD_SIZE`]
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] for oversized payloads.
    pub fn new(tag: u8, payload: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { tag, payload })
    }

    /// Type byte selecting the message kind
    #[must_use]
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Payload bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame, returning its payload
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Checksum as it appears on the wire
    #[must_use]
    pub fn checksum(&self) -> u16 {
        checksum(self.tag, &self.payload)
    }

    /// Size of the encoded frame in bytes
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CHECKSUM_SIZE
    }

    /// Encode the frame into its wire representation
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&SYNC_MARKER);
        buf.push(self.tag);
        // Frame::new bounds the payload to 127 bytes
        #[allow(clippy::cast_possible_truncation)]
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum().to_be_bytes());
        buf
    }
}

impl fmt::Display for Frame {
    /// Renders the encoded bytes as an unsigned decimal list
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, byte) in self.encode().iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{byte}")?;
        }
        f.write_str("]")
    }
}

/// 16-bit additive checksum over type, length and payload
///
/// The tag is sign-extended before summing, matching deployed peers.
#[must_use]
pub fn checksum(tag: u8, payload: &[u8]) -> u16 {
    #[allow(clippy::cast_possible_truncation)]
    let length = payload.len() as u16;
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    let signed_tag = i16::from(tag as i8) as u16;
    payload
        .iter()
        .fold(signed_tag.wrapping_add(length), |sum, byte| {
            sum.wrapping_add(u16::from(*byte))
        })
}

/// Read exactly one frame from `reader`
///
/// Bytes in front of the sync marker are skipped. The returned frame has a
/// verified checksum.
///
/// # Errors
///
/// Returns the truncation variant matching the position where the stream
/// ended, [`FrameError::PayloadTooLarge`] for a length byte above 127,
/// [`FrameError::ChecksumMismatch`] for corrupted frames and
/// [`FrameError::Io`] for read failures.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    synchronize(reader).await?;

    let tag = read_byte(reader).await?.ok_or(FrameError::TruncatedType)?;
    let length = usize::from(read_byte(reader).await?.ok_or(FrameError::TruncatedLength)?);
    if length > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    let mut received = 0;
    while received < length {
        let n = reader.read(&mut payload[received..]).await?;
        if n == 0 {
            return Err(FrameError::TruncatedPayload {
                tag,
                expected: length,
                received,
            });
        }
        received += n;
    }

    let mut wire = [0u8; CHECKSUM_SIZE];
    for slot in &mut wire {
        *slot = read_byte(reader)
            .await?
            .ok_or(FrameError::TruncatedChecksum)?;
    }

    let received = u16::from_be_bytes(wire);
    let computed = checksum(tag, &payload);
    if computed != received {
        return Err(FrameError::ChecksumMismatch { computed, received });
    }

    Ok(Frame { tag, payload })
}

/// Consume bytes until a complete sync marker has been read
async fn synchronize<R>(reader: &mut R) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut matched = 0;
    let mut skipped = 0usize;
    while matched < SYNC_MARKER.len() {
        let byte = read_byte(reader)
            .await?
            .ok_or(FrameError::TruncatedHeader)?;
        if byte == SYNC_MARKER[matched] {
            matched += 1;
        } else {
            skipped += matched + 1;
            matched = 0;
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "Resynchronized frame stream");
    }
    Ok(())
}

/// Read a single byte, `None` at end of stream
async fn read_byte<R>(reader: &mut R) -> Result<Option<u8>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut byte = [0u8; 1];
    match reader.read(&mut byte).await? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        let mut reader = bytes;
        read_frame(&mut reader).await
    }

    #[test]
    fn test_encode_known_frame() {
        let frame = Frame::new(13, vec![1, 2, 3]).unwrap();
        assert_eq!(
            frame.encode(),
            vec![0xFF, 0xFF, 0x0D, 0x03, 0x01, 0x02, 0x03, 0x00, 0x16]
        );
        assert_eq!(frame.checksum(), 0x0016);
        assert_eq!(frame.encoded_len(), 9);
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = Frame::new(7, Vec::new()).unwrap();
        assert_eq!(frame.encode(), vec![0xFF, 0xFF, 7, 0, 0, 7]);
    }

    #[test]
    fn test_checksum_wraps_at_16_bits() {
        let payload = vec![0xFF; MAX_PAYLOAD_SIZE];
        let expected = (0x7F + 127 + 127 * 0xFF) % 65536;
        assert_eq!(u32::from(checksum(0x7F, &payload)), expected);
    }

    #[test]
    fn test_high_tag_counts_as_signed() {
        let frame = Frame::new(0x80, Vec::new()).unwrap();
        assert_eq!(frame.encode(), vec![0xFF, 0xFF, 0x80, 0x00, 0xFF, 0x80]);
        assert_eq!(checksum(0xFF, &[]), 0xFFFF);
        // payload bytes stay unsigned
        assert_eq!(checksum(0x01, &[0xFF]), 0x0101);
    }

    #[tokio::test]
    async fn test_high_tag_roundtrip() {
        let decoded = decode(&[0xFF, 0xFF, 0x80, 0x00, 0xFF, 0x80]).await.unwrap();
        assert_eq!(decoded.tag(), 0x80);
        assert!(decoded.payload().is_empty());

        let frame = Frame::new(0xC8, vec![0x10, 0x20]).unwrap();
        assert_eq!(decode(&frame.encode()).await.unwrap(), frame);
    }

    #[test]
    fn test_payload_too_large_rejected() {
        let err = Frame::new(1, vec![0u8; 128]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge(128)));
        assert!(Frame::new(1, vec![0u8; 127]).is_ok());
    }

    #[test]
    fn test_display_lists_unsigned_bytes() {
        let frame = Frame::new(13, vec![1, 2, 3]).unwrap();
        assert_eq!(frame.to_string(), "[255,255,13,3,1,2,3,0,22]");
    }

    #[tokio::test]
    async fn test_decode_known_frame() {
        let frame = decode(&[0xFF, 0xFF, 0x0D, 0x03, 0x01, 0x02, 0x03, 0x00, 0x16])
            .await
            .unwrap();
        assert_eq!(frame.tag(), 13);
        assert_eq!(frame.payload(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_roundtrip_every_payload_length() {
        for len in 0..=MAX_PAYLOAD_SIZE {
            #[allow(clippy::cast_possible_truncation)]
            let payload: Vec<u8> = (0..len).map(|i| (i * 37) as u8).collect();
            let frame = Frame::new(42, payload).unwrap();
            let decoded = decode(&frame.encode()).await.unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[tokio::test]
    async fn test_decode_skips_leading_garbage() {
        let frame = Frame::new(5, vec![9, 8]).unwrap();
        let mut bytes = vec![0x00, 0xFF, 0x42, 0x13];
        bytes.extend(frame.encode());

        let decoded = decode(&bytes).await.unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn test_decode_consecutive_frames() {
        let first = Frame::new(1, vec![1]).unwrap();
        let second = Frame::new(2, vec![2, 2]).unwrap();
        let mut bytes = first.encode();
        bytes.extend(second.encode());

        let mut reader = &bytes[..];
        assert_eq!(read_frame(&mut reader).await.unwrap(), first);
        assert_eq!(read_frame(&mut reader).await.unwrap(), second);
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FrameError::TruncatedHeader)
        ));
    }

    #[tokio::test]
    async fn test_decode_fragmented_reads() {
        let mut reader = tokio_test::io::Builder::new()
            .read(&[0xFF])
            .read(&[0xFF, 0x0D])
            .read(&[0x03, 0x01])
            .read(&[0x02])
            .read(&[0x03, 0x00, 0x16])
            .build();

        let frame = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.tag(), 13);
        assert_eq!(frame.payload(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_truncation_points_are_distinct() {
        let encoded = Frame::new(13, vec![1, 2, 3]).unwrap().encode();

        assert!(matches!(decode(&[]).await, Err(FrameError::TruncatedHeader)));
        assert!(matches!(
            decode(&encoded[..1]).await,
            Err(FrameError::TruncatedHeader)
        ));
        assert!(matches!(
            decode(&encoded[..2]).await,
            Err(FrameError::TruncatedType)
        ));
        assert!(matches!(
            decode(&encoded[..3]).await,
            Err(FrameError::TruncatedLength)
        ));
        assert!(matches!(
            decode(&encoded[..5]).await,
            Err(FrameError::TruncatedPayload {
                tag: 13,
                expected: 3,
                received: 1
            })
        ));
        assert!(matches!(
            decode(&encoded[..7]).await,
            Err(FrameError::TruncatedChecksum)
        ));
        assert!(matches!(
            decode(&encoded[..8]).await,
            Err(FrameError::TruncatedChecksum)
        ));
    }

    #[tokio::test]
    async fn test_corrupted_content_fails_checksum() {
        let encoded = Frame::new(13, vec![1, 2, 3, 0xFE]).unwrap().encode();

        // type byte and every payload byte
        for index in [2usize, 4, 5, 6, 7] {
            let mut corrupted = encoded.clone();
            corrupted[index] = corrupted[index].wrapping_add(1);
            let result = decode(&corrupted).await;
            assert!(
                matches!(result, Err(FrameError::ChecksumMismatch { .. })),
                "byte {index} corrupted, got {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_shortened_length_fails_checksum() {
        let mut encoded = Frame::new(13, vec![1, 2, 3]).unwrap().encode();
        encoded[3] = 2;
        assert!(matches!(
            decode(&encoded).await,
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_decode_rejects_oversized_length() {
        let bytes = [0xFF, 0xFF, 1, 200, 0, 0];
        assert!(matches!(
            decode(&bytes).await,
            Err(FrameError::PayloadTooLarge(200))
        ));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_reports_both_values() {
        let bytes = [0xFF, 0xFF, 0x0D, 0x01, 0x01, 0x00, 0x00];
        match decode(&bytes).await {
            Err(FrameError::ChecksumMismatch { computed, received }) => {
                assert_eq!(computed, 0x0F);
                assert_eq!(received, 0);
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }
}
