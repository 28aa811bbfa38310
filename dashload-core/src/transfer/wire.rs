//! Chunk request encoding.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::TransferError;

/// Encoded size of a chunk request.
pub const CHUNK_REQUEST_LEN: usize = 4;

/// Request for the next chunk, carrying only its size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub byte_size: u32,
}

impl ChunkRequest {
    pub fn new(byte_size: u32) -> Self {
        Self { byte_size }
    }

    /// Size of a chunk of `chunk_duration` encoded at `bitrate_bps`.
    ///
    /// `bitrate * duration / 8`, saturating at `u32::MAX`.
    pub fn for_bitrate(bitrate_bps: u32, chunk_duration: Duration) -> Self {
        let millis = u64::try_from(chunk_duration.as_millis()).unwrap_or(u64::MAX);
        let bytes = u64::from(bitrate_bps).saturating_mul(millis) / 8_000;
        Self {
            byte_size: u32::try_from(bytes).unwrap_or(u32::MAX),
        }
    }

    /// Encodes as a single big-endian `u32`.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHUNK_REQUEST_LEN);
        buf.put_u32(self.byte_size);
        buf.freeze()
    }

    /// Decodes a request message.
    ///
    /// # Errors
    ///
    /// - `TransferError::Decode` - Message is not exactly four bytes
    pub fn decode(data: &[u8]) -> Result<Self, TransferError> {
        if data.len() < CHUNK_REQUEST_LEN {
            return Err(TransferError::Decode {
                reason: format!("Request too short: {} bytes", data.len()),
            });
        }
        if data.len() > CHUNK_REQUEST_LEN {
            return Err(TransferError::Decode {
                reason: format!("Unexpected trailing bytes: {} bytes", data.len()),
            });
        }

        let mut buf = data;
        Ok(Self {
            byte_size: buf.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size_from_bitrate() {
        let request = ChunkRequest::for_bitrate(1_400_000, Duration::from_secs(2));
        assert_eq!(request.byte_size, 350_000);

        let request = ChunkRequest::for_bitrate(700_000, Duration::from_millis(500));
        assert_eq!(request.byte_size, 43_750);
    }

    #[test]
    fn test_encoding_is_network_order() {
        let encoded = ChunkRequest::new(350_000).encode();
        assert_eq!(encoded.as_ref(), &[0x00, 0x05, 0x57, 0x30]);
        assert_eq!(ChunkRequest::decode(&encoded).unwrap().byte_size, 350_000);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(matches!(
            ChunkRequest::decode(&[0, 1, 2]),
            Err(TransferError::Decode { .. })
        ));
        assert!(matches!(
            ChunkRequest::decode(&[0, 1, 2, 3, 4]),
            Err(TransferError::Decode { .. })
        ));
    }
}
