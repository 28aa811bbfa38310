//! Client half of the chunk transfer: request issuance and completion detection.

use std::time::Duration;

use serde::Serialize;

use super::TransferError;
use super::wire::ChunkRequest;
use crate::time::SimTime;

/// Shortest duration a sample can report, the clock resolution.
const MIN_SAMPLE_DURATION: Duration = Duration::from_micros(1);

/// One requested chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: u64,
    pub bitrate_bps: u32,
    pub byte_size: u32,
    pub requested_at: SimTime,
    pub completed_at: Option<SimTime>,
}

/// Bytes received for one chunk and how long they took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThroughputSample {
    pub bytes: u64,
    pub duration: Duration,
}

impl ThroughputSample {
    pub fn bits_per_second(&self) -> f64 {
        let duration = self.duration.max(MIN_SAMPLE_DURATION);
        (self.bytes as f64 * 8.0) / duration.as_secs_f64()
    }
}

/// A chunk whose last byte has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedChunk {
    pub chunk: Chunk,
    pub sample: ThroughputSample,
}

/// Tracks the single outstanding chunk and counts its bytes in.
#[derive(Debug)]
pub struct ChunkReceiver {
    chunk_duration: Duration,
    next_index: u64,
    outstanding: Option<Chunk>,
    received: u64,
    completed: u64,
}

impl ChunkReceiver {
    pub fn new(chunk_duration: Duration) -> Self {
        Self {
            chunk_duration,
            next_index: 0,
            outstanding: None,
            received: 0,
            completed: 0,
        }
    }

    /// Starts a chunk at `bitrate_bps` and returns the request to send.
    ///
    /// # Errors
    ///
    /// - `TransferError::RequestOutstanding` - A previous chunk has not completed
    pub fn request_chunk(
        &mut self,
        bitrate_bps: u32,
        now: SimTime,
    ) -> Result<ChunkRequest, TransferError> {
        if let Some(chunk) = &self.outstanding {
            return Err(TransferError::RequestOutstanding {
                index: chunk.index,
                requested: chunk.byte_size,
                received: self.received,
            });
        }

        let request = ChunkRequest::for_bitrate(bitrate_bps, self.chunk_duration);
        let index = self.next_index;
        self.next_index += 1;
        self.received = 0;
        self.outstanding = Some(Chunk {
            index,
            bitrate_bps,
            byte_size: request.byte_size,
            requested_at: now,
            completed_at: None,
        });

        tracing::trace!(
            "Requested chunk {} at {} bps ({} bytes)",
            index,
            bitrate_bps,
            request.byte_size
        );
        Ok(request)
    }

    /// Counts `len` received bytes toward the outstanding chunk.
    ///
    /// Returns the completed chunk exactly once, on the receive that brings the
    /// total to the requested size. Bytes arriving while nothing is
    /// outstanding are discarded.
    pub fn on_bytes_received(&mut self, len: usize, now: SimTime) -> Option<CompletedChunk> {
        let requested = match &self.outstanding {
            Some(chunk) => u64::from(chunk.byte_size),
            None => {
                tracing::trace!("Discarding {} bytes with no chunk outstanding", len);
                return None;
            }
        };

        self.received += len as u64;
        if self.received < requested {
            return None;
        }

        let mut chunk = self.outstanding.take()?;
        chunk.completed_at = Some(now);
        let sample = ThroughputSample {
            bytes: self.received,
            duration: now.saturating_since(chunk.requested_at),
        };
        self.received = 0;
        self.completed += 1;

        Some(CompletedChunk { chunk, sample })
    }

    /// Handles the connection closing underneath the session.
    ///
    /// # Errors
    ///
    /// - `TransferError::ConnectionClosed` - A chunk was still in flight
    pub fn on_connection_closed(&mut self) -> Result<(), TransferError> {
        match self.outstanding.take() {
            Some(chunk) => {
                let received = std::mem::take(&mut self.received);
                Err(TransferError::ConnectionClosed {
                    index: chunk.index,
                    requested: chunk.byte_size,
                    received,
                })
            }
            None => Ok(()),
        }
    }

    pub fn outstanding(&self) -> Option<&Chunk> {
        self.outstanding.as_ref()
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    pub fn completed_chunks(&self) -> u64 {
        self.completed
    }

    pub fn chunk_duration(&self) -> Duration {
        self.chunk_duration
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn receiver() -> ChunkReceiver {
        ChunkReceiver::new(Duration::from_secs(2))
    }

    #[test]
    fn test_completion_after_second_fragment() {
        let mut rx = receiver();
        let request = rx.request_chunk(1_400_000, SimTime::ZERO).unwrap();
        assert_eq!(request.byte_size, 350_000);

        assert!(rx.on_bytes_received(200_000, SimTime::from_millis(500)).is_none());
        let done = rx
            .on_bytes_received(150_000, SimTime::from_millis(1_000))
            .unwrap();

        assert_eq!(done.chunk.index, 0);
        assert_eq!(done.chunk.completed_at, Some(SimTime::from_millis(1_000)));
        assert_eq!(done.sample.bytes, 350_000);
        assert_eq!(done.sample.duration, Duration::from_secs(1));
        assert_eq!(done.sample.bits_per_second(), 2_800_000.0);
        assert!(rx.outstanding().is_none());
        assert_eq!(rx.bytes_received(), 0);
    }

    #[test]
    fn test_second_request_while_outstanding_is_rejected() {
        let mut rx = receiver();
        rx.request_chunk(700_000, SimTime::ZERO).unwrap();
        rx.on_bytes_received(1_000, SimTime::from_millis(1));

        let err = rx.request_chunk(700_000, SimTime::from_millis(2)).unwrap_err();
        assert_eq!(
            err,
            TransferError::RequestOutstanding {
                index: 0,
                requested: 175_000,
                received: 1_000
            }
        );
    }

    #[test]
    fn test_bytes_without_request_are_discarded() {
        let mut rx = receiver();
        assert!(rx.on_bytes_received(512, SimTime::ZERO).is_none());
        assert_eq!(rx.bytes_received(), 0);
    }

    #[test]
    fn test_connection_close_mid_chunk() {
        let mut rx = receiver();
        rx.request_chunk(700_000, SimTime::ZERO).unwrap();
        rx.on_bytes_received(10_000, SimTime::from_millis(5));

        let err = rx.on_connection_closed().unwrap_err();
        assert!(matches!(
            err,
            TransferError::ConnectionClosed {
                received: 10_000,
                ..
            }
        ));
        assert!(rx.on_connection_closed().is_ok());
    }

    #[test]
    fn test_zero_duration_sample_is_finite() {
        let sample = ThroughputSample {
            bytes: 1,
            duration: Duration::ZERO,
        };
        assert!(sample.bits_per_second().is_finite());
    }

    proptest! {
        #[test]
        fn test_completion_independent_of_fragmentation(
            fragments in prop::collection::vec(1usize..50_000, 1..64),
        ) {
            let mut rx = receiver();
            let request = rx.request_chunk(1_400_000, SimTime::ZERO).unwrap();
            let requested = request.byte_size as usize;

            let mut delivered = 0usize;
            let mut completions = 0;
            let mut step = 0u64;
            // Cycle the fragment pattern until the whole chunk is delivered.
            for len in fragments.iter().cycle() {
                if delivered >= requested {
                    break;
                }
                let len = (*len).min(requested - delivered);
                delivered += len;
                step += 1;
                if rx.on_bytes_received(len, SimTime::from_micros(step)).is_some() {
                    completions += 1;
                }
            }

            prop_assert_eq!(completions, 1);
            prop_assert_eq!(rx.completed_chunks(), 1);
            prop_assert!(rx.outstanding().is_none());
        }
    }
}
