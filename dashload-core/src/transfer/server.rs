//! Server half of the chunk transfer: segmenting a requested chunk into the transport.

use super::wire::ChunkRequest;

/// Byte-stream transport as seen by the sender.
pub trait SegmentSink {
    /// Offers `len` bytes and returns how many the transport accepted.
    ///
    /// Accepting fewer than `len` means the send buffer is full; the sender
    /// stops and waits for a send-ready notification.
    fn send_segment(&mut self, len: u32) -> u32;
}

/// Result of pushing bytes into the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendProgress {
    /// The whole chunk has been handed to the transport.
    Complete,
    /// The transport filled up; `remaining` bytes wait for send-ready.
    Blocked { remaining: u32 },
    /// Nothing was pending.
    Idle,
}

/// Streams each requested chunk as segments of at most `segment_size` bytes.
#[derive(Debug)]
pub struct ChunkSender {
    segment_size: u32,
    remaining: u32,
    blocked: bool,
    bytes_sent: u64,
    chunks_served: u64,
}

impl ChunkSender {
    pub fn new(segment_size: u32) -> Self {
        Self {
            segment_size: segment_size.max(1),
            remaining: 0,
            blocked: false,
            bytes_sent: 0,
            chunks_served: 0,
        }
    }

    /// Starts serving `request`, sending as much as the transport accepts.
    pub fn on_request(&mut self, request: ChunkRequest, sink: &mut impl SegmentSink) -> SendProgress {
        if self.remaining > 0 {
            tracing::warn!(
                "New chunk request for {} bytes replaces {} unsent bytes",
                request.byte_size,
                self.remaining
            );
        }
        self.remaining = request.byte_size;
        self.blocked = false;
        self.pump(sink)
    }

    /// Resumes a blocked chunk once the transport has room again.
    pub fn on_send_ready(&mut self, sink: &mut impl SegmentSink) -> SendProgress {
        if !self.blocked {
            return SendProgress::Idle;
        }
        self.blocked = false;
        self.pump(sink)
    }

    fn pump(&mut self, sink: &mut impl SegmentSink) -> SendProgress {
        if self.remaining == 0 {
            self.chunks_served += 1;
            return SendProgress::Complete;
        }

        while self.remaining > 0 {
            let offered = self.segment_size.min(self.remaining);
            let accepted = sink.send_segment(offered).min(offered);
            self.remaining -= accepted;
            self.bytes_sent += u64::from(accepted);

            if accepted < offered {
                self.blocked = true;
                tracing::trace!("Transport full, deferring {} bytes", self.remaining);
                return SendProgress::Blocked {
                    remaining: self.remaining,
                };
            }
        }

        self.chunks_served += 1;
        SendProgress::Complete
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn chunks_served(&self) -> u64 {
        self.chunks_served
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink with a fixed amount of free space.
    struct BoundedSink {
        free: u32,
        segments: Vec<u32>,
    }

    impl SegmentSink for BoundedSink {
        fn send_segment(&mut self, len: u32) -> u32 {
            let accepted = len.min(self.free);
            self.free -= accepted;
            if accepted > 0 {
                self.segments.push(accepted);
            }
            accepted
        }
    }

    #[test]
    fn test_segments_capped_at_segment_size() {
        let mut sender = ChunkSender::new(512);
        let mut sink = BoundedSink {
            free: u32::MAX,
            segments: Vec::new(),
        };

        let progress = sender.on_request(ChunkRequest::new(1_300), &mut sink);

        assert_eq!(progress, SendProgress::Complete);
        assert_eq!(sink.segments, vec![512, 512, 276]);
        assert_eq!(sender.bytes_sent(), 1_300);
        assert_eq!(sender.chunks_served(), 1);
    }

    #[test]
    fn test_partial_send_resumes_on_ready() {
        let mut sender = ChunkSender::new(512);
        let mut sink = BoundedSink {
            free: 1_000,
            segments: Vec::new(),
        };

        let progress = sender.on_request(ChunkRequest::new(2_048), &mut sink);
        assert_eq!(progress, SendProgress::Blocked { remaining: 1_048 });
        assert!(sender.is_blocked());

        sink.free = 4_096;
        let progress = sender.on_send_ready(&mut sink);

        assert_eq!(progress, SendProgress::Complete);
        assert_eq!(sink.segments.iter().sum::<u32>(), 2_048);
        assert_eq!(sender.remaining(), 0);
        assert_eq!(sender.on_send_ready(&mut sink), SendProgress::Idle);
    }

    #[test]
    fn test_zero_accept_blocks_without_progress() {
        let mut sender = ChunkSender::new(512);
        let mut sink = BoundedSink {
            free: 0,
            segments: Vec::new(),
        };

        let progress = sender.on_request(ChunkRequest::new(100), &mut sink);
        assert_eq!(progress, SendProgress::Blocked { remaining: 100 });
        assert_eq!(sender.bytes_sent(), 0);
    }
}
