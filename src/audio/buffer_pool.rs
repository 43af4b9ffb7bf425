// BufferPool - lock-free capture transport with dual SPSC queues
//
// The capture callback must not allocate or lock. Blocks travel through two
// rtrb ring buffers:
// - DATA queue: capture side pushes filled blocks, manager side consumes
// - POOL queue: manager side returns drained blocks, capture side recycles
//
// Block flow:
// 1. Capture callback pops an empty block from POOL
// 2. Copies the new samples into it (within its preallocated capacity)
// 3. Pushes it to DATA
// 4. AudioManager::pump pops it from DATA, feeds the analysers
// 5. Pushes it back to POOL
//
// When the manager falls behind and POOL runs dry the capture side drops
// the block and counts it instead of allocating.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer};

use crate::error::AudioError;

pub const DEFAULT_BUFFER_COUNT: usize = 32;
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Audio block - preallocated vector whose length is the number of valid samples
pub type AudioBuffer = Vec<f32>;

/// All four queue ends, as created by [`BufferPool::new`].
pub struct BufferPoolChannels {
    pub data_producer: Producer<AudioBuffer>,
    pub data_consumer: Consumer<AudioBuffer>,
    pub pool_producer: Producer<AudioBuffer>,
    pub pool_consumer: Consumer<AudioBuffer>,
    block_size: usize,
}

impl BufferPoolChannels {
    /// Split into the capture-thread half and the manager half.
    pub fn split(self) -> (CaptureChannels, ReaderChannels) {
        let dropped = Arc::new(AtomicU64::new(0));
        (
            CaptureChannels {
                data_producer: self.data_producer,
                pool_consumer: self.pool_consumer,
                block_size: self.block_size,
                dropped_blocks: dropped.clone(),
            },
            ReaderChannels {
                data_consumer: self.data_consumer,
                pool_producer: self.pool_producer,
                dropped_blocks: dropped,
            },
        )
    }
}

/// Capture-side half, moved into the backend's audio callback.
pub struct CaptureChannels {
    data_producer: Producer<AudioBuffer>,
    pool_consumer: Consumer<AudioBuffer>,
    block_size: usize,
    dropped_blocks: Arc<AtomicU64>,
}

impl CaptureChannels {
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Copy `samples` into pooled blocks and hand them to the reader.
    ///
    /// Never allocates. Returns the number of samples that had to be dropped
    /// because the pool was exhausted.
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        let mut dropped = 0;
        for chunk in samples.chunks(self.block_size) {
            match self.pool_consumer.pop() {
                Ok(mut buffer) => {
                    buffer.clear();
                    buffer.extend_from_slice(chunk);
                    if let Err(rtrb::PushError::Full(_)) = self.data_producer.push(buffer) {
                        dropped += chunk.len();
                        self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(_) => {
                    dropped += chunk.len();
                    self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        dropped
    }
}

/// Manager-side half.
pub struct ReaderChannels {
    data_consumer: Consumer<AudioBuffer>,
    pool_producer: Producer<AudioBuffer>,
    dropped_blocks: Arc<AtomicU64>,
}

impl ReaderChannels {
    /// Hand every pending block to `sink`, then return it to the pool.
    /// Returns the number of blocks drained.
    pub fn drain<F>(&mut self, mut sink: F) -> usize
    where
        F: FnMut(&[f32]),
    {
        let mut drained = 0;
        while let Ok(buffer) = self.data_consumer.pop() {
            sink(&buffer);
            drained += 1;
            // The pool has room for every block it ever handed out
            let _ = self.pool_producer.push(buffer);
        }
        drained
    }

    /// Blocks lost on the capture side since the pool was created.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }
}

/// Lock-free block pool using dual SPSC ring buffers.
///
/// All heap allocation happens in [`BufferPool::new`].
pub struct BufferPool;

impl BufferPool {
    /// Preallocate `buffer_count` blocks of `buffer_size` samples.
    ///
    /// # Errors
    /// `InvalidParameter` when either count is zero.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, buffer_size: usize) -> Result<BufferPoolChannels, AudioError> {
        if buffer_count == 0 {
            return Err(AudioError::InvalidParameter {
                name: "buffer_count".to_string(),
                value: 0.0,
            });
        }
        if buffer_size == 0 {
            return Err(AudioError::InvalidParameter {
                name: "buffer_size".to_string(),
                value: 0.0,
            });
        }

        let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = rtrb::RingBuffer::new(buffer_count);

        for _ in 0..buffer_count {
            let buffer: AudioBuffer = Vec::with_capacity(buffer_size);
            if pool_producer.push(buffer).is_err() {
                break;
            }
        }

        Ok(BufferPoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
            block_size: buffer_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_creation() {
        let mut channels = BufferPool::new(16, 2048).unwrap();

        let mut available_buffers = 0;
        while let Ok(buffer) = channels.pool_consumer.pop() {
            assert!(buffer.capacity() >= 2048);
            available_buffers += 1;
        }
        assert_eq!(available_buffers, 16, "Expected 16 buffers in pool queue");
        assert!(
            channels.data_consumer.pop().is_err(),
            "Data queue should be empty initially"
        );
    }

    #[test]
    fn test_capture_to_reader_circulation() {
        let (mut capture, mut reader) = BufferPool::new(4, 8).unwrap().split();

        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();
        assert_eq!(capture.push_samples(&samples), 0);

        let mut received = Vec::new();
        let blocks = reader.drain(|block| received.extend_from_slice(block));
        assert_eq!(blocks, 3);
        assert_eq!(received, samples);

        // Blocks are recycled, so the pool is full again
        assert_eq!(capture.push_samples(&[0.0; 32]), 0);
    }

    #[test]
    fn test_exhausted_pool_drops_without_allocating() {
        let (mut capture, mut reader) = BufferPool::new(2, 4).unwrap().split();

        let dropped = capture.push_samples(&[1.0; 16]);
        assert_eq!(dropped, 8);
        assert_eq!(reader.dropped_blocks(), 2);

        assert_eq!(reader.drain(|block| assert_eq!(block.len(), 4)), 2);
    }

    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CaptureChannels>();
        assert_send::<ReaderChannels>();
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        assert!(matches!(
            BufferPool::new(0, 1024),
            Err(AudioError::InvalidParameter { .. })
        ));
        assert!(BufferPool::new(16, 0).is_err());
    }
}
