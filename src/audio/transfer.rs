// src/audio/transfer.rs
// Bounded block FIFO between the capture and playback callbacks

use rtrb::{Consumer, Producer, RingBuffer};

use super::mixer::AudioBlock;

/// Create a transfer buffer holding at most `capacity` blocks.
///
/// Backed by a wait-free SPSC ring: the producer half goes to the capture
/// callback, the consumer half to the playback callback. Blocks move by
/// ownership, so neither side ever copies audio while touching the ring
/// indices.
pub fn transfer_buffer(capacity: usize) -> (BlockProducer, BlockConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (BlockProducer { producer }, BlockConsumer { consumer })
}

/// Write half of the transfer buffer
pub struct BlockProducer {
    producer: Producer<AudioBlock>,
}

impl BlockProducer {
    /// Queue `block` unless the buffer is full. A full buffer discards the new
    /// block and returns false; nothing already queued is touched.
    pub fn try_push(&mut self, block: AudioBlock) -> bool {
        self.producer.push(block).is_ok()
    }

    /// Queue up to `count` silence blocks, returning how many fit
    pub fn prefill_silence(&mut self, count: usize, frames: usize) -> usize {
        (0..count)
            .take_while(|_| self.try_push(AudioBlock::silence(frames)))
            .count()
    }

    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }
}

/// Read half of the transfer buffer
pub struct BlockConsumer {
    consumer: Consumer<AudioBlock>,
}

impl BlockConsumer {
    /// Oldest queued block, or `None` when empty. Never blocks.
    pub fn try_pop(&mut self) -> Option<AudioBlock> {
        self.consumer.pop().ok()
    }
}
