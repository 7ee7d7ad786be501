//! Fixed-size block assembly over an SPSC ring buffer.
//!
//! Capture, model and playback each run on their own block length. The control
//! loop pushes whatever it has and pops exact blocks once enough samples are
//! queued.

use ringbuf::{Consumer, Producer, RingBuffer};

const RINGBUF_CAP_MULT: usize = 8;

pub struct BlockAssembler {
    block_len: usize,
    producer: Producer<f32>,
    consumer: Consumer<f32>,
    overflowed: u64,
}

impl BlockAssembler {
    /// `max_push` is the largest slice the caller will push between pops.
    pub fn new(block_len: usize, max_push: usize) -> Self {
        assert!(block_len > 0, "block length must be > 0");
        let cap = (block_len + max_push).max(block_len) * RINGBUF_CAP_MULT;
        let (producer, consumer) = RingBuffer::<f32>::new(cap).split();
        Self {
            block_len,
            producer,
            consumer,
            overflowed: 0,
        }
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn queued(&self) -> usize {
        self.consumer.len()
    }

    /// Samples dropped because the ring was full.
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    pub fn push(&mut self, samples: &[f32]) {
        let written = self.producer.push_slice(samples);
        self.overflowed += (samples.len() - written) as u64;
    }

    pub fn pop_block(&mut self) -> Option<Vec<f32>> {
        if self.consumer.len() < self.block_len {
            return None;
        }
        let mut block = vec![0.0; self.block_len];
        let n = self.consumer.pop_slice(&mut block);
        debug_assert_eq!(n, self.block_len);
        Some(block)
    }

    /// Everything still queued, possibly shorter than a block.
    pub fn pop_remaining(&mut self) -> Vec<f32> {
        let mut tail = vec![0.0; self.consumer.len()];
        let n = self.consumer.pop_slice(&mut tail);
        tail.truncate(n);
        tail
    }

    pub fn clear(&mut self) {
        while self.consumer.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reblocks_across_boundaries() {
        let mut asm = BlockAssembler::new(256, 441);
        let input: Vec<f32> = (0..441 * 4).map(|i| i as f32).collect();
        let mut out = Vec::new();
        for chunk in input.chunks(441) {
            asm.push(chunk);
            while let Some(block) = asm.pop_block() {
                assert_eq!(block.len(), 256);
                out.extend(block);
            }
        }
        assert_eq!(out.len(), (441 * 4 / 256) * 256);
        assert_eq!(&out[..], &input[..out.len()]);
        assert_eq!(asm.queued(), 441 * 4 - out.len());
        assert_eq!(asm.overflowed(), 0);
    }

    #[test]
    fn test_clear_drops_queued() {
        let mut asm = BlockAssembler::new(4, 3);
        asm.push(&[1.0, 2.0, 3.0]);
        asm.clear();
        assert_eq!(asm.queued(), 0);
        assert!(asm.pop_block().is_none());
    }

    #[test]
    fn test_pop_remaining_returns_partial_tail() {
        let mut asm = BlockAssembler::new(4, 6);
        asm.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(asm.pop_block(), Some(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(asm.pop_remaining(), vec![5.0, 6.0]);
        assert!(asm.pop_remaining().is_empty());
    }
}
