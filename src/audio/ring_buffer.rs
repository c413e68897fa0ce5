//! Lock-free SPSC ring buffer between the cpal callback and the recorder.
//!
//! The cpal callback thread is the only producer; the recorder drains
//! everything once the stream has been stopped.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

use super::CAPTURE_SAMPLE_RATE;

/// Producer half, moved into the cpal input callback.
pub struct CaptureProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Consumer half, owned by the stream/recorder.
pub struct CaptureConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a buffer large enough for `max_secs` of 16 kHz mono audio.
pub fn capture_ring_buffer(max_secs: u64) -> (CaptureProducer, CaptureConsumer) {
    let capacity = (max_secs.max(1) as usize) * CAPTURE_SAMPLE_RATE as usize;
    let rb = HeapRb::<f32>::new(capacity);
    let (prod, cons) = rb.split();
    (CaptureProducer { inner: prod }, CaptureConsumer { inner: cons })
}

impl CaptureProducer {
    /// Returns how many samples were written; fewer than offered means the
    /// buffer is full and the tail was dropped.
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

// Safety: the producer is only ever touched from the cpal callback thread.
unsafe impl Send for CaptureProducer {}

impl CaptureConsumer {
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Discard anything buffered (audio captured before recording began).
    pub fn clear(&mut self) -> usize {
        self.inner.skip(self.available())
    }

    /// Drain every buffered sample.
    pub fn drain_all(&mut self) -> Vec<f32> {
        let n = self.available();
        if n == 0 {
            return Vec::new();
        }
        let mut buf = vec![0.0f32; n];
        let read = self.inner.pop_slice(&mut buf);
        buf.truncate(read);
        buf
    }
}

unsafe impl Send for CaptureConsumer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_pushed_samples_in_order() {
        let (mut prod, mut cons) = capture_ring_buffer(1);
        assert_eq!(prod.push_slice(&[0.1, 0.2, 0.3]), 3);
        assert_eq!(prod.push_slice(&[0.4]), 1);
        assert_eq!(cons.drain_all(), vec![0.1, 0.2, 0.3, 0.4]);
        assert!(cons.drain_all().is_empty());
    }

    #[test]
    fn full_buffer_drops_the_tail() {
        let (mut prod, mut cons) = capture_ring_buffer(1);
        let one_second = vec![0.5f32; CAPTURE_SAMPLE_RATE as usize];
        assert_eq!(prod.push_slice(&one_second), one_second.len());
        assert_eq!(prod.push_slice(&[0.9; 10]), 0);
        assert_eq!(cons.drain_all().len(), CAPTURE_SAMPLE_RATE as usize);
    }

    #[test]
    fn clear_discards_buffered_audio() {
        let (mut prod, mut cons) = capture_ring_buffer(1);
        prod.push_slice(&[1.0; 64]);
        assert_eq!(cons.clear(), 64);
        assert_eq!(cons.available(), 0);
    }
}
