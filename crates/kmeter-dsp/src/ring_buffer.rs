//! Multi-channel circular sample store for chunked metering.
//!
//! Decouples the host's variable block size from the meter's fixed
//! internal chunk size. Only [`RingBuffer::add_samples`] moves the write
//! cursor; every read accessor addresses a window of the most recent
//! chunk, shifted back by an explicit pre-delay, and leaves the cursor
//! untouched. The pre-delay compensates for the group delay of the
//! filtered-average and true-peak measurement paths so all per-chunk
//! measurements stay time-aligned.
//!
//! Capacity is rounded up to a power of two for bitmask indexing and is
//! fixed at construction; no growth or allocation afterwards.

use crate::error::{DspError, Result};

/// Per-channel circular sample store with windowed read-back.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    /// Per-channel storage, each `capacity` samples long.
    samples: Vec<Vec<f32>>,
    /// Allocated capacity per channel (power of two).
    capacity: usize,
    /// Bitmask for modular indexing (`capacity - 1`).
    mask: usize,
    /// Window length addressed by [`RingBuffer::sample`].
    chunk_size: usize,
    /// Next write position; shared by all channels.
    write_position: usize,
}

impl RingBuffer {
    /// Create a buffer for `channels` channels holding at least
    /// `capacity` samples per channel.
    ///
    /// `chunk_size` fixes the window length that [`RingBuffer::sample`]
    /// addresses; `capacity` must be at least `chunk_size` plus the
    /// largest pre-delay that will ever be read back.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is zero or `capacity < chunk_size`.
    pub fn new(channels: usize, capacity: usize, chunk_size: usize) -> Self {
        assert!(channels > 0, "ring buffer needs at least one channel");
        assert!(
            capacity >= chunk_size,
            "ring buffer capacity must cover one chunk"
        );

        let capacity = capacity.next_power_of_two();

        Self {
            samples: vec![vec![0.0; capacity]; channels],
            capacity,
            mask: capacity - 1,
            chunk_size,
            write_position: 0,
        }
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Allocated capacity per channel (always a power of two).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Window length addressed by [`RingBuffer::sample`].
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Append `length` samples per channel starting at `offset` within
    /// each channel slice, advancing the write cursor.
    ///
    /// The block must carry exactly as many channels as the buffer, all
    /// channel slices must cover `offset + length` samples, and `length`
    /// must not exceed the buffer capacity.
    pub fn add_samples<S: AsRef<[f32]>>(
        &mut self,
        block: &[S],
        offset: usize,
        length: usize,
    ) -> Result<()> {
        if block.len() != self.samples.len() {
            return Err(DspError::ChannelMismatch {
                expected: self.samples.len(),
                actual: block.len(),
            });
        }

        let window = block
            .iter()
            .map(|channel| channel.as_ref().len())
            .min()
            .unwrap_or(0);

        if block
            .iter()
            .any(|channel| channel.as_ref().len() != window)
        {
            return Err(DspError::RaggedBlock);
        }

        if offset + length > window || length > self.capacity {
            return Err(DspError::BlockOutOfRange {
                samples: offset + length,
                window: window.min(self.capacity),
            });
        }

        for (channel, storage) in block.iter().zip(self.samples.iter_mut()) {
            let source = &channel.as_ref()[offset..offset + length];
            let mut position = self.write_position;

            for &sample in source {
                storage[position] = sample;
                position = (position + 1) & self.mask;
            }
        }

        self.write_position = (self.write_position + length) & self.mask;

        Ok(())
    }

    /// Read one sample of the most recent chunk window, in chronological
    /// order.
    ///
    /// `index` ranges over `[0, chunk_size)`; the window ends `pre_delay`
    /// samples behind the write cursor, so `index == chunk_size - 1` is
    /// the sample written `pre_delay + 1` positions ago.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range channel index (caller bug).
    #[inline]
    pub fn sample(&self, channel: usize, index: usize, pre_delay: usize) -> f32 {
        debug_assert!(index < self.chunk_size);
        let distance = pre_delay + self.chunk_size - index;
        self.samples[channel][(self.write_position + self.capacity - distance) & self.mask]
    }

    /// Peak absolute value over the `length` most recent samples ending
    /// `pre_delay` behind the write cursor.
    pub fn magnitude(&self, channel: usize, length: usize, pre_delay: usize) -> f32 {
        let storage = &self.samples[channel];
        let mut peak = 0.0f32;

        for distance in pre_delay + 1..=pre_delay + length {
            let value =
                storage[(self.write_position + self.capacity - distance) & self.mask].abs();
            if value > peak {
                peak = value;
            }
        }

        peak
    }

    /// Root-mean-square level over the `length` most recent samples
    /// ending `pre_delay` behind the write cursor.
    pub fn rms_level(&self, channel: usize, length: usize, pre_delay: usize) -> f32 {
        if length == 0 {
            return 0.0;
        }

        let storage = &self.samples[channel];
        let mut sum_of_squares = 0.0f64;

        for distance in pre_delay + 1..=pre_delay + length {
            let value =
                f64::from(storage[(self.write_position + self.capacity - distance) & self.mask]);
            sum_of_squares += value * value;
        }

        (sum_of_squares / length as f64).sqrt() as f32
    }

    /// Copy the `destination.len()` most recent samples ending
    /// `pre_delay` behind the write cursor into `destination`, in
    /// chronological order.
    ///
    /// Lets downstream components consume a read-only snapshot of the
    /// window without owning storage; the write cursor does not move.
    pub fn copy_to_buffer(&self, channel: usize, pre_delay: usize, destination: &mut [f32]) {
        let storage = &self.samples[channel];
        let length = destination.len();

        for (index, slot) in destination.iter_mut().enumerate() {
            let distance = pre_delay + length - index;
            *slot = storage[(self.write_position + self.capacity - distance) & self.mask];
        }
    }

    /// Overwrite the `source.len()` most recent samples ending
    /// `pre_delay` behind the write cursor with `source`, in
    /// chronological order. The write cursor does not move.
    pub fn copy_from_buffer(&mut self, channel: usize, pre_delay: usize, source: &[f32]) {
        let length = source.len();
        let write_position = self.write_position;
        let capacity = self.capacity;
        let mask = self.mask;
        let storage = &mut self.samples[channel];

        for (index, &sample) in source.iter().enumerate() {
            let distance = pre_delay + length - index;
            storage[(write_position + capacity - distance) & mask] = sample;
        }
    }

    /// Zero all samples and rewind the write cursor.
    pub fn clear(&mut self) {
        for storage in &mut self.samples {
            storage.fill(0.0);
        }
        self.write_position = 0;
    }
}
