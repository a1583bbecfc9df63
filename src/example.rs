//! Example adapter between the loader's blob protocol and owned buffers
//!
//! The loader writes each example's blobs into the adapter in place; the
//! sequencer moves the buffers out when it assembles sequences. Each slot
//! tracks whether it currently holds data so a move-out that is never
//! refilled fails loudly instead of yielding stale memory.

use crate::error::{Result, SequencerError};

/// Blob shape as reported by the loader: always exactly 3 components,
/// `[channels, height, width]` in the loader's native order.
pub type BlobShape = [usize; 3];

/// State of one blob buffer slot
#[derive(Debug)]
enum BlobSlot {
    /// Buffer was moved out and not yet refilled by the loader
    Empty,
    /// Buffer holds the current example's data
    Filled(Vec<f32>),
}

/// Buffer-exchange adapter for one in-flight example
#[derive(Debug)]
pub struct ExampleAdapter {
    /// Names of all blobs of interest, in loader order
    blob_names: Vec<String>,
    /// One buffer slot per blob
    slots: Vec<BlobSlot>,
    /// Last shape recorded for each blob
    shapes: Vec<BlobShape>,
}

impl ExampleAdapter {
    /// Create an adapter for the given ordered blob names
    pub fn new(blob_names: Vec<String>) -> Result<Self> {
        if blob_names.is_empty() {
            return Err(SequencerError::EmptyBlobNames);
        }
        let count = blob_names.len();
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(BlobSlot::Empty);
        }
        Ok(Self {
            blob_names,
            slots,
            shapes: vec![[0; 3]; count],
        })
    }

    /// Number of blob slots
    pub fn blob_count(&self) -> usize {
        self.blob_names.len()
    }

    /// Called by the loader before it writes a blob's memory: records the
    /// shape and sizes the buffer to exactly `channels * height * width`.
    pub fn reshape_blob(&mut self, index: usize, channels: usize, height: usize, width: usize) {
        self.shapes[index] = [channels, height, width];
        let len = channels * height * width;
        let slot = &mut self.slots[index];
        match slot {
            BlobSlot::Filled(buffer) => buffer.resize(len, 0.0),
            BlobSlot::Empty => *slot = BlobSlot::Filled(vec![0.0; len]),
        }
    }

    /// Raw buffer for the loader to write into. No reallocation happens
    /// between `reshape_blob` and the write.
    pub fn blob_memory(&mut self, index: usize) -> &mut [f32] {
        match &mut self.slots[index] {
            BlobSlot::Filled(buffer) => buffer.as_mut_slice(),
            BlobSlot::Empty => &mut [],
        }
    }

    /// Last shape recorded for the named blob
    pub fn blob_shape(&self, name: &str) -> Result<BlobShape> {
        let index = self.blob_index(name)?;
        Ok(self.shapes[index])
    }

    /// Move the named blob's buffer out, leaving the slot empty until the
    /// next loader pull refills it.
    pub fn take_blob_data(&mut self, name: &str) -> Result<Vec<f32>> {
        let index = self.blob_index(name)?;
        match std::mem::replace(&mut self.slots[index], BlobSlot::Empty) {
            BlobSlot::Filled(buffer) => Ok(buffer),
            BlobSlot::Empty => Err(SequencerError::BlobTaken {
                name: name.to_string(),
            }),
        }
    }

    fn blob_index(&self, name: &str) -> Result<usize> {
        self.blob_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| SequencerError::BlobNotFound {
                name: name.to_string(),
            })
    }
}
