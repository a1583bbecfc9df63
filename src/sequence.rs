//! Sequence data produced for the batch packer
//!
//! One sequence holds one sample's tensor for one stream, either as a fully
//! populated dense buffer or in compressed one-hot form. Buffers are owned;
//! they are moved out of the example adapter, never copied.

use crate::stream::SampleShape;

/// One sample's dense tensor for one stream
#[derive(Debug, Clone, PartialEq)]
pub struct DenseSequence {
    /// Sample index within the minibatch
    pub id: usize,
    /// Number of samples in this sequence (always 1 here)
    pub number_of_samples: usize,
    /// Owned float buffer
    pub data: Vec<f32>,
    /// Per-sample tensor shape
    pub sample_shape: SampleShape,
}

/// One sample's tensor in compressed one-hot form
#[derive(Debug, Clone, PartialEq)]
pub struct SparseSequence {
    /// Sample index within the minibatch
    pub id: usize,
    /// Number of samples in this sequence (always 1 here)
    pub number_of_samples: usize,
    /// Per-nonzero values (all 1.0)
    pub values: Vec<f32>,
    /// Per-nonzero flat indices into the dense sample layout
    pub indices: Vec<u32>,
    /// Nonzero count per sample
    pub nnz_counts: Vec<u32>,
    /// Total nonzero count across samples
    pub total_nnz: u32,
    /// Per-sample tensor shape of the dense layout
    pub sample_shape: SampleShape,
}

/// Closed set of sequence representations; consumers pattern-match on the
/// variant instead of dispatching through a shared base.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceData {
    Dense(DenseSequence),
    Sparse(SparseSequence),
}

impl SequenceData {
    /// The sequence's primary data buffer: the tensor values for dense
    /// sequences, the per-nonzero values for sparse ones.
    pub fn data_buffer(&self) -> &[f32] {
        match self {
            SequenceData::Dense(dense) => &dense.data,
            SequenceData::Sparse(sparse) => &sparse.values,
        }
    }

    /// Per-sample tensor shape
    pub fn sample_shape(&self) -> SampleShape {
        match self {
            SequenceData::Dense(dense) => dense.sample_shape,
            SequenceData::Sparse(sparse) => sparse.sample_shape,
        }
    }
}

/// One materialized minibatch: per-stream sequence lists plus the epoch flag
#[derive(Debug, Default)]
pub struct Sequences {
    /// `data[stream][sample]`, indexed in input-stream order
    pub data: Vec<Vec<SequenceData>>,
    /// True when this batch consumed the last samples of the epoch
    pub end_of_epoch: bool,
}
