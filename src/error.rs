//! Error types for the sequencer
//!
//! Every detected inconsistency is a fatal configuration or usage error in
//! the training harness, not a transient fault: there is no retry tier.

use thiserror::Error;

/// Primary error type for all sequencer operations
#[derive(Debug, Error)]
pub enum SequencerError {
    // ========== Schema Errors ==========

    /// Adapter constructed with no blob names
    #[error("Empty blob names list provided")]
    EmptyBlobNames,

    /// Named blob does not exist in the dataset
    #[error("Blob with name {name} not found")]
    BlobNotFound { name: String },

    /// Blob buffer was already moved out and not yet refilled by the loader
    #[error("Blob {name} already taken for this example")]
    BlobTaken { name: String },

    /// Sparse stream probed with more than one value per spatial position
    #[error("Invalid dataset shape for sparse stream {stream}: expected channel dimension 1, got {channels}")]
    InvalidSparseShape { stream: String, channels: usize },

    /// Sparse stream declared with a non-positive channel dimension
    #[error("Invalid dimension {dimension} declared for sparse stream {stream}")]
    InvalidSparseDimension { stream: String, dimension: usize },

    /// Dense streams cannot carry an ignore sub-stream
    #[error("Dense stream {stream} cannot have an ignore label")]
    DenseIgnoreUnsupported { stream: String },

    /// Sparse label outside the declared channel range
    #[error("Invalid channel value {label} in sparse stream (valid range 0..{channels})")]
    LabelOutOfRange { label: i64, channels: usize },

    /// Sparse label buffer size does not match the spatial extent
    #[error("Unexpected sparse data count: got {actual}, expected {expected}")]
    SparseSampleSizeMismatch { expected: usize, actual: usize },

    // ========== Protocol Errors ==========

    /// New epoch started before the previous one was fully consumed
    #[error("New epoch started without reading all samples from previous epoch ({read} != {expected})")]
    EpochNotExhausted { expected: usize, read: usize },

    /// Worker rank changed after construction
    #[error("Worker rank changed: expected {expected}, got {actual}")]
    WorkerRankChanged { expected: usize, actual: usize },

    /// Worker count changed after construction
    #[error("Number of workers changed: expected {expected}, got {actual}")]
    WorkerCountChanged { expected: usize, actual: usize },

    /// Minibatch size changed since the epoch started
    #[error("Minibatch size changed since epoch start: expected {expected}, got {actual}")]
    MinibatchSizeChanged { expected: usize, actual: usize },

    /// Requested sample count does not equal the configured minibatch size
    #[error("Mismatch between minibatch size ({minibatch_size}) and demanded sample count ({requested})")]
    SampleCountMismatch { minibatch_size: usize, requested: usize },

    /// Sparse stream description not followed by its ignore-mask description
    #[error("Invalid input streams: sparse stream {stream} is not followed by its ignore stream")]
    MissingIgnoreStream { stream: String },

    // ========== Configuration Errors ==========

    /// Malformed or missing configuration parameter
    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    // ========== Arithmetic Errors ==========

    /// Worker topology that no sample can be assigned under
    #[error("Invalid worker topology: rank {worker_rank} of {workers} workers")]
    InvalidWorkerTopology { worker_rank: usize, workers: usize },

    /// Minibatch does not split evenly across workers
    #[error("Minibatch size ({minibatch_size}) not divisible by number of workers ({workers})")]
    MinibatchNotDivisible { minibatch_size: usize, workers: usize },

    /// More workers than sample slots in one minibatch
    #[error("Greater number of workers than samples in minibatch")]
    TooManyWorkers,

    /// Appending would merge more than one extra sample into the last minibatch
    #[error("Appending more than one sample (remaining={remaining}) to the last minibatch (size={sample_count})")]
    AppendOverflow { remaining: usize, sample_count: usize },

    // ========== Loader Errors ==========

    /// Failure surfaced by the external dataset loader
    #[error("Dataset loader failed: {message}")]
    Loader { message: String },
}

impl SequencerError {
    /// Returns true if this error indicates a stream/blob schema problem
    pub fn is_schema(&self) -> bool {
        matches!(
            self,
            SequencerError::EmptyBlobNames
                | SequencerError::BlobNotFound { .. }
                | SequencerError::BlobTaken { .. }
                | SequencerError::InvalidSparseShape { .. }
                | SequencerError::InvalidSparseDimension { .. }
                | SequencerError::DenseIgnoreUnsupported { .. }
                | SequencerError::LabelOutOfRange { .. }
                | SequencerError::SparseSampleSizeMismatch { .. }
        )
    }

    /// Returns true if this error indicates a call-protocol violation
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SequencerError::EpochNotExhausted { .. }
                | SequencerError::WorkerRankChanged { .. }
                | SequencerError::WorkerCountChanged { .. }
                | SequencerError::MinibatchSizeChanged { .. }
                | SequencerError::SampleCountMismatch { .. }
                | SequencerError::MissingIgnoreStream { .. }
        )
    }
}

/// Result type alias for sequencer operations
pub type Result<T> = std::result::Result<T, SequencerError>;
