//! Shardfeed Core - Sharded minibatch sequencer for distributed training
//!
//! This crate provides the data plane between an external image dataset
//! loader and a downstream batch packer:
//! - Blob-to-stream adaptation with ownership-moving buffers
//! - Deterministic per-worker epoch sharding
//! - Dense and sparse (one-hot) sequence materialization with ignore masks

pub mod config;
pub mod error;
pub mod events;
pub mod example;
pub mod loader;
pub mod sequence;
pub mod sharding;
pub mod source;
pub mod stream;

pub use error::SequencerError;
pub use source::{DataSource, SequenceSource};

/// Reserved epoch-size value meaning "use the entire dataset for this epoch"
pub const FULL_DATASET_EPOCH_SIZE: usize = usize::MAX;

/// Separator for the configured list of id-file paths
pub const IDS_FILE_SEPARATOR: char = '|';

/// Default worker rank when the configuration carries none
pub const DEFAULT_WORKER_RANK: usize = 0;

/// Default worker count when the configuration carries none
pub const DEFAULT_WORKER_COUNT: usize = 1;
