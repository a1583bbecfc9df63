//! Dataset loader boundary
//!
//! The loader stores and decodes the actual examples; this crate only
//! consumes it one example at a time through this trait.

use crate::error::Result;
use crate::events::DatasetEventsSink;
use crate::example::ExampleAdapter;

/// Runtime override passed to the loader at open time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeParam {
    /// Index of this loader among the distributed readers
    LoaderIndex(usize),
    /// Total number of distributed readers
    LoadersCount(usize),
    /// Dataset directory override
    SourcePath(String),
    /// List of id-file paths selecting the examples to serve
    SourceIds(Vec<String>),
}

/// One-example-at-a-time pull interface over the external dataset loader.
///
/// The loader may parallelize I/O and decoding internally; that concurrency
/// is entirely encapsulated behind `fill_next_example`.
pub trait DatasetLoader: Sized {
    /// Open the dataset described by `load_config_path`, applying the given
    /// runtime overrides and reporting internal activity to `events`.
    fn open(
        load_config_path: &str,
        params: &[RuntimeParam],
        events: Box<dyn DatasetEventsSink>,
    ) -> Result<Self>;

    /// Number of blobs each example carries
    fn blob_count(&self) -> usize;

    /// Name of the blob at the given index
    fn blob_name(&self, index: usize) -> &str;

    /// Total number of examples this loader serves
    fn example_count(&self) -> usize;

    /// Fill the adapter's buffers with the next example, advancing the
    /// loader's internal position. The loader calls
    /// [`ExampleAdapter::reshape_blob`] before writing each blob's memory.
    fn fill_next_example(&mut self, example: &mut ExampleAdapter) -> Result<()>;
}
