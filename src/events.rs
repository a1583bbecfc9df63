//! Loader instrumentation callbacks
//!
//! The dataset loader reports its internal read/processing thread activity
//! through this sink. The sequencer itself does not consume these events;
//! the default sink discards them.

/// Callbacks invoked by the dataset loader around its internal work
pub trait DatasetEventsSink: Send {
    /// Number of data reading threads the loader will run
    fn data_read_threads_count(&mut self, count: usize);

    /// One data reading thread started a read
    fn data_read_start(&mut self, thread_id: usize);

    /// One data reading thread finished a read
    fn data_read_end(&mut self, thread_id: usize, bytes_read: usize);

    /// Number of image processing threads the loader will run
    fn processing_threads_count(&mut self, count: usize);

    /// One processing thread started decoding an image
    fn processing_start(&mut self, thread_id: usize);

    /// One processing thread finished decoding an image
    fn processing_end(&mut self, thread_id: usize);
}

/// Sink that discards all events
#[derive(Debug, Default)]
pub struct NullEventsSink;

impl DatasetEventsSink for NullEventsSink {
    fn data_read_threads_count(&mut self, _count: usize) {}

    fn data_read_start(&mut self, _thread_id: usize) {}

    fn data_read_end(&mut self, _thread_id: usize, _bytes_read: usize) {}

    fn processing_threads_count(&mut self, _count: usize) {}

    fn processing_start(&mut self, _thread_id: usize) {}

    fn processing_end(&mut self, _thread_id: usize) {}
}
