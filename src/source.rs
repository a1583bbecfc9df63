//! Data source / sharded sequencer
//!
//! Connects the dataset loader to the downstream batch packer: owns epoch
//! bookkeeping and worker-shard arithmetic, and materializes one minibatch
//! of per-stream sequences per request by pulling examples one at a time.

use tracing::{debug, info};

use crate::config::{SourceConfig, StreamDescriptor};
use crate::error::{Result, SequencerError};
use crate::events::NullEventsSink;
use crate::example::ExampleAdapter;
use crate::loader::{DatasetLoader, RuntimeParam};
use crate::sequence::{DenseSequence, SequenceData, Sequences, SparseSequence};
use crate::sharding::worker_epoch_share;
use crate::stream::{reversed, SampleShape, StorageKind, StreamDescription, StreamSchema};
use crate::FULL_DATASET_EPOCH_SIZE;

/// Parameters for one epoch
#[derive(Debug, Clone, Copy)]
pub struct EpochConfiguration {
    /// Rank of this worker
    pub worker_rank: usize,
    /// Total number of workers
    pub number_of_workers: usize,
    /// Global minibatch size in samples
    pub minibatch_size_in_samples: usize,
    /// Global epoch size in samples; [`FULL_DATASET_EPOCH_SIZE`] means the
    /// entire dataset
    pub total_epoch_size_in_samples: usize,
}

/// Reader parameters validated against the running epoch
#[derive(Debug, Clone, Copy)]
pub struct ReaderConfiguration {
    /// Rank of this worker
    pub worker_rank: usize,
    /// Total number of workers
    pub number_of_workers: usize,
    /// Global minibatch size in samples
    pub minibatch_size_in_samples: usize,
}

/// Interface the batch packer pulls sequences through
pub trait SequenceSource {
    /// Descriptions of the streams this source produces
    fn stream_descriptions(&self) -> &[StreamDescription];

    /// Begin a new epoch, computing this worker's exact sample share
    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()>;

    /// Validate that the reader parameters have not drifted since the epoch
    /// started. Never mutates state.
    fn set_configuration(&self, config: &ReaderConfiguration) -> Result<()>;

    /// Materialize the next minibatch of per-stream sequences
    fn get_next_sequences(&mut self, total_sample_count: usize) -> Result<Sequences>;
}

/// Sharded sequencer over an external dataset loader
#[derive(Debug)]
pub struct DataSource<L: DatasetLoader> {
    /// Performs loading of the dataset
    loader: L,
    /// Adapter holding the current in-flight example
    example: ExampleAdapter,
    /// Stream declarations from the configuration
    descriptors: Vec<StreamDescriptor>,
    /// Derived input/output stream descriptions
    schema: StreamSchema,
    /// Distributed reading parameters, fixed for the object's lifetime
    worker_rank: usize,
    number_of_workers: usize,
    /// mIoU workaround: every worker traverses the entire dataset
    epoch_override: bool,
    /// Size of the current minibatch
    minibatch_size: usize,
    /// Whether the last minibatch is merged into the one before it
    append_last_minibatch: bool,
    /// This worker's epoch size
    epoch_size: usize,
    /// Samples consumed so far this epoch
    epoch_samples_read: usize,
}

impl<L: DatasetLoader> DataSource<L> {
    /// Open the dataset loader per the configuration and derive the stream
    /// schema from one probed example.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let worker_rank = config.resolved_worker_rank();
        let number_of_workers = config.resolved_workers_count();
        // Every later division and shard computation assumes at least one
        // worker and a rank inside the topology.
        if number_of_workers == 0 || worker_rank >= number_of_workers {
            return Err(SequencerError::InvalidWorkerTopology {
                worker_rank,
                workers: number_of_workers,
            });
        }

        let mut params = Vec::new();
        if config.worker_rank.is_some() && !config.epoch_override {
            params.push(RuntimeParam::LoaderIndex(worker_rank));
        }
        if config.workers_count.is_some() && !config.epoch_override {
            params.push(RuntimeParam::LoadersCount(number_of_workers));
        }
        // In override mode the loader believes it is the sole reader and
        // iterates the full dataset, which keeps full-traversal metrics
        // such as mean-IoU correct on every worker.
        if let Some(dir) = &config.dataset_dir {
            params.push(RuntimeParam::SourcePath(dir.clone()));
        }
        if let Some(ids) = config.ids_file_list() {
            params.push(RuntimeParam::SourceIds(ids));
        }

        let mut loader = L::open(
            &config.load_config_path,
            &params,
            Box::new(NullEventsSink),
        )?;

        let blob_names: Vec<String> = (0..loader.blob_count())
            .map(|index| loader.blob_name(index).to_string())
            .collect();
        debug!("Dataset blobs: {:?}", blob_names);

        // Pull one example so blob shapes are known for schema derivation.
        let mut example = ExampleAdapter::new(blob_names)?;
        loader.fill_next_example(&mut example)?;

        let schema = StreamSchema::derive(&config.streams, &example)?;

        info!(
            "Data source ready: {} examples, {} input streams, worker {}/{}",
            loader.example_count(),
            schema.inputs.len(),
            worker_rank,
            number_of_workers
        );

        Ok(Self {
            loader,
            example,
            descriptors: config.streams.clone(),
            schema,
            worker_rank,
            number_of_workers,
            epoch_override: config.epoch_override,
            minibatch_size: 0,
            append_last_minibatch: false,
            epoch_size: 0,
            epoch_samples_read: 0,
        })
    }

    /// Streams as they leave the dataset loader
    pub fn input_stream_descriptions(&self) -> &[StreamDescription] {
        &self.schema.inputs
    }

    /// Streams as they leave this sequencer (always dense)
    pub fn output_stream_descriptions(&self) -> &[StreamDescription] {
        &self.schema.outputs
    }

    /// This worker's epoch size after shard arithmetic
    pub fn epoch_size(&self) -> usize {
        self.epoch_size
    }

    fn resolve_global_epoch_size(&self, config: &EpochConfiguration) -> usize {
        if config.total_epoch_size_in_samples == FULL_DATASET_EPOCH_SIZE {
            if self.epoch_override {
                // Every worker individually traverses the whole set.
                self.number_of_workers * self.loader.example_count()
            } else {
                self.loader.example_count()
            }
        } else {
            config.total_epoch_size_in_samples
        }
    }

    /// Convert one sparse label blob into a one-hot sparse sequence and,
    /// when declared, its ignore-mask companion. Returns the number of
    /// stream slots consumed.
    fn fill_sparse_streams(
        example: &mut ExampleAdapter,
        inputs: &[StreamDescription],
        descriptor: &StreamDescriptor,
        stream_index: usize,
        sample_id: usize,
        data: &mut [Vec<SequenceData>],
    ) -> Result<usize> {
        let dims = inputs[stream_index].sample_shape;
        let spatial_size = dims[0] * dims[1];
        let out_channels = dims[2];

        // The mask starts all-ones ("do not ignore") and is zeroed below at
        // positions carrying the sentinel label.
        let mut mask: Option<(Vec<f32>, SampleShape)> = None;
        if descriptor.ignore_stream.is_some() {
            if stream_index + 1 >= inputs.len() {
                return Err(SequencerError::MissingIgnoreStream {
                    stream: descriptor.name.clone(),
                });
            }
            let mask_shape = inputs[stream_index + 1].sample_shape;
            mask = Some((
                vec![1.0; mask_shape[0] * mask_shape[1] * mask_shape[2]],
                mask_shape,
            ));
        }

        let labels = example.take_blob_data(&descriptor.dataset_name)?;
        if labels.len() != spatial_size {
            return Err(SequencerError::SparseSampleSizeMismatch {
                expected: spatial_size,
                actual: labels.len(),
            });
        }

        // One nonzero per spatial position.
        let mut indices = vec![0u32; labels.len()];
        for (position, &label) in labels.iter().enumerate() {
            let channel = label as i64;

            if let (Some((mask_data, _)), Some(ignore)) =
                (mask.as_mut(), descriptor.ignore_stream.as_ref())
            {
                if channel == ignore.ignore_label {
                    mask_data[position] = 0.0;
                    // The packer still needs a structurally valid nonzero
                    // here; the position itself addresses channel 0 of this
                    // output and carries no gradient signal.
                    indices[position] = position as u32;
                    continue;
                }
            }

            if channel < 0 || channel as usize >= out_channels {
                return Err(SequencerError::LabelOutOfRange {
                    label: channel,
                    channels: out_channels,
                });
            }
            indices[position] = (channel as usize * spatial_size + position) as u32;
        }

        let nnz = labels.len() as u32;
        data[stream_index].push(SequenceData::Sparse(SparseSequence {
            id: sample_id,
            number_of_samples: 1,
            values: vec![1.0; labels.len()],
            indices,
            nnz_counts: vec![nnz],
            total_nnz: nnz,
            sample_shape: dims,
        }));

        match mask {
            Some((mask_data, mask_shape)) => {
                data[stream_index + 1].push(SequenceData::Dense(DenseSequence {
                    id: sample_id,
                    number_of_samples: 1,
                    data: mask_data,
                    sample_shape: mask_shape,
                }));
                Ok(2)
            }
            None => Ok(1),
        }
    }
}

impl<L: DatasetLoader> SequenceSource for DataSource<L> {
    fn stream_descriptions(&self) -> &[StreamDescription] {
        self.input_stream_descriptions()
    }

    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()> {
        // The previous epoch must have been consumed exactly.
        if self.epoch_size != self.epoch_samples_read {
            return Err(SequencerError::EpochNotExhausted {
                expected: self.epoch_size,
                read: self.epoch_samples_read,
            });
        }
        // Distributed topology is fixed for the object's lifetime.
        if self.worker_rank != config.worker_rank {
            return Err(SequencerError::WorkerRankChanged {
                expected: self.worker_rank,
                actual: config.worker_rank,
            });
        }
        if self.number_of_workers != config.number_of_workers {
            return Err(SequencerError::WorkerCountChanged {
                expected: self.number_of_workers,
                actual: config.number_of_workers,
            });
        }

        self.minibatch_size = config.minibatch_size_in_samples;
        if self.minibatch_size % self.number_of_workers != 0 {
            return Err(SequencerError::MinibatchNotDivisible {
                minibatch_size: self.minibatch_size,
                workers: self.number_of_workers,
            });
        }

        let global_epoch_size = self.resolve_global_epoch_size(config);
        let share = worker_epoch_share(
            global_epoch_size,
            self.minibatch_size,
            self.worker_rank,
            self.number_of_workers,
        );
        self.epoch_size = share.samples;
        self.append_last_minibatch = share.append_last_minibatch;
        self.epoch_samples_read = 0;

        info!(
            "Epoch started: global size {}, worker share {}, minibatch {}",
            global_epoch_size, self.epoch_size, self.minibatch_size
        );
        Ok(())
    }

    fn set_configuration(&self, config: &ReaderConfiguration) -> Result<()> {
        if config.number_of_workers != self.number_of_workers {
            return Err(SequencerError::WorkerCountChanged {
                expected: self.number_of_workers,
                actual: config.number_of_workers,
            });
        }
        if config.worker_rank != self.worker_rank {
            return Err(SequencerError::WorkerRankChanged {
                expected: self.worker_rank,
                actual: config.worker_rank,
            });
        }
        if config.minibatch_size_in_samples != self.minibatch_size {
            return Err(SequencerError::MinibatchSizeChanged {
                expected: self.minibatch_size,
                actual: config.minibatch_size_in_samples,
            });
        }
        Ok(())
    }

    fn get_next_sequences(&mut self, total_sample_count: usize) -> Result<Sequences> {
        // We are always asked for exactly one global minibatch.
        if total_sample_count != self.minibatch_size {
            return Err(SequencerError::SampleCountMismatch {
                minibatch_size: self.minibatch_size,
                requested: total_sample_count,
            });
        }

        let mut sample_count = total_sample_count / self.number_of_workers;
        if sample_count == 0 {
            return Err(SequencerError::TooManyWorkers);
        }

        // End-of-epoch adjustment: the final request may carry fewer samples,
        // or one extra when the last minibatch is merged into this one.
        let mut end_of_epoch = false;
        let remaining = self.epoch_size - self.epoch_samples_read;
        if self.append_last_minibatch && remaining <= 2 * sample_count {
            if remaining != sample_count + 1 {
                return Err(SequencerError::AppendOverflow {
                    remaining,
                    sample_count,
                });
            }
            sample_count = remaining;
            end_of_epoch = true;
        } else if !self.append_last_minibatch && remaining <= sample_count {
            sample_count = remaining;
            end_of_epoch = true;
        }

        let mut data: Vec<Vec<SequenceData>> = (0..self.schema.inputs.len())
            .map(|_| Vec::with_capacity(sample_count))
            .collect();

        for sample_id in 0..sample_count {
            let mut stream_index = 0;
            for descriptor in &self.descriptors {
                match descriptor.storage {
                    StorageKind::Dense => {
                        let shape = reversed(self.example.blob_shape(&descriptor.dataset_name)?);
                        // Ownership moves from the adapter; the memory layout
                        // is unchanged, only the shape notation differs.
                        let buffer = self.example.take_blob_data(&descriptor.dataset_name)?;
                        data[stream_index].push(SequenceData::Dense(DenseSequence {
                            id: sample_id,
                            number_of_samples: 1,
                            data: buffer,
                            sample_shape: shape,
                        }));
                        stream_index += 1;
                    }
                    StorageKind::SparseColumn => {
                        stream_index += Self::fill_sparse_streams(
                            &mut self.example,
                            &self.schema.inputs,
                            descriptor,
                            stream_index,
                            sample_id,
                            &mut data,
                        )?;
                    }
                }
            }
            // Advance only after every stream of this sample is filled.
            self.loader.fill_next_example(&mut self.example)?;
        }

        self.epoch_samples_read += sample_count;
        debug!(
            "Materialized minibatch of {} samples ({}/{} this epoch)",
            sample_count, self.epoch_samples_read, self.epoch_size
        );

        Ok(Sequences { data, end_of_epoch })
    }
}
