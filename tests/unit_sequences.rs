//! Unit tests for minibatch sequence materialization
//!
//! Drives a `DataSource` against an in-memory fake dataset loader and
//! checks dense moves, sparse one-hot construction, ignore masks, and the
//! epoch call protocol.

use std::cell::RefCell;

use shardfeed_core::config::{IgnoreStreamSpec, SourceConfig, StreamDescriptor};
use shardfeed_core::error::{Result, SequencerError};
use shardfeed_core::events::DatasetEventsSink;
use shardfeed_core::example::ExampleAdapter;
use shardfeed_core::loader::{DatasetLoader, RuntimeParam};
use shardfeed_core::sequence::SequenceData;
use shardfeed_core::source::{DataSource, EpochConfiguration, ReaderConfiguration, SequenceSource};
use shardfeed_core::stream::StorageKind;
use shardfeed_core::FULL_DATASET_EPOCH_SIZE;

thread_local! {
    static LAST_OPEN_PARAMS: RefCell<Vec<RuntimeParam>> = const { RefCell::new(Vec::new()) };
}

/// In-memory loader serving two blobs: a dense "image" of native shape
/// (2, 2, 3) whose values encode the example index, and a "labels" blob of
/// native shape (1, 1, 3) carrying the same configured labels per example.
///
/// Opened with a path of the form `fake:{example_count}:{l0,l1,l2}`.
#[derive(Debug)]
struct FakeLoader {
    example_count: usize,
    labels: Vec<f32>,
    position: usize,
}

impl FakeLoader {
    fn image_data(example: usize) -> Vec<f32> {
        (0..12).map(|j| (example * 12 + j) as f32).collect()
    }
}

impl DatasetLoader for FakeLoader {
    fn open(
        load_config_path: &str,
        params: &[RuntimeParam],
        _events: Box<dyn DatasetEventsSink>,
    ) -> Result<Self> {
        LAST_OPEN_PARAMS.with(|p| *p.borrow_mut() = params.to_vec());

        let mut parts = load_config_path.split(':');
        let (Some("fake"), Some(count), Some(labels)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(SequencerError::Loader {
                message: format!("Unsupported load config path: {load_config_path}"),
            });
        };
        let example_count = count.parse().map_err(|_| SequencerError::Loader {
            message: format!("Bad example count in {load_config_path}"),
        })?;
        let labels = labels
            .split(',')
            .map(|l| l.parse::<f32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| SequencerError::Loader {
                message: format!("Bad labels in {load_config_path}"),
            })?;

        Ok(Self {
            example_count,
            labels,
            position: 0,
        })
    }

    fn blob_count(&self) -> usize {
        2
    }

    fn blob_name(&self, index: usize) -> &str {
        match index {
            0 => "image",
            _ => "labels",
        }
    }

    fn example_count(&self) -> usize {
        self.example_count
    }

    fn fill_next_example(&mut self, example: &mut ExampleAdapter) -> Result<()> {
        example.reshape_blob(0, 2, 2, 3);
        example
            .blob_memory(0)
            .copy_from_slice(&Self::image_data(self.position));

        example.reshape_blob(1, 1, 1, 3);
        example.blob_memory(1).copy_from_slice(&self.labels);

        self.position = (self.position + 1) % self.example_count;
        Ok(())
    }
}

fn dense_stream(name: &str, dataset_name: &str) -> StreamDescriptor {
    StreamDescriptor {
        name: name.into(),
        dataset_name: dataset_name.into(),
        storage: StorageKind::Dense,
        dimension: 0,
        ignore_stream: None,
    }
}

fn sparse_stream(dimension: usize, ignore_label: Option<i64>) -> StreamDescriptor {
    StreamDescriptor {
        name: "targets".into(),
        dataset_name: "labels".into(),
        storage: StorageKind::SparseColumn,
        dimension,
        ignore_stream: ignore_label.map(|label| IgnoreStreamSpec {
            name: "targets_mask".into(),
            ignore_label: label,
        }),
    }
}

fn source_config(
    example_count: usize,
    labels: &str,
    streams: Vec<StreamDescriptor>,
) -> SourceConfig {
    SourceConfig {
        load_config_path: format!("fake:{example_count}:{labels}"),
        worker_rank: None,
        workers_count: None,
        dataset_dir: None,
        ids_files: None,
        epoch_override: false,
        streams,
    }
}

fn epoch(workers: usize, rank: usize, minibatch: usize, total: usize) -> EpochConfiguration {
    EpochConfiguration {
        worker_rank: rank,
        number_of_workers: workers,
        minibatch_size_in_samples: minibatch,
        total_epoch_size_in_samples: total,
    }
}

#[test]
fn test_stream_descriptions_lockstep() {
    let config = source_config(
        4,
        "2,0,1",
        vec![dense_stream("features", "image"), sparse_stream(3, Some(2))],
    );
    let source = DataSource::<FakeLoader>::new(&config).unwrap();

    let inputs = source.stream_descriptions();
    assert_eq!(inputs.len(), 3);
    assert_eq!(inputs[0].name, "features");
    assert_eq!(inputs[0].storage, StorageKind::Dense);
    assert_eq!(inputs[0].sample_shape, [3, 2, 2]);
    assert_eq!(inputs[1].name, "targets");
    assert_eq!(inputs[1].storage, StorageKind::SparseColumn);
    assert_eq!(inputs[1].sample_shape, [3, 1, 3]);
    assert_eq!(inputs[2].name, "targets_mask");
    assert_eq!(inputs[2].storage, StorageKind::Dense);
    assert_eq!(inputs[2].sample_shape, [3, 1, 1]);

    // The packer-facing output list is dense throughout.
    assert!(source
        .output_stream_descriptions()
        .iter()
        .all(|d| d.storage == StorageKind::Dense));
}

#[test]
fn test_dense_round_trip() {
    let config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();
    source.start_epoch(&epoch(1, 0, 2, 4)).unwrap();

    let batch = source.get_next_sequences(2).unwrap();
    assert_eq!(batch.data.len(), 1);
    assert_eq!(batch.data[0].len(), 2);
    assert!(!batch.end_of_epoch);

    for (sample, sequence) in batch.data[0].iter().enumerate() {
        let SequenceData::Dense(dense) = sequence else {
            panic!("expected dense sequence");
        };
        assert_eq!(dense.id, sample);
        assert_eq!(dense.number_of_samples, 1);
        // Buffer moved byte-for-byte out of the adapter, shape reversed.
        assert_eq!(dense.data, FakeLoader::image_data(sample));
        assert_eq!(dense.sample_shape, [3, 2, 2]);
    }
}

#[test]
fn test_sparse_one_hot_construction() {
    let config = source_config(4, "2,0,1", vec![sparse_stream(3, None)]);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();
    source.start_epoch(&epoch(1, 0, 1, 2)).unwrap();

    let batch = source.get_next_sequences(1).unwrap();
    let SequenceData::Sparse(sparse) = &batch.data[0][0] else {
        panic!("expected sparse sequence");
    };
    // spatial size 3, labels [2,0,1]: index = label * 3 + position.
    assert_eq!(sparse.indices, vec![6, 1, 5]);
    assert_eq!(sparse.values, vec![1.0, 1.0, 1.0]);
    assert_eq!(sparse.nnz_counts, vec![3]);
    assert_eq!(sparse.total_nnz, 3);
    assert_eq!(sparse.sample_shape, [3, 1, 3]);
}

#[test]
fn test_ignore_label_zeroes_mask() {
    let config = source_config(4, "2,1,0", vec![sparse_stream(3, Some(2))]);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();
    source.start_epoch(&epoch(1, 0, 1, 2)).unwrap();

    let batch = source.get_next_sequences(1).unwrap();
    assert_eq!(batch.data.len(), 2);

    let SequenceData::Sparse(sparse) = &batch.data[0][0] else {
        panic!("expected sparse sequence");
    };
    // Position 0 carries the sentinel: it gets a structurally valid dummy
    // index (channel 0 at that position) instead of failing.
    assert_eq!(sparse.indices, vec![0, 4, 2]);

    let SequenceData::Dense(mask) = &batch.data[1][0] else {
        panic!("expected dense mask sequence");
    };
    assert_eq!(mask.data, vec![0.0, 1.0, 1.0]);
    assert_eq!(mask.sample_shape, [3, 1, 1]);
}

#[test]
fn test_label_out_of_range() {
    let config = source_config(4, "5,0,1", vec![sparse_stream(3, None)]);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();
    source.start_epoch(&epoch(1, 0, 1, 2)).unwrap();

    let err = source.get_next_sequences(1).unwrap_err();
    assert!(matches!(err, SequencerError::LabelOutOfRange { label: 5, .. }));
    assert!(err.is_schema());
    assert!(!err.is_protocol());
}

#[test]
fn test_sample_count_must_match_minibatch() {
    let config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();
    source.start_epoch(&epoch(1, 0, 3, 6)).unwrap();

    let err = source.get_next_sequences(4).unwrap_err();
    assert!(matches!(
        err,
        SequencerError::SampleCountMismatch {
            minibatch_size: 3,
            requested: 4,
        }
    ));
}

#[test]
fn test_end_of_epoch_partial_final_minibatch() {
    let config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();
    source.start_epoch(&epoch(1, 0, 3, 7)).unwrap();
    assert_eq!(source.epoch_size(), 7);

    let sizes: Vec<(usize, bool)> = (0..3)
        .map(|_| {
            let batch = source.get_next_sequences(3).unwrap();
            (batch.data[0].len(), batch.end_of_epoch)
        })
        .collect();
    assert_eq!(sizes, vec![(3, false), (3, false), (1, true)]);

    // Epoch fully consumed, the next one may start.
    source.start_epoch(&epoch(1, 0, 3, 7)).unwrap();
}

#[test]
fn test_append_merges_one_extra_sample() {
    let mut config = source_config(8, "2,0,1", vec![dense_stream("features", "image")]);
    config.worker_rank = Some(0);
    config.workers_count = Some(2);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();

    // Rank 0 of 2 over 101 samples with minibatch 10: share is 51 with the
    // leftover sample merged into the second-to-last minibatch.
    source.start_epoch(&epoch(2, 0, 10, 101)).unwrap();
    assert_eq!(source.epoch_size(), 51);

    let mut consumed = 0;
    let mut last = (0, false);
    for _ in 0..10 {
        let batch = source.get_next_sequences(10).unwrap();
        consumed += batch.data[0].len();
        last = (batch.data[0].len(), batch.end_of_epoch);
        if batch.end_of_epoch {
            break;
        }
    }
    assert_eq!(consumed, 51);
    // Final request consumed its 5 samples plus the one appended.
    assert_eq!(last, (6, true));
}

#[test]
fn test_epoch_restart_requires_full_consumption() {
    let config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();
    source.start_epoch(&epoch(1, 0, 2, 4)).unwrap();
    source.get_next_sequences(2).unwrap();

    let err = source.start_epoch(&epoch(1, 0, 2, 4)).unwrap_err();
    assert!(matches!(
        err,
        SequencerError::EpochNotExhausted {
            expected: 4,
            read: 2,
        }
    ));
}

#[test]
fn test_topology_is_static() {
    let config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();

    let err = source.start_epoch(&epoch(1, 1, 2, 4)).unwrap_err();
    assert!(matches!(err, SequencerError::WorkerRankChanged { .. }));
    assert!(err.is_protocol());
    assert!(!err.is_schema());

    let err = source.start_epoch(&epoch(2, 0, 2, 4)).unwrap_err();
    assert!(matches!(err, SequencerError::WorkerCountChanged { .. }));
}

#[test]
fn test_invalid_worker_topology_rejected_at_construction() {
    // A zero worker count would divide by zero in every later shard
    // computation; it must fail as a configuration error up front.
    let mut config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    config.workers_count = Some(0);
    let err = DataSource::<FakeLoader>::new(&config).unwrap_err();
    assert!(matches!(
        err,
        SequencerError::InvalidWorkerTopology {
            worker_rank: 0,
            workers: 0,
        }
    ));

    // A rank outside the topology is equally impossible to shard for.
    config.workers_count = Some(2);
    config.worker_rank = Some(2);
    let err = DataSource::<FakeLoader>::new(&config).unwrap_err();
    assert!(matches!(
        err,
        SequencerError::InvalidWorkerTopology {
            worker_rank: 2,
            workers: 2,
        }
    ));
}

#[test]
fn test_minibatch_must_divide_by_workers() {
    let mut config = source_config(8, "2,0,1", vec![dense_stream("features", "image")]);
    config.worker_rank = Some(0);
    config.workers_count = Some(2);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();

    let err = source.start_epoch(&epoch(2, 0, 5, 20)).unwrap_err();
    assert!(matches!(
        err,
        SequencerError::MinibatchNotDivisible {
            minibatch_size: 5,
            workers: 2,
        }
    ));
}

#[test]
fn test_set_configuration_validates_without_mutation() {
    let config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();
    source.start_epoch(&epoch(1, 0, 2, 4)).unwrap();

    source
        .set_configuration(&ReaderConfiguration {
            worker_rank: 0,
            number_of_workers: 1,
            minibatch_size_in_samples: 2,
        })
        .unwrap();

    let err = source
        .set_configuration(&ReaderConfiguration {
            worker_rank: 0,
            number_of_workers: 1,
            minibatch_size_in_samples: 4,
        })
        .unwrap_err();
    assert!(matches!(err, SequencerError::MinibatchSizeChanged { .. }));

    // Validation only: requests still honor the original minibatch size.
    let batch = source.get_next_sequences(2).unwrap();
    assert_eq!(batch.data[0].len(), 2);
}

#[test]
fn test_full_dataset_sentinel() {
    let mut config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    config.worker_rank = Some(0);
    config.workers_count = Some(2);
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();

    source
        .start_epoch(&epoch(2, 0, 4, FULL_DATASET_EPOCH_SIZE))
        .unwrap();
    // Dataset of 4 split between 2 workers.
    assert_eq!(source.epoch_size(), 2);
}

#[test]
fn test_epoch_override_traverses_full_dataset() {
    let mut config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    config.worker_rank = Some(0);
    config.workers_count = Some(2);
    config.epoch_override = true;
    let mut source = DataSource::<FakeLoader>::new(&config).unwrap();

    source
        .start_epoch(&epoch(2, 0, 4, FULL_DATASET_EPOCH_SIZE))
        .unwrap();
    // Sentinel resolves to workers * examples, so each worker's share is
    // the whole dataset.
    assert_eq!(source.epoch_size(), 4);
}

#[test]
fn test_override_hides_topology_from_loader() {
    let mut config = source_config(4, "2,0,1", vec![dense_stream("features", "image")]);
    config.worker_rank = Some(1);
    config.workers_count = Some(2);
    config.dataset_dir = Some("/data/images".into());
    config.ids_files = Some("a.txt|b.txt".into());

    DataSource::<FakeLoader>::new(&config).unwrap();
    let params = LAST_OPEN_PARAMS.with(|p| p.borrow().clone());
    assert!(params.contains(&RuntimeParam::LoaderIndex(1)));
    assert!(params.contains(&RuntimeParam::LoadersCount(2)));
    assert!(params.contains(&RuntimeParam::SourcePath("/data/images".into())));
    assert!(params.contains(&RuntimeParam::SourceIds(vec!["a.txt".into(), "b.txt".into()])));

    config.epoch_override = true;
    DataSource::<FakeLoader>::new(&config).unwrap();
    let params = LAST_OPEN_PARAMS.with(|p| p.borrow().clone());
    // The loader believes it is the sole reader over the full dataset.
    assert!(!params
        .iter()
        .any(|p| matches!(p, RuntimeParam::LoaderIndex(_) | RuntimeParam::LoadersCount(_))));
    assert!(params.contains(&RuntimeParam::SourcePath("/data/images".into())));
}
