//! Stream descriptions derived from configuration and probed blob shapes
//!
//! Each configured stream descriptor yields one entry in the input list
//! (storage kind as declared) and one in the output list (always dense,
//! since the downstream packer requires dense tensors). A sparse descriptor
//! with an ignore sub-stream yields a second, dense mask entry in both
//! lists, directly after its data entry; sequence assembly relies on that
//! lockstep ordering.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StreamDescriptor;
use crate::error::{Result, SequencerError};
use crate::example::{BlobShape, ExampleAdapter};

/// Storage kind of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Fully populated tensor
    Dense,
    /// One nonzero index per spatial position (one-hot across channels)
    SparseColumn,
}

/// Element kind of a stream; the dataset serves float data only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Float,
}

/// Sample shape of a stream: always exactly 3 components, with the loader's
/// native width-last order reversed.
pub type SampleShape = [usize; 3];

/// Reverse a loader-native shape into the downstream tensor convention
pub fn reversed(shape: BlobShape) -> SampleShape {
    [shape[2], shape[1], shape[0]]
}

/// Immutable description of one derived stream
#[derive(Debug, Clone)]
pub struct StreamDescription {
    /// Position within its description list
    pub id: usize,
    /// Reader-facing stream name
    pub name: String,
    /// Element kind (always float)
    pub element_kind: ElementKind,
    /// Storage kind of the stream in this list
    pub storage: StorageKind,
    /// Per-sample tensor shape
    pub sample_shape: SampleShape,
}

/// Derived input and output stream description lists, in lockstep order
#[derive(Debug, Clone)]
pub struct StreamSchema {
    /// Streams as they leave the dataset loader
    pub inputs: Vec<StreamDescription>,
    /// Streams as they leave this sequencer (always dense)
    pub outputs: Vec<StreamDescription>,
}

impl StreamSchema {
    /// Derive the schema from configured descriptors and the shapes probed
    /// from one example, validating every descriptor against the dataset.
    pub fn derive(descriptors: &[StreamDescriptor], example: &ExampleAdapter) -> Result<Self> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();

        for descriptor in descriptors {
            // Probing also checks that the backing blob exists in the dataset.
            let shape = reversed(example.blob_shape(&descriptor.dataset_name)?);

            match descriptor.storage {
                StorageKind::Dense => {
                    if descriptor.ignore_stream.is_some() {
                        return Err(SequencerError::DenseIgnoreUnsupported {
                            stream: descriptor.name.clone(),
                        });
                    }
                    push_pair(&mut inputs, &mut outputs, &descriptor.name, shape);
                }
                StorageKind::SparseColumn => {
                    // Sparse data carries one label per spatial position.
                    if shape[2] != 1 {
                        return Err(SequencerError::InvalidSparseShape {
                            stream: descriptor.name.clone(),
                            channels: shape[2],
                        });
                    }
                    if descriptor.dimension == 0 {
                        return Err(SequencerError::InvalidSparseDimension {
                            stream: descriptor.name.clone(),
                            dimension: descriptor.dimension,
                        });
                    }
                    let sample_shape = [shape[0], shape[1], descriptor.dimension];
                    push_description(&mut inputs, &descriptor.name, sample_shape, StorageKind::SparseColumn);
                    push_description(&mut outputs, &descriptor.name, sample_shape, StorageKind::Dense);

                    if let Some(ignore) = &descriptor.ignore_stream {
                        // The mask is always dense, one value per position.
                        let mask_shape = [shape[0], shape[1], 1];
                        push_pair(&mut inputs, &mut outputs, &ignore.name, mask_shape);
                    }
                }
            }
        }

        debug!(
            "Derived stream schema: {} input streams, {} output streams",
            inputs.len(),
            outputs.len()
        );

        Ok(Self { inputs, outputs })
    }
}

fn push_description(
    list: &mut Vec<StreamDescription>,
    name: &str,
    sample_shape: SampleShape,
    storage: StorageKind,
) {
    let id = list.len();
    list.push(StreamDescription {
        id,
        name: name.to_string(),
        element_kind: ElementKind::Float,
        storage,
        sample_shape,
    });
}

fn push_pair(
    inputs: &mut Vec<StreamDescription>,
    outputs: &mut Vec<StreamDescription>,
    name: &str,
    sample_shape: SampleShape,
) {
    push_description(inputs, name, sample_shape, StorageKind::Dense);
    push_description(outputs, name, sample_shape, StorageKind::Dense);
}
