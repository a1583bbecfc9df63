//! Source configuration and stream descriptors
//!
//! Typed configuration for the sequencer plus parsing from the flat
//! key/value parameters handed over by the training harness.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, SequencerError};
use crate::stream::StorageKind;
use crate::{DEFAULT_WORKER_COUNT, DEFAULT_WORKER_RANK, IDS_FILE_SEPARATOR};

/// Ignore-label sub-stream specification for a sparse stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreStreamSpec {
    /// Name of the synthesized ignore-mask stream
    pub name: String,
    /// Sentinel label value marking positions to ignore
    pub ignore_label: i64,
}

/// Declaration of one reader-facing stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Reader-facing stream name
    pub name: String,
    /// Name of the backing blob inside the dataset
    pub dataset_name: String,
    /// Storage kind of the data as it leaves the dataset
    pub storage: StorageKind,
    /// Channel dimension of the final dense layout (sparse streams only)
    #[serde(default)]
    pub dimension: usize,
    /// Optional ignore-mask sub-stream (sparse streams only)
    #[serde(default)]
    pub ignore_stream: Option<IgnoreStreamSpec>,
}

/// Full configuration for constructing a [`crate::DataSource`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path of the dataset load configuration handed to the loader
    pub load_config_path: String,
    /// Rank of this worker among the distributed readers
    #[serde(default)]
    pub worker_rank: Option<usize>,
    /// Total number of distributed readers
    #[serde(default)]
    pub workers_count: Option<usize>,
    /// Optional dataset directory override
    #[serde(default)]
    pub dataset_dir: Option<String>,
    /// Optional `|`-separated list of id-file paths
    #[serde(default)]
    pub ids_files: Option<String>,
    /// mIoU workaround: every worker traverses the entire dataset
    #[serde(default)]
    pub epoch_override: bool,
    /// Declared reader-facing streams
    pub streams: Vec<StreamDescriptor>,
}

impl SourceConfig {
    /// Build a configuration from flat key/value parameters.
    ///
    /// Recognized keys: `loadConfigPath`, `workerRank`, `workersCount`,
    /// `datasetDir`, `idsFiles`, `epochOverride` (presence alone enables the
    /// override). Stream descriptors are passed separately since they are
    /// structured.
    pub fn from_key_values(
        params: &HashMap<String, String>,
        streams: Vec<StreamDescriptor>,
    ) -> Result<Self> {
        let load_config_path = params
            .get("loadConfigPath")
            .cloned()
            .ok_or_else(|| SequencerError::Configuration {
                message: "Missing loadConfigPath parameter".into(),
            })?;

        Ok(Self {
            load_config_path,
            worker_rank: parse_usize(params, "workerRank")?,
            workers_count: parse_usize(params, "workersCount")?,
            dataset_dir: params.get("datasetDir").cloned(),
            ids_files: params.get("idsFiles").cloned(),
            epoch_override: params.contains_key("epochOverride"),
            streams,
        })
    }

    /// Worker rank with its default applied
    pub fn resolved_worker_rank(&self) -> usize {
        self.worker_rank.unwrap_or(DEFAULT_WORKER_RANK)
    }

    /// Worker count with its default applied
    pub fn resolved_workers_count(&self) -> usize {
        self.workers_count.unwrap_or(DEFAULT_WORKER_COUNT)
    }

    /// Split the configured ids-file list on the `|` separator
    pub fn ids_file_list(&self) -> Option<Vec<String>> {
        self.ids_files.as_ref().map(|list| {
            list.split(IDS_FILE_SEPARATOR)
                .map(|s| s.to_string())
                .collect()
        })
    }
}

fn parse_usize(params: &HashMap<String, String>, key: &str) -> Result<Option<usize>> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => raw.parse::<usize>().map(Some).map_err(|_| {
            SequencerError::Configuration {
                message: format!("Invalid value for {key}: {raw}"),
            }
        }),
    }
}
