//! Deterministic per-worker epoch sharding
//!
//! Splits a global epoch across a fixed set of workers so that every sample
//! is accounted for exactly once. Full minibatches split evenly; the
//! remainder (less than one minibatch) is distributed as evenly as possible,
//! with the leftover samples going one each to the lowest-ranked workers.

use tracing::debug;

/// This worker's exact share of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochShare {
    /// Number of samples this worker consumes during the epoch
    pub samples: usize,
    /// True when this worker's final samples must be merged into the
    /// second-to-last minibatch because not every worker gets a final
    /// partial minibatch.
    pub append_last_minibatch: bool,
}

/// Compute one worker's share of a global epoch.
///
/// `minibatch_size` must be divisible by `number_of_workers`; the caller
/// validates that before computing shares.
pub fn worker_epoch_share(
    global_epoch_size: usize,
    minibatch_size: usize,
    worker_rank: usize,
    number_of_workers: usize,
) -> EpochShare {
    // Full minibatches split evenly across workers.
    let mut samples = ((global_epoch_size / minibatch_size) * minibatch_size) / number_of_workers;
    let mut append_last_minibatch = false;

    let remainder = global_epoch_size % minibatch_size;
    if remainder != 0 {
        // Less than one minibatch of samples left over, distribute evenly.
        let remainder_per_worker = remainder / number_of_workers;
        let all_workers_active_in_last_minibatch = remainder_per_worker != 0;
        samples += remainder_per_worker;

        let extra = remainder % number_of_workers;
        if extra != 0 && worker_rank < extra {
            // Straggler samples (< number_of_workers) go to the lowest ranks.
            samples += 1;
            if !all_workers_active_in_last_minibatch {
                // Not enough data to keep every worker busy in a final
                // partial minibatch; merge it into the one before.
                append_last_minibatch = true;
            }
        }
    }

    debug!(
        "Worker {}/{} epoch share: {} samples (append_last_minibatch={})",
        worker_rank, number_of_workers, samples, append_last_minibatch
    );

    EpochShare {
        samples,
        append_last_minibatch,
    }
}
