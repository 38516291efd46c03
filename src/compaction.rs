//! Compaction
//!
//! Collapses closed segments into a single segment holding only the freshest
//! value for each key.
//!
//! ## Freshest-value selection
//! Inputs are visited newest → oldest and a key is kept the first time it is
//! seen. Within one segment the index already points at the latest record, so
//! first-seen under newest-first order is the freshest write overall.
//!
//! Committing the result (rename, delete, list swap) is the engine's job; see
//! `Engine::merge`.

use std::collections::BTreeMap;
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender, TrySendError};

use crate::config::SyncStrategy;
use crate::directory::ClosedSegment;
use crate::error::{Result, SegKvError};
use crate::segment::Segment;

/// Summary of one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Closed segments consumed
    pub input_segments: usize,

    /// Distinct keys written to the merged segment
    pub keys_written: usize,

    /// Total size of the inputs
    pub bytes_before: u64,

    /// Size of the merged segment
    pub bytes_after: u64,
}

/// For every key, the input position and offset of its freshest record
///
/// `inputs` must be in creation order (oldest first).
pub fn collect_freshest(inputs: &[ClosedSegment]) -> BTreeMap<Vec<u8>, (usize, u64)> {
    let mut freshest = BTreeMap::new();

    for (position, input) in inputs.iter().enumerate().rev() {
        for (key, offset) in input.segment.index_entries() {
            freshest.entry(key).or_insert((position, offset));
        }
    }

    freshest
}

/// Write the freshest records of `inputs` to `output` and seal the result
///
/// Records are written in key order. The caller owns `output` and must remove
/// it if this fails.
pub fn write_merged(inputs: &[ClosedSegment], output: &Path) -> Result<(Segment, MergeStats)> {
    let freshest = collect_freshest(inputs);

    // Sealing fsyncs once at the end; no need to sync per record.
    let merged = Segment::create(
        output,
        SyncStrategy::EveryNEntries { count: usize::MAX },
    )?;

    for (key, (position, offset)) in &freshest {
        let record = inputs[*position].segment.read_at(*offset)?;
        merged.append(key, &record.value)?;
    }

    merged.seal()?;

    let stats = MergeStats {
        input_segments: inputs.len(),
        keys_written: freshest.len(),
        bytes_before: inputs.iter().map(|input| input.segment.size()).sum(),
        bytes_after: merged.size(),
    };

    Ok((merged, stats))
}

// =============================================================================
// Background Merge Worker
// =============================================================================

/// Worker thread that runs merges on request
///
/// Requests coalesce: while one is pending, further requests are dropped.
/// The worker exits when the merger is shut down or dropped, or when a merge
/// reports that the engine is closed.
pub struct BackgroundMerger {
    requests: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundMerger {
    /// Spawn the worker; `merge` runs once per accepted request
    pub fn spawn<F>(merge: F) -> Result<Self>
    where
        F: Fn() -> Result<MergeStats> + Send + 'static,
    {
        let (tx, rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("segkv-merge".to_string())
            .spawn(move || {
                for () in rx.iter() {
                    match merge() {
                        Ok(stats) => tracing::debug!(
                            "Background merge: {} segments → {} keys",
                            stats.input_segments,
                            stats.keys_written
                        ),
                        Err(SegKvError::EngineClosed) => break,
                        Err(e) => tracing::warn!("Background merge failed: {}", e),
                    }
                }
            })?;

        Ok(Self {
            requests: Some(tx),
            handle: Some(handle),
        })
    }

    /// Ask for a merge without blocking
    pub fn request(&self) {
        if let Some(tx) = &self.requests {
            match tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    tracing::warn!("Background merge worker has stopped");
                }
            }
        }
    }

    /// Stop accepting requests and wait for the worker to finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Dropping the sender ends the worker's receive loop.
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Background merge worker panicked");
            }
        }
    }
}

impl Drop for BackgroundMerger {
    fn drop(&mut self) {
        self.stop();
    }
}
