//! Decoded, ready-to-play clips keyed by slot id.
//!
//! The cache owns every [`DecodedBuffer`] it hands out; callers receive cheap shared handles.
//! Decode failures are per-slot values, never panics, so one bad clip cannot stop the others
//! from loading.

use std::collections::{HashMap, HashSet};
use std::thread;

use crate::audio_engine::errors::{DecodeFailure, SampleLoadError};
use crate::audio_engine::sample_loader::{OutputFormat, decode_bytes_to_buffer, extension_hint};
use crate::messages::DecodedBuffer;
use crate::store::AssetFetcher;

/// Result of the two-stage decode pipeline.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// The clip is cached and can be played on the low-latency path.
    Ready(DecodedBuffer),

    /// The bytes exist but only the fallback player can attempt them.
    FallbackRequired(DecodeFailure),

    /// Nothing playable: the source is missing or empty.
    Failed(DecodeFailure),
}

impl From<Result<DecodedBuffer, DecodeFailure>> for DecodeOutcome {
    fn from(result: Result<DecodedBuffer, DecodeFailure>) -> Self {
        match result {
            Ok(buffer) => DecodeOutcome::Ready(buffer),
            Err(failure) if failure.requires_fallback() => DecodeOutcome::FallbackRequired(failure),
            Err(failure) => DecodeOutcome::Failed(failure),
        }
    }
}

/// A default asset to fetch and decode for a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadRequest {
    pub slot_id: String,
    pub url: String,
}

impl PreloadRequest {
    pub fn new(slot_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            slot_id: slot_id.into(),
            url: url.into(),
        }
    }
}

/// Outcome of a batch preload.
#[derive(Debug, Default)]
pub struct PreloadReport {
    /// Slots that are cached after the batch, including ones cached beforehand.
    pub loaded: Vec<String>,

    /// Slots that could not be fetched or decoded.
    pub failures: Vec<DecodeFailure>,
}

impl PreloadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct DecodeCache {
    format: OutputFormat,
    entries: HashMap<String, DecodedBuffer>,
}

impl DecodeCache {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            entries: HashMap::new(),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Switches the target format. Entries decoded for another format are dropped.
    pub fn retarget(&mut self, format: OutputFormat) {
        if self.format == format {
            return;
        }

        if !self.entries.is_empty() {
            log::info!(
                "Output format changed ({} ch@{} Hz -> {} ch@{} Hz), dropping {} cached clips",
                self.format.channels,
                self.format.sample_rate,
                format.channels,
                format.sample_rate,
                self.entries.len()
            );
        }
        self.format = format;
        self.entries.clear();
    }

    /// Fetches and decodes a default asset unless the slot is already cached.
    ///
    /// An existing entry is returned as-is without touching the fetcher.
    pub fn preload(
        &mut self,
        slot_id: &str,
        url: &str,
        fetcher: &dyn AssetFetcher,
    ) -> Result<DecodedBuffer, DecodeFailure> {
        if let Some(existing) = self.entries.get(slot_id) {
            return Ok(existing.clone());
        }

        let buffer = fetch_and_decode(slot_id, url, fetcher, self.format)?;
        self.entries.insert(slot_id.to_string(), buffer.clone());
        Ok(buffer)
    }

    /// Decodes in-memory bytes for a slot, replacing whatever was cached for it.
    ///
    /// On failure the previous entry is evicted as well: the slot's sound has been replaced
    /// and the old clip must not be played in its place.
    pub fn decode(
        &mut self,
        slot_id: &str,
        bytes: Vec<u8>,
        hint: Option<&str>,
    ) -> Result<DecodedBuffer, DecodeFailure> {
        match decode_bytes_to_buffer(bytes, hint, self.format) {
            Ok(buffer) => {
                self.entries.insert(slot_id.to_string(), buffer.clone());
                Ok(buffer)
            }
            Err(source) => {
                self.entries.remove(slot_id);
                Err(DecodeFailure::new(slot_id, source))
            }
        }
    }

    pub fn get(&self, slot_id: &str) -> Option<DecodedBuffer> {
        self.entries.get(slot_id).cloned()
    }

    pub fn contains(&self, slot_id: &str) -> bool {
        self.entries.contains_key(slot_id)
    }

    /// Drops the entry for a slot. Returns whether there was one.
    pub fn evict(&mut self, slot_id: &str) -> bool {
        self.entries.remove(slot_id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Preloads many default assets concurrently.
    ///
    /// Each uncached slot is fetched and decoded on its own scoped worker thread. Failures are
    /// collected in the report and never interrupt the rest of the batch.
    pub fn preload_all(
        &mut self,
        requests: &[PreloadRequest],
        fetcher: &(dyn AssetFetcher + Sync),
    ) -> PreloadReport {
        let mut report = PreloadReport::default();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for request in requests {
            if !seen.insert(request.slot_id.as_str()) {
                continue;
            }
            if self.entries.contains_key(&request.slot_id) {
                report.loaded.push(request.slot_id.clone());
            } else {
                pending.push(request);
            }
        }

        let format = self.format;
        let results: Vec<(String, Result<DecodedBuffer, DecodeFailure>)> = thread::scope(|scope| {
            let workers: Vec<_> = pending
                .iter()
                .map(|request| {
                    let worker = scope.spawn(move || {
                        fetch_and_decode(&request.slot_id, &request.url, fetcher, format)
                    });
                    (request.slot_id.clone(), worker)
                })
                .collect();

            workers
                .into_iter()
                .map(|(slot_id, worker)| {
                    let result = worker.join().unwrap_or_else(|_| {
                        Err(DecodeFailure::new(
                            slot_id.as_str(),
                            SampleLoadError::Io(std::io::Error::other("preload worker panicked")),
                        ))
                    });
                    (slot_id, result)
                })
                .collect()
        });

        for (slot_id, result) in results {
            match result {
                Ok(buffer) => {
                    self.entries.insert(slot_id.clone(), buffer);
                    report.loaded.push(slot_id);
                }
                Err(failure) => {
                    log::warn!("Preload failed: {failure}");
                    report.failures.push(failure);
                }
            }
        }

        log::info!(
            "Preloaded {} of {} sounds",
            report.loaded.len(),
            report.loaded.len() + report.failures.len()
        );
        report
    }
}

fn fetch_and_decode(
    slot_id: &str,
    url: &str,
    fetcher: &dyn AssetFetcher,
    format: OutputFormat,
) -> Result<DecodedBuffer, DecodeFailure> {
    let bytes = fetcher
        .fetch(url)
        .map_err(|err| DecodeFailure::new(slot_id, SampleLoadError::Io(err)))?;
    decode_bytes_to_buffer(bytes, extension_hint(url), format)
        .map_err(|source| DecodeFailure::new(slot_id, source))
}
