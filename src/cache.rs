use crate::analytics::{compute, AnalyticsInput};
use crate::dates::MonthKey;
use crate::errors::{AppError, AppResult};
use crate::models::{AggregateKind, AggregateValue, MonthAggregates, MonthPartition};
use crate::persist::{read_json, write_json_atomic};
use crate::store::{PartitionFiles, PartitionSnapshots};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAggregates {
    pub fingerprint: u64,
    pub as_of: NaiveDate,
    pub aggregates: MonthAggregates,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    cached: CachedAggregates,
    fresh: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub computes: u64,
    pub mirror_hits: u64,
}

#[derive(Debug, Default)]
pub struct DerivedCache {
    entries: HashMap<MonthKey, CacheEntry>,
    mirror: Option<PartitionFiles>,
    stats: CacheStats,
}

impl DerivedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mirror(files: PartitionFiles) -> Self {
        Self {
            mirror: Some(files),
            ..Self::default()
        }
    }

    pub fn get(
        &mut self,
        month: MonthKey,
        kind: AggregateKind,
        as_of: NaiveDate,
        partitions: &mut PartitionSnapshots,
    ) -> AppResult<AggregateValue> {
        Ok(self.aggregates(month, as_of, partitions)?.value(kind))
    }

    pub fn aggregates(
        &mut self,
        month: MonthKey,
        as_of: NaiveDate,
        partitions: &mut PartitionSnapshots,
    ) -> AppResult<&MonthAggregates> {
        if self.is_fresh(month, as_of) {
            self.stats.hits += 1;
        } else {
            let cached = self.refresh(month, as_of, partitions)?;
            self.entries.insert(month, CacheEntry { cached, fresh: true });
        }
        self.entries
            .get(&month)
            .map(|entry| &entry.cached.aggregates)
            .ok_or_else(|| AppError::Internal(format!("aggregates for {} missing after refresh", month)))
    }

    pub fn invalidate(&mut self, month: MonthKey) {
        for key in [month, month.next()] {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.fresh = false;
            }
        }
    }

    pub fn is_fresh(&self, month: MonthKey, as_of: NaiveDate) -> bool {
        self.entries
            .get(&month)
            .is_some_and(|entry| entry.fresh && entry.cached.as_of == as_of)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn refresh(
        &mut self,
        month: MonthKey,
        as_of: NaiveDate,
        partitions: &mut PartitionSnapshots,
    ) -> AppResult<CachedAggregates> {
        let previous_month = month.previous();
        let has_previous = match partitions.load(previous_month) {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(month = %previous_month, error = %error, "previous month unreadable; trend computed without it");
                false
            }
        };
        partitions.load(month)?;
        let partition = partitions
            .get(month)
            .ok_or_else(|| AppError::Internal(format!("partition {} not loaded", month)))?;
        let previous = if has_previous {
            partitions.get(previous_month)
        } else {
            None
        };
        let fingerprint = fingerprint(partition, previous, as_of);

        if let Some(files) = &self.mirror {
            let path = files.aggregates_path(month);
            match read_json::<CachedAggregates>(&path) {
                Ok(Some(mirrored)) if mirrored.fingerprint == fingerprint && mirrored.as_of == as_of => {
                    self.stats.mirror_hits += 1;
                    return Ok(mirrored);
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::debug!(month = %month, error = %error, "ignoring unreadable aggregate mirror");
                }
            }
        }

        let cached = CachedAggregates {
            fingerprint,
            as_of,
            aggregates: compute(&AnalyticsInput {
                partition,
                previous,
                as_of,
            })?,
        };
        self.stats.computes += 1;

        if let Some(files) = &self.mirror {
            // Only months that already have a folder get a mirror.
            if files.partition_path(month).exists() {
                if let Err(error) = write_json_atomic(&files.aggregates_path(month), &cached) {
                    tracing::warn!(month = %month, error = %error, "aggregate mirror write failed");
                }
            }
        }
        Ok(cached)
    }
}

fn fingerprint(partition: &MonthPartition, previous: Option<&MonthPartition>, as_of: NaiveDate) -> u64 {
    let mut hasher = DefaultHasher::new();
    as_of.hash(&mut hasher);
    hash_partition(partition, &mut hasher);
    match previous {
        Some(previous) => {
            1u8.hash(&mut hasher);
            hash_partition(previous, &mut hasher);
        }
        None => 0u8.hash(&mut hasher),
    }
    hasher.finish()
}

fn hash_partition(partition: &MonthPartition, hasher: &mut DefaultHasher) {
    partition.month.to_string().hash(hasher);
    partition.len().hash(hasher);
    for (id, record) in partition.iter() {
        id.hash(hasher);
        record.amount.normalize().to_string().hash(hasher);
        record.description.hash(hasher);
        record.date.hash(hasher);
    }
}
