use crate::cache::{CacheStats, DerivedCache};
use crate::dates::MonthKey;
use crate::dispatch::OwnerThread;
use crate::errors::{AppError, AppResult};
use crate::models::{AggregateKind, AggregateValue, ExpenseRecord, MonthAggregates, MonthPartition};
use crate::persist::{quarantine, read_json, write_json_atomic};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const EXPENSES_FILE: &str = "expenses.json";
pub const AGGREGATES_FILE: &str = "aggregates.json";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PartitionDocument {
    Current(MonthPartition),
    LegacyWrapped { expenses: Vec<LegacyExpense> },
    LegacyList(Vec<LegacyExpense>),
}

#[derive(Debug, Deserialize)]
struct LegacyExpense {
    amount: Decimal,
    #[serde(default)]
    description: String,
    date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct PartitionFiles {
    root: PathBuf,
}

impl PartitionFiles {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn month_dir(&self, month: MonthKey) -> PathBuf {
        self.root.join(month.folder_name())
    }

    pub fn partition_path(&self, month: MonthKey) -> PathBuf {
        self.month_dir(month).join(EXPENSES_FILE)
    }

    pub fn aggregates_path(&self, month: MonthKey) -> PathBuf {
        self.month_dir(month).join(AGGREGATES_FILE)
    }

    pub fn load(&self, month: MonthKey) -> AppResult<MonthPartition> {
        let path = self.partition_path(month);
        let Some(document) = read_json::<PartitionDocument>(&path)? else {
            return Ok(MonthPartition::empty(month));
        };
        let malformed = |reason: String| {
            AppError::Malformed(format!("{}: {}", path.to_string_lossy(), reason))
        };

        match document {
            PartitionDocument::Current(partition) => {
                if partition.month != month {
                    return Err(malformed(format!(
                        "file holds month {} instead of {}",
                        partition.month, month
                    )));
                }
                partition.validate().map_err(malformed)?;
                Ok(partition)
            }
            PartitionDocument::LegacyWrapped { expenses } | PartitionDocument::LegacyList(expenses) => {
                let mut partition = MonthPartition::empty(month);
                for legacy in expenses {
                    let record = ExpenseRecord::new(legacy.amount, legacy.description, legacy.date)
                        .map_err(|error| malformed(error.to_string()))?;
                    partition
                        .insert_new(record)
                        .map_err(|error| malformed(error.to_string()))?;
                }
                tracing::info!(month = %month, count = partition.len(), "read legacy partition layout");
                Ok(partition)
            }
        }
    }

    /// Writes through a temp file and an atomic rename. On failure the
    /// previous file is intact and the caller still owns `partition`.
    pub fn save(&self, month: MonthKey, partition: &MonthPartition) -> AppResult<()> {
        if partition.month != month {
            return Err(AppError::InvalidInput(format!(
                "partition for {} cannot be saved as {}",
                partition.month, month
            )));
        }
        let path = self.partition_path(month);
        write_json_atomic(&path, partition).map_err(|error| match error {
            AppError::WriteFailed(_) => error,
            other => AppError::WriteFailed(other.to_string()),
        })
    }

    pub fn list_months(&self) -> AppResult<Vec<MonthKey>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(AppError::Access(format!("{}: {}", self.root.to_string_lossy(), error))),
        };
        let mut months = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|error| AppError::Access(error.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(month) = MonthKey::from_folder_name(&entry.file_name().to_string_lossy()) {
                months.insert(month);
            }
        }
        Ok(months.into_iter().collect())
    }

    pub fn quarantine(&self, month: MonthKey) -> AppResult<PathBuf> {
        quarantine(&self.partition_path(month))
    }
}

#[derive(Debug)]
pub struct PartitionSnapshots {
    files: PartitionFiles,
    loaded: HashMap<MonthKey, MonthPartition>,
}

impl PartitionSnapshots {
    pub fn new(files: PartitionFiles) -> Self {
        Self {
            files,
            loaded: HashMap::new(),
        }
    }

    pub fn files(&self) -> &PartitionFiles {
        &self.files
    }

    pub fn load(&mut self, month: MonthKey) -> AppResult<&MonthPartition> {
        if !self.loaded.contains_key(&month) {
            let partition = self.files.load(month)?;
            self.loaded.insert(month, partition);
        }
        self.loaded
            .get(&month)
            .ok_or_else(|| AppError::Internal(format!("partition {} vanished after load", month)))
    }

    pub fn get(&self, month: MonthKey) -> Option<&MonthPartition> {
        self.loaded.get(&month)
    }

    fn replace(&mut self, month: MonthKey, partition: MonthPartition) {
        self.loaded.insert(month, partition);
    }

    fn forget(&mut self, month: MonthKey) {
        self.loaded.remove(&month);
    }
}

#[derive(Debug)]
pub struct RecordStore {
    snapshots: PartitionSnapshots,
    cache: DerivedCache,
    owner: OwnerThread,
}

impl RecordStore {
    pub fn open(root: &Path) -> Self {
        let files = PartitionFiles::new(root);
        Self {
            cache: DerivedCache::with_mirror(files.clone()),
            snapshots: PartitionSnapshots::new(files),
            owner: OwnerThread::current(),
        }
    }

    pub fn without_cache_mirror(root: &Path) -> Self {
        Self {
            cache: DerivedCache::new(),
            snapshots: PartitionSnapshots::new(PartitionFiles::new(root)),
            owner: OwnerThread::current(),
        }
    }

    pub fn files(&self) -> &PartitionFiles {
        self.snapshots.files()
    }

    pub fn load(&mut self, month: MonthKey) -> AppResult<&MonthPartition> {
        self.owner.debug_check("RecordStore::load");
        self.snapshots.load(month)
    }

    /// Applies `apply` to a copy of the month's partition, persists it, then
    /// publishes it and invalidates the month's aggregates. If `apply` or the
    /// save fails, the in-memory partition stays at the last persisted state.
    pub fn mutate<R, F>(&mut self, month: MonthKey, apply: F) -> AppResult<R>
    where
        F: FnOnce(&mut MonthPartition) -> AppResult<R>,
    {
        self.owner.debug_check("RecordStore::mutate");
        let mut draft = self.snapshots.load(month)?.clone();
        let result = apply(&mut draft)?;
        if draft.month != month {
            return Err(AppError::InvalidInput(format!(
                "partition month is fixed at {}",
                month
            )));
        }
        draft.updated_at = Some(Utc::now());
        self.commit(month, draft)?;
        tracing::debug!(month = %month, "partition mutated");
        Ok(result)
    }

    pub fn save(&mut self, month: MonthKey, partition: &MonthPartition) -> AppResult<()> {
        self.owner.debug_check("RecordStore::save");
        self.commit(month, partition.clone())
    }

    fn commit(&mut self, month: MonthKey, partition: MonthPartition) -> AppResult<()> {
        if let Err(error) = self.snapshots.files().save(month, &partition) {
            tracing::warn!(month = %month, error = %error, "partition save failed; keeping last persisted state");
            return Err(error);
        }
        self.snapshots.replace(month, partition);
        self.cache.invalidate(month);
        Ok(())
    }

    pub fn aggregate(&mut self, month: MonthKey, kind: AggregateKind, as_of: NaiveDate) -> AppResult<AggregateValue> {
        self.owner.debug_check("RecordStore::aggregate");
        self.cache.get(month, kind, as_of, &mut self.snapshots)
    }

    pub fn aggregates(&mut self, month: MonthKey, as_of: NaiveDate) -> AppResult<MonthAggregates> {
        self.owner.debug_check("RecordStore::aggregates");
        self.cache
            .aggregates(month, as_of, &mut self.snapshots)
            .cloned()
    }

    pub fn months(&self) -> AppResult<Vec<MonthKey>> {
        let mut months: BTreeSet<MonthKey> = self.files().list_months()?.into_iter().collect();
        months.extend(
            self.snapshots
                .loaded
                .iter()
                .filter(|(_, partition)| !partition.is_empty())
                .map(|(month, _)| *month),
        );
        Ok(months.into_iter().collect())
    }

    pub fn quarantine(&mut self, month: MonthKey) -> AppResult<PathBuf> {
        self.owner.debug_check("RecordStore::quarantine");
        let moved = self.files().quarantine(month)?;
        self.snapshots.forget(month);
        self.cache.invalidate(month);
        Ok(moved)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
