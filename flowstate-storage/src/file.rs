//! File-backed repository.
//!
//! Every definition and instance lives in its own JSON document:
//!
//! ```text
//! <dir>/definitions/<id>.json
//! <dir>/instances/<id>.json
//! ```
//!
//! Each document wraps the record in an envelope carrying a CRC32C of the
//! record so torn or hand-edited files are detected on load. Writes go to a
//! temporary file that is renamed over the target, and the in-memory view
//! only changes after the rename, so a failed save leaves both the disk and
//! memory at the previous version.

use crate::error::StorageError;
use crate::memory::InMemoryRepository;
use crate::repository::Repository;
use flowstate_core::{DefinitionId, InstanceId, WorkflowDefinition, WorkflowInstance};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFINITIONS_DIR: &str = "definitions";
const INSTANCES_DIR: &str = "instances";

/// File repository configuration.
#[derive(Debug, Clone)]
pub struct FileRepositoryConfig {
    /// Base directory for all records.
    pub dir: PathBuf,
    /// Fsync each record before it is renamed into place.
    pub sync_writes: bool,
}

impl FileRepositoryConfig {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            sync_writes: true,
        }
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RecordKind {
    Definition,
    Instance,
}

/// On-disk document.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    kind: RecordKind,
    checksum: String,
    record: Value,
}

impl Envelope {
    fn wrap<T: Serialize>(kind: RecordKind, record: &T) -> Result<Self, StorageError> {
        let record = serde_json::to_value(record)?;
        let checksum = checksum(&record)?;
        Ok(Self {
            kind,
            checksum,
            record,
        })
    }

    fn into_record<T: DeserializeOwned>(self, expected: RecordKind) -> Result<T, StorageError> {
        if self.kind != expected {
            return Err(StorageError::Corruption(format!(
                "expected {:?} record, found {:?}",
                expected, self.kind
            )));
        }
        let actual = checksum(&self.record)?;
        if actual != self.checksum {
            return Err(StorageError::Corruption(format!(
                "checksum mismatch: stored {}, computed {}",
                self.checksum, actual
            )));
        }
        Ok(serde_json::from_value(self.record)?)
    }
}

fn checksum(record: &Value) -> Result<String, StorageError> {
    let bytes = serde_json::to_vec(record)?;
    Ok(format!("{:08x}", crc32c::crc32c(&bytes)))
}

/// Ids become file names, so anything that could escape the directory is refused.
fn check_id(id: &str) -> Result<(), StorageError> {
    if id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains(['/', '\\', '\0'])
    {
        return Err(StorageError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Write-through repository persisting one JSON document per record.
pub struct FileRepository {
    config: FileRepositoryConfig,
    cache: InMemoryRepository,
}

impl FileRepository {
    /// Opens or creates a repository at the configured directory and loads
    /// every record found there.
    pub fn open(config: FileRepositoryConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(config.dir.join(DEFINITIONS_DIR))?;
        fs::create_dir_all(config.dir.join(INSTANCES_DIR))?;

        let repo = Self {
            config,
            cache: InMemoryRepository::new(),
        };
        repo.load()?;
        Ok(repo)
    }

    fn load(&self) -> Result<(), StorageError> {
        let mut skipped = 0;

        for path in self.record_files(DEFINITIONS_DIR)? {
            let loaded = read_record::<WorkflowDefinition>(&path, RecordKind::Definition)
                .and_then(|d| check_file_name(&path, d.id.as_str()).map(|_| d));
            match loaded {
                Ok(definition) => {
                    self.cache.save_definition(definition)?;
                }
                Err(e) => {
                    tracing::warn!("Skipping definition file {}: {}", path.display(), e);
                    skipped += 1;
                }
            }
        }

        for path in self.record_files(INSTANCES_DIR)? {
            let loaded = read_record::<WorkflowInstance>(&path, RecordKind::Instance)
                .and_then(|i| check_file_name(&path, i.id.as_str()).map(|_| i));
            match loaded {
                Ok(instance) => {
                    self.cache.save_instance(instance)?;
                }
                Err(e) => {
                    tracing::warn!("Skipping instance file {}: {}", path.display(), e);
                    skipped += 1;
                }
            }
        }

        tracing::info!(
            "Loaded {} definitions and {} instances from {} ({} skipped)",
            self.cache.definition_count(),
            self.cache.instance_count(),
            self.config.dir.display(),
            skipped
        );

        Ok(())
    }

    fn record_files(&self, subdir: &str) -> Result<Vec<PathBuf>, StorageError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(self.config.dir.join(subdir))? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn record_path(&self, subdir: &str, id: &str) -> PathBuf {
        self.config.dir.join(subdir).join(format!("{}.json", id))
    }

    /// Writes `envelope` to a temp file and renames it over `path`.
    fn write_record(&self, path: &Path, envelope: &Envelope) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(envelope)?;
        let tmp = path.with_extension("json.tmp");

        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        if self.config.sync_writes {
            file.sync_all()?;
        }
        drop(file);

        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn read_record<T: DeserializeOwned>(path: &Path, kind: RecordKind) -> Result<T, StorageError> {
    let reader = BufReader::new(File::open(path)?);
    let envelope: Envelope = serde_json::from_reader(reader)?;
    envelope.into_record(kind)
}

/// A record is only trusted under the file name its id maps to.
fn check_file_name(path: &Path, id: &str) -> Result<(), StorageError> {
    let stem = path.file_stem().and_then(|s| s.to_str());
    if id.is_empty() || stem != Some(id) {
        return Err(StorageError::Corruption(format!(
            "record id {:?} does not match file name",
            id
        )));
    }
    Ok(())
}

impl Repository for FileRepository {
    fn get_definition(
        &self,
        id: &DefinitionId,
    ) -> Result<Option<Arc<WorkflowDefinition>>, StorageError> {
        self.cache.get_definition(id)
    }

    fn save_definition(
        &self,
        mut definition: WorkflowDefinition,
    ) -> Result<DefinitionId, StorageError> {
        if definition.id.is_empty() {
            definition.id = DefinitionId::generate();
        }
        check_id(definition.id.as_str())?;

        let path = self.record_path(DEFINITIONS_DIR, definition.id.as_str());
        self.write_record(&path, &Envelope::wrap(RecordKind::Definition, &definition)?)?;
        tracing::debug!("Persisted definition {} to {}", definition.id, path.display());

        self.cache.save_definition(definition)
    }

    fn list_definitions(&self) -> Result<Vec<Arc<WorkflowDefinition>>, StorageError> {
        self.cache.list_definitions()
    }

    fn get_instance(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, StorageError> {
        self.cache.get_instance(id)
    }

    fn save_instance(&self, mut instance: WorkflowInstance) -> Result<InstanceId, StorageError> {
        if instance.id.is_empty() {
            instance.id = InstanceId::generate();
        }
        check_id(instance.id.as_str())?;

        let path = self.record_path(INSTANCES_DIR, instance.id.as_str());
        self.write_record(&path, &Envelope::wrap(RecordKind::Instance, &instance)?)?;
        tracing::debug!("Persisted instance {} to {}", instance.id, path.display());

        self.cache.save_instance(instance)
    }

    fn list_instances(&self) -> Result<Vec<WorkflowInstance>, StorageError> {
        self.cache.list_instances()
    }
}
