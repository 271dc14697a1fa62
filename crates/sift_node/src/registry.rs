//! In-memory index metadata, fed by `FT.INTERNAL_UPDATE`.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use sift_meta::{GlobalMetadataEntry, GlobalMetadataVersionHeader, MetadataApplier};

#[derive(Default)]
struct RegistryInner {
    /// type name -> id -> latest entry. Deletions stay as tombstones so an
    /// older upsert cannot bring an identifier back.
    entries: HashMap<String, BTreeMap<String, GlobalMetadataEntry>>,
    header: Option<GlobalMetadataVersionHeader>,
}

/// Versioned metadata store used as the node's applier.
#[derive(Default)]
pub struct MetadataRegistry {
    inner: RwLock<RegistryInner>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live identifiers of `type_name`, sorted.
    pub fn ids(&self, type_name: &str) -> Vec<String> {
        let Ok(guard) = self.inner.read() else {
            return Vec::new();
        };
        guard
            .entries
            .get(type_name)
            .map(|by_id| {
                by_id
                    .iter()
                    .filter(|(_, entry)| !entry.is_deletion())
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, type_name: &str, id: &str) -> Option<GlobalMetadataEntry> {
        let guard = self.inner.read().ok()?;
        guard
            .entries
            .get(type_name)?
            .get(id)
            .filter(|entry| !entry.is_deletion())
            .cloned()
    }

    pub fn header(&self) -> Option<GlobalMetadataVersionHeader> {
        self.inner.read().ok()?.header
    }
}

impl MetadataApplier for MetadataRegistry {
    fn apply(
        &self,
        type_name: &str,
        id: &str,
        entry: &GlobalMetadataEntry,
        header: &GlobalMetadataVersionHeader,
    ) -> anyhow::Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("metadata registry lock poisoned"))?;

        if let Some(current) = guard.header {
            anyhow::ensure!(
                header.top_level_version >= current.top_level_version,
                "stale version header for {id}: top-level version {} is older than {}",
                header.top_level_version,
                current.top_level_version
            );
        }

        let by_id = guard.entries.entry(type_name.to_string()).or_default();
        match by_id.get(id) {
            Some(existing) if entry.version < existing.version => {
                anyhow::bail!(
                    "stale metadata for {type_name}/{id}: version {} is older than {}",
                    entry.version,
                    existing.version
                );
            }
            Some(existing) if entry.version == existing.version => {
                anyhow::ensure!(
                    entry.fingerprint == existing.fingerprint,
                    "conflicting metadata for {type_name}/{id}: version {} fingerprint {} differs from {}",
                    entry.version,
                    entry.fingerprint,
                    existing.fingerprint
                );
                tracing::debug!(type_name, index_id = id, version = entry.version, "metadata already applied");
            }
            _ => {
                by_id.insert(id.to_string(), entry.clone());
            }
        }

        guard.header = Some(*header);
        Ok(())
    }
}
