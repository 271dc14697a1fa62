//! Interfaces the handler delegates to.

use crate::records::{GlobalMetadataEntry, GlobalMetadataVersionHeader};

/// Metadata type tag under which index schemas are applied.
pub const INDEX_SCHEMA_METADATA_TYPE: &str = "vs_index_schema";

/// Applies a parsed update to the node's metadata state.
///
/// Implementations own version ordering and conflict detection; a rejected
/// update is reported as an error and its message is passed to the caller
/// unchanged during live operation.
pub trait MetadataApplier: Send + Sync {
    fn apply(
        &self,
        type_name: &str,
        id: &str,
        entry: &GlobalMetadataEntry,
        header: &GlobalMetadataVersionHeader,
    ) -> anyhow::Result<()>;
}

/// Outbound replication / persistence stream of the node.
///
/// Receives the original command arguments exactly as they arrived.
pub trait ReplicationSink: Send + Sync {
    fn replicate_verbatim(&self, argv: &[Vec<u8>]) -> anyhow::Result<()>;
}

/// Drops every emission. Used while replaying a log that already holds the record.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardReplication;

impl ReplicationSink for DiscardReplication {
    fn replicate_verbatim(&self, _argv: &[Vec<u8>]) -> anyhow::Result<()> {
        Ok(())
    }
}
