//! Metadata update ingestion for search nodes.
//!
//! This crate owns the `FT.INTERNAL_UPDATE` handler and the pieces it is
//! built from. Hosts supply a `MetadataApplier` and a `ReplicationSink`, then
//! call `ft_internal_update` for every live or replayed invocation.

pub mod collaborators;
pub mod command;
pub mod error;
pub mod internal_update;
pub mod policy;
pub mod records;
pub mod stats;

pub use collaborators::{
    DiscardReplication, MetadataApplier, ReplicationSink, INDEX_SCHEMA_METADATA_TYPE,
};
pub use command::{
    CommandCategory, INTERNAL_UPDATE_ARITY, INTERNAL_UPDATE_CATEGORIES, INTERNAL_UPDATE_COMMAND,
};
pub use error::{ErrorClass, Failure, UpdateError};
pub use internal_update::{ft_internal_update, Ack, UpdateContext};
pub use policy::{resolve, OperatingContext, Recovery};
pub use records::{
    decode_entry, decode_header, GlobalMetadataEntry, GlobalMetadataVersionHeader, MutationKind,
    RecordKind,
};
pub use stats::{UpdateStats, UpdateStatsSnapshot};
