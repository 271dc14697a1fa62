//! `FT.INTERNAL_UPDATE <id> <metadata-entry> <version-header>`
//!
//! Replication-only command emitted by the coordinator. It is received live
//! from a primary and again when the node replays its append-only file. Flow:
//! decode the entry, decode the header, hand both to the applier, then
//! re-emit the original arguments untouched.

use crate::collaborators::{MetadataApplier, ReplicationSink, INDEX_SCHEMA_METADATA_TYPE};
use crate::command::INTERNAL_UPDATE_ARITY;
use crate::error::{Failure, UpdateError};
use crate::policy::{resolve, OperatingContext, Recovery};
use crate::records::{decode_entry, decode_header, RecordKind};
use crate::stats::UpdateStats;

/// Everything the handler reads from its host for one call.
///
/// Hosts build this per invocation so the loading and skip flags are never
/// stale.
pub struct UpdateContext<'a> {
    pub operating: OperatingContext,
    pub skip_corrupted_entries: bool,
    pub applier: &'a dyn MetadataApplier,
    pub replication: &'a dyn ReplicationSink,
    pub stats: &'a UpdateStats,
}

/// Successful outcome. Both variants reply `OK`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    Applied,
    /// A damaged or rejected record was dropped during replay.
    Skipped,
}

pub fn ft_internal_update(ctx: &UpdateContext<'_>, argv: &[Vec<u8>]) -> Result<Ack, UpdateError> {
    if argv.len() != INTERNAL_UPDATE_ARITY {
        return Err(UpdateError::WrongArity { got: argv.len() });
    }

    let id = String::from_utf8_lossy(&argv[1]).into_owned();

    let entry_bytes = &argv[2];
    let entry = match decode_entry(entry_bytes) {
        Ok(entry) => entry,
        Err(err) => {
            return on_parse_failure(ctx, &id, RecordKind::MetadataEntry, entry_bytes.len(), err)
        }
    };

    let header_bytes = &argv[3];
    let header = match decode_header(header_bytes) {
        Ok(header) => header,
        Err(err) => {
            return on_parse_failure(ctx, &id, RecordKind::VersionHeader, header_bytes.len(), err)
        }
    };

    tracing::debug!(
        index_id = %id,
        mutation = %entry.mutation(),
        version = entry.version,
        fingerprint = entry.fingerprint,
        top_level_version = header.top_level_version,
        loading = ctx.operating.is_loading(),
        "applying internal metadata update"
    );

    if let Err(err) = ctx
        .applier
        .apply(INDEX_SCHEMA_METADATA_TYPE, &id, &entry, &header)
    {
        return on_apply_failure(ctx, &id, err);
    }
    ctx.stats.record_applied();

    ctx.replication
        .replicate_verbatim(argv)
        .map_err(UpdateError::Replication)?;
    Ok(Ack::Applied)
}

fn on_parse_failure(
    ctx: &UpdateContext<'_>,
    id: &str,
    record: RecordKind,
    len: usize,
    err: prost::DecodeError,
) -> Result<Ack, UpdateError> {
    tracing::warn!(
        index_id = %id,
        record = %record,
        data_len = len,
        error = %err,
        "failed to parse {record} in FT.INTERNAL_UPDATE; data corruption or logic bug"
    );
    ctx.stats.record_parse_failure();

    match resolve(ctx.operating, ctx.skip_corrupted_entries) {
        Recovery::Surface => Err(UpdateError::Corrupt { record, len }),
        Recovery::Skip => Ok(skip(ctx, id)),
        Recovery::Fatal => Err(UpdateError::Fatal(Failure::Corrupt { record, len })),
    }
}

fn on_apply_failure(
    ctx: &UpdateContext<'_>,
    id: &str,
    err: anyhow::Error,
) -> Result<Ack, UpdateError> {
    tracing::warn!(
        index_id = %id,
        error = %format!("{err:#}"),
        "metadata applier rejected FT.INTERNAL_UPDATE"
    );
    ctx.stats.record_process_failure();

    match resolve(ctx.operating, ctx.skip_corrupted_entries) {
        Recovery::Surface => Err(UpdateError::Apply(err)),
        Recovery::Skip => Ok(skip(ctx, id)),
        Recovery::Fatal => Err(UpdateError::Fatal(Failure::Apply {
            message: format!("{err:#}"),
        })),
    }
}

fn skip(ctx: &UpdateContext<'_>, id: &str) -> Ack {
    tracing::warn!(index_id = %id, "skipping corrupted AOF entry due to configuration");
    ctx.stats.record_skipped();
    Ack::Skipped
}
