//! Binary metadata records carried by `FT.INTERNAL_UPDATE`.
//!
//! Both records are protobuf messages produced by the coordinator. They are
//! decoded independently: a damaged entry says nothing about the header.

use std::fmt;

use prost::Message;

/// One index-metadata mutation as serialized by the coordinator.
///
/// An entry without `content` (or with an empty type tag inside it) is a
/// deletion marker.
#[derive(Clone, PartialEq, Message)]
pub struct GlobalMetadataEntry {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(uint32, tag = "2")]
    pub encoding_version: u32,
    #[prost(uint64, tag = "3")]
    pub fingerprint: u64,
    #[prost(message, optional, tag = "4")]
    pub content: Option<prost_types::Any>,
}

/// Cluster-wide version stamp sent alongside every entry.
#[derive(Clone, Copy, PartialEq, Eq, Message)]
pub struct GlobalMetadataVersionHeader {
    #[prost(uint64, tag = "1")]
    pub top_level_version: u64,
    #[prost(uint64, tag = "2")]
    pub top_level_fingerprint: u64,
}

impl GlobalMetadataEntry {
    pub fn is_deletion(&self) -> bool {
        self.content
            .as_ref()
            .map_or(true, |content| content.type_url.is_empty())
    }

    pub fn mutation(&self) -> MutationKind {
        if self.is_deletion() {
            MutationKind::Delete
        } else {
            MutationKind::Upsert
        }
    }
}

/// Observational classification of an entry. Never used for control flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    Upsert,
    Delete,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Upsert => "upsert",
            MutationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the two binary arguments a failure refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    MetadataEntry,
    VersionHeader,
}

impl RecordKind {
    pub fn name(self) -> &'static str {
        match self {
            RecordKind::MetadataEntry => "GlobalMetadataEntry",
            RecordKind::VersionHeader => "GlobalMetadataVersionHeader",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn decode_entry(bytes: &[u8]) -> Result<GlobalMetadataEntry, prost::DecodeError> {
    GlobalMetadataEntry::decode(bytes)
}

pub fn decode_header(bytes: &[u8]) -> Result<GlobalMetadataVersionHeader, prost::DecodeError> {
    GlobalMetadataVersionHeader::decode(bytes)
}
