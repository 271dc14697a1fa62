//! Append-only file holding every replicated `FT.INTERNAL_UPDATE`.
//!
//! Each record is `[u32 BE len][u32 BE crc32][payload]`, where the payload is
//! `[u32 BE argc]` followed by `[u32 BE len][bytes]` per argument. The node
//! replays the file at startup under the loading context.

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context;
use crc32fast::Hasher;
use sift_meta::ReplicationSink;

pub const AOF_FILE: &str = "appendonly.aof";

/// Length prefix plus checksum.
const RECORD_HEADER_LEN: usize = 8;

#[derive(Default, Debug, Clone, Copy)]
pub struct AofStatsSnapshot {
    pub appends: u64,
    pub append_bytes: u64,
    pub fsync_count: u64,
    pub fsync_total_us: u64,
    pub fsync_max_us: u64,
}

struct AofStats {
    appends: AtomicU64,
    append_bytes: AtomicU64,
    fsync_count: AtomicU64,
    fsync_total_us: AtomicU64,
    fsync_max_us: AtomicU64,
}

impl AofStats {
    const fn new() -> Self {
        Self {
            appends: AtomicU64::new(0),
            append_bytes: AtomicU64::new(0),
            fsync_count: AtomicU64::new(0),
            fsync_total_us: AtomicU64::new(0),
            fsync_max_us: AtomicU64::new(0),
        }
    }

    fn record_append(&self, bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.append_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_fsync(&self, dur: Duration) {
        let us = dur.as_micros().min(u128::from(u64::MAX)) as u64;
        self.fsync_count.fetch_add(1, Ordering::Relaxed);
        self.fsync_total_us.fetch_add(us, Ordering::Relaxed);
        self.fsync_max_us.fetch_max(us, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AofStatsSnapshot {
        AofStatsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            append_bytes: self.append_bytes.load(Ordering::Relaxed),
            fsync_count: self.fsync_count.load(Ordering::Relaxed),
            fsync_total_us: self.fsync_total_us.load(Ordering::Relaxed),
            fsync_max_us: self.fsync_max_us.load(Ordering::Relaxed),
        }
    }
}

static AOF_STATS: AofStats = AofStats::new();

pub fn stats_snapshot() -> AofStatsSnapshot {
    AOF_STATS.snapshot()
}

/// Result of scanning an AOF from disk.
#[derive(Debug, Default)]
pub struct AofLoad {
    pub records: Vec<Vec<Vec<u8>>>,
    /// Byte length covered by complete records.
    pub valid_len: u64,
    /// Bytes of an incomplete final record, if the last write was cut short.
    pub truncated_bytes: u64,
}

impl AofLoad {
    pub fn has_torn_tail(&self) -> bool {
        self.truncated_bytes > 0
    }
}

/// Appends verbatim command arguments. Doubles as the node's replication stream.
pub struct AofWriter {
    path: PathBuf,
    file: Mutex<File>,
    fsync: bool,
    /// Set once a partial record could not be rolled back.
    failed: AtomicBool,
}

impl AofWriter {
    /// Open (or create) the file for appending.
    ///
    /// `SIFT_AOF_FSYNC=false` turns off the per-append `sync_data`.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("create aof dir")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open aof {}", path.display()))?;
        let fsync = read_env_bool("SIFT_AOF_FSYNC", true);
        Ok(Self {
            path,
            file: Mutex::new(file),
            fsync,
            failed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. A failed write leaves the file as it was.
    pub fn append(&self, argv: &[Vec<u8>]) -> anyhow::Result<()> {
        let payload = encode_argv(argv)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("aof writer lock poisoned"))?;
        anyhow::ensure!(
            !self.failed.load(Ordering::Acquire),
            "aof {} holds a partial record; refusing further appends",
            self.path.display()
        );
        let result = append_or_rollback(&mut file, |file| {
            write_record(file, &payload).context("write aof record")?;
            file.flush()?;
            if self.fsync {
                let start = Instant::now();
                file.sync_data().context("sync aof")?;
                AOF_STATS.record_fsync(start.elapsed());
            }
            Ok(())
        });
        match result {
            Ok(()) => {
                AOF_STATS.record_append((RECORD_HEADER_LEN + payload.len()) as u64);
                Ok(())
            }
            Err(AppendFailure::RolledBack(err)) => Err(err),
            Err(AppendFailure::Dirty(err)) => {
                self.failed.store(true, Ordering::Release);
                Err(err)
            }
        }
    }
}

impl ReplicationSink for AofWriter {
    fn replicate_verbatim(&self, argv: &[Vec<u8>]) -> anyhow::Result<()> {
        self.append(argv)
    }
}

enum AppendFailure {
    /// The file is back at its length before the write.
    RolledBack(anyhow::Error),
    /// Partial bytes may remain at the end of the file.
    Dirty(anyhow::Error),
}

/// Run `write` at the end of `file` and cut the file back to its previous
/// length if it fails, so later appends never land after a partial record.
fn append_or_rollback(
    file: &mut File,
    write: impl FnOnce(&mut File) -> anyhow::Result<()>,
) -> Result<(), AppendFailure> {
    let start_len = file
        .metadata()
        .context("stat aof")
        .map_err(AppendFailure::RolledBack)?
        .len();
    let err = match write(&mut *file) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    match file.set_len(start_len) {
        Ok(()) => Err(AppendFailure::RolledBack(err)),
        Err(rollback) => {
            tracing::error!(
                error = %rollback,
                len = start_len,
                "failed to roll back partial aof record"
            );
            Err(AppendFailure::Dirty(err.context(format!(
                "roll back aof to {start_len} bytes: {rollback}"
            ))))
        }
    }
}

/// Read every complete record.
///
/// A missing file is an empty log. An incomplete final record is reported in
/// [`AofLoad::truncated_bytes`]. Checksum or argument-framing damage is an
/// error, and so is a length prefix that runs past the end of the file while
/// intact records still follow it.
pub fn read_records(path: &Path) -> anyhow::Result<AofLoad> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(AofLoad::default()),
        Err(err) => return Err(err).with_context(|| format!("read aof {}", path.display())),
    };

    let mut load = AofLoad::default();
    let mut offset = 0usize;
    while offset < data.len() {
        let start = offset;
        if data.len() - offset < RECORD_HEADER_LEN {
            load.truncated_bytes = (data.len() - start) as u64;
            break;
        }
        let len = read_u32_at(&data, &mut offset)? as usize;
        let expected_crc = read_u32_at(&data, &mut offset)?;
        if data.len() - offset < len {
            // A write cut short is the last thing in the file.
            if let Some(next) = find_record(&data, start + 1) {
                anyhow::bail!(
                    "aof record {} at offset {start} has a corrupt length prefix \
                     ({len} bytes claimed, intact record at offset {next})",
                    load.records.len()
                );
            }
            load.truncated_bytes = (data.len() - start) as u64;
            break;
        }
        let payload = &data[offset..offset + len];
        offset += len;

        anyhow::ensure!(
            checksum(payload) == expected_crc,
            "aof checksum mismatch in record {} at offset {start}",
            load.records.len()
        );
        let argv = decode_argv(payload).with_context(|| {
            format!("aof record {} at offset {start}", load.records.len())
        })?;
        load.records.push(argv);
        load.valid_len = offset as u64;
    }
    Ok(load)
}

/// Offset of the first complete, checksummed record at or after `from`.
fn find_record(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len()).find(|&pos| record_at(data, pos))
}

fn record_at(data: &[u8], pos: usize) -> bool {
    let mut offset = pos;
    let Ok(len) = read_u32_at(data, &mut offset) else {
        return false;
    };
    let Ok(crc) = read_u32_at(data, &mut offset) else {
        return false;
    };
    let Some(payload) = offset
        .checked_add(len as usize)
        .and_then(|end| data.get(offset..end))
    else {
        return false;
    };
    checksum(payload) == crc && decode_argv(payload).is_ok()
}

/// Drop an incomplete tail so new appends start on a record boundary.
pub fn truncate_to(path: &Path, len: u64) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("open aof {} for truncation", path.display()))?;
    file.set_len(len).context("truncate aof")?;
    file.sync_all().context("sync truncated aof")?;
    Ok(())
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

fn write_record(file: &mut File, payload: &[u8]) -> std::io::Result<()> {
    let len = payload.len() as u32;
    file.write_all(&len.to_be_bytes())?;
    file.write_all(&checksum(payload).to_be_bytes())?;
    file.write_all(payload)?;
    Ok(())
}

fn encode_argv(argv: &[Vec<u8>]) -> anyhow::Result<Vec<u8>> {
    let total: usize = argv.iter().map(|arg| 4 + arg.len()).sum();
    let mut out = Vec::with_capacity(4 + total);
    let argc = u32::try_from(argv.len()).context("too many arguments for aof record")?;
    out.extend_from_slice(&argc.to_be_bytes());
    for arg in argv {
        let len = u32::try_from(arg.len()).context("argument too large for aof record")?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(arg);
    }
    anyhow::ensure!(
        u32::try_from(out.len()).is_ok(),
        "aof record exceeds u32 length"
    );
    Ok(out)
}

fn decode_argv(buf: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut offset = 0usize;
    let argc = read_u32_at(buf, &mut offset)? as usize;
    // Every argument needs at least its length prefix.
    anyhow::ensure!(argc <= buf.len() / 4, "aof entry argc {argc} too large");
    let mut argv = Vec::with_capacity(argc);
    for _ in 0..argc {
        let len = read_u32_at(buf, &mut offset)? as usize;
        anyhow::ensure!(offset + len <= buf.len(), "aof entry short argument");
        argv.push(buf[offset..offset + len].to_vec());
        offset += len;
    }
    anyhow::ensure!(offset == buf.len(), "aof entry has trailing bytes");
    Ok(argv)
}

fn read_u32_at(data: &[u8], offset: &mut usize) -> anyhow::Result<u32> {
    anyhow::ensure!(*offset + 4 <= data.len(), "aof entry short u32");
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[*offset..*offset + 4]);
    *offset += 4;
    Ok(u32::from_be_bytes(buf))
}

/// Read an env var as bool with a default, accepting common truthy values.
fn read_env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|v| {
            matches!(
                v.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "y" | "on"
            )
        })
        .unwrap_or(default)
}
