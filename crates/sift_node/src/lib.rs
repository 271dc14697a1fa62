//! Search node runtime.
//!
//! Wires the metadata registry, the append-only file and the RESP server
//! together around the `FT.INTERNAL_UPDATE` handler. The AOF is replayed under
//! the loading context before any client is accepted.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use sift_meta::{CommandCategory, UpdateStats};

pub mod acl;
pub mod aof;
pub mod commands;
pub mod registry;
pub mod resp_server;

use acl::AclUser;
use aof::AofWriter;
use commands::{Origin, Reply};
use registry::MetadataRegistry;

/// CLI options for running a node.
#[derive(Parser, Debug, Clone)]
pub struct NodeArgs {
    /// RESP listen address.
    #[arg(long)]
    pub listen: SocketAddr,

    #[arg(long)]
    pub data_dir: PathBuf,

    /// Drop unparseable or rejected `FT.INTERNAL_UPDATE` records while
    /// replaying the AOF instead of refusing to start.
    ///
    /// Can be changed at runtime with `CONFIG SET search.skip-corrupted-aof-entries`.
    #[arg(long, env = "SIFT_SKIP_CORRUPTED_AOF_ENTRIES", default_value_t = false)]
    pub skip_corrupted_aof_entries: bool,
}

/// Shared state for one node.
pub struct NodeState {
    pub(crate) registry: MetadataRegistry,
    pub(crate) stats: UpdateStats,
    pub(crate) aof: AofWriter,
    /// Serializes `FT.INTERNAL_UPDATE` so AOF order matches apply order.
    pub(crate) update_lock: Mutex<()>,
    loading: AtomicBool,
    skip_corrupted_aof_entries: AtomicBool,
    acl: RwLock<AclUser>,
}

impl NodeState {
    pub fn new(aof: AofWriter, skip_corrupted_aof_entries: bool) -> Self {
        Self {
            registry: MetadataRegistry::new(),
            stats: UpdateStats::new(),
            aof,
            update_lock: Mutex::new(()),
            loading: AtomicBool::new(false),
            skip_corrupted_aof_entries: AtomicBool::new(skip_corrupted_aof_entries),
            acl: RwLock::new(AclUser::default()),
        }
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &UpdateStats {
        &self.stats
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::Release);
    }

    pub fn skip_corrupted_aof_entries(&self) -> bool {
        self.skip_corrupted_aof_entries.load(Ordering::Relaxed)
    }

    pub fn set_skip_corrupted_aof_entries(&self, enabled: bool) {
        self.skip_corrupted_aof_entries
            .store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn acl_permits(&self, categories: &[CommandCategory]) -> bool {
        match self.acl.read() {
            Ok(user) => user.permits(categories),
            Err(_) => false,
        }
    }

    pub(crate) fn update_acl(&self, rules: &[String]) -> anyhow::Result<()> {
        let mut user = self
            .acl
            .write()
            .map_err(|_| anyhow::anyhow!("acl lock poisoned"))?;
        user.apply_rules(rules)
    }

    /// Re-execute every AOF record under the loading context.
    ///
    /// A record that needs a halt terminates the process from inside dispatch;
    /// any other error reply aborts startup.
    pub fn replay(&self, records: &[Vec<Vec<u8>>]) -> anyhow::Result<()> {
        self.set_loading(true);
        let started = Instant::now();
        for (index, argv) in records.iter().enumerate() {
            if let Reply::Error(msg) = commands::execute(self, Origin::Replay, argv) {
                self.set_loading(false);
                anyhow::bail!("aof record {index} failed during replay: {msg}");
            }
        }
        self.set_loading(false);

        let stats = self.stats.snapshot();
        tracing::info!(
            records = records.len(),
            applied = stats.applied,
            skipped = stats.skipped_entries,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aof replay complete"
        );
        Ok(())
    }
}

/// Run a node until Ctrl-C.
pub async fn run_node(args: NodeArgs) -> anyhow::Result<()> {
    run_node_with_shutdown(args, tokio::signal::ctrl_c()).await
}

/// Replay the AOF, then serve RESP on `args.listen` until `shutdown` resolves.
pub async fn run_node_with_shutdown<F>(args: NodeArgs, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = Result<(), std::io::Error>> + Send,
{
    fs::create_dir_all(&args.data_dir).context("create data dir")?;
    let aof_path = args.data_dir.join(aof::AOF_FILE);

    let load = aof::read_records(&aof_path)?;
    if load.has_torn_tail() {
        anyhow::ensure!(
            args.skip_corrupted_aof_entries,
            "aof {} ends with an incomplete record ({} bytes after offset {}); \
             start with --skip-corrupted-aof-entries to discard it",
            aof_path.display(),
            load.truncated_bytes,
            load.valid_len
        );
        tracing::warn!(
            path = %aof_path.display(),
            valid_len = load.valid_len,
            truncated_bytes = load.truncated_bytes,
            "discarding incomplete final aof record"
        );
        aof::truncate_to(&aof_path, load.valid_len)?;
    }
    let writer = AofWriter::open(&aof_path)?;
    let state = Arc::new(NodeState::new(writer, args.skip_corrupted_aof_entries));

    state.replay(&load.records)?;

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    let local_addr = listener.local_addr()?;
    tokio::spawn({
        let state = state.clone();
        async move {
            if let Err(err) = resp_server::serve(listener, state).await {
                tracing::error!(error = ?err, "resp server failed");
            }
        }
    });

    tracing::info!(
        listen = %local_addr,
        data_dir = %args.data_dir.display(),
        skip_corrupted_aof_entries = args.skip_corrupted_aof_entries,
        "node started"
    );

    shutdown.await?;
    tracing::info!("node shutting down");
    Ok(())
}
