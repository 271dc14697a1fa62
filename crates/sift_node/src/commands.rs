//! Command table and dispatch shared by live clients and AOF replay.

use std::sync::PoisonError;

use sift_meta::{
    ft_internal_update, Ack, CommandCategory, DiscardReplication, OperatingContext,
    ReplicationSink, UpdateContext, INDEX_SCHEMA_METADATA_TYPE, INTERNAL_UPDATE_CATEGORIES,
    INTERNAL_UPDATE_COMMAND,
};

use crate::{acl, aof, NodeState};

/// Exit status used when replay hits an unrecoverable record (EX_SOFTWARE).
pub const FATAL_EXIT_CODE: i32 = 70;

pub const SKIP_CORRUPTED_CONFIG: &str = "search.skip-corrupted-aof-entries";

/// Where a command came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Client,
    /// Re-executed from the AOF at startup: not permission-checked and not
    /// appended again.
    Replay,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Status(&'static str),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
    Error(String),
}

impl Reply {
    fn err(message: impl std::fmt::Display) -> Self {
        Reply::Error(format!("ERR {message}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommandKind {
    Ping,
    InternalUpdate,
    List,
    Stats,
    Config,
    Acl,
}

struct CommandSpec {
    name: &'static str,
    kind: CommandKind,
    categories: &'static [CommandCategory],
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "PING",
        kind: CommandKind::Ping,
        categories: &[CommandCategory::Fast, CommandCategory::Connection],
    },
    CommandSpec {
        name: INTERNAL_UPDATE_COMMAND,
        kind: CommandKind::InternalUpdate,
        categories: INTERNAL_UPDATE_CATEGORIES,
    },
    CommandSpec {
        name: "FT._LIST",
        kind: CommandKind::List,
        categories: &[
            CommandCategory::Read,
            CommandCategory::Fast,
            CommandCategory::Search,
        ],
    },
    CommandSpec {
        name: "SIFTSTATS",
        kind: CommandKind::Stats,
        categories: &[CommandCategory::Read, CommandCategory::Fast],
    },
    CommandSpec {
        name: "CONFIG",
        kind: CommandKind::Config,
        categories: &[CommandCategory::Admin],
    },
    CommandSpec {
        name: "ACL",
        kind: CommandKind::Acl,
        categories: &[CommandCategory::Admin],
    },
];

fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

pub fn execute(state: &NodeState, origin: Origin, argv: &[Vec<u8>]) -> Reply {
    let Some(first) = argv.first() else {
        return Reply::err("empty command");
    };
    let name = String::from_utf8_lossy(first);
    let Some(spec) = lookup(&name) else {
        return Reply::err(format!("unknown command '{name}'"));
    };

    if origin == Origin::Client && !state.acl_permits(spec.categories) {
        tracing::debug!(command = spec.name, "command denied by acl");
        return Reply::Error(acl::denied_message(spec.name));
    }

    match spec.kind {
        CommandKind::Ping => ping(argv),
        CommandKind::InternalUpdate => internal_update(state, origin, argv),
        CommandKind::List => list(state, argv),
        CommandKind::Stats => stats(state, argv),
        CommandKind::Config => config(state, argv),
        CommandKind::Acl => acl_command(state, argv),
    }
}

fn ping(argv: &[Vec<u8>]) -> Reply {
    match argv.len() {
        1 => Reply::Status("PONG"),
        2 => Reply::Bulk(argv[1].clone()),
        _ => Reply::err("wrong number of arguments for 'ping' command"),
    }
}

fn internal_update(state: &NodeState, origin: Origin, argv: &[Vec<u8>]) -> Reply {
    // Keeps AOF order identical to apply order.
    let _guard = state
        .update_lock
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    let replication: &dyn ReplicationSink = match origin {
        Origin::Client => &state.aof,
        Origin::Replay => &DiscardReplication,
    };
    let ctx = UpdateContext {
        operating: OperatingContext::from_loading_flag(state.is_loading()),
        skip_corrupted_entries: state.skip_corrupted_aof_entries(),
        applier: &state.registry,
        replication,
        stats: &state.stats,
    };

    match ft_internal_update(&ctx, argv) {
        Ok(Ack::Applied | Ack::Skipped) => Reply::Ok,
        Err(err) if err.is_fatal() => halt(&err),
        Err(err) => Reply::err(err),
    }
}

/// Log and terminate. Replay cannot continue past a record it may not skip.
fn halt(err: &sift_meta::UpdateError) -> ! {
    tracing::error!(
        error = %err,
        class = ?err.class(),
        exit_code = FATAL_EXIT_CODE,
        "FT.INTERNAL_UPDATE failed while loading; exiting"
    );
    std::process::exit(FATAL_EXIT_CODE)
}

fn list(state: &NodeState, argv: &[Vec<u8>]) -> Reply {
    if argv.len() != 1 {
        return Reply::err("wrong number of arguments for 'ft._list' command");
    }
    Reply::Array(
        state
            .registry
            .ids(INDEX_SCHEMA_METADATA_TYPE)
            .into_iter()
            .map(|id| Reply::Bulk(id.into_bytes()))
            .collect(),
    )
}

fn stats(state: &NodeState, argv: &[Vec<u8>]) -> Reply {
    if argv.len() != 1 {
        return Reply::err("wrong number of arguments for 'siftstats' command");
    }
    let update = state.stats.snapshot();
    let aof = aof::stats_snapshot();
    let fsync_avg_us = if aof.fsync_count == 0 {
        0.0
    } else {
        aof.fsync_total_us as f64 / aof.fsync_count as f64
    };
    let msg = format!(
        "{} aof.appends={} aof.append_bytes={} aof.fsync.count={} aof.fsync.total_us={} aof.fsync.avg_us={:.2} aof.fsync.max_us={} loading={} skip_corrupted_aof_entries={}",
        update.render(),
        aof.appends,
        aof.append_bytes,
        aof.fsync_count,
        aof.fsync_total_us,
        fsync_avg_us,
        aof.fsync_max_us,
        u8::from(state.is_loading()),
        u8::from(state.skip_corrupted_aof_entries()),
    );
    Reply::Bulk(msg.into_bytes())
}

fn config(state: &NodeState, argv: &[Vec<u8>]) -> Reply {
    let sub = argv
        .get(1)
        .map(|s| String::from_utf8_lossy(s).to_ascii_uppercase())
        .unwrap_or_default();
    match (sub.as_str(), argv.len()) {
        ("GET", 3) => {
            let pattern = String::from_utf8_lossy(&argv[2]);
            if !pattern.eq_ignore_ascii_case(SKIP_CORRUPTED_CONFIG) {
                return Reply::Array(Vec::new());
            }
            let value = if state.skip_corrupted_aof_entries() { "yes" } else { "no" };
            Reply::Array(vec![
                Reply::Bulk(SKIP_CORRUPTED_CONFIG.as_bytes().to_vec()),
                Reply::Bulk(value.as_bytes().to_vec()),
            ])
        }
        ("SET", 4) => {
            let param = String::from_utf8_lossy(&argv[2]);
            if !param.eq_ignore_ascii_case(SKIP_CORRUPTED_CONFIG) {
                return Reply::err(format!(
                    "Unknown option or number of arguments for CONFIG SET - '{param}'"
                ));
            }
            let value = String::from_utf8_lossy(&argv[3]);
            let enabled = match value.to_ascii_lowercase().as_str() {
                "yes" => true,
                "no" => false,
                _ => {
                    return Reply::err(format!(
                        "CONFIG SET failed (possibly related to argument '{param}') - argument must be 'yes' or 'no'"
                    ))
                }
            };
            state.set_skip_corrupted_aof_entries(enabled);
            tracing::info!(param = SKIP_CORRUPTED_CONFIG, enabled, "config updated");
            Reply::Ok
        }
        ("GET" | "SET", _) => Reply::err(format!(
            "wrong number of arguments for 'config|{}' command",
            sub.to_ascii_lowercase()
        )),
        _ => Reply::err(format!("unknown subcommand '{sub}' for CONFIG")),
    }
}

fn acl_command(state: &NodeState, argv: &[Vec<u8>]) -> Reply {
    let sub = argv
        .get(1)
        .map(|s| String::from_utf8_lossy(s).to_ascii_uppercase())
        .unwrap_or_default();
    if sub != "SETUSER" {
        return Reply::err(format!("unknown subcommand '{sub}' for ACL"));
    }
    let Some(user) = argv.get(2) else {
        return Reply::err("wrong number of arguments for 'acl|setuser' command");
    };
    let user = String::from_utf8_lossy(user);
    if user != acl::DEFAULT_USER {
        return Reply::err(format!("only the '{}' user is supported", acl::DEFAULT_USER));
    }
    let rules: Vec<String> = argv[3..]
        .iter()
        .map(|rule| String::from_utf8_lossy(rule).into_owned())
        .collect();
    match state.update_acl(&rules) {
        Ok(()) => Reply::Ok,
        Err(err) => Reply::err(err),
    }
}
