//! Shared helpers for integration tests.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use prost::Message;
use sift_meta::{GlobalMetadataEntry, GlobalMetadataVersionHeader};
use sift_node::aof::{AofWriter, AOF_FILE};

/// Timeout for node startup and command round-trips.
pub const IO_TIMEOUT: Duration = Duration::from_secs(20);
/// Timeout for individual RESP read/write operations.
pub const RESP_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawned node process with stdout/stderr captured to log files.
pub struct NodeProcess {
    pub child: Child,
    stderr_path: PathBuf,
    stdout_path: PathBuf,
}

impl NodeProcess {
    /// Best-effort read of the captured stderr log.
    pub fn read_stderr(&self) -> String {
        std::fs::read_to_string(&self.stderr_path).unwrap_or_default()
    }

    /// Best-effort read of the captured stdout log.
    pub fn read_stdout(&self) -> String {
        std::fs::read_to_string(&self.stdout_path).unwrap_or_default()
    }

    /// Both logs, for assertions and panic messages.
    pub fn logs(&self) -> String {
        format!(
            "stdout:\n{}\nstderr:\n{}",
            self.read_stdout(),
            self.read_stderr()
        )
    }

    /// Panic if the process has already exited.
    pub fn assert_running(&mut self, context: &str) {
        if let Ok(Some(status)) = self.child.try_wait() {
            panic!(
                "sift-node exited early ({context}) with status {status}\n{}",
                self.logs()
            );
        }
    }

    /// Wait for the process to exit on its own.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Some(status);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        None
    }

    /// Kill the process without a graceful shutdown.
    pub fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for NodeProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Spawn a sift-node process. Logs go under `<data_dir>/logs`.
pub fn spawn_node(data_dir: &Path, addr: SocketAddr, extra_args: &[&str]) -> NodeProcess {
    let bin = sift_node_bin();
    let log_dir = data_dir.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let stdout_path = log_dir.join("sift-node.out.log");
    let stderr_path = log_dir.join("sift-node.err.log");
    let stdout_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&stdout_path)
        .expect("open stdout log");
    let stderr_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&stderr_path)
        .expect("open stderr log");

    let child = Command::new(bin)
        .arg("node")
        .arg("--listen")
        .arg(addr.to_string())
        .arg("--data-dir")
        .arg(data_dir.join("data"))
        .args(extra_args)
        .env("NO_COLOR", "1")
        .env("SIFT_AOF_FSYNC", "false")
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file))
        .spawn()
        .expect("failed to spawn sift-node");

    NodeProcess {
        child,
        stderr_path,
        stdout_path,
    }
}

/// Locate the sift-node binary built by cargo.
pub fn sift_node_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sift-node"))
}

/// AOF path used by a node spawned with [`spawn_node`].
pub fn aof_path(data_dir: &Path) -> PathBuf {
    data_dir.join("data").join(AOF_FILE)
}

/// Append raw command records to a node's AOF before it starts.
pub fn write_aof(data_dir: &Path, records: &[Vec<Vec<u8>>]) {
    let writer = AofWriter::open(aof_path(data_dir)).expect("open aof");
    for argv in records {
        writer.append(argv).expect("append aof record");
    }
}

/// A well-formed `FT.INTERNAL_UPDATE` invocation.
pub fn update_args(id: &str, version: u64) -> Vec<Vec<u8>> {
    let entry = GlobalMetadataEntry {
        version,
        encoding_version: 1,
        fingerprint: 1000 + version,
        content: Some(prost_types::Any {
            type_url: "type.googleapis.com/valkey_search.data_model.IndexSchema".to_string(),
            value: format!("schema:{id}").into_bytes(),
        }),
    };
    let header = GlobalMetadataVersionHeader {
        top_level_version: version,
        top_level_fingerprint: 2000 + version,
    };
    vec![
        b"FT.INTERNAL_UPDATE".to_vec(),
        id.as_bytes().to_vec(),
        entry.encode_to_vec(),
        header.encode_to_vec(),
    ]
}

/// Wait for the RESP port to answer a PING.
pub fn wait_for_resp_ready(addr: SocketAddr, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Ok(true) = try_ping(addr, Duration::from_millis(250)) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

/// Pick a free loopback address by binding to port 0.
pub fn pick_free_addr() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    listener.local_addr()
}

/// Per-test scratch directory, removed on drop.
pub fn test_dir(name: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(&format!("{name}-"))
        .tempdir()
        .expect("create test dir")
}

/// RESP connection wrapper that preserves buffered reads between commands.
pub struct RespConn {
    reader: BufReader<TcpStream>,
}

impl RespConn {
    /// Connect with read/write timeouts.
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect resp");
        stream.set_read_timeout(Some(RESP_TIMEOUT)).ok();
        stream.set_write_timeout(Some(RESP_TIMEOUT)).ok();
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Send a command with binary-safe bulk string arguments and return the raw response.
    pub fn send_command<A: AsRef<[u8]>>(&mut self, parts: &[A]) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(format!("*{}\r\n", parts.len()).as_bytes());
        for part in parts {
            let part = part.as_ref();
            buf.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
            buf.extend_from_slice(part);
            buf.extend_from_slice(b"\r\n");
        }
        let stream = self.reader.get_mut();
        stream.write_all(&buf)?;
        stream.flush().ok();

        read_resp(&mut self.reader)
    }
}

/// Read one RESP2 reply and return its raw bytes.
fn read_resp(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<u8>> {
    let mut first = [0u8; 1];
    reader.read_exact(&mut first)?;
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    let mut out = vec![first[0]];
    out.extend_from_slice(&line);
    match first[0] {
        b'+' | b'-' | b':' => {}
        b'$' => {
            let len = parse_len(&line);
            if len >= 0 {
                let mut data = vec![0u8; len as usize + 2];
                reader.read_exact(&mut data)?;
                out.extend_from_slice(&data);
            }
        }
        b'*' => {
            let len = parse_len(&line);
            for _ in 0..len.max(0) {
                out.extend_from_slice(&read_resp(reader)?);
            }
        }
        other => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unexpected resp prefix {other}"),
            ))
        }
    }
    Ok(out)
}

fn try_ping(addr: SocketAddr, timeout: Duration) -> std::io::Result<bool> {
    let stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(timeout)).ok();
    stream.set_write_timeout(Some(timeout)).ok();
    let mut reader = BufReader::new(stream);
    reader.get_mut().write_all(b"*1\r\n$4\r\nPING\r\n")?;
    reader.get_mut().flush().ok();

    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(line.starts_with(b"+PONG")),
        Err(err)
            if err.kind() == std::io::ErrorKind::WouldBlock
                || err.kind() == std::io::ErrorKind::TimedOut =>
        {
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Parse a length line ("<len>\r\n").
fn parse_len(line: &[u8]) -> i64 {
    let text = std::str::from_utf8(line).expect("len utf8");
    text.trim().parse::<i64>().expect("parse len")
}

/// Decode a bulk string reply.
pub fn parse_bulk_string(resp: &[u8]) -> Option<String> {
    let rest = resp.strip_prefix(b"$")?;
    let newline = rest.iter().position(|b| *b == b'\n')?;
    let len = parse_len(&rest[..newline]);
    if len < 0 {
        return None;
    }
    let data = rest.get(newline + 1..newline + 1 + len as usize)?;
    Some(String::from_utf8_lossy(data).to_string())
}

/// Decode an array of bulk strings (as returned by `FT._LIST`).
pub fn parse_bulk_array(resp: &[u8]) -> Vec<String> {
    let rest = resp.strip_prefix(b"*").expect("array reply");
    let newline = rest
        .iter()
        .position(|b| *b == b'\n')
        .expect("array header");
    let count = parse_len(&rest[..newline]);
    let mut remaining = &rest[newline + 1..];
    let mut out = Vec::new();
    for _ in 0..count.max(0) {
        let item = parse_bulk_string(remaining).expect("bulk item");
        let header_len = remaining
            .iter()
            .position(|b| *b == b'\n')
            .expect("bulk header")
            + 1;
        remaining = &remaining[header_len + item.len() + 2..];
        out.push(item);
    }
    out
}

/// Start a node and wait until it answers PING.
pub fn start_ready_node(data_dir: &Path, addr: SocketAddr, extra_args: &[&str]) -> NodeProcess {
    let mut node = spawn_node(data_dir, addr, extra_args);
    if !wait_for_resp_ready(addr, IO_TIMEOUT) {
        node.assert_running("waiting for PING");
        panic!("sift-node did not become ready\n{}", node.logs());
    }
    node
}
