//! # Rendezvous Files
//!
//! A listening server publishes where it can be reached in a small text file;
//! connecting tools read it back.
//!
//! ```text
//! <namespace>.<rank>;<address>     required
//! <version>                        optional
//! <pid>                            optional
//! <uid>:<gid>                      optional
//! <start timestamp>                optional
//! ```
//!
//! The reader tolerates a file that does not exist yet and a file that exists
//! but is still empty, each with a bounded number of retries.

use crate::config::ConnectConfig;
use crate::core::types::ProcId;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::address::PeerAddr;
use crate::utils::timeout::{RENDEZVOUS_POLL_INTERVAL, SHORT_READ_DELAY};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

/// Prefix of every rendezvous file name
pub const FILE_PREFIX: &str = "launchwire.";

/// Contents of one rendezvous file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendezvous {
    pub server: ProcId,
    pub uri: String,
    pub version: Option<String>,
    pub pid: Option<u32>,
    pub ids: Option<(u32, u32)>,
    pub started: Option<String>,
}

impl Rendezvous {
    pub fn new(server: ProcId, uri: impl Into<String>) -> Self {
        Self {
            server,
            uri: uri.into(),
            version: None,
            pid: None,
            ids: None,
            started: None,
        }
    }

    /// Fill the optional lines from the running process
    pub fn with_process_details(mut self, version: &str) -> Self {
        let (uid, gid) = crate::protocol::framer::process_ids();
        self.version = Some(version.to_string());
        self.pid = Some(std::process::id());
        self.ids = Some((uid, gid));
        self.started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs().to_string());
        self
    }

    pub fn address(&self) -> Result<PeerAddr> {
        self.uri.parse()
    }

    /// File name a server with this pid publishes under
    pub fn file_name(pid: u32) -> String {
        format!("{FILE_PREFIX}{pid}")
    }

    pub fn to_contents(&self) -> String {
        let mut out = format!("{}.{};{}\n", self.server.nspace, self.server.rank, self.uri);
        // optional lines are positional, so stop at the first gap
        let optional = [
            self.version.clone(),
            self.pid.map(|p| p.to_string()),
            self.ids.map(|(u, g)| format!("{u}:{g}")),
            self.started.clone(),
        ];
        for line in optional.into_iter().map_while(|line| line) {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut lines = contents.lines().map(str::trim);
        let first = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ProtocolError::Unreachable(constants::ERR_RENDEZVOUS_EMPTY.into()))?;
        let (server, uri) = parse_uri(first)?;
        let mut rendezvous = Rendezvous::new(server, uri);

        let mut next = || lines.next().filter(|l| !l.is_empty()).map(str::to_string);
        rendezvous.version = next();
        rendezvous.pid = next().and_then(|p| p.parse().ok());
        rendezvous.ids = next().and_then(|ids| {
            let (uid, gid) = ids.split_once(':')?;
            Some((uid.parse().ok()?, gid.parse().ok()?))
        });
        rendezvous.started = next();
        Ok(rendezvous)
    }

    /// Publish atomically: write a sibling temp file, then rename over `path`
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .ok_or_else(|| ProtocolError::BadParam(format!("not a file path: {}", path.display())))?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        let mut file = fs::File::create(&tmp)?;
        file.write_all(self.to_contents().as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        debug!("Published rendezvous file");
        Ok(())
    }
}

/// Split `"<nspace>.<rank>;<uri>"`
pub fn parse_uri(line: &str) -> Result<(ProcId, String)> {
    let parts: Vec<&str> = line.split(';').collect();
    if parts.len() != 2 {
        return Err(ProtocolError::NotSupported(format!(
            "malformed server uri: {line}"
        )));
    }
    let (nspace, rank) = parts[0]
        .rsplit_once('.')
        .ok_or_else(|| ProtocolError::BadParam(format!("missing rank in server uri: {line}")))?;
    let rank = rank
        .parse()
        .map_err(|_| ProtocolError::BadParam(format!("invalid rank in server uri: {line}")))?;
    Ok((ProcId::new(nspace, rank)?, parts[1].to_string()))
}

/// Read a rendezvous file, waiting for it to appear and to be written
#[instrument(skip(config), fields(path = %path.as_ref().display()))]
pub fn read<P: AsRef<Path>>(path: P, config: &ConnectConfig) -> Result<Rendezvous> {
    let path = path.as_ref();
    let poll = if config.wait_to_connect.is_zero() {
        RENDEZVOUS_POLL_INTERVAL
    } else {
        config.wait_to_connect
    };

    let mut waits = 0;
    while !path.exists() {
        if waits >= config.rendezvous_retries {
            warn!(waits, "{}", constants::ERR_RENDEZVOUS_MISSING);
            return Err(ProtocolError::Unreachable(format!(
                "{}: {}",
                constants::ERR_RENDEZVOUS_MISSING,
                path.display()
            )));
        }
        waits += 1;
        debug!(waits, "Waiting for rendezvous file");
        thread::sleep(poll);
    }

    for attempt in 1..=config.short_read_retries.max(1) {
        let contents = fs::read_to_string(path)
            .map_err(|e| ProtocolError::Unreachable(format!("{}: {e}", path.display())))?;
        if contents.lines().next().is_some_and(|l| !l.trim().is_empty()) {
            return Rendezvous::parse(&contents);
        }
        debug!(attempt, "Rendezvous file still empty");
        thread::sleep(SHORT_READ_DELAY);
    }
    Err(ProtocolError::Unreachable(format!(
        "{}: {}",
        constants::ERR_RENDEZVOUS_EMPTY,
        path.display()
    )))
}

/// Every file under `dir` (recursively) whose name starts with `prefix`
pub fn search<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect(dir.as_ref(), prefix, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect(dir: &Path, prefix: &str, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            // unreadable subdirectories belong to other users
            if let Err(e) = collect(&path, prefix, found) {
                debug!(path = %path.display(), error = %e, "Skipping directory");
            }
        } else if entry.file_name().to_string_lossy().starts_with(prefix) {
            found.push(path);
        }
    }
    Ok(())
}

/// Directory rendezvous files are published in and searched from
pub fn root(config: &ConnectConfig) -> PathBuf {
    config
        .rendezvous_dir
        .clone()
        .or_else(|| config.system_tmpdir.clone())
        .unwrap_or_else(std::env::temp_dir)
}
