//! Append-only, NDJSON-backed durability for a single flow's envelope log.
//!
//! One JSON object per line, appended and never rewritten in place. Ingest
//! is idempotent on `op_id`: re-appending an envelope that is already on
//! disk is a no-op rather than a duplicate. Malformed lines are skipped
//! with a warning, never a hard failure — a partially-written last line
//! from a crash shouldn't brick the flow.

use crate::operation::{Envelope, OpId};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogStoreError {
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),
}

/// Outcome of appending a single envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    DuplicateOp,
}

struct Inner {
    envelopes: Vec<Envelope>,
    seen: BTreeSet<OpId>,
    file: Option<BufWriter<File>>,
    skipped_lines: u64,
}

/// The append-only log for one flow. In-memory when constructed via
/// [`LogStore::in_memory`], durable to a single NDJSON file otherwise.
pub struct LogStore {
    path: Option<PathBuf>,
    inner: RwLock<Inner>,
}

impl LogStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: RwLock::new(Inner {
                envelopes: Vec::new(),
                seen: BTreeSet::new(),
                file: None,
                skipped_lines: 0,
            }),
        }
    }

    /// Open (creating if absent) a durable log backed by `path`, replaying
    /// whatever is already on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogStoreError> {
        let path = path.as_ref().to_path_buf();
        let mut envelopes = Vec::new();
        let mut seen = BTreeSet::new();
        let mut skipped_lines = 0u64;

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Envelope>(&line) {
                    Ok(env) => {
                        if seen.insert(env.op_id) {
                            envelopes.push(env);
                        }
                    }
                    Err(e) => {
                        skipped_lines += 1;
                        log::warn!("log_store: skipping malformed line in {:?}: {}", path, e);
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path: Some(path),
            inner: RwLock::new(Inner {
                envelopes,
                seen,
                file: Some(BufWriter::new(file)),
                skipped_lines,
            }),
        })
    }

    /// Append one envelope. Idempotent on `op_id`.
    pub fn append(&self, env: Envelope) -> Result<AppendOutcome, LogStoreError> {
        let mut inner = self.inner.write().unwrap();
        if inner.seen.contains(&env.op_id) {
            return Ok(AppendOutcome::DuplicateOp);
        }
        if let Some(writer) = inner.file.as_mut() {
            let line = serde_json::to_string(&env).map_err(|e| {
                LogStoreError::IoFailure(io::Error::new(io::ErrorKind::InvalidData, e))
            })?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        inner.seen.insert(env.op_id);
        inner.envelopes.push(env);
        Ok(AppendOutcome::Appended)
    }

    /// Ingest several envelopes (e.g. a remote peer's batch), reporting how
    /// many were newly appended.
    pub fn ingest_many(
        &self,
        envs: impl IntoIterator<Item = Envelope>,
    ) -> Result<usize, LogStoreError> {
        let mut appended = 0;
        for env in envs {
            if self.append(env)? == AppendOutcome::Appended {
                appended += 1;
            }
        }
        Ok(appended)
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.inner.read().unwrap().envelopes.clone()
    }

    /// Every envelope in canonical replay order `(timestamp, author,
    /// clock)`, unlike `envelopes()` which hands back raw insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Envelope> {
        let mut envs = self.inner.read().unwrap().envelopes.clone();
        envs.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        envs.into_iter()
    }

    /// Serialize every envelope as NDJSON in canonical order — an in-memory
    /// snapshot distinct from the on-disk append log, meant to round-trip
    /// through [`LogStore::from_bytes`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for env in self.iter() {
            serde_json::to_writer(&mut out, &env).expect("Envelope serialization does not fail");
            out.push(b'\n');
        }
        out
    }

    /// Rebuild an in-memory `LogStore` from a `to_bytes` snapshot. Malformed
    /// lines are skipped with a warning, the same tolerance `open` gives a
    /// partially-written last line.
    pub fn from_bytes(reader: impl Read) -> Result<Self, LogStoreError> {
        let store = Self::in_memory();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Envelope>(&line) {
                Ok(env) => {
                    store.append(env)?;
                }
                Err(e) => {
                    store.inner.write().unwrap().skipped_lines += 1;
                    log::warn!("log_store: skipping malformed line in snapshot: {}", e);
                }
            }
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn skipped_lines(&self) -> u64 {
        self.inner.read().unwrap().skipped_lines
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::horizon::Horizon;
    use crate::operation::Operation;
    use tempfile::tempdir;

    fn env(author: &str, clock: u64, op: Operation) -> Envelope {
        Envelope::author_local(op, author.to_string(), clock, clock, Horizon::new())
    }

    #[test]
    fn append_is_idempotent_on_op_id() {
        let store = LogStore::in_memory();
        let e = env("A", 1, Operation::add_item("x", "T"));
        assert_eq!(store.append(e.clone()).unwrap(), AppendOutcome::Appended);
        assert_eq!(store.append(e).unwrap(), AppendOutcome::DuplicateOp);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn durable_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.ndjson");
        {
            let store = LogStore::open(&path).unwrap();
            store
                .append(env("A", 1, Operation::add_item("x", "T")))
                .unwrap();
            store
                .append(env("A", 2, Operation::set_field("x", "title", crate::value::Value::int(1))))
                .unwrap();
        }
        let reopened = LogStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.ndjson");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "{{not valid json").unwrap();
            let good = env("A", 1, Operation::add_item("x", "T"));
            writeln!(f, "{}", serde_json::to_string(&good).unwrap()).unwrap();
        }
        let store = LogStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.skipped_lines(), 1);
    }

    #[test]
    fn ingest_many_counts_only_new_ops() {
        let store = LogStore::in_memory();
        let e1 = env("A", 1, Operation::add_item("x", "T"));
        let e2 = env("B", 1, Operation::add_item("y", "T"));
        store.append(e1.clone()).unwrap();
        let appended = store.ingest_many(vec![e1, e2]).unwrap();
        assert_eq!(appended, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn iter_yields_envelopes_in_canonical_order_not_insertion_order() {
        let store = LogStore::in_memory();
        // Appended out of timestamp order; iter() must still sort by
        // (timestamp, author, clock).
        store
            .append(Envelope::author_local(Operation::add_item("x", "T"), "B".to_string(), 1, 20, Horizon::new()))
            .unwrap();
        store
            .append(Envelope::author_local(Operation::add_item("y", "T"), "A".to_string(), 1, 10, Horizon::new()))
            .unwrap();

        let ordered: Vec<u64> = store.iter().map(|e| e.timestamp).collect();
        assert_eq!(ordered, vec![10, 20]);
        // Insertion order is unaffected.
        assert_eq!(store.envelopes()[0].timestamp, 20);
    }

    #[test]
    fn to_bytes_then_from_bytes_round_trips_every_envelope() {
        let store = LogStore::in_memory();
        store.append(env("A", 1, Operation::add_item("x", "T"))).unwrap();
        store
            .append(env("A", 2, Operation::set_field("x", "title", crate::value::Value::string("Hi"))))
            .unwrap();

        let bytes = store.to_bytes();
        let restored = LogStore::from_bytes(bytes.as_slice()).unwrap();
        assert_eq!(restored.len(), store.len());
        assert_eq!(restored.iter().collect::<Vec<_>>(), store.iter().collect::<Vec<_>>());
    }

    #[test]
    fn from_bytes_skips_malformed_lines_without_failing() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"{not valid json}\n");
        let good = env("A", 1, Operation::add_item("x", "T"));
        bytes.extend_from_slice(serde_json::to_string(&good).unwrap().as_bytes());
        bytes.push(b'\n');

        let store = LogStore::from_bytes(bytes.as_slice()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.skipped_lines(), 1);
    }
}
