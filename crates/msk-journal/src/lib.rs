//! msk-journal
//!
//! Durable, append-only ledger journal.  One JSON line per event, each line
//! hash-chained to the previous one (`hash_prev` / `hash_self`, SHA-256 over
//! canonical JSON with sorted keys).
//!
//! Two event kinds are journaled: admitted movements and reconciliation
//! record writes.  [`JournalStore`] replays a journal into memory on open and
//! appends to it on every write.

mod store;

pub use store::JournalStore;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use msk_ledger::MovementRecord;
use msk_reconcile::ReconciliationRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum JournalEvent {
    Movement(MovementRecord),
    Reconciliation(ReconciliationRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Line number in the journal, from 0.
    pub line_no: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: JournalEvent,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Appends hash-chained journal lines to one file.
#[derive(Debug)]
pub struct JournalWriter {
    path: PathBuf,
    last_hash: Option<String>,
    line_no: u64,
}

impl JournalWriter {
    /// Open (or create) a journal, resuming its chain.
    ///
    /// The existing content must verify; a broken chain is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }

        let entries = if path.exists() {
            let content = fs::read_to_string(&path).with_context(|| format!("read journal {:?}", path))?;
            if let VerifyResult::Broken { line, reason } = verify_chain_str(&content)? {
                bail!("journal {:?} is broken at line {line}: {reason}", path);
            }
            parse_entries(&content)?
        } else {
            Vec::new()
        };

        let writer = Self {
            path,
            last_hash: entries.last().and_then(|e| e.hash_self.clone()),
            line_no: entries.len() as u64,
        };
        Ok((writer, entries))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Number of lines written so far.
    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// Append one event.  The chain only advances once the line is on disk.
    pub fn append(&mut self, event: JournalEvent) -> Result<JournalEntry> {
        let mut entry = JournalEntry {
            line_no: self.line_no,
            recorded_at: Utc::now(),
            event,
            hash_prev: self.last_hash.clone(),
            hash_self: None,
        };
        let self_hash = compute_entry_hash(&entry)?;
        entry.hash_self = Some(self_hash.clone());

        let line = canonical_json_line(&entry)?;
        append_line(&self.path, &line)?;

        self.last_hash = Some(self_hash);
        self.line_no += 1;
        Ok(entry)
    }
}

/// Write a single line to file (with trailing newline), synced.
///
/// A failed write leaves the file at its previous length, never with a
/// torn line.
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open journal {:?}", path))?;
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    write_or_rewind(&mut f, &buf, |f, b| f.write_all(b))
}

fn write_or_rewind<W>(f: &mut File, buf: &[u8], write: W) -> Result<()>
where
    W: FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
{
    let len = f.metadata().context("stat journal failed")?.len();
    let written = write(f, buf)
        .context("write journal line failed")
        .and_then(|()| f.sync_data().context("sync journal failed"));
    if let Err(e) = written {
        f.set_len(len)
            .and_then(|()| f.sync_data())
            .with_context(|| format!("rewind journal to {len} bytes after: {e:#}"))?;
        return Err(e);
    }
    Ok(())
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize journal entry failed")?;
    let sorted = sort_keys(&raw);
    serde_json::to_string(&sorted).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash over the canonical JSON of the entry WITHOUT `hash_self`.
pub fn compute_entry_hash(entry: &JournalEntry) -> Result<String> {
    let mut clone = entry.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn parse_entries(content: &str) -> Result<Vec<JournalEntry>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l.trim()).with_context(|| format!("parse journal entry at line {}", i + 1))
        })
        .collect()
}

/// Read every entry of a journal file without verifying the chain.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
    let content =
        fs::read_to_string(path.as_ref()).with_context(|| format!("read journal {:?}", path.as_ref()))?;
    parse_entries(&content)
}

/// Result of chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    /// The chain is broken at the given (1-based) line.
    Broken { line: usize, reason: String },
}

pub fn verify_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content =
        fs::read_to_string(path.as_ref()).with_context(|| format!("read journal {:?}", path.as_ref()))?;
    verify_chain_str(&content)
}

/// Verify JSONL journal content held in memory.
pub fn verify_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let entry: JournalEntry = match serde_json::from_str(trimmed) {
            Ok(e) => e,
            Err(e) => {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("unparseable entry: {e}"),
                })
            }
        };

        if entry.line_no != count as u64 {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!("line_no {} where {} expected", entry.line_no, count),
            });
        }

        if entry.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, entry.hash_prev
                ),
            });
        }

        let recomputed = compute_entry_hash(&entry)?;
        if entry.hash_self.as_deref() != Some(recomputed.as_str()) {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_self mismatch: claimed {:?}, recomputed {}",
                    entry.hash_self, recomputed
                ),
            });
        }

        count += 1;
        prev_hash = entry.hash_self;
    }

    Ok(VerifyResult::Valid { lines: count })
}
