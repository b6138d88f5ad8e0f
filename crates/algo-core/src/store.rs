//! Durable, append-only event log.
//!
//! Every algo start / modify / stop and every confirmation is appended as
//! one [`Record`] with a process-wide sequence number. Appends are
//! synchronous: the caller commits the state change only after `append`
//! returns `Ok`, and a failed append does not consume a sequence number.
//!
//! [`FileEventLog`] keeps one JSON object per line. On open it scans the
//! file to resume the sequence; an unparsable trailing line (a torn write)
//! is cut off with a warning.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::ids::{AlgoId, DataSrc, OrderId, SecurityId, User};
use crate::instrument::ConfirmEffect;
use crate::market_data::now_millis;
use crate::order::ExecType;
use crate::order_type::OrderType;
use crate::side::Side;
use crate::util::lock;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Start,
    Modify,
    Stop,
    Confirmation,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Start => "start",
            RecordKind::Modify => "modify",
            RecordKind::Stop => "stop",
            RecordKind::Confirmation => "confirmation",
        }
    }
}

/// One committed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub seq: u64,
    pub tm: i64,
    pub algo_id: AlgoId,
    pub token: String,
    pub kind: RecordKind,
    pub status: String,
    /// Opaque to the log; JSON of one of the `*Body` types below.
    pub body: String,
}

/// Body of a `start` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartBody {
    pub name: String,
    pub user: User,
    /// Raw parameter JSON as supplied by the caller.
    pub params: String,
}

/// Body of a `modify` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyBody {
    pub params: String,
}

/// Body of a `confirmation` record: enough to replay the quantity effect
/// and the open-order table without the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationBody {
    pub order_id: OrderId,
    pub src: DataSrc,
    pub sec: SecurityId,
    pub order_qty: f64,
    pub order_price: f64,
    pub order_type: OrderType,
    pub effect: ConfirmEffect,
    pub price: f64,
    #[serde(default)]
    pub text: String,
}

impl ConfirmationBody {
    pub fn side(&self) -> Side {
        self.effect.side
    }

    pub fn exec_type(&self) -> ExecType {
        self.effect.exec_type
    }
}

/// Receiver of streamed history for one client session.
pub trait RecordSink {
    /// Returns `false` once the session is gone; streaming stops.
    fn send(&self, record: &Record) -> bool;
}

impl<F> RecordSink for F
where
    F: Fn(&Record) -> bool,
{
    fn send(&self, record: &Record) -> bool {
        self(record)
    }
}

pub trait EventLog: Send + Sync {
    /// Append one record, assigning the next sequence number.
    fn append(
        &self,
        algo_id: AlgoId,
        token: &str,
        kind: RecordKind,
        status: &str,
        body: &str,
    ) -> Result<Record, StoreError>;

    /// All committed records with `seq >= seq0`, in sequence order.
    fn read_from(&self, seq0: u64) -> Result<Vec<Record>, StoreError>;

    /// Sequence of the last committed record, 0 if none.
    fn last_seq(&self) -> u64;
}

fn make_record(
    seq: u64,
    algo_id: AlgoId,
    token: &str,
    kind: RecordKind,
    status: &str,
    body: &str,
) -> Record {
    Record {
        seq,
        tm: now_millis(),
        algo_id,
        token: token.to_string(),
        kind,
        status: status.to_string(),
        body: body.to_string(),
    }
}

#[derive(Debug)]
struct FileState {
    file: File,
    len: u64,
    seq: u64,
}

/// JSON-lines event log on disk.
#[derive(Debug)]
pub struct FileEventLog {
    path: PathBuf,
    sync: bool,
    state: Mutex<FileState>,
}

impl FileEventLog {
    /// Open (or create) the log at `path`. With `sync`, every append is
    /// followed by `fsync`.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (seq, good_len) = scan(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        if len > good_len {
            warn!(path = %path.display(), dropped = len - good_len, "truncating torn tail of event log");
            file.set_len(good_len)?;
        }

        info!(path = %path.display(), last_seq = seq, "event log opened");
        Ok(FileEventLog {
            path,
            sync,
            state: Mutex::new(FileState {
                file,
                len: good_len,
                seq,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Last sequence and byte length of the valid prefix.
fn scan(path: &Path) -> Result<(u64, u64), StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut seq = 0;
    let mut good_len = 0u64;
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        if !line.ends_with('\n') {
            break;
        }
        match serde_json::from_str::<Record>(line.trim_end()) {
            Ok(record) => {
                seq = seq.max(record.seq);
                good_len += n as u64;
            }
            Err(_) => break,
        }
    }
    Ok((seq, good_len))
}

fn write_line(file: &mut File, line: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(line)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

impl EventLog for FileEventLog {
    fn append(
        &self,
        algo_id: AlgoId,
        token: &str,
        kind: RecordKind,
        status: &str,
        body: &str,
    ) -> Result<Record, StoreError> {
        let mut state = lock(&self.state);
        let record = make_record(state.seq + 1, algo_id, token, kind, status, body);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Err(e) = write_line(&mut state.file, line.as_bytes(), self.sync) {
            // Leave no partial line behind; the sequence is not consumed.
            let len = state.len;
            let _ = state.file.set_len(len);
            return Err(e.into());
        }

        state.len += line.len() as u64;
        state.seq = record.seq;
        Ok(record)
    }

    fn read_from(&self, seq0: u64) -> Result<Vec<Record>, StoreError> {
        // Hold the append lock so a concurrent append is never half-read.
        let _state = lock(&self.state);
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(&line) {
                Ok(record) if record.seq >= seq0 => records.push(record),
                Ok(_) => {}
                Err(e) => warn!(line = lineno + 1, error = %e, "skipping unreadable event log line"),
            }
        }
        Ok(records)
    }

    fn last_seq(&self) -> u64 {
        lock(&self.state).seq
    }
}

/// In-memory log, for tests and for running without durability.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    records: Mutex<Vec<Record>>,
    failing: AtomicBool,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        MemoryEventLog::default()
    }

    /// While set, every append fails with `StoreError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<Record> {
        lock(&self.records).clone()
    }
}

impl EventLog for MemoryEventLog {
    fn append(
        &self,
        algo_id: AlgoId,
        token: &str,
        kind: RecordKind,
        status: &str,
        body: &str,
    ) -> Result<Record, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let mut records = lock(&self.records);
        let seq = records.last().map(|r| r.seq).unwrap_or(0) + 1;
        let record = make_record(seq, algo_id, token, kind, status, body);
        records.push(record.clone());
        Ok(record)
    }

    fn read_from(&self, seq0: u64) -> Result<Vec<Record>, StoreError> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.seq >= seq0)
            .cloned()
            .collect())
    }

    fn last_seq(&self) -> u64 {
        lock(&self.records).last().map(|r| r.seq).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    #[test]
    fn sequence_resumes_after_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("algos.jsonl");

        {
            let log = FileEventLog::open(&path, false).unwrap();
            log.append(1, "t1", RecordKind::Start, "started", "{}").unwrap();
            log.append(1, "t1", RecordKind::Stop, "stopped", "").unwrap();
            assert_eq!(log.last_seq(), 2);
        }

        let log = FileEventLog::open(&path, true).unwrap();
        assert_eq!(log.last_seq(), 2);
        let record = log.append(2, "t2", RecordKind::Start, "started", "{}").unwrap();
        assert_eq!(record.seq, 3);

        let all = log.read_from(0).unwrap();
        assert_eq!(all.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        let tail = log.read_from(3).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].token, "t2");
    }

    #[test]
    fn torn_tail_is_dropped_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("algos.jsonl");
        {
            let log = FileEventLog::open(&path, false).unwrap();
            log.append(1, "t1", RecordKind::Start, "started", "{}").unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"{\"seq\":2,\"tm\":").unwrap();
        }

        let log = FileEventLog::open(&path, false).unwrap();
        assert_eq!(log.last_seq(), 1);
        let record = log.append(1, "t1", RecordKind::Stop, "stopped", "").unwrap();
        assert_eq!(record.seq, 2);
        assert_eq!(log.read_from(0).unwrap().len(), 2);
    }

    #[test]
    fn failing_memory_log_consumes_no_sequence() {
        let log = MemoryEventLog::new();
        log.append(1, "a", RecordKind::Start, "started", "{}").unwrap();
        log.set_failing(true);
        assert!(log.append(1, "a", RecordKind::Stop, "stopped", "").is_err());
        log.set_failing(false);
        let record = log.append(1, "a", RecordKind::Stop, "stopped", "").unwrap();
        assert_eq!(record.seq, 2);
    }
}
