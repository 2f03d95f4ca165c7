//! The disk LRU journal file: a plain-text append log of `CLEAN`/`DIRTY`/
//! `READ`/`REMOVE` operations, with atomic rebuild-by-rename (SPEC_FULL.md
//! §4.10 "Journal format"/"Journal invariants", §6 "Disk LRU journal magic
//! string").
//!
//! Grounded in the teacher's own simple line-oriented file formats (the
//! Netscape cookie-jar reader/writer in `src/cookie.rs`): read the whole
//! file into lines, parse each independently, tolerate and skip malformed
//! trailing lines from a torn write instead of refusing to start.

use std::{
    fs, io,
    io::Write as _,
    path::{Path, PathBuf},
};

/// Fixed magic string identifying a disk LRU journal (SPEC_FULL.md §6).
pub const MAGIC: &str = "voyage.http.disk.cache.journal";
/// Journal format version. Distinct from the cache's own `app_version`,
/// which is bumped by the consumer whenever the stored entry shape changes.
pub const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOp {
    Clean { key: String, lengths: Vec<u64> },
    Dirty { key: String },
    Read { key: String },
    Remove { key: String },
}

impl JournalOp {
    pub fn key(&self) -> &str {
        match self {
            JournalOp::Clean { key, .. }
            | JournalOp::Dirty { key }
            | JournalOp::Read { key }
            | JournalOp::Remove { key } => key,
        }
    }

    fn format(&self) -> String {
        match self {
            JournalOp::Clean { key, lengths } => {
                let mut line = format!("CLEAN {key}");
                for len in lengths {
                    line.push(' ');
                    line.push_str(&len.to_string());
                }
                line
            }
            JournalOp::Dirty { key } => format!("DIRTY {key}"),
            JournalOp::Read { key } => format!("READ {key}"),
            JournalOp::Remove { key } => format!("REMOVE {key}"),
        }
    }
}

fn parse_op(line: &str) -> Option<JournalOp> {
    let mut parts = line.split(' ');
    let op = parts.next()?;
    let key = parts.next()?.to_string();
    match op {
        "CLEAN" => {
            let lengths: Vec<u64> = parts.filter_map(|p| p.parse().ok()).collect();
            Some(JournalOp::Clean { key, lengths })
        }
        "DIRTY" => Some(JournalOp::Dirty { key }),
        "READ" => Some(JournalOp::Read { key }),
        "REMOVE" => Some(JournalOp::Remove { key }),
        _ => None,
    }
}

/// The result of reading an existing journal from disk: the ops it
/// contained (in order), in case the caller wants to rebuild LRU state from
/// them, and how many were "redundant" (superseded by a later op on the
/// same key) — used to decide whether a rebuild is due.
pub struct JournalRead {
    pub ops: Vec<JournalOp>,
    pub redundant_op_count: usize,
}

/// Reads and parses `path`, promoting `path.bkp` first if `path` is absent
/// but a backup exists (SPEC_FULL.md §4.10 "On open, if `.bkp` exists and
/// `journal` doesn't, promote the backup").
pub fn open(dir: &Path, app_version: u32, value_count: usize) -> io::Result<JournalRead> {
    let journal_path = dir.join("journal");
    let bkp_path = dir.join("journal.bkp");
    let tmp_path = dir.join("journal.tmp");

    if !journal_path.exists() && bkp_path.exists() {
        fs::rename(&bkp_path, &journal_path)?;
    }
    let _ = fs::remove_file(&tmp_path);

    if !journal_path.exists() {
        return Ok(JournalRead {
            ops: Vec::new(),
            redundant_op_count: 0,
        });
    }

    let contents = fs::read_to_string(&journal_path)?;
    let mut lines = contents.lines();

    let header_ok = lines.next() == Some(MAGIC)
        && lines.next() == Some(JOURNAL_VERSION.to_string().as_str())
        && lines.next() == Some(app_version.to_string().as_str())
        && lines.next() == Some(value_count.to_string().as_str())
        && lines.next() == Some("");

    let mut ops = Vec::new();
    if header_ok {
        for line in lines {
            if let Some(op) = parse_op(line) {
                ops.push(op);
            }
            // Malformed trailing lines (a torn write) are silently dropped;
            // everything parsed before them is still valid.
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut redundant = 0usize;
    for op in ops.iter().rev() {
        if !seen.insert(op.key().to_string()) {
            redundant += 1;
        }
    }

    Ok(JournalRead {
        ops,
        redundant_op_count: redundant,
    })
}

/// An open append handle onto `journal`.
pub struct Journal {
    file: fs::File,
    path: PathBuf,
}

impl Journal {
    pub fn create_or_open(dir: &Path, app_version: u32, value_count: usize) -> io::Result<Self> {
        let path = dir.join("journal");
        if !path.exists() {
            write_fresh(&path, app_version, value_count)?;
        }
        let file = fs::OpenOptions::new().append(true).open(&path)?;
        Ok(Journal { file, path })
    }

    pub fn append(&mut self, op: &JournalOp) -> io::Result<()> {
        writeln!(self.file, "{}", op.format())?;
        self.file.flush()
    }

    /// Atomically rebuilds the journal from `live_entries` (one `CLEAN` op
    /// per readable entry): write to `journal.tmp`, rename the existing
    /// journal to `journal.bkp`, rename the tmp file into place, then drop
    /// the backup (SPEC_FULL.md §4.10 "Rebuild is atomic").
    pub fn rebuild(
        &mut self,
        dir: &Path,
        app_version: u32,
        value_count: usize,
        live_entries: impl Iterator<Item = (String, Vec<u64>)>,
    ) -> io::Result<()> {
        let tmp_path = dir.join("journal.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            write_header(&mut tmp, app_version, value_count)?;
            for (key, lengths) in live_entries {
                writeln!(tmp, "{}", JournalOp::Clean { key, lengths }.format())?;
            }
            tmp.flush()?;
        }

        let bkp_path = dir.join("journal.bkp");
        if self.path.exists() {
            fs::rename(&self.path, &bkp_path)?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let _ = fs::remove_file(&bkp_path);

        self.file = fs::OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}

fn write_header(writer: &mut impl io::Write, app_version: u32, value_count: usize) -> io::Result<()> {
    writeln!(writer, "{MAGIC}")?;
    writeln!(writer, "{JOURNAL_VERSION}")?;
    writeln!(writer, "{app_version}")?;
    writeln!(writer, "{value_count}")?;
    writeln!(writer)
}

fn write_fresh(path: &Path, app_version: u32, value_count: usize) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    write_header(&mut file, app_version, value_count)
}

/// Returns `Ok(true)` iff the filesystem at `dir` permits deleting a file
/// while a handle to it is still open — the "civilized filesystem" probe
/// (SPEC_FULL.md §4.10 "Civilized-filesystem detection"). Unix inode
/// semantics make this `true`; Windows-like filesystems that lock open
/// files make it `false`.
pub fn probe_civilized(dir: &Path) -> io::Result<bool> {
    let probe_path = dir.join(".civilized-probe");
    let file = fs::File::create(&probe_path)?;
    let removed = fs::remove_file(&probe_path).is_ok();
    drop(file);
    Ok(removed)
}

pub fn value_path(dir: &Path, key: &str, index: usize, dirty: bool) -> PathBuf {
    if dirty {
        dir.join(format!("{key}.{index}.tmp"))
    } else {
        dir.join(format!("{key}.{index}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_basic_ops() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::create_or_open(dir.path(), 1, 2).unwrap();
        journal
            .append(&JournalOp::Dirty {
                key: "abc".into(),
            })
            .unwrap();
        journal
            .append(&JournalOp::Clean {
                key: "abc".into(),
                lengths: vec![10, 20],
            })
            .unwrap();
        journal.append(&JournalOp::Read { key: "abc".into() }).unwrap();
        drop(journal);

        let read = open(dir.path(), 1, 2).unwrap();
        assert_eq!(read.ops.len(), 3);
        assert!(matches!(&read.ops[1], JournalOp::Clean { key, lengths } if key == "abc" && lengths == &vec![10, 20]));
    }

    #[test]
    fn promotes_backup_when_journal_missing() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = Journal::create_or_open(dir.path(), 1, 1).unwrap();
            journal
                .append(&JournalOp::Clean {
                    key: "k".into(),
                    lengths: vec![5],
                })
                .unwrap();
        }
        fs::rename(dir.path().join("journal"), dir.path().join("journal.bkp")).unwrap();
        assert!(!dir.path().join("journal").exists());

        let read = open(dir.path(), 1, 1).unwrap();
        assert!(dir.path().join("journal").exists());
        assert_eq!(read.ops.len(), 1);
    }

    #[test]
    fn rebuild_compacts_to_one_clean_op_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::create_or_open(dir.path(), 1, 1).unwrap();
        for _ in 0..5 {
            journal.append(&JournalOp::Dirty { key: "k".into() }).unwrap();
            journal
                .append(&JournalOp::Clean {
                    key: "k".into(),
                    lengths: vec![1],
                })
                .unwrap();
        }
        journal
            .rebuild(dir.path(), 1, 1, std::iter::once(("k".to_string(), vec![1])))
            .unwrap();

        let read = open(dir.path(), 1, 1).unwrap();
        assert_eq!(read.ops.len(), 1);
        assert!(!dir.path().join("journal.bkp").exists());
    }

    #[test]
    fn civilized_probe_succeeds_on_unix() {
        let dir = tempfile::tempdir().unwrap();
        assert!(probe_civilized(dir.path()).unwrap());
    }
}
