//! Session Store (spec §4.1): a chunked, append-only keyspace.
//!
//! Logical keys: `session:index`, `session:{id}:meta`,
//! `session:{id}:entries:{chunk}`, `trace:{id}:{chunk}`. Implemented as a
//! filesystem-backed store — one directory per session, one file per
//! chunk — replacing the teacher's single flat `.ctx` file
//! (`agenticlaw-agent/src/ctx_file.rs`) with this chunked layout. The
//! teacher's append-only `OpenOptions::append` idiom and its
//! `sessions_dir()` nesting convention (`<workspace>/.agenticlaw/sessions`)
//! are kept; only the per-session flat file becomes a chunked directory.

use chrono::Utc;
use loom_core::error::{LoomError, Result};
use loom_core::types::{Entry, SessionKey, SessionMeta, TraceEvent};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Fixed maximum entries per chunk file (spec §4.1: "fixed maximum
/// entries per chunk").
const MAX_ENTRIES_PER_CHUNK: usize = 256;

pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            root: sessions_root(workspace.as_ref()),
        }
    }

    /// Detect a legacy monolithic `.ctx` state; if present, archive it
    /// and reset the new keyspace, emitting a bootstrap notification
    /// (spec §4.1: "archive it, reset the new keyspace, and emit a
    /// bootstrap notification").
    pub fn bootstrap(&self) -> Result<()> {
        let legacy_dir = self.root.clone();
        if !legacy_dir.is_dir() {
            std::fs::create_dir_all(&self.root)?;
            return Ok(());
        }
        let legacy_ctx_files: Vec<PathBuf> = std::fs::read_dir(&legacy_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "ctx"))
            .collect();
        if legacy_ctx_files.is_empty() {
            return Ok(());
        }
        let archive_dir = self.root.join("legacy").join(Utc::now().format("%Y%m%d-%H%M%S").to_string());
        std::fs::create_dir_all(&archive_dir)?;
        for file in &legacy_ctx_files {
            if let Some(name) = file.file_name() {
                std::fs::rename(file, archive_dir.join(name))?;
            }
        }
        tracing::warn!(
            count = legacy_ctx_files.len(),
            archive = %archive_dir.display(),
            "bootstrap: archived legacy monolithic session state"
        );
        Ok(())
    }

    fn session_dir(&self, id: &SessionKey) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn meta_path(&self, id: &SessionKey) -> PathBuf {
        self.session_dir(id).join("meta.json")
    }

    fn entries_dir(&self, id: &SessionKey) -> PathBuf {
        self.session_dir(id).join("entries")
    }

    fn trace_dir(&self, id: &SessionKey) -> PathBuf {
        self.session_dir(id).join("trace")
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// `session:{id}:meta` — atomic per-key write via write-then-rename.
    pub fn write_meta(&self, meta: &SessionMeta) -> Result<()> {
        let dir = self.session_dir(&meta.id);
        std::fs::create_dir_all(&dir)?;
        atomic_write(&self.meta_path(&meta.id), &serde_json::to_vec_pretty(meta)?)?;
        self.add_to_index(&meta.id)
    }

    pub fn read_meta(&self, id: &SessionKey) -> Result<Option<SessionMeta>> {
        let path = self.meta_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// `session:index` — ordered list of session identifiers.
    fn add_to_index(&self, id: &SessionKey) -> Result<()> {
        let mut index = self.list_sessions().unwrap_or_default();
        if !index.iter().any(|k| k == id) {
            index.push(id.clone());
            let ids: Vec<&str> = index.iter().map(|k| k.as_str()).collect();
            atomic_write(&self.index_path(), &serde_json::to_vec(&ids)?)?;
        }
        Ok(())
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionKey>> {
        let path = self.index_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = serde_json::from_slice(&std::fs::read(&path)?)?;
        Ok(ids.into_iter().map(SessionKey::new).collect())
    }

    /// `appendSessionEntry` — append-only, atomic per chunk. Rolls over
    /// to a new chunk once the current one reaches
    /// [`MAX_ENTRIES_PER_CHUNK`].
    pub fn append_entry(&self, id: &SessionKey, entry: &Entry) -> Result<()> {
        let dir = self.entries_dir(id);
        std::fs::create_dir_all(&dir)?;
        let chunk = self.current_entry_chunk(id)?;
        let path = chunk_path(&dir, chunk);
        let mut f = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{}", serde_json::to_string(entry)?)?;
        Ok(())
    }

    fn current_entry_chunk(&self, id: &SessionKey) -> Result<u64> {
        let dir = self.entries_dir(id);
        let chunks = list_chunks(&dir)?;
        let Some(&last) = chunks.last() else { return Ok(0) };
        let count = count_lines(&chunk_path(&dir, last))?;
        Ok(if count >= MAX_ENTRIES_PER_CHUNK { last + 1 } else { last })
    }

    /// `readAllSessionEntries` — concatenates chunks in order. A corrupt
    /// chunk is treated as end-of-stream (spec §4.1): prior chunks are
    /// never mutated, and a warning is logged.
    pub fn read_all_entries(&self, id: &SessionKey) -> Result<Vec<Entry>> {
        let dir = self.entries_dir(id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for chunk in list_chunks(&dir)? {
            let path = chunk_path(&dir, chunk);
            let file = std::fs::File::open(&path)?;
            for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Entry>(&line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        tracing::warn!(
                            session = id.as_str(),
                            chunk,
                            line = lineno,
                            error = %e,
                            "corrupt entry chunk, treating as end-of-stream"
                        );
                        return Ok(entries);
                    }
                }
            }
        }
        Ok(entries)
    }

    /// `writeTraceChunk` — same append-only, corrupt-as-end-of-stream
    /// contract as entries, keyed by `trace:{id}:{chunk}`.
    pub fn append_trace_event(&self, id: &SessionKey, event: &TraceEvent) -> Result<()> {
        let dir = self.trace_dir(id);
        std::fs::create_dir_all(&dir)?;
        let chunks = list_chunks(&dir)?;
        let chunk = match chunks.last() {
            Some(&last) if count_lines(&chunk_path(&dir, last))? < MAX_ENTRIES_PER_CHUNK => last,
            Some(&last) => last + 1,
            None => 0,
        };
        let path = chunk_path(&dir, chunk);
        let mut f = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }

    pub fn read_trace_events(&self, id: &SessionKey) -> Result<Vec<TraceEvent>> {
        let dir = self.trace_dir(id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut events = Vec::new();
        for chunk in list_chunks(&dir)? {
            let path = chunk_path(&dir, chunk);
            let file = std::fs::File::open(&path)?;
            for line in std::io::BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<TraceEvent>(&line) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        tracing::warn!(session = id.as_str(), chunk, error = %e, "corrupt trace chunk, treating as end-of-stream");
                        return Ok(events);
                    }
                }
            }
        }
        Ok(events)
    }
}

fn chunk_path(dir: &Path, chunk: u64) -> PathBuf {
    dir.join(format!("chunk_{:05}.jsonl", chunk))
}

fn list_chunks(dir: &Path) -> Result<Vec<u64>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut chunks: Vec<u64> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.path()
                .file_stem()?
                .to_str()?
                .strip_prefix("chunk_")?
                .parse::<u64>()
                .ok()
        })
        .collect();
    chunks.sort_unstable();
    Ok(chunks)
}

fn count_lines(path: &Path) -> Result<usize> {
    if !path.is_file() {
        return Ok(0);
    }
    let file = std::fs::File::open(path)?;
    Ok(std::io::BufReader::new(file).lines().filter(|l| l.as_ref().is_ok_and(|s| !s.trim().is_empty())).count())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path).map_err(LoomError::from)
}

/// Resolve the sessions directory within a workspace — kept from the
/// teacher's `ctx_file::sessions_dir` nesting convention.
fn sessions_root(workspace: &Path) -> PathBuf {
    if workspace.ends_with(".agenticlaw") || workspace.ends_with(".loom") {
        workspace.join("sessions")
    } else {
        workspace.join(".loom").join("sessions")
    }
}
