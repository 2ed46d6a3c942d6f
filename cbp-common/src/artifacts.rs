//! Artifact writing
//!
//! **Lifecycle:** a stage stages every artifact in an [`ArtifactWriter`] while
//! it runs. On success the writer commits each file with write-to-temp plus
//! atomic rename, so readers never observe a half-written artifact. On fatal
//! failure the staged bytes are flushed to `<path>.partial` instead and no
//! canonical path is touched.
//!
//! Results tables are additionally *content-addressed*: they land first at
//! `.<stem>-<sha256 prefix>.<ext>` beside the canonical path and are then
//! renamed over it.

use crate::suppression::{Footer, PublicTable, Suppressor};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hex prefix length used in content-addressed names
const CONTENT_PREFIX_LEN: usize = 12;

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .map_err(|e| Error::InputMissing(format!("{}: {}", path.display(), e)))?;
    Ok(sha256_hex(&bytes))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn sibling(path: &Path, name: String) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Write bytes to a temporary sibling, then rename over `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = sibling(path, format!(".{}.tmp-{}", file_name(path), std::process::id()));
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Content-addressed name for `path` and `bytes`
pub fn content_addressed_path(path: &Path, bytes: &[u8]) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let digest = sha256_hex(bytes);
    sibling(path, format!(".{}-{}{}", stem, &digest[..CONTENT_PREFIX_LEN], ext))
}

/// Write under the content-addressed name, then rename to the canonical path
pub fn publish_content_addressed(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let addressed = content_addressed_path(path, bytes);
    write_atomic(&addressed, bytes)?;
    fs::rename(&addressed, path)?;
    debug!(path = %path.display(), addressed = %addressed.display(), "Published content-addressed artifact");
    Ok(addressed)
}

#[derive(Debug, Clone)]
struct Staged {
    path: PathBuf,
    bytes: Vec<u8>,
    content_addressed: bool,
}

/// Buffered artifact writer for one stage
#[derive(Debug)]
pub struct ArtifactWriter {
    root: PathBuf,
    component: String,
    staged: Vec<Staged>,
}

impl ArtifactWriter {
    pub fn new(root: &Path, component: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            component: component.to_string(),
            staged: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a root-relative artifact
    pub fn resolve(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    fn push(&mut self, rel: impl AsRef<Path>, bytes: Vec<u8>, content_addressed: bool) {
        let path = self.resolve(rel);
        self.staged.retain(|s| s.path != path);
        self.staged.push(Staged {
            path,
            bytes,
            content_addressed,
        });
    }

    /// Stage an artifact for atomic commit
    pub fn stage(&mut self, rel: impl AsRef<Path>, bytes: Vec<u8>) {
        self.push(rel, bytes, false);
    }

    /// Stage an artifact published through its content-addressed name
    pub fn stage_content_addressed(&mut self, rel: impl AsRef<Path>, bytes: Vec<u8>) {
        self.push(rel, bytes, true);
    }

    /// Stage `tables/<name>.csv` and `tables/<name>.md`, rendered through
    /// the suppressor
    ///
    /// A disclosure violation surfaces here, before anything is written.
    pub fn stage_table(
        &mut self,
        table: &PublicTable,
        suppressor: &Suppressor,
        footer: &Footer,
    ) -> Result<()> {
        let csv = table.to_csv(suppressor, footer)?;
        let md = table.to_markdown(suppressor, footer)?;
        self.stage(format!("tables/{}.csv", table.name()), csv);
        self.stage(format!("tables/{}.md", table.name()), md.into_bytes());
        debug!(table = table.name(), rows = table.n_rows(), "Staged public table");
        Ok(())
    }

    /// Staged bytes for a root-relative path
    pub fn staged_bytes(&self, rel: impl AsRef<Path>) -> Option<&[u8]> {
        let path = self.resolve(rel);
        self.staged
            .iter()
            .find(|s| s.path == path)
            .map(|s| s.bytes.as_slice())
    }

    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.staged.iter().map(|s| s.path.clone()).collect()
    }

    /// Commit every staged artifact in staging order
    pub fn commit(&mut self) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.staged.len());
        for staged in std::mem::take(&mut self.staged) {
            if staged.content_addressed {
                publish_content_addressed(&staged.path, &staged.bytes)?;
            } else {
                write_atomic(&staged.path, &staged.bytes)?;
            }
            written.push(staged.path);
        }
        info!(component = %self.component, artifacts = written.len(), "Artifacts committed");
        Ok(written)
    }

    /// Flush staged artifacts to `<path>.partial`; best effort
    pub fn flush_partial(&mut self) -> Vec<PathBuf> {
        let mut flushed = Vec::new();
        for staged in std::mem::take(&mut self.staged) {
            let partial = sibling(&staged.path, format!("{}.partial", file_name(&staged.path)));
            let result = ensure_parent(&partial).and_then(|_| fs::write(&partial, &staged.bytes).map_err(Error::from));
            match result {
                Ok(()) => flushed.push(partial),
                Err(e) => warn!(path = %partial.display(), error = %e, "Failed to flush partial artifact"),
            }
        }
        if !flushed.is_empty() {
            warn!(component = %self.component, count = flushed.len(), "Flushed partial artifacts after failure");
        }
        flushed
    }

    /// Commit on success, flush `.partial` files on failure
    pub fn finish<T>(&mut self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.flush_partial();
                Err(e)
            }
        }
    }
}

/// Digest of one input file
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InputDigest {
    pub path: String,
    pub sha256: String,
}

/// Machine-readable run metadata (`artifacts/<component>_run.json`)
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub component: String,
    pub run_id: Uuid,
    pub version: String,
    pub seed: u64,
    pub command: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub inputs: BTreeMap<String, InputDigest>,
    pub outputs: Vec<String>,
    pub warnings: Vec<String>,
    pub details: BTreeMap<String, Value>,
}

impl RunMetadata {
    pub fn new(component: &str, seed: u64, command: &str) -> Self {
        Self {
            component: component.to_string(),
            run_id: Uuid::new_v4(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            seed,
            command: command.to_string(),
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            warnings: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    /// Hash an input file under a role name
    pub fn record_input(&mut self, role: &str, path: &Path) -> Result<()> {
        let sha256 = sha256_file(path)?;
        self.inputs.insert(
            role.to_string(),
            InputDigest {
                path: path.display().to_string(),
                sha256,
            },
        );
        Ok(())
    }

    pub fn detail(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        self.details.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Stamp the finish time and list outputs
    pub fn finish(&mut self, outputs: &[PathBuf]) {
        self.finished_at = Some(Utc::now().to_rfc3339());
        self.outputs = outputs.iter().map(|p| p.display().to_string()).collect();
    }

    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from("artifacts").join(format!("{}_run.json", self.component))
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
