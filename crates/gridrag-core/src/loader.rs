//! Directory loader producing [`Document`]s for ingestion.
//!
//! Plain-text formats (`.txt`, `.md`) are read directly. Anything else is
//! handed on as [`DocumentBody::Unextracted`] so ingestion reports it as an
//! unsupported format instead of guessing.

use anyhow::Result;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::{Authority, Document, DocumentBody};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

#[derive(Debug, Clone, Default)]
pub struct DirectoryLoader {
    include_unsupported: bool,
}

impl DirectoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also emit files with non-text extensions (as unextracted documents).
    pub fn include_unsupported(mut self, yes: bool) -> Self {
        self.include_unsupported = yes;
        self
    }

    pub fn load(&self, data_dir: &Path) -> Result<Vec<Document>> {
        self.load_limited(data_dir, usize::MAX)
    }

    pub fn load_limited(&self, data_dir: &Path, limit: usize) -> Result<Vec<Document>> {
        let mut files = self.list_files(data_dir);
        if files.len() > limit {
            files.truncate(limit);
            info!(limit, "limited directory load");
        }
        let mut documents = Vec::with_capacity(files.len());
        for file_path in &files {
            documents.push(self.load_file(file_path, data_dir)?);
        }
        info!(dir = %data_dir.display(), documents = documents.len(), "loaded documents");
        Ok(documents)
    }

    fn load_file(&self, file_path: &Path, data_dir: &Path) -> Result<Document> {
        let relative = file_path.strip_prefix(data_dir).unwrap_or(file_path);
        let source_id = relative.to_string_lossy().replace('\\', "/");
        let title = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| source_id.clone());
        let body = if is_text(file_path) {
            DocumentBody::Text(read_file_content(file_path)?)
        } else {
            let ext = file_path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default();
            DocumentBody::Unextracted { reason: format!("no text extractor for '.{ext}' files") }
        };
        debug!(%source_id, "loaded file");
        Ok(Document {
            source_id,
            version: 1,
            title,
            authority: authority_from_path(relative),
            ingested_at: Utc::now(),
            body,
        })
    }

    fn list_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()) {
            let path = entry.path();
            if self.include_unsupported || is_text(path) {
                out.push(path.to_path_buf());
            }
        }
        out.sort();
        out
    }
}

fn is_text(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|t| t.eq_ignore_ascii_case(ext)))
}

fn read_file_content(file_path: &Path) -> Result<String> {
    match fs::read_to_string(file_path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
    }
}

/// The first directory component names the authority level when it parses as one
/// (`critical/relay-settings.txt`).
fn authority_from_path(relative: &Path) -> Authority {
    let mut components = relative.components();
    let first = components.next();
    if components.next().is_none() {
        return Authority::default();
    }
    first
        .and_then(|c| c.as_os_str().to_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}
