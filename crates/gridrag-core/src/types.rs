//! Domain types shared by the chunker, the indices and the answer path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub type ChunkId = String;
pub type DocumentId = String;

/// Authority / classification level of a source document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Authority {
    Critical,
    #[default]
    Standard,
    Informational,
}

impl Authority {
    pub fn as_str(self) -> &'static str {
        match self {
            Authority::Critical => "critical",
            Authority::Standard => "standard",
            Authority::Informational => "informational",
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Authority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Authority::Critical),
            "standard" | "operational" => Ok(Authority::Standard),
            "informational" | "info" => Ok(Authority::Informational),
            other => Err(format!("unknown authority level '{other}'")),
        }
    }
}

/// Output of the upstream content extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DocumentBody {
    Text(String),
    /// Extraction produced no text at all (scanned PDF without OCR, binary blob, ...).
    Unextracted { reason: String },
}

/// A source document handed to ingestion.
///
/// `source_id` is stable across versions; the indexed identity is the
/// generation returned by [`Document::document_id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source_id: String,
    pub version: u32,
    pub title: String,
    pub authority: Authority,
    pub ingested_at: DateTime<Utc>,
    pub body: DocumentBody,
}

impl Document {
    pub fn from_text(source_id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            version: 1,
            title: title.into(),
            authority: Authority::default(),
            ingested_at: Utc::now(),
            body: DocumentBody::Text(text.into()),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_authority(mut self, authority: Authority) -> Self {
        self.authority = authority;
        self
    }

    pub fn document_id(&self) -> DocumentId {
        format!("{}@v{}", self.source_id, self.version)
    }
}

/// Per-chunk metadata copied from the document plus structural position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source_id: String,
    pub title: String,
    pub authority: Authority,
    pub version: u32,
    pub ingested_at: DateTime<Utc>,
    pub section: Option<String>,
    pub page: Option<u32>,
    /// Byte span of `text` inside the source document.
    pub byte_start: usize,
    pub byte_end: usize,
}

/// The atomic retrievable unit.
///
/// `text[..overlap_bytes]` is the verbatim tail of the previous chunk of the
/// same document; the first chunk always has `overlap_bytes == 0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub ordinal: usize,
    pub text: String,
    pub overlap_bytes: usize,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Text not shared with the previous chunk.
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap_bytes..]
    }

    /// Human readable location, e.g. `"Emergency Procedures, p. 4"`.
    pub fn section_reference(&self) -> Option<String> {
        match (&self.metadata.section, self.metadata.page) {
            (Some(section), Some(page)) => Some(format!("{section}, p. {page}")),
            (Some(section), None) => Some(section.clone()),
            (None, Some(page)) => Some(format!("p. {page}")),
            (None, None) => None,
        }
    }
}

/// A chunk as stored by the dual index, with its insertion sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedChunk {
    pub seq: u64,
    pub chunk: Chunk,
}

/// Indicates which index produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Dense,
    Sparse,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Dense => f.write_str("dense"),
            SourceKind::Sparse => f.write_str("sparse"),
        }
    }
}

/// The minimal surface returned by both stores.
///
/// `score` is store-specific but higher is always better. `seq` is the
/// chunk's insertion sequence, used as the deterministic tie-break.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub seq: u64,
    pub source: SourceKind,
}

/// Which retrieval signals contributed to a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Dense,
    Sparse,
    Both,
}

impl From<SourceKind> for Provenance {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Dense => Provenance::Dense,
            SourceKind::Sparse => Provenance::Sparse,
        }
    }
}

/// A scored, per-query reference to a chunk. Never persisted.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Arc<IndexedChunk>,
    pub score: f32,
    pub dense_score: Option<f32>,
    pub sparse_score: Option<f32>,
    pub provenance: Provenance,
}

impl Candidate {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk.id
    }
}

/// Risk / urgency classification attached to every answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::None => "NONE",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub document_title: String,
    pub section_reference: Option<String>,
}

/// Timing and degradation details attached by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnswerMetadata {
    pub retrieval_ms: u64,
    pub composition_ms: u64,
    pub total_ms: u64,
    pub candidates_retrieved: usize,
    pub candidates_admitted: usize,
    pub unavailable_index: Option<SourceKind>,
}

/// The structured result of one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub risk_level: RiskLevel,
    pub degraded: bool,
    pub warnings: Vec<String>,
    pub metadata: AnswerMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestResult {
    pub document_id: DocumentId,
    pub chunk_count: usize,
}

/// Input to the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub instructions: String,
    pub context: String,
    pub query: String,
}
