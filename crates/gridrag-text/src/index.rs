use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

use gridrag_core::traits::SparseStore;
use gridrag_core::types::{Chunk, ChunkId, IndexedChunk, SearchHit, SourceKind};

use crate::tantivy_utils::{build_schema, register_tokenizer};

#[derive(Debug, Clone, Copy)]
struct Fields {
	chunk_id: Field,
	document_id: Field,
	seq: Field,
	text: Field,
	payload: Field,
}

/// BM25 keyword index over chunk text.
///
/// Readers work on the last committed snapshot and never take the writer
/// lock; each write batch is one commit followed by a reader reload, so a
/// search sees either all or none of a batch.
pub struct TantivySparseIndex {
	index: Index,
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	fields: Fields,
}

impl TantivySparseIndex {
	pub fn in_ram(writer_memory_bytes: usize) -> Result<Self> {
		let index = Index::create_in_ram(build_schema());
		Self::from_index(index, writer_memory_bytes)
	}

	pub fn open_or_create(index_dir: &Path, writer_memory_bytes: usize) -> Result<Self> {
		std::fs::create_dir_all(index_dir)?;
		let directory = MmapDirectory::open(index_dir)?;
		let index = Index::open_or_create(directory, build_schema())?;
		info!(dir = %index_dir.display(), "opened keyword index");
		Self::from_index(index, writer_memory_bytes)
	}

	fn from_index(index: Index, writer_memory_bytes: usize) -> Result<Self> {
		register_tokenizer(&index);
		let schema = index.schema();
		let fields = Fields {
			chunk_id: schema.get_field("chunk_id")?,
			document_id: schema.get_field("document_id")?,
			seq: schema.get_field("seq")?,
			text: schema.get_field("text")?,
			payload: schema.get_field("payload")?,
		};
		let writer: IndexWriter = index.writer(writer_memory_bytes)?;
		let reader: IndexReader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(Self { index, reader, writer: Mutex::new(writer), fields })
	}

	pub fn num_docs(&self) -> u64 {
		self.reader.searcher().num_docs()
	}

	fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
		if let Err(e) = writer.commit() {
			writer.rollback()?;
			return Err(e.into());
		}
		self.reader.reload()?;
		Ok(())
	}

	fn write_batch(&self, writer: &mut IndexWriter, chunks: &[IndexedChunk]) -> Result<()> {
		for c in chunks {
			writer.delete_term(Term::from_field_text(self.fields.chunk_id, &c.chunk.id));
			let payload = serde_json::to_string(&c.chunk)?;
			writer.add_document(doc!(
				self.fields.chunk_id => c.chunk.id.clone(),
				self.fields.document_id => c.chunk.document_id.clone(),
				self.fields.seq => c.seq,
				self.fields.text => c.chunk.text.clone(),
				self.fields.payload => payload,
			))?;
		}
		Ok(())
	}

	/// One `Should` clause per distinct analyzed query term. Building the query
	/// from tokens keeps arbitrary user text (colons, quotes, brackets) out of
	/// the query-language parser.
	fn build_query(&self, query: &str) -> Result<Option<BooleanQuery>> {
		let mut analyzer = self.index.tokenizer_for_field(self.fields.text)?;
		let mut stream = analyzer.token_stream(query);
		let mut seen = HashSet::new();
		let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
		while let Some(token) = stream.next() {
			if seen.insert(token.text.clone()) {
				let term = Term::from_field_text(self.fields.text, &token.text);
				clauses.push((Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))));
			}
		}
		Ok((!clauses.is_empty()).then(|| BooleanQuery::new(clauses)))
	}

	fn stored_seq(&self, doc: &TantivyDocument) -> u64 {
		doc.get_first(self.fields.seq).and_then(|v| v.as_u64()).unwrap_or(u64::MAX)
	}
}

impl SparseStore for TantivySparseIndex {
	fn upsert(&self, chunks: &[IndexedChunk]) -> Result<()> {
		if chunks.is_empty() {
			return Ok(());
		}
		let mut writer = self.writer.lock();
		if let Err(e) = self.write_batch(&mut writer, chunks) {
			writer.rollback()?;
			return Err(e);
		}
		self.commit(&mut writer)?;
		debug!(chunks = chunks.len(), "keyword index committed");
		Ok(())
	}

	fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
		if k == 0 {
			return Ok(Vec::new());
		}
		let Some(q) = self.build_query(query)? else {
			return Ok(Vec::new());
		};
		let searcher = self.reader.searcher();
		let top_docs = searcher.search(&q, &TopDocs::with_limit(k))?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let id = doc
				.get_first(self.fields.chunk_id)
				.and_then(|v| v.as_str())
				.ok_or_else(|| anyhow!("indexed chunk without id"))?
				.to_string();
			hits.push(SearchHit { id, score, seq: self.stored_seq(&doc), source: SourceKind::Sparse });
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.seq.cmp(&b.seq)));
		Ok(hits)
	}

	fn delete_chunks(&self, ids: &[ChunkId]) -> Result<()> {
		if ids.is_empty() {
			return Ok(());
		}
		let mut writer = self.writer.lock();
		for id in ids {
			writer.delete_term(Term::from_field_text(self.fields.chunk_id, id));
		}
		self.commit(&mut writer)
	}

	fn retire_document(&self, document_id: &str) -> Result<()> {
		let mut writer = self.writer.lock();
		writer.delete_term(Term::from_field_text(self.fields.document_id, document_id));
		self.commit(&mut writer)?;
		info!(%document_id, "retired document from keyword index");
		Ok(())
	}

	fn load_all(&self) -> Result<Vec<IndexedChunk>> {
		let searcher = self.reader.searcher();
		let addrs = searcher.search(&AllQuery, &DocSetCollector)?;
		let mut out = Vec::with_capacity(addrs.len());
		for addr in addrs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let payload = doc
				.get_first(self.fields.payload)
				.and_then(|v| v.as_str())
				.ok_or_else(|| anyhow!("indexed chunk without payload"))?;
			let chunk: Chunk = serde_json::from_str(payload)?;
			out.push(IndexedChunk { seq: self.stored_seq(&doc), chunk });
		}
		out.sort_by_key(|c| c.seq);
		Ok(out)
	}
}
