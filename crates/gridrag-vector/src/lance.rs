use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray, UInt64Array};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use tracing::{debug, info};

use gridrag_core::traits::{DenseEntry, DenseStore};
use gridrag_core::types::{ChunkId, SearchHit, SourceKind};

use crate::schema::build_embeddings_schema;
use crate::table::{ensure_table, get_meta, open_db, set_meta, sql_literal};

const META_TABLE: &str = "gridrag_meta";
const EMBEDDER_KEY: &str = "embedder_id";

/// Dense store on a LanceDB table using cosine distance.
pub struct LanceVectorStore {
	db: Connection,
	table_name: String,
	dim: i32,
}

impl LanceVectorStore {
	pub async fn open(uri: &str, table_name: &str, dim: usize) -> Result<Self> {
		let dim = i32::try_from(dim)?;
		let db = open_db(uri).await?;
		ensure_table(&db, table_name, build_embeddings_schema(dim)).await?;
		info!(%uri, table = table_name, dim, "opened lancedb vector store");
		Ok(Self { db, table_name: table_name.to_string(), dim })
	}

	async fn table(&self) -> Result<Table> {
		Ok(self.db.open_table(&self.table_name).execute().await?)
	}

	fn entries_to_record_batch(&self, entries: &[DenseEntry]) -> Result<RecordBatch> {
		let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
		let document_ids: Vec<&str> = entries.iter().map(|e| e.document_id.as_str()).collect();
		let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
		let vectors = entries.iter().map(|e| Some(e.vector.iter().copied().map(Some).collect::<Vec<_>>()));
		Ok(RecordBatch::try_new(
			build_embeddings_schema(self.dim),
			vec![
				Arc::new(StringArray::from(ids)),
				Arc::new(StringArray::from(document_ids)),
				Arc::new(UInt64Array::from(seqs)),
				Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, self.dim)),
			],
		)?)
	}

	async fn delete_where(&self, predicate: &str) -> Result<()> {
		self.table().await?.delete(predicate).await?;
		Ok(())
	}
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<StringArray>())
		.ok_or_else(|| anyhow!("{name} column missing"))
}

#[async_trait]
impl DenseStore for LanceVectorStore {
	async fn upsert(&self, entries: &[DenseEntry]) -> Result<()> {
		if entries.is_empty() {
			return Ok(());
		}
		let rb = self.entries_to_record_batch(entries)?;
		let schema = rb.schema();
		let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
		let table = self.table().await?;
		let mut mi = table.merge_insert(&["id"]);
		mi.when_matched_update_all(None).when_not_matched_insert_all();
		mi.execute(reader).await?;
		debug!(entries = entries.len(), "lancedb upsert");
		Ok(())
	}

	async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
		if k == 0 {
			return Ok(Vec::new());
		}
		let table = self.table().await?;
		let mut stream = table
			.vector_search(query.to_vec())?
			.distance_type(DistanceType::Cosine)
			.limit(k)
			.execute()
			.await?;
		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await? {
			let ids = string_column(&batch, "id")?;
			let seqs = batch
				.column_by_name("seq")
				.and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
				.ok_or_else(|| anyhow!("seq column missing"))?;
			let distances = batch
				.column_by_name("_distance")
				.and_then(|c| c.as_any().downcast_ref::<Float32Array>())
				.ok_or_else(|| anyhow!("_distance column missing"))?;
			for i in 0..batch.num_rows() {
				hits.push(SearchHit {
					id: ids.value(i).to_string(),
					score: 1.0 - distances.value(i),
					seq: seqs.value(i),
					source: SourceKind::Dense,
				});
			}
		}
		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.seq.cmp(&b.seq)));
		hits.truncate(k);
		Ok(hits)
	}

	async fn retire_document(&self, document_id: &str) -> Result<()> {
		self.delete_where(&format!("document_id = {}", sql_literal(document_id))).await
	}

	async fn delete_chunks(&self, ids: &[ChunkId]) -> Result<()> {
		if ids.is_empty() {
			return Ok(());
		}
		let list = ids.iter().map(|id| sql_literal(id)).collect::<Vec<_>>().join(", ");
		self.delete_where(&format!("id IN ({list})")).await
	}

	async fn chunk_ids(&self) -> Result<HashSet<ChunkId>> {
		let table = self.table().await?;
		let mut stream = table.query().select(Select::columns(&["id"])).execute().await?;
		let mut out = HashSet::new();
		while let Some(batch) = stream.try_next().await? {
			let ids = string_column(&batch, "id")?;
			out.extend((0..ids.len()).map(|i| ids.value(i).to_string()));
		}
		Ok(out)
	}

	async fn clear(&self) -> Result<()> {
		self.delete_where("id IS NOT NULL").await
	}

	async fn embedder_id(&self) -> Result<Option<String>> {
		get_meta(&self.db, META_TABLE, EMBEDDER_KEY).await
	}

	async fn set_embedder_id(&self, id: &str) -> Result<()> {
		set_meta(&self.db, META_TABLE, EMBEDDER_KEY, id).await
	}
}
