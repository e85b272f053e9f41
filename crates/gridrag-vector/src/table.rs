//! LanceDB connection and housekeeping helpers.
use anyhow::{anyhow, Result};
use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use arrow_schema::Schema;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use std::sync::Arc;

use crate::schema::build_meta_schema;

pub async fn open_db(uri: &str) -> Result<Connection> {
	Ok(connect(uri).execute().await?)
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<()> {
	let names = conn.table_names().execute().await?;
	if names.iter().any(|n| n == name) {
		return Ok(());
	}
	let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
	conn.create_table(name, Box::new(iter)).execute().await?;
	Ok(())
}

/// Quote a string literal for a Lance SQL predicate.
pub fn sql_literal(value: &str) -> String {
	format!("'{}'", value.replace('\'', "''"))
}

pub async fn set_meta(conn: &Connection, table: &str, key: &str, value: &str) -> Result<()> {
	ensure_table(conn, table, build_meta_schema()).await?;
	let t = conn.open_table(table).execute().await?;
	let rb = RecordBatch::try_new(
		build_meta_schema(),
		vec![
			Arc::new(StringArray::from(vec![key.to_string()])),
			Arc::new(StringArray::from(vec![value.to_string()])),
			Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
		],
	)?;
	let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
	let mut mi = t.merge_insert(&["key"]);
	mi.when_matched_update_all(None).when_not_matched_insert_all();
	mi.execute(reader).await?;
	Ok(())
}

pub async fn get_meta(conn: &Connection, table: &str, key: &str) -> Result<Option<String>> {
	let names = conn.table_names().execute().await?;
	if !names.iter().any(|n| n == table) {
		return Ok(None);
	}
	let t = conn.open_table(table).execute().await?;
	let mut stream = t.query().only_if(format!("key = {}", sql_literal(key))).execute().await?;
	while let Some(batch) = stream.try_next().await? {
		if batch.num_rows() == 0 {
			continue;
		}
		let val = batch
			.column_by_name("value")
			.and_then(|c| c.as_any().downcast_ref::<StringArray>())
			.ok_or_else(|| anyhow!("meta.value column missing"))?;
		return Ok(Some(val.value(0).to_string()));
	}
	Ok(None)
}
