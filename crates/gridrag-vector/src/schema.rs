use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub fn build_embeddings_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("document_id", DataType::Utf8, false),
		Field::new("seq", DataType::UInt64, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

/// Key/value table recording store-wide facts such as the embedder id.
pub fn build_meta_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("key", DataType::Utf8, false),
		Field::new("value", DataType::Utf8, false),
		Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
	]))
}
