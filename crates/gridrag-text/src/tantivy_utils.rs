use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, FAST, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TEXT_TOKENIZER: &str = "grid_text";

/// `chunk_id` and `document_id` are raw (untokenized) so they can be deleted by
/// term; `payload` holds the serialized chunk for catalog rebuilds.
pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("chunk_id", STRING | STORED);
	schema_builder.add_text_field("document_id", STRING | STORED);
	schema_builder.add_u64_field("seq", STORED | FAST);
	let text_field_indexing = TextFieldIndexing::default()
		.set_tokenizer(TEXT_TOKENIZER)
		.set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing);
	schema_builder.add_text_field("text", text_options);
	schema_builder.add_text_field("payload", STORED);
	schema_builder.build()
}

/// Modal verbs ("must", "shall") and negations stay indexed: procedures hinge on them.
const STOP_WORDS: &[&str] = &[
	"a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it", "its", "of", "on",
	"that", "the", "to", "was", "with", "or", "but", "this", "these", "they", "them", "their", "there", "then",
	"than", "so", "if", "when", "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could",
	"would", "might", "do", "does", "did", "have", "had", "having",
];

/// Longer tokens are almost always base64 blobs or hashes pasted into a document.
const MAX_TOKEN_LEN: usize = 40;

/// Lowercase, drop stop words and overlong tokens. Used for both indexing and
/// query parsing so the two always agree.
pub fn register_tokenizer(index: &Index) {
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TEXT_TOKENIZER, tokenizer);
}
