use gridrag_core::traits::SparseStore;
use gridrag_core::types::{Document, IndexedChunk, SourceKind};
use gridrag_core::Chunker;
use gridrag_text::TantivySparseIndex;
use tempfile::TempDir;

const MEM: usize = 15_000_000;

fn indexed(doc: &Document, first_seq: u64) -> Vec<IndexedChunk> {
    Chunker::default()
        .chunk(doc)
        .expect("chunk")
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| IndexedChunk { seq: first_seq + i as u64, chunk })
        .collect()
}

#[test]
fn upsert_then_search_finds_chunk_by_its_words() {
    let index = TantivySparseIndex::in_ram(MEM).expect("index");
    let sop = Document::from_text("sop-138", "Transformer SOP", "138kV transformer emergency shutdown: open breaker 52A.");
    let pump = Document::from_text("pump", "Pump Manual", "Lubricate the pump bearings every quarter.");
    index.upsert(&indexed(&sop, 0)).expect("upsert");
    index.upsert(&indexed(&pump, 1)).expect("upsert");

    let hits = index.search("transformer shutdown", 10).expect("search");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "sop-138@v1:0");
    assert_eq!(hits[0].source, SourceKind::Sparse);
    assert!(hits[0].score > 0.0);
    assert_eq!(index.num_docs(), 2);
}

#[test]
fn query_syntax_characters_are_plain_text() {
    let index = TantivySparseIndex::in_ram(MEM).expect("index");
    let doc = Document::from_text("relay", "Relay", "Relay 87T trips on differential current.");
    index.upsert(&indexed(&doc, 0)).expect("upsert");

    let hits = index.search("relay: \"87T\" (trips) AND [", 5).expect("search never fails on syntax");
    assert_eq!(hits.len(), 1);
    assert!(index.search("   ", 5).expect("blank").is_empty());
    assert!(index.search("the and of", 5).expect("stopwords only").is_empty());
}

#[test]
fn equal_scores_are_ordered_by_insertion_sequence() {
    let index = TantivySparseIndex::in_ram(MEM).expect("index");
    let a = Document::from_text("a", "A", "grounding grid inspection");
    let b = Document::from_text("b", "B", "grounding grid inspection");
    index.upsert(&indexed(&b, 7)).expect("upsert");
    index.upsert(&indexed(&a, 3)).expect("upsert");

    let hits = index.search("grounding", 10).expect("search");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].score, hits[1].score);
    assert_eq!(hits[0].seq, 3);
    assert_eq!(hits[1].seq, 7);
}

#[test]
fn retire_and_delete_remove_hits() {
    let index = TantivySparseIndex::in_ram(MEM).expect("index");
    let v1 = Document::from_text("sop", "SOP", "Isolation procedure for feeder 12.");
    let other = Document::from_text("other", "Other", "Isolation switch maintenance.");
    index.upsert(&indexed(&v1, 0)).expect("upsert");
    index.upsert(&indexed(&other, 1)).expect("upsert");

    index.retire_document("sop@v1").expect("retire");
    let hits = index.search("isolation", 10).expect("search");
    assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["other@v1:0"]);

    index.delete_chunks(&["other@v1:0".to_string()]).expect("delete");
    assert!(index.search("isolation", 10).expect("search").is_empty());
    assert_eq!(index.num_docs(), 0);
}

#[test]
fn reupsert_replaces_instead_of_duplicating() {
    let index = TantivySparseIndex::in_ram(MEM).expect("index");
    let doc = Document::from_text("d", "D", "Breaker racking procedure.");
    let chunks = indexed(&doc, 0);
    index.upsert(&chunks).expect("upsert");
    index.upsert(&chunks).expect("upsert again");

    assert_eq!(index.search("breaker", 10).expect("search").len(), 1);
    assert_eq!(index.load_all().expect("load").len(), 1);
}

#[test]
fn persisted_index_reloads_full_chunks() {
    let tmp = TempDir::new().unwrap();
    let doc = Document::from_text("manual", "Manual", "# Safety\nWear arc flash PPE.\n\n# Steps\nRack out the breaker.");
    let chunks = indexed(&doc, 10);
    {
        let index = TantivySparseIndex::open_or_create(tmp.path(), MEM).expect("create");
        index.upsert(&chunks).expect("upsert");
    }

    let reopened = TantivySparseIndex::open_or_create(tmp.path(), MEM).expect("reopen");
    let loaded = reopened.load_all().expect("load");

    assert_eq!(loaded, chunks);
    assert_eq!(reopened.search("arc flash", 5).expect("search").len(), 1);
}
