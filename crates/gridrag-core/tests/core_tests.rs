use std::fs;
use std::io::Write;
use tempfile::TempDir;

use gridrag_core::loader::DirectoryLoader;
use gridrag_core::types::{Authority, DocumentBody};
use gridrag_core::{Chunker, IngestError};

#[test]
fn load_directory_single_small_file() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let file_path = dir.join("a.txt");
    let mut f = fs::File::create(&file_path).unwrap();
    writeln!(f, "Short text").unwrap();

    let docs = DirectoryLoader::new().load(dir).expect("load");

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].source_id, "a.txt");
    assert_eq!(docs[0].title, "a");
    assert_eq!(docs[0].document_id(), "a.txt@v1");

    let chunks = Chunker::default().chunk(&docs[0]).expect("chunk");
    assert_eq!(chunks.len(), 1, "one small paragraph becomes one chunk");
    assert_eq!(chunks[0].text.trim(), "Short text");
}

#[test]
fn load_directory_limited_two_files_limit_one() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("a.txt"), "alpha bravo").unwrap();
    fs::write(dir.join("b.md"), "charlie delta").unwrap();

    let docs = DirectoryLoader::new().load_limited(dir, 1).expect("load limited");

    assert_eq!(docs.len(), 1, "limited to one source document");
    assert_eq!(docs[0].source_id, "a.txt");
}

#[test]
fn authority_comes_from_first_directory() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::create_dir_all(dir.join("critical")).unwrap();
    fs::create_dir_all(dir.join("manuals")).unwrap();
    fs::write(dir.join("critical/relay.txt"), "Relay settings.").unwrap();
    fs::write(dir.join("manuals/pump.txt"), "Pump manual.").unwrap();

    let docs = DirectoryLoader::new().load(dir).expect("load");
    let relay = docs.iter().find(|d| d.source_id == "critical/relay.txt").unwrap();
    let pump = docs.iter().find(|d| d.source_id == "manuals/pump.txt").unwrap();
    assert_eq!(relay.authority, Authority::Critical);
    assert_eq!(pump.authority, Authority::Standard);
}

#[test]
fn unsupported_files_surface_as_unsupported_format() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("scan.pdf"), [0x25u8, 0x50, 0x44, 0x46]).unwrap();
    fs::write(dir.join("notes.txt"), "notes").unwrap();

    assert_eq!(DirectoryLoader::new().load(dir).unwrap().len(), 1, "binary skipped by default");

    let docs = DirectoryLoader::new().include_unsupported(true).load(dir).expect("load");
    let pdf = docs.iter().find(|d| d.source_id == "scan.pdf").unwrap();
    assert!(matches!(pdf.body, DocumentBody::Unextracted { .. }));

    let err = Chunker::default().chunk(pdf).unwrap_err();
    assert!(matches!(err, IngestError::UnsupportedFormat { .. }));
    assert!(!err.is_retryable());
}
