use std::env;
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridrag_core::config::{expand_path, Config};
use gridrag_core::loader::DirectoryLoader;
use gridrag_engine::RagEngine;

const DEFAULT_TANTIVY_DIR: &str = "./data/indexes/tantivy";

fn usage(prog: &str) -> ! {
    eprintln!("Usage: {prog} <command> [args...]");
    eprintln!("  ingest [dir]              index every document under dir (default: data.raw_txt_dir)");
    eprintln!("  ask <role> <query...>     answer a question as the given role");
    eprintln!("  retire <document_id>      remove a document generation, e.g. sop-138@v1");
    eprintln!("  stats                     show index statistics");
    std::process::exit(1);
}

fn parse_args() -> (String, String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        usage(&prog);
    }
    let cmd = args.remove(0);
    (prog, cmd, args)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let (prog, cmd, args) = parse_args();

    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let mut settings = config.settings()?;
    if settings.data.tantivy_index_dir.trim().is_empty() {
        settings.data.tantivy_index_dir = DEFAULT_TANTIVY_DIR.to_string();
    }

    let engine = RagEngine::from_settings(settings.clone()).await?;
    if engine.stats().pending_dense > 0 {
        let report = engine.retry_pending_dense().await?;
        info!(recovered = report.recovered, pending = report.pending, quarantined = report.quarantined, "dense index caught up");
    }

    match cmd.as_str() {
        "ingest" => {
            let data_dir = args.first().map(PathBuf::from).unwrap_or_else(|| expand_path(&settings.data.raw_txt_dir));
            println!("Ingesting from {}", data_dir.display());
            let documents = DirectoryLoader::new().include_unsupported(true).load(&data_dir)?;

            let pb = ProgressBar::new(documents.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents {msg}")?
                    .progress_chars("#>-"),
            );
            let (mut chunks, mut failed) = (0usize, 0usize);
            for document in documents {
                pb.set_message(document.source_id.clone());
                match engine.ingest(document).await {
                    Ok(result) => chunks += result.chunk_count,
                    Err(e) => {
                        failed += 1;
                        pb.suspend(|| warn!(error = %e, retryable = e.is_retryable(), "ingest failed"));
                    }
                }
                pb.inc(1);
            }
            pb.finish_with_message("done");

            let stats = engine.stats();
            println!("✅ Ingest complete ({chunks} chunks, {failed} documents failed)");
            println!("📊 {} documents / {} chunks indexed, {} awaiting embeddings", stats.documents, stats.chunks, stats.pending_dense);
        }
        "ask" => {
            if args.len() < 2 {
                usage(&prog);
            }
            let role = &args[0];
            let query = args[1..].join(" ");
            match engine.answer(&query, role).await {
                Ok(answer) => {
                    println!("{}\n", answer.text);
                    for (i, citation) in answer.citations.iter().enumerate() {
                        let location = citation.section_reference.as_deref().unwrap_or("-");
                        println!("  [{}] {} | {} | {}", i + 1, citation.document_title, location, citation.chunk_id);
                    }
                    println!("\nrisk: {}  confidence: {:.2}{}", answer.risk_level, answer.confidence, if answer.degraded { "  (degraded)" } else { "" });
                    for warning in &answer.warnings {
                        println!("⚠️  {warning}");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "query failed");
                    eprintln!("{}", e.user_message());
                    std::process::exit(if e.is_retryable() { 75 } else { 1 });
                }
            }
        }
        "retire" => {
            let Some(document_id) = args.first() else { usage(&prog) };
            let removed = engine.retire(document_id).await?;
            println!("Retired {document_id} ({removed} chunks)");
        }
        "stats" => {
            let stats = engine.stats();
            println!("documents: {}\nchunks: {}\npending embeddings: {}", stats.documents, stats.chunks, stats.pending_dense);
        }
        _ => {
            eprintln!("Unknown command: {cmd}");
            usage(&prog);
        }
    }
    Ok(())
}
