//! Document commands: add, list, show, remove, retry.

use anyhow::{Result, bail};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::documents::{DocumentId, DocumentStatus};
use crate::error::KnowledgeError;
use crate::service::{AddOutcome, KnowledgeService};
use crate::utils::format_timestamp;

/// Collect the files to ingest: explicit paths first, then every file
/// under `dir` whose extension is in `extensions`, sorted.
pub fn collect_files(
    files: Vec<PathBuf>,
    dir: Option<&Path>,
    extensions: &[String],
) -> Vec<PathBuf> {
    let mut collected = files;

    if let Some(dir) = dir {
        let mut found: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
            })
            .collect();
        found.sort();
        collected.extend(found);
    }

    collected
}

/// Run add command.
pub async fn run_add(
    service: &KnowledgeService,
    files: Vec<PathBuf>,
    dir: Option<PathBuf>,
    id: Option<String>,
    overwrite: bool,
) -> Result<()> {
    let paths = collect_files(files, dir.as_deref(), &service.settings().ingest.extensions);
    if paths.is_empty() {
        bail!("No files to add. Pass file paths or --dir");
    }
    if id.is_some() && paths.len() != 1 {
        bail!("--id can only be used with a single file");
    }

    let bar = if paths.len() > 1 {
        let bar = ProgressBar::new(paths.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("█▓░"),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut indexed = 0usize;
    let mut failed = 0usize;
    let mut skipped = 0usize;

    for path in &paths {
        bar.set_message(path.display().to_string());

        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                bar.suspend(|| {
                    eprintln!("{} {}: {e}", style("✗").red(), path.display());
                });
                failed += 1;
                bar.inc(1);
                continue;
            }
        };

        let result = match &id {
            Some(id) => service.add_named_document(id, &text, overwrite).await,
            None => service.add_document(&text).await,
        };

        match result {
            Ok(outcome) if outcome.is_indexed() => {
                indexed += 1;
                bar.suspend(|| print_outcome(Some(path), &outcome));
            }
            Ok(outcome) => {
                failed += 1;
                bar.suspend(|| print_outcome(Some(path), &outcome));
            }
            Err(KnowledgeError::DuplicateDocument(existing)) => {
                skipped += 1;
                bar.suspend(|| {
                    println!(
                        "{} {} already stored as {existing} (use --overwrite with --id to replace)",
                        style("-").dim(),
                        path.display()
                    );
                });
            }
            Err(e) => {
                failed += 1;
                bar.suspend(|| {
                    eprintln!("{} {}: {e}", style("✗").red(), path.display());
                });
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!("\nAdded {indexed} document(s), {skipped} skipped, {failed} failed");
    if failed > 0 {
        bail!("{failed} document(s) failed to ingest; see `ragbase list` and `ragbase retry <id>`");
    }
    Ok(())
}

fn print_outcome(source: Option<&Path>, outcome: &AddOutcome) {
    let source = source
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default();
    match outcome.status {
        DocumentStatus::Indexed => println!(
            "{} {}{source} ({} chunks)",
            style("✓").green(),
            style(&outcome.document_id).bold(),
            outcome.chunk_count
        ),
        _ => println!(
            "{} {}{source}: {}",
            style("✗").red(),
            style(&outcome.document_id).bold(),
            outcome.failure_reason.as_deref().unwrap_or("unknown failure")
        ),
    }
}

/// Run list command.
pub fn run_list(service: &KnowledgeService, json: bool) -> Result<()> {
    let documents = service.list_documents();

    if json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
        return Ok(());
    }
    if documents.is_empty() {
        eprintln!("No documents stored. Add some with `ragbase add <files>`.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Status", "Chunks", "Chars", "Created", "Note"]);

    for doc in &documents {
        table.add_row(vec![
            doc.id.to_string(),
            doc.status.to_string(),
            doc.chunk_count.to_string(),
            doc.char_count.to_string(),
            format_timestamp(doc.created_at),
            doc.failure_reason.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Run show command.
pub fn run_show(service: &KnowledgeService, id: &str) -> Result<()> {
    let id = DocumentId::new(id)?;
    let Some(doc) = service.get_document(&id) else {
        bail!("Document not found: {id}");
    };

    println!("{} {}", style("Document:").cyan().bold(), doc.id);
    println!("  Status:  {}", doc.status);
    println!("  Created: {}", format_timestamp(doc.created_at));
    if let Some(indexed_at) = doc.indexed_at {
        println!("  Indexed: {}", format_timestamp(indexed_at));
    }
    if let Some(reason) = &doc.failure_reason {
        println!("  Reason:  {reason}");
    }
    println!("  Length:  {} chars", doc.source_text.chars().count());

    println!("\n{} {}", style("Chunks:").cyan().bold(), doc.chunks.len());
    for chunk in &doc.chunks {
        let preview: String = chunk.text.chars().take(80).collect();
        println!(
            "  [{}..{}) {}{}",
            chunk.start_offset,
            chunk.end_offset,
            preview.replace('\n', " "),
            if chunk.text.chars().count() > 80 { "..." } else { "" }
        );
    }
    Ok(())
}

/// Run remove command.
pub async fn run_remove(service: &KnowledgeService, id: &str) -> Result<()> {
    let id = DocumentId::new(id)?;
    let removed = service.delete_document(&id).await?;
    println!(
        "Removed {} ({} chunks)",
        style(&removed.id).bold(),
        removed.chunk_count
    );
    Ok(())
}

/// Run retry command.
pub async fn run_retry(service: &KnowledgeService, id: &str) -> Result<()> {
    let id = DocumentId::new(id)?;
    let outcome = service.retry_document(&id).await?;
    print_outcome(None, &outcome);
    if !outcome.is_indexed() {
        bail!("Retry of {id} failed");
    }
    Ok(())
}
