//! Ask and Status commands.

use anyhow::Result;
use console::style;

use crate::service::KnowledgeService;
use crate::utils::format_timestamp;

/// Run ask command.
pub async fn run_ask(
    service: &KnowledgeService,
    question: &str,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let k = k.unwrap_or(service.settings().retrieval.k);
    let answer = service.ask_with(question, k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}\n", answer.text);
    if answer.is_ungrounded() {
        eprintln!("{}", style("No relevant context found.").dim());
        return Ok(());
    }

    println!("{}", style("Sources:").cyan().bold());
    for (i, chunk) in answer.context.iter().enumerate() {
        let cited = answer.cited_chunk_ids.contains(&chunk.chunk_id);
        let marker = if cited {
            style("*").green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            " {marker}[{}] {} (score: {:.3})",
            i + 1,
            chunk.chunk_id,
            chunk.score
        );
    }
    Ok(())
}

/// Run status command.
pub fn run_status(service: &KnowledgeService, json: bool) -> Result<()> {
    let status = service.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let settings = service.settings();
    println!("{}", style("Knowledge Base").cyan().bold());
    println!("  Data directory: {}", settings.data_dir.display());
    println!(
        "  Documents:      {} ({} indexed, {} pending, {} failed)",
        status.document_count, status.indexed_count, status.pending_count, status.failed_count
    );
    println!("  Chunks:         {}", status.chunk_count);
    println!("  Vectors:        {}", status.vector_count);
    println!(
        "  Last ingest:    {}",
        status
            .last_ingest_at
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Embedding:      {:?} (dim {}, {})",
        settings.embedding.provider,
        settings.embedding.dimension,
        settings.embedding.similarity_metric
    );
    println!("  Generation:     {:?}", settings.generation.provider);
    Ok(())
}
