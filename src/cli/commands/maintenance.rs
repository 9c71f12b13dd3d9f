//! Rebuild and Clear commands.

use anyhow::{Result, bail};

use crate::service::KnowledgeService;

/// Run rebuild command.
pub async fn run_rebuild(service: &KnowledgeService) -> Result<()> {
    let count = service.rebuild_index().await?;
    println!("Rebuilt vector index with {count} vectors");
    Ok(())
}

/// Run clear command. Requires explicit confirmation.
pub async fn run_clear(service: &KnowledgeService, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete the knowledge base without --yes");
    }
    let removed = service.clear().await?;
    println!("Removed {removed} document(s)");
    Ok(())
}
