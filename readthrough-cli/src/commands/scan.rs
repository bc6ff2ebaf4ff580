//! Walk every page of the data set.

use super::page::format_total;
use super::session::{parse_query, Session};
use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

#[derive(Serialize)]
struct ScannedPage {
    page: u64,
    rows: Vec<Value>,
}

/// Read pages until one comes back short, then report cache metrics.
pub async fn scan_pages(
    config_path: &Path,
    size: Option<u64>,
    query: &[String],
    json: bool,
) -> Result<()> {
    let session = Session::open(config_path)?;
    let query = parse_query(query)?;

    let mut pages = Vec::new();
    let mut total = None;
    for page in 1.. {
        let options = session.options(page, size, query.clone());
        let rows = session.resolve(&options).await?;
        total = session.meta(&options)?.meta.total.or(total);

        let short = (rows.len() as u64) < options.size;
        if !rows.is_empty() {
            pages.push(ScannedPage { page, rows });
        }
        if short || options.size == 0 {
            break;
        }
    }

    let row_count: usize = pages.iter().map(|page| page.rows.len()).sum();
    info!(pages = pages.len(), rows = row_count, "scan complete");
    let metrics = session.cache.metrics();

    if json {
        let payload = json!({
            "pages": pages,
            "total": total,
            "metrics": {
                "hits": metrics.hits,
                "misses": metrics.misses,
                "reads": metrics.reads,
                "deduplicated": metrics.deduplicated,
                "failed": metrics.failed,
                "resolved": metrics.resolved,
                "orphaned": metrics.orphaned,
                "invalidations": metrics.invalidations,
            },
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for page in &pages {
            println!("Page {}: {} rows", page.page, page.rows.len());
            for row in &page.rows {
                println!("  {}", row);
            }
        }
        println!(
            "Scanned {} rows in {} pages (total {})",
            row_count,
            pages.len(),
            format_total(total)
        );
        print!("{}", metrics);
    }

    Ok(())
}
