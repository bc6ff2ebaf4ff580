//! Resolve one page through the cache.

use super::session::{parse_query, Session};
use anyhow::{bail, Result};
use readthrough_types::ReadStatus;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Options for the page command
#[derive(Debug, Clone, Default)]
pub struct PageOptions {
    pub page: u64,
    pub size: Option<u64>,
    pub query: Vec<String>,
    pub meta: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct PageOutput<'a> {
    page: u64,
    size: u64,
    total: Option<u64>,
    rows: &'a [Value],
}

pub async fn show_page(config_path: &Path, opts: PageOptions) -> Result<()> {
    if opts.page == 0 {
        bail!("Pages start at 1");
    }

    let session = Session::open(config_path)?;
    let options = session.options(opts.page, opts.size, parse_query(&opts.query)?);
    let rows = session.resolve(&options).await?;
    let meta = session.meta(&options)?;

    if opts.meta {
        if opts.json {
            println!("{}", serde_json::to_string_pretty(&meta)?);
        } else {
            println!(
                "Page {} ({:?}, total {})",
                options.page,
                meta.meta.status,
                format_total(meta.meta.total)
            );
            for (offset, item) in meta.data.iter().enumerate() {
                let position = options.page.saturating_sub(1) * options.size + offset as u64;
                let status = match item.status {
                    ReadStatus::Read => "read",
                    ReadStatus::Reading => "reading",
                    ReadStatus::Unread => "unread",
                };
                let value = item
                    .value
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "-".to_string());
                println!("  {:>4} {:<7} {}", position, status, value);
            }
        }
        return Ok(());
    }

    if opts.json {
        let output = PageOutput {
            page: options.page,
            size: options.size,
            total: meta.meta.total,
            rows: &rows,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Page {}: {} rows (total {})",
            options.page,
            rows.len(),
            format_total(meta.meta.total)
        );
        for row in &rows {
            println!("  {}", row);
        }
    }

    Ok(())
}

pub(crate) fn format_total(total: Option<u64>) -> String {
    total
        .map(|total| total.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
