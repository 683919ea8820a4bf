//! `catalog search` and `catalog keywords`: query the index from the
//! command line.

use anyhow::Result;

use catalog_index_core::index::{SearchFilters, SortMode};
use catalog_index_core::models::Document;
use catalog_index_core::query::compile;

use crate::config::Config;
use crate::runtime;

/// Longest description excerpt printed per hit.
const EXCERPT_CHARS: usize = 160;

#[allow(clippy::too_many_arguments)]
pub async fn run_search(
    config: &Config,
    query: &str,
    org_id: Option<String>,
    org_types: Vec<String>,
    keywords: Vec<String>,
    sort: SortMode,
    per_page: usize,
    from: usize,
) -> Result<()> {
    let index = runtime::index_client(config)?;
    let node = compile(query);
    tracing::debug!(?node, "compiled query");

    let filters = SearchFilters {
        org_id,
        org_types,
        keywords,
    };
    let results = index
        .with_timeout_retry("search", || {
            index.search_page(&node, &filters, sort, per_page, from)
        })
        .await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("{} total", results.total);
    for (i, doc) in results.items.iter().enumerate() {
        print_hit(from + i + 1, doc);
    }
    Ok(())
}

fn print_hit(rank: usize, doc: &Document) {
    let title = if doc.title.is_empty() {
        "(untitled)"
    } else {
        doc.title.as_str()
    };
    println!("{}. {} / {}", rank, doc.organization.name, title);
    if let Some(ts) = &doc.last_harvested_date {
        println!("    harvested: {}", ts);
    }
    if let Some(popularity) = doc.popularity {
        println!("    popularity: {}", popularity);
    }
    if !doc.keyword.is_empty() {
        println!("    keywords: {}", doc.keyword.join(", "));
    }
    let excerpt = excerpt(&doc.description, EXCERPT_CHARS);
    if !excerpt.is_empty() {
        println!("    excerpt: \"{}\"", excerpt);
    }
    println!("    slug: {}", doc.slug);
    println!("    id: {}", doc.id);
    println!();
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

pub async fn run_keywords(config: &Config, size: usize, min_doc_count: u64) -> Result<()> {
    let index = runtime::index_client(config)?;
    let terms = index
        .with_timeout_retry("keywords", || {
            index.keyword_aggregation(size, min_doc_count)
        })
        .await?;

    if terms.is_empty() {
        println!("No keywords.");
        return Ok(());
    }
    for (keyword, count) in terms {
        println!("{:>8}  {}", count, keyword);
    }
    Ok(())
}
