mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use tankobon::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tankobon=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let concurrency_default = config.update_concurrency;
    let lib = Tankobon::open(config).await?;

    match cli.command {
        Commands::Sources => {
            for s in lib.sources() {
                println!("{:<24} {:<16} {}", s.id, s.name, s.lang);
            }
        }
        Commands::Search { source, term } => print_results(&lib.search(&source, &term).await?),
        Commands::Browse { source, page, all } => {
            let results = if all { lib.browse_all(&source).await? } else { lib.browse(&source, page).await? };
            print_results(&results);
        }
        Commands::Add { source, slug, url } => {
            let locator = SeriesLocator { slug, url, name: None };
            let series = lib.add_series(&source, &locator).await?;
            println!("Added #{} {} ({} chapters)", series.id, series.name, series.chapters.len());
        }
        Commands::List { filter } => {
            for entry in lib.library(filter.as_deref()).await? {
                let source = entry.source_name.as_deref().unwrap_or(&entry.source_id);
                println!("{:>5}  {:<40} {:<16} {}", entry.id, entry.name, source, entry.status);
            }
        }
        Commands::Show { series_id } => {
            let series = lib.series(series_id).await?;
            println!("{} [{}] {}", series.name, series.source_id, series.status);
            if !series.authors.is_empty() { println!("by {}", series.authors.join(", ")); }
            if let Some(synopsis) = &series.synopsis { println!("\n{synopsis}\n"); }
            for c in &series.chapters {
                let pages = c.page_count().map(|n| format!("{n} pages")).unwrap_or_else(|| "-".into());
                println!("{:>6}  {:<40} {:<12} {}", c.id, c.title, c.date.as_deref().unwrap_or(""), pages);
            }
        }
        Commands::Read { series_id, chapter_id, page } => {
            let path = lib.read_page(series_id, chapter_id, page).await?;
            println!("{}", path.display());
        }
        Commands::Update { series_id: Some(id), .. } => {
            let added = lib.update_series(id).await?;
            println!("{added} new chapter(s)");
        }
        Commands::Update { series_id: None, concurrency } => {
            let report = lib.update_library(concurrency.unwrap_or(concurrency_default)).await?;
            println!("{} series updated, {} new chapter(s)", report.updated.len(), report.new_chapters());
            for (id, e) in &report.failed {
                eprintln!("series {id}: {e}");
            }
        }
        Commands::Delete { series_id } => {
            lib.delete_series(series_id).await?;
            println!("Deleted series {series_id}");
        }
        Commands::Export { series_id, chapter_id, output } => {
            let pages = lib.export_chapter_cbz(series_id, chapter_id, &output).await?;
            println!("Wrote {pages} page(s) to {}", output.display());
        }
        Commands::Stats => {
            let stats = lib.stats().await?;
            println!("series: {}\nchapters: {}\nchapters with pages: {}", stats.series, stats.chapters, stats.chapters_with_pages);
        }
    }
    lib.database().close().await;
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    for r in results {
        println!("{:<32} {}", r.slug, r.name);
    }
}
