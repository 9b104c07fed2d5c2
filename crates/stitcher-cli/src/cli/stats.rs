use crate::cli::{print_json, MetricsArgs, OutputFormat};
use anyhow::Result;
use stitcher_core::Stitcher;

pub fn run(stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let stats = stitcher.stats()?;
    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    let db_mb = stats.db_size_bytes as f64 / 1_048_576.0;

    println!();
    println!("Graph Overview");
    println!("{}", "─".repeat(50));
    println!("Entities:      {:>8}", stats.entity_count);
    println!("Stitch edges:  {:>8}", stats.edge_count);
    println!("Data sources:  {:>8}", stats.datasource_count);
    println!("Stitch versions: {:>6}", stats.stitch_versions);
    println!("Last modified: {:>8}", stats.last_modified);
    println!("DB Size:       {:>7.1} MB", db_mb);
    println!("{}", "─".repeat(50));
    println!();

    Ok(())
}

pub fn metrics(args: MetricsArgs, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let m = stitcher.metrics(args.label.as_deref())?;
    if format == OutputFormat::Json {
        return print_json(&m);
    }

    println!();
    println!("Curation Metrics: {}", m.label.as_deref().unwrap_or("(all)"));
    println!("{}", "─".repeat(50));
    println!("Entities:      {:>8}", m.entity_count);
    println!("Stitches:      {:>8}", m.stitch_count);
    println!("Components:    {:>8}", m.connected_component_count);
    println!("Singletons:    {:>8}", m.singleton_count);

    if !m.entity_histogram.is_empty() {
        println!("By kind:");
        for (kind, count) in &m.entity_histogram {
            println!("  {:16} {:>8}", kind, count);
        }
    }
    if !m.stitch_histogram.is_empty() {
        println!("By key:");
        for (key, count) in &m.stitch_histogram {
            println!("  {:16} {:>8}", key, count);
        }
    }
    if !m.component_size_histogram.is_empty() {
        println!("Component sizes:");
        for (size, count) in &m.component_size_histogram {
            println!("  {:>16} {:>8}", size, count);
        }
    }
    println!("{}", "─".repeat(50));
    println!();

    Ok(())
}
