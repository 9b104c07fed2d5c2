use crate::cli::{print_json, DeprecateArgs, OutputFormat, RecolorArgs};
use anyhow::Result;
use stitcher_core::{RecolorConfig, Stitcher};

pub fn deprecate(args: DeprecateArgs, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let mut config = stitcher.config().deprecation.clone().with_dry_run(args.dry_run);
    if let Some(limit) = args.limit {
        config = config.with_limit(limit);
    }
    if args.loose {
        config = config.with_strict(false);
    }

    let report = stitcher.deprecate_with(&args.source, args.key, &config)?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }

    println!(
        "{} {} values evaluated in {}, {} over limit {}{}",
        report.evaluated,
        args.key,
        report.source,
        report.deprecations.len(),
        config.limit,
        if report.dry_run { " (dry run)" } else { "" }
    );
    for d in &report.deprecations {
        println!("  {:<40} {:>4} peers  {} entities", d.value, d.peers, d.entities.len());
    }
    println!("Peer histogram:");
    for (peers, values) in &report.histogram {
        println!("  {:>6} {:>8}", peers, values);
    }
    println!("Edges removed: {}", report.edges_removed);
    Ok(())
}

fn recolor_config(args: &RecolorArgs, stitcher: &Stitcher) -> RecolorConfig {
    let mut config = stitcher.config().recolor.clone();
    if let Some(kind) = args.kind {
        config = config.with_kind(kind);
    }
    if !args.priority.is_empty() {
        config = config.with_priority(args.priority.clone());
    }
    config
}

pub fn recolor(args: RecolorArgs, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let report = stitcher.recolor_with(&args.source, &recolor_config(&args, stitcher))?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!(
        "Recolored around {}: {} entities in {} colors ({} grow rounds)",
        report.source, report.colored, report.colors, report.grow_rounds
    );
    Ok(())
}

pub fn closest(args: RecolorArgs, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let report = stitcher.closest_with(&args.source, &recolor_config(&args, stitcher))?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!(
        "Closest {}: {} examined, {} resolved, {} edges removed, {} values deprecated",
        report.source, report.examined, report.resolved, report.edges_removed, report.values_deprecated
    );
    Ok(())
}
