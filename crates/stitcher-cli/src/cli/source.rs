use crate::cli::{print_json, truncate, OutputFormat, SourceDeleteArgs};
use anyhow::Result;
use stitcher_core::Stitcher;

pub fn list(stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let sources = stitcher.datasources()?;
    if format == OutputFormat::Json {
        return print_json(&sources);
    }

    if sources.is_empty() {
        println!("(no data sources)");
        return Ok(());
    }
    println!(
        "{:<10}  {:<24}  {:>9}  {:>10}  {:<17}  {}",
        "KEY", "NAME", "INSTANCES", "BYTES", "CREATED", "STITCH FIELDS"
    );
    println!("{}", "─".repeat(100));
    for s in &sources {
        let fields: Vec<String> = s
            .stitches
            .iter()
            .map(|(field, keys)| {
                let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
                format!("{}→{}", field, keys.join("|"))
            })
            .collect();
        println!(
            "{:<10}  {:<24}  {:>9}  {:>10}  {:<17}  {}",
            s.key,
            truncate(&s.name, 24),
            s.instances,
            s.size,
            s.created_at.format("%Y-%m-%d %H:%M"),
            fields.join(", ")
        );
    }
    Ok(())
}

pub fn delete(args: SourceDeleteArgs, stitcher: &Stitcher) -> Result<()> {
    let removed = stitcher.delete_datasource(&args.key)?;
    println!("Deleted data source {} ({} entities)", args.key, removed);
    Ok(())
}
