use crate::cli::{parse_version, print_json, truncate, OutputFormat, StitchCommands};
use anyhow::Result;
use stitcher_core::{Stitch, Stitcher};

pub fn run(cmd: StitchCommands, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    match cmd {
        StitchCommands::Build(args) => {
            let build = stitcher.build_stitches(args.label.as_deref())?;
            if format == OutputFormat::Json {
                return print_json(&build);
            }
            println!(
                "Built {}: {} stitches over {} entities (max rank {})",
                build.label(),
                build.stitches,
                build.members,
                build.max_rank
            );
            Ok(())
        }
        StitchCommands::Get(args) => {
            let version = parse_version(&args.version)?;
            let stitch = stitcher.require_stitch(version, &args.id)?;
            if format == OutputFormat::Json {
                return print_json(&stitch);
            }
            print_stitch_detail(&stitch);
            Ok(())
        }
        StitchCommands::List(args) => {
            let version = parse_version(&args.version)?;
            let stitches = stitcher.stitches(version)?;
            if format == OutputFormat::Json {
                return print_json(&stitches);
            }
            if stitches.is_empty() {
                println!("(no stitches in {})", Stitch::version_label(version));
                return Ok(());
            }
            println!("{:<10}  {:<9}  {:>6}  {:<10}  {}", "ID", "HASH", "RANK", "PARENT", "SOURCES");
            println!("{}", "─".repeat(70));
            for s in &stitches {
                let sources: Vec<&str> = s.sources.iter().map(String::as_str).collect();
                println!(
                    "{:<10}  {:<9}  {:>6}  {:<10}  {}",
                    s.id,
                    s.hash,
                    s.rank,
                    s.parent,
                    truncate(&sources.join(","), 30)
                );
            }
            Ok(())
        }
    }
}

fn print_stitch_detail(s: &Stitch) {
    println!("ID:       {}", s.id);
    println!("Hash:     {}", s.hash);
    println!("Version:  {}", Stitch::version_label(s.version));
    println!("Rank:     {}", s.rank);
    println!("Parent:   {}", s.parent);
    println!("Created:  {}", s.created_at.format("%Y-%m-%d %H:%M UTC"));
    let members: Vec<String> = s.members.iter().map(u64::to_string).collect();
    println!("Members:  {}", truncate(&members.join(","), 60));
    let external: Vec<&str> = s.external_ids.iter().map(String::as_str).collect();
    println!("External: {}", truncate(&external.join(","), 60));
    println!("{}", "─".repeat(50));
    for (name, values) in &s.properties {
        let values: Vec<String> = values.iter().map(|v| v.index_text()).collect();
        println!("  {:<24} {}", name, truncate(&values.join("; "), 60));
    }
}
