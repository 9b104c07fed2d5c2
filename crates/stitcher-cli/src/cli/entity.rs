use crate::cli::{
    print_entity_detail, print_entity_table, print_json, truncate, CliquesArgs, ComponentArgs, ComponentsArgs,
    EntityCommands, OutputFormat,
};
use anyhow::Result;
use serde::Serialize;
use std::ops::ControlFlow;
use stitcher_core::repair::partition;
use stitcher_core::{Page, Stitcher};

pub fn run(cmd: EntityCommands, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    match cmd {
        EntityCommands::Get(args) => {
            let Some(entity) = stitcher.entity(args.id)? else {
                anyhow::bail!("entity {} not found", args.id);
            };
            if format == OutputFormat::Json {
                #[derive(Serialize)]
                struct Detail<'a> {
                    #[serde(flatten)]
                    entity: &'a stitcher_core::Entity,
                    edges: Vec<stitcher_core::StitchEdge>,
                }
                return print_json(&Detail {
                    entity: &entity,
                    edges: stitcher.edges(entity.id)?,
                });
            }
            print_entity_detail(&entity);
            let edges = stitcher.edges(entity.id)?;
            if !edges.is_empty() {
                println!("{}", "─".repeat(50));
                for edge in edges {
                    println!(
                        "  → {:<10} {:<14} {}",
                        edge.other(entity.id),
                        edge.key.as_str(),
                        truncate(&edge.value, 40)
                    );
                }
            }
            Ok(())
        }
        EntityCommands::List(args) => {
            let labels: Vec<&str> = args.labels.iter().map(String::as_str).collect();
            let entities = stitcher.entities(Page::new(args.skip, args.top), &labels)?;
            if format == OutputFormat::Json {
                return print_json(&entities);
            }
            match stitcher.count(&labels) {
                Some(total) => println!("Total: {} entities", total),
                None => println!("Total: unavailable"),
            }
            print_entity_table(&entities);
            Ok(())
        }
        EntityCommands::Filter(args) => {
            let labels: Vec<&str> = args.labels.iter().map(String::as_str).collect();
            let entities = stitcher.filter(&args.field, &args.value, &labels)?;
            if format == OutputFormat::Json {
                return print_json(&entities);
            }
            print_entity_table(&entities);
            Ok(())
        }
        EntityCommands::Lookup(args) => {
            let labels: Vec<&str> = args.labels.iter().map(String::as_str).collect();
            let entities = stitcher.by_external_id(&args.external_id, &labels)?;
            if format == OutputFormat::Json {
                return print_json(&entities);
            }
            print_entity_table(&entities);
            Ok(())
        }
    }
}

pub fn component(args: ComponentArgs, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let Some(members) = stitcher.component(args.root)? else {
        anyhow::bail!("entity {} not found", args.root);
    };
    if format == OutputFormat::Json {
        return print_json(&members);
    }
    println!("Component of {}: {} entities", args.root, members.len());
    print_entity_table(&members);
    Ok(())
}

#[derive(Serialize)]
struct ComponentRow {
    root: u64,
    size: usize,
    members: Vec<u64>,
}

pub fn components(args: ComponentsArgs, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let labels: Vec<&str> = args.label.as_deref().into_iter().collect();

    if args.relabel {
        let report = stitcher.relabel(&labels)?;
        if format == OutputFormat::Json {
            return print_json(&report);
        }
        println!(
            "Generation {}: {} components, {} singletons over {} entities",
            report.generation, report.components, report.singletons, report.entities
        );
        return Ok(());
    }

    let rows: Vec<ComponentRow> = partition(&stitcher.store().read()?, &labels)?
        .into_iter()
        .map(|members| ComponentRow {
            root: members.first().copied().unwrap_or_default(),
            size: members.len(),
            members: members.into_iter().collect(),
        })
        .collect();
    if format == OutputFormat::Json {
        return print_json(&rows);
    }

    let singletons = rows.iter().filter(|r| r.size == 1).count();
    println!("{:<10}  {:>6}  {}", "ROOT", "SIZE", "MEMBERS");
    println!("{}", "─".repeat(60));
    for row in rows.iter().filter(|r| r.size > 1) {
        let members: Vec<String> = row.members.iter().map(u64::to_string).collect();
        println!("{:<10}  {:>6}  {}", row.root, row.size, truncate(&members.join(","), 40));
    }
    println!("{}", "─".repeat(60));
    println!("{} components, {} singletons", rows.len(), singletons);
    Ok(())
}

pub fn cliques(args: CliquesArgs, stitcher: &Stitcher, format: OutputFormat) -> Result<()> {
    let labels: Vec<&str> = args.label.as_deref().into_iter().collect();
    let max = args.max.unwrap_or(usize::MAX);

    let mut found = Vec::new();
    let summary = stitcher.visit_cliques(args.key, &labels, |clique| {
        found.push(clique.clone());
        if found.len() >= max {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({ "summary": summary, "cliques": found }));
    }
    println!("{:<30}  {:>6}  {}", "VALUE", "SIZE", "MEMBERS");
    println!("{}", "─".repeat(70));
    for clique in &found {
        let members: Vec<String> = clique.members.iter().map(u64::to_string).collect();
        println!(
            "{:<30}  {:>6}  {}",
            truncate(&clique.value, 30),
            clique.size(),
            truncate(&members.join(","), 30)
        );
    }
    println!("{}", "─".repeat(70));
    println!(
        "{} cliques from {} groups ({} not fully connected){}",
        summary.cliques,
        summary.groups,
        summary.rejected,
        if summary.stopped { ", stopped early" } else { "" }
    );
    Ok(())
}
