use clap::Subcommand;
use serde_json::json;

use crate::cli::commands::register::error_code;
use crate::cli::utils::*;
use crate::cli::{CliContext, OutputFormat};
use crate::services::{DirectoryService, RegistryService};

#[derive(Subcommand)]
pub enum InspectCommands {
    #[command(about = "Print the whole hierarchy as a tree")]
    Tree,

    #[command(about = "Count nodes per rank")]
    Count,

    #[command(about = "List pending CCM demotion trackers")]
    Trackers,

    #[command(about = "List DMs and AMs that can still take a new AM")]
    Placement,

    #[command(about = "List the direct children of a node")]
    Children {
        #[arg(value_enum, help = "Rank of the node")]
        rank: RankArg,

        #[arg(help = "Node id within its rank")]
        id: i64,
    },

    #[command(about = "List every node below a node, nearest first")]
    Downline {
        #[arg(value_enum, help = "Rank of the node")]
        rank: RankArg,

        #[arg(help = "Node id within its rank")]
        id: i64,
    },

    #[command(about = "Remove a node; its children become unattached")]
    Remove {
        #[arg(value_enum, help = "Rank of the node")]
        rank: RankArg,

        #[arg(help = "Node id within its rank")]
        id: i64,
    },
}

pub async fn handle(cmd: InspectCommands, ctx: &CliContext, output_format: OutputFormat) -> anyhow::Result<()> {
    let directory = DirectoryService::new(ctx.store.clone(), ctx.config.rules.fan_out_cap);

    match cmd {
        InspectCommands::Tree => {
            let forest = directory.tree().await?;
            if forest.is_empty() {
                return output_empty_collection(&output_format, "tree", "Hierarchy is empty");
            }
            let total: usize = forest.iter().map(|root| root.size()).sum();
            match output_format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "tree": forest, "nodes": total }))?
                ),
                OutputFormat::Text => {
                    for root in &forest {
                        print!("{}", root.render());
                    }
                    println!("{} node(s) in {} tree(s)", total, forest.len());
                }
            }
        }
        InspectCommands::Count => {
            let counts = directory.counts().await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&counts)?),
                OutputFormat::Text => {
                    println!("{:<8} {:>8}", "RANK", "COUNT");
                    println!("{:<8} {:>8}", "admin", counts.admin);
                    println!("{:<8} {:>8}", "ccm", counts.ccm);
                    println!("{:<8} {:>8}", "dm", counts.dm);
                    println!("{:<8} {:>8}", "am", counts.am);
                }
            }
        }
        InspectCommands::Trackers => {
            let trackers = ctx.store.trackers().await?;
            if trackers.is_empty() {
                return output_empty_collection(&output_format, "trackers", "No pending demotions");
            }
            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({ "trackers": trackers }))?)
                }
                OutputFormat::Text => {
                    let grace = ctx.config.rules.demotion_grace_days;
                    println!("{:<8} {:<12} {:<25} {:<25}", "ID", "CCM", "TRIGGERED", "DUE");
                    println!("{}", "-".repeat(72));
                    for tracker in &trackers {
                        let due = tracker.triggered_at + chrono::Duration::days(grace);
                        println!(
                            "{:<8} {:<12} {:<25} {:<25}",
                            tracker.id,
                            tracker.ccm_id.to_string(),
                            tracker.triggered_at.format("%Y-%m-%d %H:%M:%S UTC"),
                            due.format("%Y-%m-%d %H:%M:%S UTC"),
                        );
                    }
                }
            }
        }
        InspectCommands::Placement => {
            let candidates = directory.placement_candidates().await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&candidates)?),
                OutputFormat::Text => {
                    let dms: Vec<String> = candidates.dms.iter().map(ToString::to_string).collect();
                    let ams: Vec<String> = candidates.ams.iter().map(ToString::to_string).collect();
                    println!("DMs: {}", if dms.is_empty() { "-".to_string() } else { dms.join(", ") });
                    println!("AMs: {}", if ams.is_empty() { "-".to_string() } else { ams.join(", ") });
                }
            }
        }
        InspectCommands::Children { rank, id } => {
            let children = directory.children(rank.node(id)).await?;
            print_nodes(&output_format, "children", &children.iter().map(ToString::to_string).collect::<Vec<_>>())?;
        }
        InspectCommands::Downline { rank, id } => {
            let downline = directory.downline(rank.node(id)).await?;
            print_nodes(&output_format, "downline", &downline.iter().map(ToString::to_string).collect::<Vec<_>>())?;
        }
        InspectCommands::Remove { rank, id } => {
            let node = rank.node(id);
            let registry = RegistryService::new(ctx.store.clone(), &ctx.config.rules);
            if let Err(e) = registry.delete_node(node).await {
                output_error(&output_format, &e.to_string(), Some(error_code(&e)))?;
                return Err(e.into());
            }
            output_success(&output_format, &format!("Removed {}", node), Some(json!({ "removed": node })))?;
        }
    }

    Ok(())
}

fn print_nodes(output_format: &OutputFormat, collection_name: &str, nodes: &[String]) -> anyhow::Result<()> {
    if nodes.is_empty() {
        return output_empty_collection(output_format, collection_name, "None");
    }
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&json!({ collection_name: nodes }))?),
        OutputFormat::Text => {
            for node in nodes {
                println!("{}", node);
            }
        }
    }
    Ok(())
}
