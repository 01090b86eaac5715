use clap::ValueEnum;
use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::database::models::{NodeRef, Rank};
use crate::hierarchy::ScanReport;

/// Rank as typed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RankArg {
    Admin,
    Ccm,
    Dm,
    Am,
}

impl RankArg {
    pub fn node(self, id: i64) -> NodeRef {
        let rank = match self {
            RankArg::Admin => Rank::Admin,
            RankArg::Ccm => Rank::Ccm,
            RankArg::Dm => Rank::Dm,
            RankArg::Am => Rank::Am,
        };
        NodeRef::from_parts(rank, id)
    }
}

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let Some(data_value) = data {
                if let (Some(target), Some(extra)) = (response.as_object_mut(), data_value.as_object()) {
                    target.extend(extra.clone());
                }
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Output an error message in the appropriate format
pub fn output_error(
    output_format: &OutputFormat,
    message: &str,
    error_code: Option<&str>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": false,
                "error": message
            });

            if let Some(code) = error_code {
                response["error_code"] = json!(code);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
        }
    }
    Ok(())
}

/// Output an empty collection in the appropriate format
pub fn output_empty_collection(
    output_format: &OutputFormat,
    collection_name: &str,
    message: &str,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({
                collection_name: []
            }))?);
        }
        OutputFormat::Text => {
            println!("{}", message);
        }
    }
    Ok(())
}

pub fn output_report(output_format: &OutputFormat, report: &ScanReport) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            println!("{}", report);
            for transition in &report.transitions {
                println!("  {} -> {} ({} moved)", transition.from, transition.to, transition.moved.len());
                for (am, dm) in &transition.reassigned {
                    println!("    {} -> {}", am, dm);
                }
                if let Some(ccm) = transition.tracked {
                    println!("    demotion countdown started for {}", ccm);
                }
            }
            for skipped in &report.skipped {
                println!("  skipped {} ({:?})", skipped.node, skipped.reason);
            }
            for failure in &report.failures {
                match failure.node {
                    Some(node) => println!("  FAILED {}: {}", node, failure.error),
                    None => println!("  FAILED: {}", failure.error),
                }
            }
        }
    }
    Ok(())
}
