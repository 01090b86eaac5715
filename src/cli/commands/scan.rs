use std::sync::Arc;

use clap::Subcommand;

use crate::cli::utils::*;
use crate::cli::{CliContext, OutputFormat};
use crate::hierarchy::{ScanKind, SystemClock};
use crate::scheduler::ScanRunner;

#[derive(Subcommand)]
pub enum ScanCommands {
    #[command(about = "Promote AMs with enough direct sub-AMs to DM")]
    Am,

    #[command(about = "Promote DMs with enough direct sub-DMs to CCM")]
    Dm,

    #[command(about = "Process pending CCM demotion trackers")]
    Demotion,

    #[command(about = "Run AM promotion, DM promotion and demotion in order")]
    All,
}

pub async fn handle(cmd: ScanCommands, ctx: &CliContext, output_format: OutputFormat) -> anyhow::Result<()> {
    let runner = ScanRunner::from_config(
        ctx.store.clone(),
        Arc::new(SystemClock),
        &ctx.config.rules,
        &ctx.config.scheduler,
    );

    let kinds: &[ScanKind] = match cmd {
        ScanCommands::Am => &[ScanKind::AmPromotion],
        ScanCommands::Dm => &[ScanKind::DmPromotion],
        ScanCommands::Demotion => &[ScanKind::Demotion],
        ScanCommands::All => &[ScanKind::AmPromotion, ScanKind::DmPromotion, ScanKind::Demotion],
    };

    let mut failed = 0;
    let mut skipped = Vec::new();
    for kind in kinds {
        match runner.run(*kind).await {
            Some(report) => {
                failed += report.failures.len();
                output_report(&output_format, &report)?;
            }
            None => {
                output_error(&output_format, &format!("{} is already running, skipped", kind), Some("SCAN_BUSY"))?;
                skipped.push(kind.name());
            }
        }
    }

    if !skipped.is_empty() {
        return Err(anyhow::anyhow!("scan(s) not run: {}", skipped.join(", ")));
    }
    if failed > 0 {
        return Err(anyhow::anyhow!("{} transition(s) rolled back", failed));
    }
    Ok(())
}
