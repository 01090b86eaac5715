use clap::{Args, Subcommand};
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::{CliContext, OutputFormat};
use crate::database::models::{AmId, AmParent, CcmId, DmId, DmParent, Profile};
use crate::services::{RegistryError, RegistryService};

#[derive(Args)]
pub struct ProfileArgs {
    #[arg(long, help = "Display name")]
    pub name: String,

    #[arg(long, help = "Email address, unique across all ranks")]
    pub email: String,

    #[arg(long, help = "Ten-digit contact number, unique across all ranks")]
    pub contact: String,

    #[arg(long, help = "Postal address")]
    pub address: String,

    #[arg(long, help = "Credential hash as issued by the auth service")]
    pub credential_hash: String,
}

impl From<ProfileArgs> for Profile {
    fn from(args: ProfileArgs) -> Self {
        Profile {
            name: args.name,
            email: args.email,
            contact: args.contact,
            address: args.address,
            credential_hash: args.credential_hash,
        }
    }
}

#[derive(Subcommand)]
pub enum RegisterCommands {
    #[command(about = "Register an administrator")]
    Admin {
        #[command(flatten)]
        profile: ProfileArgs,
    },

    #[command(about = "Register a CCM")]
    Ccm {
        #[command(flatten)]
        profile: ProfileArgs,
    },

    #[command(about = "Register a DM under a CCM or another DM")]
    Dm {
        #[arg(long, conflicts_with = "parent_dm", help = "Parent CCM id")]
        ccm: Option<i64>,

        #[arg(long, help = "Parent DM id")]
        parent_dm: Option<i64>,

        #[command(flatten)]
        profile: ProfileArgs,
    },

    #[command(about = "Register an AM under a DM or another AM")]
    Am {
        #[arg(long, conflicts_with = "parent_am", help = "Parent DM id")]
        dm: Option<i64>,

        #[arg(long, help = "Parent AM id")]
        parent_am: Option<i64>,

        #[command(flatten)]
        profile: ProfileArgs,
    },
}

pub async fn handle(cmd: RegisterCommands, ctx: &CliContext, output_format: OutputFormat) -> anyhow::Result<()> {
    let registry = RegistryService::new(ctx.store.clone(), &ctx.config.rules);

    let result = match cmd {
        RegisterCommands::Admin { profile } => registry
            .register_admin(profile.into())
            .await
            .map(|admin| (admin.id.to_string(), json!({ "admin": admin }))),
        RegisterCommands::Ccm { profile } => registry
            .register_ccm(profile.into())
            .await
            .map(|ccm| (ccm.id.to_string(), json!({ "ccm": ccm }))),
        RegisterCommands::Dm { ccm, parent_dm, profile } => {
            let parent = match (ccm, parent_dm) {
                (Some(id), _) => DmParent::Ccm(CcmId(id)),
                (None, Some(id)) => DmParent::Dm(DmId(id)),
                (None, None) => DmParent::Root,
            };
            registry
                .register_dm(parent, profile.into())
                .await
                .map(|dm| (dm.id.to_string(), json!({ "dm": dm })))
        }
        RegisterCommands::Am { dm, parent_am, profile } => {
            let parent = match (dm, parent_am) {
                (Some(id), _) => AmParent::Dm(DmId(id)),
                (None, Some(id)) => AmParent::Am(AmId(id)),
                (None, None) => AmParent::Root,
            };
            registry
                .register_am(parent, profile.into())
                .await
                .map(|am| (am.id.to_string(), json!({ "am": am })))
        }
    };

    match result {
        Ok((id, data)) => output_success(&output_format, &format!("Registered {}", id), Some(data)),
        Err(e) => {
            output_error(&output_format, &e.to_string(), Some(error_code(&e)))?;
            Err(e.into())
        }
    }
}

pub(crate) fn error_code(error: &RegistryError) -> &'static str {
    match error {
        RegistryError::EmailTaken => "EMAIL_TAKEN",
        RegistryError::ContactTaken => "CONTACT_TAKEN",
        RegistryError::EmailAndContactTaken => "EMAIL_AND_CONTACT_TAKEN",
        RegistryError::InvalidProfile(_) => "INVALID_PROFILE",
        RegistryError::MissingParent => "MISSING_PARENT",
        RegistryError::ParentNotFound(_) => "PARENT_NOT_FOUND",
        RegistryError::ParentFull { .. } => "PARENT_FULL",
        RegistryError::NotFound(_) => "NOT_FOUND",
        RegistryError::Store(_) => "STORE_ERROR",
    }
}
