// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loom permissions admin binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use loom_permissions_core::PermissionId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod version;

/// Loom permissions - inspect permission records and the policy engine.
#[derive(Parser, Debug)]
#[command(
	name = "loom-permissions",
	about = "Loom permission records and policy rules",
	version
)]
struct Args {
	/// Config file to read instead of /etc/loom/server.toml
	#[arg(long, env = "LOOM_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// List permissions, newest first
	List {
		#[arg(long)]
		owner: Option<String>,
	},
	/// Show one permission by owner/name
	Show { id: String },
	/// Evaluate a request against the loaded rules
	Check {
		subject: String,
		object: String,
		action: String,
	},
	/// Print loaded policy rules, optionally for one permission
	Policies { id: Option<String> },
	/// Re-expand every permission into the rule table and engine
	Resync,
	/// Show version and build information
	Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Command::Version = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	let config = match &args.config {
		Some(path) => loom_server_config::load_config_with_file(path.clone()),
		None => loom_server_config::load_config(),
	}
	.context("failed to load configuration")?;

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	tracing::info!(
		database = %config.database.url(),
		table_name_prefix = %config.database.table_name_prefix,
		"starting loom-permissions"
	);

	let service = loom_server_permissions::bootstrap(&config)
		.await
		.context("failed to start permission service")?;

	match args.command {
		Command::List { owner } => {
			let permissions = service.list(owner.as_deref()).await?;
			println!("{}", serde_json::to_string_pretty(&permissions)?);
		}
		Command::Show { id } => match service.get_by_id(&id).await? {
			Some(permission) => println!("{}", serde_json::to_string_pretty(&permission)?),
			None => anyhow::bail!("permission '{id}' not found"),
		},
		Command::Check {
			subject,
			object,
			action,
		} => {
			let allowed = service.engine().enforce(&subject, &object, &action).await?;
			println!("{}", if allowed { "allow" } else { "deny" });
		}
		Command::Policies { id } => {
			let rules = match id {
				Some(id) => {
					let id = PermissionId::parse(&id)?;
					service.engine().policies_for(&id).await
				}
				None => service.engine().policies().await,
			};
			println!("{}", serde_json::to_string_pretty(&rules)?);
		}
		Command::Resync => {
			let rules = service.resync().await?;
			println!("resynchronized {rules} policy rules");
		}
		Command::Version => println!("{}", version::format_version_info()),
	}

	Ok(())
}
