use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use admin_gate::api::routes::{serve, AppState};
use admin_gate::cache::MemorySharedStore;
use admin_gate::config::Config;
use admin_gate::security::audit::TracingAuditSink;
use admin_gate::security::directory::{MemoryDirectory, UserRecord};
use admin_gate::utils;

#[derive(Parser)]
#[command(name = "admin-gate", version, about = "Admin API gateway")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        /// Override the configured listening port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the config file and exit
    CheckConfig,
}

fn seed_directory(config: &Config) -> Result<Arc<MemoryDirectory>> {
    let directory = MemoryDirectory::new();

    for role in &config.seed.roles {
        directory.add_role(role.id, &role.name, role.permissions.clone());
    }
    directory.set_menu_permissions(config.seed.menu_permissions.clone());

    for (index, user) in config.seed.users.iter().enumerate() {
        let id = index as u64 + 1;
        let password_hash = bcrypt::hash(&user.password, bcrypt::DEFAULT_COST)
            .with_context(|| format!("failed to hash password for user '{}'", user.username))?;
        directory.add_user(UserRecord {
            id,
            username: user.username.clone(),
            nickname: user.nickname.clone(),
            password_hash,
            is_active: user.active,
        });
        directory.assign_roles(id, user.roles.clone());
    }

    Ok(Arc::new(directory))
}

async fn run_server(config: Config, port: u16) -> Result<()> {
    let directory = seed_directory(&config)?;
    info!(
        users = config.seed.users.len(),
        roles = config.seed.roles.len(),
        "directory seeded"
    );

    let state = AppState::new(
        &config,
        directory,
        Arc::new(MemorySharedStore::new()),
        Arc::new(TracingAuditSink),
    )?;
    serve(state, port).await
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let cli = AppCli::parse();
    let config = Config::from_file(&cli.config)?;

    match cli.command {
        Some(Commands::CheckConfig) => {
            info!("config {} is valid", cli.config.display());
            Ok(())
        }
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(config.port);
            run_server(config, port).await
        }
        None => {
            let port = config.port;
            run_server(config, port).await
        }
    }
}
