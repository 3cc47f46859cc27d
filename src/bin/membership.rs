use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;
use zkp_batch_membership::{
    config::Config,
    ethereum::{display_address, normalize_address},
    secret::{derive_secret, generate_org_salt},
    JsonFileStore, MembershipCoordinator, MembershipStore, NewUserFields, Organization,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Batch-polynomial membership management", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when it does not exist.
    #[arg(short, long, default_value = "membership.toml")]
    config: PathBuf,

    /// JSON store file, overriding `store.path` from the configuration.
    #[arg(short, long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register an organization and generate its salt
    CreateOrg {
        #[arg(short, long)]
        wallet: String,
    },

    /// Create a user and add their secret to a batch
    AddUser {
        /// Organization id or wallet address
        #[arg(short, long)]
        org: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        balance: Option<u64>,

        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Remove a user and divide their secret out of the batch
    RemoveUser {
        #[arg(short, long)]
        user: Uuid,
    },

    /// Check that a user's secret is a root of their batch equation
    VerifyUser {
        #[arg(short, long)]
        user: Uuid,
    },

    /// Look up a user by organization and email
    FindUser {
        #[arg(short, long)]
        org: String,

        #[arg(short, long)]
        email: String,
    },

    /// Print a batch, its member count and its equation
    ShowBatch {
        #[arg(short, long)]
        batch: Uuid,
    },

    /// Derive the secret for an email and salt without touching the store
    DeriveSecret {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        salt: String,
    },
}

fn load_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        Config::load_from_file(path)
    } else {
        Ok(Config::default())
    }
}

fn open_store(path: Option<PathBuf>, config: &Config) -> Result<Arc<JsonFileStore>> {
    let store_path = path.unwrap_or_else(|| config.store.path.clone());
    info!("Using store: {}", store_path.display());
    let store = JsonFileStore::open(&store_path)
        .with_context(|| format!("Failed to open store: {}", store_path.display()))?;
    Ok(Arc::new(store))
}

fn build_coordinator(
    store: Arc<JsonFileStore>,
    config: &Config,
) -> MembershipCoordinator<JsonFileStore> {
    MembershipCoordinator::new(store, config.coordinator_settings())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{output}");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.filter.as_str()),
    )
    .init();
    debug!("Configuration: {config:?}");

    match args.command {
        Command::DeriveSecret { email, salt } => {
            let secret = derive_secret(&email, &salt).context("Failed to derive secret")?;
            println!("{secret}");
            Ok(())
        }
        Command::CreateOrg { wallet } => {
            let wallet = normalize_address(&wallet)?;
            let store = open_store(args.store, &config)?;
            let organization = Organization::new(wallet, generate_org_salt());
            store
                .insert_organization(organization.clone())
                .context("Failed to register organization")?;
            info!(
                "Registered organization {} ({})",
                organization.id,
                display_address(&organization.wallet_address)
            );
            print_json(&organization)
        }
        Command::AddUser {
            org,
            email,
            balance,
            reference,
        } => {
            let fields = NewUserFields {
                balance,
                reference_number: reference,
            };
            let coordinator = build_coordinator(open_store(args.store, &config)?, &config);
            let response = coordinator.handle_create_request(&org, &email, fields);
            print_json(&response)?;
            match response.error {
                None => Ok(()),
                Some(error) => Err(anyhow::anyhow!(
                    "Membership creation failed ({}): {}",
                    error.kind,
                    error.message
                )),
            }
        }
        Command::RemoveUser { user } => {
            let coordinator = build_coordinator(open_store(args.store, &config)?, &config);
            let batch = coordinator
                .remove_user(user)
                .with_context(|| format!("Failed to remove user {user}"))?;
            print_json(&batch)
        }
        Command::VerifyUser { user } => {
            let coordinator = build_coordinator(open_store(args.store, &config)?, &config);
            let is_member = coordinator
                .verify_membership(user)
                .with_context(|| format!("Failed to verify user {user}"))?;
            print_json(&json!({ "userId": user, "member": is_member }))?;
            if is_member {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "User {user} is not a root of their batch equation"
                ))
            }
        }
        Command::FindUser { org, email } => {
            let coordinator = build_coordinator(open_store(args.store, &config)?, &config);
            let found = coordinator
                .find_member(&org, &email)
                .context("Failed to look up user")?;
            match found {
                Some(user) => print_json(&user),
                None => Err(anyhow::anyhow!("No user registered under that email")),
            }
        }
        Command::ShowBatch { batch } => {
            let store = open_store(args.store, &config)?;
            let record = store
                .read_batch(batch)
                .with_context(|| format!("Failed to read batch {batch}"))?;
            let members = store
                .count_users(batch)
                .with_context(|| format!("Failed to count members of batch {batch}"))?;
            let degree = record
                .polynomial()
                .with_context(|| format!("Batch {batch} has an invalid equation"))?
                .degree();
            print_json(&json!({
                "batch": record,
                "members": members,
                "degree": degree,
                "capacity": config.batch.max_size,
            }))
        }
    }
}
