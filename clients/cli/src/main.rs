//! Tessera CLI
//!
//! Local keystore: derive an identity from die rolls, print the
//! fingerprint and publishable bundle, and check bundles received from
//! peers.

use clap::{Parser, Subcommand};
use console::{style, Emoji};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod config;
mod storage;

use config::CliConfig;
use storage::SledVault;
use tessera_core::KeyBundle;
use tessera_crypto::entropy::{estimate_entropy_bits, parse_dice_rolls};
use tessera_protocol::{IdentityManager, SessionStore};

static LOCK: Emoji<'_, '_> = Emoji("🔐 ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR] ");
static KEY: Emoji<'_, '_> = Emoji("🔑 ", "[KEY] ");

/// Tessera CLI - end-to-end encryption keystore
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive and store an identity from 300 die rolls
    Keygen {
        /// File with the rolls (digits 1-6, separated by whitespace or commas)
        #[arg(short, long, value_name = "FILE")]
        rolls: PathBuf,
    },

    /// Show the identity fingerprint
    Fingerprint,

    /// Print the publishable key bundle as JSON
    Bundle {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace the signed pre-key and print the new bundle
    RotatePrekey {
        /// Only rotate if the current key is older than the configured age
        #[arg(long)]
        if_due: bool,

        /// Write the bundle to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a peer's key bundle file
    VerifyBundle {
        /// Bundle JSON file
        file: PathBuf,
    },

    /// Show pre-key and session counts
    Status,

    /// Delete all sessions
    Logout {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let config_path = cli.config.unwrap_or_else(CliConfig::default_path);
    let config = CliConfig::load_or_default(&config_path)?;
    debug!(path = %config_path.display(), "Loaded config");

    let vault = Arc::new(SledVault::open(&config.storage_path)?);
    let identity = IdentityManager::new(vault.clone(), config.protocol.clone());

    match cli.command {
        Commands::Keygen { rolls } => keygen(&identity, &rolls, &config).await?,
        Commands::Fingerprint => show_fingerprint(&identity).await?,
        Commands::Bundle { output } => export_bundle(&identity, output.as_deref()).await?,
        Commands::RotatePrekey { if_due, output } => {
            rotate_prekey(&identity, if_due, output.as_deref()).await?
        }
        Commands::VerifyBundle { file } => verify_bundle(&file)?,
        Commands::Status => {
            let sessions = SessionStore::new(vault);
            show_status(&identity, &sessions).await?
        }
        Commands::Logout { yes } => {
            let sessions = SessionStore::new(vault);
            logout(&sessions, yes).await?
        }
    }

    Ok(())
}

async fn keygen(identity: &IdentityManager, path: &Path, config: &CliConfig) -> anyhow::Result<()> {
    if let Some(existing) = identity.retrieve().await? {
        println!(
            "{} Identity already exists: {}",
            KEY,
            style(existing.identity().fingerprint()).yellow()
        );
        return Ok(());
    }

    let text = std::fs::read_to_string(path)?;
    let rolls = parse_dice_rolls(&text)?;
    let bits = estimate_entropy_bits(&rolls);
    println!(
        "{} Read {} rolls, estimated entropy {} bits (minimum {})",
        LOCK,
        rolls.len(),
        bits,
        config.protocol.min_entropy_bits
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message("Deriving master key...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = identity.get_or_create(&rolls).await;
    pb.finish_and_clear();
    let material = result?;

    println!("{} Identity created", CHECK);
    println!();
    println!(
        "  {} Fingerprint: {}",
        KEY,
        style(material.identity().fingerprint()).yellow()
    );
    println!(
        "  {} One-time pre-keys: {}",
        KEY,
        material.one_time_prekeys().len()
    );
    println!();
    println!(
        "{}",
        style("Keep the roll file offline; it recreates every key.").dim()
    );

    Ok(())
}

fn group_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

async fn show_fingerprint(identity: &IdentityManager) -> anyhow::Result<()> {
    let material = identity
        .retrieve()
        .await?
        .ok_or_else(|| anyhow::anyhow!("No identity found. Run 'tessera keygen' first."))?;

    println!(
        "{} {}",
        KEY,
        style(group_fingerprint(&material.identity().fingerprint())).yellow()
    );
    Ok(())
}

async fn export_bundle(identity: &IdentityManager, output: Option<&Path>) -> anyhow::Result<()> {
    write_bundle(&identity.create_public_bundle().await?, output)
}

async fn rotate_prekey(
    identity: &IdentityManager,
    if_due: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let rotated = if if_due {
        identity.rotate_signed_prekey_if_due().await?
    } else {
        Some(identity.rotate_signed_prekey().await?)
    };

    let Some(bundle) = rotated else {
        println!("{} Signed pre-key is not due for rotation", CHECK);
        return Ok(());
    };

    eprintln!(
        "{} Signed pre-key {} issued; publish the new bundle",
        KEY, bundle.signed_pre_key.key_id
    );
    write_bundle(&bundle, output)
}

fn write_bundle(bundle: &KeyBundle, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(bundle)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("{} Bundle written to {}", CHECK, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn verify_bundle(path: &Path) -> anyhow::Result<()> {
    let bundle: KeyBundle = serde_json::from_str(&std::fs::read_to_string(path)?)?;

    let checks = [
        ("fingerprint", bundle.verify_fingerprint()),
        ("signed pre-key signature", bundle.verify_signed_prekey()),
    ];

    let mut ok = true;
    for (name, result) in checks {
        match result {
            Ok(()) => println!("{} {}", CHECK, name),
            Err(e) => {
                ok = false;
                println!("{} {}: {}", CROSS, name, e);
            }
        }
    }

    if !ok {
        anyhow::bail!("bundle {} failed verification", path.display());
    }

    println!();
    println!("  Fingerprint: {}", style(group_fingerprint(&bundle.fingerprint)).yellow());
    println!("  One-time pre-keys: {}", bundle.one_time_pre_keys.len());
    println!(
        "{}",
        style("Compare the fingerprint with your contact over a trusted channel.").dim()
    );
    Ok(())
}

async fn show_status(identity: &IdentityManager, sessions: &SessionStore) -> anyhow::Result<()> {
    match identity.retrieve().await? {
        Some(material) => {
            println!("Identity:  {}", style(material.identity().fingerprint()).yellow());
            println!("Pre-keys:  {} one-time remaining", material.one_time_prekeys().len());
        }
        None => println!("Identity:  {}", style("none").dim()),
    }

    let peers = sessions.peers().await?;
    println!("Sessions:  {}", peers.len());
    for peer in peers {
        println!("  - {}", style(peer).cyan());
    }
    Ok(())
}

async fn logout(sessions: &SessionStore, yes: bool) -> anyhow::Result<()> {
    if !yes {
        let confirm = Confirm::new()
            .with_prompt("Delete all sessions? Peers will need a new handshake.")
            .default(false)
            .interact()?;

        if !confirm {
            println!("{} Cancelled", CROSS);
            return Ok(());
        }
    }

    let count = sessions.delete_all().await?;
    println!("{} Deleted {} sessions", CHECK, count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["tessera", "-vv", "keygen", "--rolls", "rolls.txt"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Keygen { .. }));

        let cli = Cli::try_parse_from(["tessera", "verify-bundle", "bob.json"]).unwrap();
        assert!(matches!(cli.command, Commands::VerifyBundle { .. }));

        let cli = Cli::try_parse_from(["tessera", "rotate-prekey", "--if-due"]).unwrap();
        assert!(matches!(cli.command, Commands::RotatePrekey { if_due: true, output: None }));
    }

    #[test]
    fn test_group_fingerprint() {
        assert_eq!(group_fingerprint("abcdef0123"), "abcd ef01 23");
    }
}
