//! sbx: shardbox command-line client.
//!
//! Commands:
//!   keygen                 - create an RSA-4096 keypair (armored files)
//!   upload <file>          - shard, encrypt and scatter a file; writes the reference
//!   download <reference>   - fetch, verify and reassemble a file
//!   delete <reference>     - remove every chunk a reference names
//!   config show            - display the effective configuration
//!
//! Exit code 0 on success; on failure the message carries the behavioural
//! error kind (`error[IntegrityFailure]: ...`) so scripts can tell tamper
//! detection from a transient backend hiccup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use sbx_core::{SbxConfig, SbxError};
use sbx_crypto::{generate_keypair, read_armored_keyring, Keyring};
use sbx_fileman::{FileManager, PipelineConfig, PipelineProgress};
use sbx_storage::{BlobBackend, OperatorBackend};

#[derive(Parser, Debug)]
#[command(
    name = "sbx",
    version,
    about = "shardbox: confidential sharded file storage",
    long_about = "sbx splits a file into encrypted chunks, scatters them across a blob \
                  store and keeps a small PGP-encrypted reference that reassembles and \
                  authenticates the original."
)]
struct Cli {
    /// Path to the shardbox.toml configuration file
    #[arg(long, short = 'c', env = "SBX_CONFIG", default_value = "shardbox.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an RSA-4096 keypair and write both halves as armored files
    Keygen {
        /// Key holder name
        #[arg(long)]
        name: String,
        /// Key holder email
        #[arg(long)]
        email: String,
        /// Optional comment embedded in the user id
        #[arg(long, default_value = "")]
        comment: String,
        /// Output prefix; writes <prefix>.sec.asc and <prefix>.pub.asc
        #[arg(long, short = 'o', default_value = "sbx-key")]
        out: PathBuf,
    },

    /// Shard, encrypt and scatter a local file
    Upload {
        /// File to upload
        file: PathBuf,
        /// Armored public key of the reference owner
        #[arg(long, short = 'r')]
        recipient: PathBuf,
        /// Armored secret key to sign the reference with
        #[arg(long)]
        sign: Option<PathBuf>,
        /// Where to write the encrypted reference (default: <file>.ref)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Override the configured chunk size
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Fetch, verify and reassemble a file from its reference
    Download {
        /// Encrypted reference file
        reference: PathBuf,
        /// Armored secret keyring able to open the reference
        #[arg(long, short = 'k')]
        key: PathBuf,
        /// Keyring passphrase
        #[arg(long, env = "SBX_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
        /// Output path (default: the reference path with a .out extension)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Remove every chunk a reference names
    Delete {
        /// Encrypted reference file
        reference: PathBuf,
        /// Armored secret keyring able to open the reference
        #[arg(long, short = 'k')]
        key: PathBuf,
        /// Keyring passphrase
        #[arg(long, env = "SBX_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

fn init_tracing(cfg: &SbxConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the blob backend selected by the configuration.
fn build_backend(cfg: &SbxConfig) -> Result<Arc<dyn BlobBackend>> {
    let backend: Arc<dyn BlobBackend> = match cfg.storage.backend.as_str() {
        "memory" => Arc::new(OperatorBackend::memory()?),
        "fs" => {
            let root = expand_home(&cfg.storage.root);
            std::fs::create_dir_all(&root)
                .with_context(|| format!("creating blob root {}", root.display()))?;
            Arc::new(OperatorBackend::local_fs(&root)?)
        }
        "s3" => {
            if cfg.storage.enforce_tls && cfg.storage.endpoint.starts_with("http://") {
                anyhow::bail!(
                    "endpoint {} is plaintext HTTP but enforce_tls is set",
                    cfg.storage.endpoint
                );
            }
            let access_key = std::env::var("AWS_ACCESS_KEY_ID")
                .context("AWS_ACCESS_KEY_ID not set for the s3 backend")?;
            let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY not set for the s3 backend")?;
            Arc::new(OperatorBackend::s3(
                &cfg.storage.endpoint,
                &cfg.storage.region,
                &cfg.storage.bucket,
                &access_key,
                &secret_key,
            )?)
        }
        other => anyhow::bail!("unknown storage backend {other:?} (expected fs, s3 or memory)"),
    };
    Ok(backend)
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn load_keyring(path: &Path, passphrase: Option<&str>) -> Result<Keyring> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading keyring {}", path.display()))?;
    Ok(read_armored_keyring(&bytes, passphrase)?)
}

fn spinner(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("static template is valid"),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Chunk-count progress bar fed from the pipeline's live counters: the
/// length follows operations handed to the pool, the position follows the
/// ones the pool has finished.
fn watch_progress(
    message: &'static str,
    progress: PipelineProgress,
) -> (ProgressBar, tokio::task::JoinHandle<()>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} {pos}/{len} chunks")
            .expect("static template is valid"),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));

    let watcher = {
        let bar = bar.clone();
        tokio::spawn(async move {
            loop {
                bar.set_length(progress.submitted().max(0) as u64);
                bar.set_position(progress.completed().max(0) as u64);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
    };
    (bar, watcher)
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = SbxConfig::load_or_default(&cli.config)?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Keygen {
            name,
            email,
            comment,
            out,
        } => {
            let bar = spinner("generating RSA-4096 keypair (this takes a while)...");
            let (secret, public) =
                generate_keypair(sbx_crypto::openpgp::KeyType::Rsa(4096), &name, &comment, &email)?;
            bar.finish_and_clear();

            let sec_path = out.with_extension("sec.asc");
            let pub_path = out.with_extension("pub.asc");
            std::fs::write(&sec_path, sbx_crypto::openpgp::armor_secret_key(&secret)?)?;
            std::fs::write(&pub_path, sbx_crypto::openpgp::armor_public_key(&public)?)?;
            println!("wrote {} and {}", sec_path.display(), pub_path.display());
        }

        Commands::Upload {
            file,
            recipient,
            sign,
            output,
            chunk_size,
        } => {
            let plaintext = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("file name is not valid UTF-8")?
                .to_string();

            let recipient_ring = load_keyring(&recipient, None)?;
            let recipients = recipient_ring.public_keys();
            let signer_ring = match &sign {
                Some(path) => Some(load_keyring(path, None)?),
                None => None,
            };
            let signer = signer_ring
                .as_ref()
                .and_then(|ring| ring.secret_keys().into_iter().next());

            let mut pipeline = PipelineConfig::from_config(&cfg);
            if let Some(size) = chunk_size {
                pipeline.chunk_size = size;
            }
            let fm = FileManager::new(build_backend(&cfg)?, cfg.auth.token.clone(), pipeline)?;

            let (bar, watcher) = watch_progress("uploading", fm.progress());
            let result = fm.upload(&plaintext, &filename, &recipients, signer).await;
            watcher.abort();
            bar.finish_and_clear();
            let armored = result?;

            let out_path = output.unwrap_or_else(|| file.with_extension("ref"));
            std::fs::write(&out_path, &armored)
                .with_context(|| format!("writing {}", out_path.display()))?;
            println!(
                "uploaded {} ({} bytes) -> {}",
                file.display(),
                plaintext.len(),
                out_path.display()
            );
        }

        Commands::Download {
            reference,
            key,
            passphrase,
            output,
        } => {
            let armored = std::fs::read(&reference)
                .with_context(|| format!("reading {}", reference.display()))?;
            let keyring = load_keyring(&key, passphrase.as_deref())?;

            let fm = FileManager::new(
                build_backend(&cfg)?,
                cfg.auth.token.clone(),
                PipelineConfig::from_config(&cfg),
            )?;

            let (bar, watcher) = watch_progress("downloading", fm.progress());
            let result = fm.download(&armored, &keyring).await;
            watcher.abort();
            bar.finish_and_clear();
            let plaintext = result?;

            let out_path = output.unwrap_or_else(|| reference.with_extension("out"));
            std::fs::write(&out_path, &plaintext)
                .with_context(|| format!("writing {}", out_path.display()))?;
            println!("restored {} bytes -> {}", plaintext.len(), out_path.display());
        }

        Commands::Delete {
            reference,
            key,
            passphrase,
        } => {
            let armored = std::fs::read(&reference)
                .with_context(|| format!("reading {}", reference.display()))?;
            let keyring = load_keyring(&key, passphrase.as_deref())?;

            let fm = FileManager::new(
                build_backend(&cfg)?,
                cfg.auth.token.clone(),
                PipelineConfig::from_config(&cfg),
            )?;

            let (bar, watcher) = watch_progress("deleting", fm.progress());
            let result = fm.delete(&armored, &keyring).await;
            watcher.abort();
            bar.finish_and_clear();
            result?;
            println!("deleted every chunk named by {}", reference.display());
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&cfg)?);
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = err
                .downcast_ref::<SbxError>()
                .map(SbxError::kind)
                .unwrap_or("Error");
            eprintln!("error[{kind}]: {err:#}");
            ExitCode::FAILURE
        }
    }
}
