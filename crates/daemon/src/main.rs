//! WebSSH Daemon
//!
//! Playground for the session pool: opens one pooled SSH session and bridges
//! it to the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::{ListenerHub, SessionPool, SshConnector};
use protocol::{listener_destination, ConnectRequest, Credential, ShellTarget, DEFAULT_SSH_PORT};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Group ID used by the playground session.
const PLAYGROUND_GROUP: &str = "playground";

/// WebSSH Daemon - pooled remote shell sessions.
#[derive(Parser, Debug)]
#[command(name = "webssh-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Open an interactive pooled SSH session
    Shell {
        /// Remote host
        #[arg(long)]
        host: String,

        /// Remote port
        #[arg(long, short, default_value_t = DEFAULT_SSH_PORT)]
        port: u16,

        /// Login user
        #[arg(long, short)]
        user: String,

        /// Environment variable holding the password
        #[arg(long, value_name = "VAR", conflicts_with = "key")]
        password_env: Option<String>,

        /// Private key file
        #[arg(long, value_name = "FILE")]
        key: Option<PathBuf>,

        /// Environment variable holding the key passphrase
        #[arg(long, value_name = "VAR", requires = "key")]
        passphrase_env: Option<String>,

        /// Expected host key fingerprint (SHA256:...)
        #[arg(long)]
        fingerprint: Option<String>,
    },

    /// Inspect the configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check the configuration for invalid values
    Validate,

    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    // Initialize tracing; stdout belongs to the remote shell.
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config(ConfigCommands::Path) => {
            println!("{}", config_path.display());
        }
        Commands::Config(ConfigCommands::Show { json }) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", config.to_toml()?);
            }
        }
        Commands::Config(ConfigCommands::Validate) => match config.validate() {
            Ok(()) => println!("Configuration is valid: {}", config_path.display()),
            Err(e) => {
                eprintln!("Invalid configuration: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Shell {
            host,
            port,
            user,
            password_env,
            key,
            passphrase_env,
            fingerprint,
        } => {
            config.validate()?;

            let credential = read_credential(password_env, key, passphrase_env)?;
            let mut target = ShellTarget::new(host, user).with_port(port);
            target.fingerprint = fingerprint;

            run_shell(config, ConnectRequest { target, credential }).await?;
        }
    }

    Ok(())
}

/// Builds the credential from the command line options.
fn read_credential(
    password_env: Option<String>,
    key: Option<PathBuf>,
    passphrase_env: Option<String>,
) -> anyhow::Result<Credential> {
    if let Some(path) = key {
        let key = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read private key: {}", path.display()))?;
        let passphrase = passphrase_env
            .map(|var| std::env::var(&var).with_context(|| format!("{} is not set", var)))
            .transpose()?;
        return Ok(Credential::PrivateKey { key, passphrase });
    }

    match password_env {
        Some(var) => {
            let password = std::env::var(&var).with_context(|| format!("{} is not set", var))?;
            Ok(Credential::Password { password })
        }
        None => bail!("Either --password-env or --key is required"),
    }
}

/// Connects one session and bridges it to stdin/stdout until `exit`,
/// end of input, Ctrl-C, or the remote side closing.
async fn run_shell(config: Config, request: ConnectRequest) -> anyhow::Result<()> {
    let hub = Arc::new(ListenerHub::new(config.pool.listener_capacity));
    let pool = Arc::new(SessionPool::new(&config, SshConnector::new(), hub.clone()));
    pool.start_reaper();

    tracing::info!(
        host = %request.target.host,
        port = request.target.port,
        user = %request.target.username,
        "Connecting"
    );
    let info = pool.connect(PLAYGROUND_GROUP, request).await?;
    let session_id = info.session_id.clone();
    tracing::info!(session_id = %session_id, "Connected");

    let destination = listener_destination(PLAYGROUND_GROUP, &session_id);
    let (listener_id, mut output) = hub.subscribe(&destination);
    let history = pool.attach_listener(PLAYGROUND_GROUP, &session_id)?;

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        if !history.is_empty() {
            let _ = stdout.write_all(history.output.as_bytes()).await;
            let _ = stdout.flush().await;
        }
        while let Some(event) = output.recv().await {
            if stdout.write_all(event.payload.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim() == "exit" {
                    break;
                }
                if let Err(e) = pool.run_command(PLAYGROUND_GROUP, &session_id, &line).await {
                    eprintln!("{}", e);
                    break;
                }
            }
        }
    }

    hub.unsubscribe(&destination, &listener_id);
    // The session may already be gone if the remote side closed it.
    let _ = pool.disconnect(PLAYGROUND_GROUP, &session_id);
    pool.shutdown();
    printer.abort();

    Ok(())
}
