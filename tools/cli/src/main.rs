//! Sealdrop CLI - Command line interface for encrypted file transfers.
//!
//! This tool sends files end-to-end encrypted to registered users or
//! anonymously, and receives, verifies and decrypts them.

mod token_store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use sealdrop_client::contracts::InsertKeyPairRequest;
use sealdrop_client::{
    ApiClient, ClientConfig, TokenType, TransferOrchestrator, TransferTracker, UploadRequest,
};
use sealdrop_common::{EmailAddress, Either, Maybe, TransferId, Username};
use sealdrop_crypto::{KeyPair, SecretKey};
use token_store::FileTokenRepository;

#[derive(Parser)]
#[command(name = "sealdrop")]
#[command(about = "Sealdrop - End-to-end encrypted file transfer")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/sealdrop/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server URL, overriding the configuration file.
    #[arg(short, long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key pair for receiving transfers.
    Keygen {
        /// File to write the secret key to.
        #[arg(short, long)]
        out: PathBuf,

        /// Register the public key with the server (requires login).
        #[arg(short, long)]
        publish: bool,
    },

    /// Create an account.
    Register {
        /// Username (at most 32 characters).
        username: String,

        /// Email address for account recovery.
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Log in and store the session.
    Login {
        /// Username.
        username: String,

        /// Keep the session across restarts of this device.
        #[arg(short, long)]
        remember: bool,
    },

    /// Renew the stored session.
    Refresh,

    /// End the session.
    Logout,

    /// Encrypt and send a file.
    Upload {
        /// File to send.
        file: PathBuf,

        /// Recipient username. Omit for an anonymous transfer.
        #[arg(short, long)]
        to: Option<String>,

        /// Hours until the transfer expires.
        #[arg(short, long)]
        lifetime: Option<u32>,

        /// MIME type of the file.
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,

        /// Send as the logged-in user.
        #[arg(short, long)]
        authenticated: bool,
    },

    /// List transfers addressed to you.
    Inbox,

    /// Download, verify and decrypt a transfer.
    Download {
        /// Transfer identifier.
        id: String,

        /// Secret key file written by `keygen`.
        #[arg(short, long)]
        key: PathBuf,

        /// Destination file.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Request an account recovery email.
    Recover {
        /// Email address of the account.
        email: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref(), cli.server.as_deref())?;
    let tokens = FileTokenRepository::open(config_dir()?.join("tokens.json"))
        .await
        .context("Failed to open token store")?;
    let api = ApiClient::from_config(&config, Arc::new(tokens)).context("Failed to create client")?;

    match cli.command {
        Commands::Keygen { out, publish } => cmd_keygen(&api, &out, publish).await,

        Commands::Register { username, email } => cmd_register(&api, &username, email).await,

        Commands::Login { username, remember } => cmd_login(&api, &username, remember).await,

        Commands::Refresh => cmd_refresh(&api).await,

        Commands::Logout => cmd_logout(&api).await,

        Commands::Upload {
            file,
            to,
            lifetime,
            content_type,
            authenticated,
        } => {
            let orchestrator =
                TransferOrchestrator::new(api).with_default_lifetime(config.default_lifetime_hours);
            cmd_upload(&orchestrator, &file, to, lifetime, content_type, authenticated).await
        }

        Commands::Inbox => cmd_inbox(&api).await,

        Commands::Download { id, key, out } => {
            cmd_download(&TransferOrchestrator::new(api), &id, &key, &out).await
        }

        Commands::Recover { email } => cmd_recover(&api, &email).await,
    }
}

/// Directory holding the configuration and the token store.
fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("sealdrop"))
        .context("Cannot determine configuration directory")
}

/// Load configuration, applying the command line override.
fn load_config(path: Option<&Path>, server: Option<&str>) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let default = config_dir()?.join("config.json");
            if default.exists() {
                ClientConfig::load(&default)
                    .with_context(|| format!("Failed to load config {}", default.display()))?
            } else {
                ClientConfig::default()
            }
        }
    };

    if let Some(server) = server {
        config.base_url = server.to_string();
        config.validate().context("Invalid server URL")?;
    }
    Ok(config)
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password.into_bytes()))
}

/// Turn a server refusal into an error.
fn accepted<L: std::fmt::Display, T>(outcome: Either<L, T>, action: &str) -> Result<T> {
    outcome
        .into_result()
        .map_err(|error| anyhow::anyhow!("{} refused by server: {}", action, error))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfer");
            token.cancel();
        }
    });
    cancel
}

/// Log every state the transfer passes through.
fn log_progress(tracker: &TransferTracker) {
    let mut states = tracker.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            info!(state = ?*states.borrow(), "Transfer progress");
        }
    });
}

/// Generate a receiving key pair.
async fn cmd_keygen(api: &ApiClient, out: &Path, publish: bool) -> Result<()> {
    let keys = KeyPair::generate();
    let secret = Zeroizing::new(keys.secret_key().to_base64());
    write_secret_key(out, &secret).await?;

    println!("Key pair generated!");
    println!("  Secret key: {}", out.display());
    println!("  Public key: {}", keys.public_key().to_base64());

    if publish {
        let request = InsertKeyPairRequest {
            public_key: *keys.public_key(),
            encrypted_private_key: None,
            nonce: None,
        };
        let outcome = api
            .user_key()
            .insert_key_pair(&request)
            .await
            .context("Failed to publish public key")?;
        accepted(outcome, "Publishing public key")?;
        println!("Public key registered with the server.");
    }

    Ok(())
}

/// Write a secret key to a new file that only the current user can read.
///
/// The file is created with its final permissions; an existing file is
/// never replaced.
async fn write_secret_key(out: &Path, secret: &str) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = match options.open(out).await {
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            anyhow::bail!("Refusing to overwrite existing key file {}", out.display())
        }
        opened => opened.context("Failed to create key file")?,
    };
    file.write_all(secret.as_bytes())
        .await
        .context("Failed to write key file")?;
    file.sync_all().await?;
    Ok(())
}

/// Create an account.
async fn cmd_register(api: &ApiClient, username: &str, email: Option<String>) -> Result<()> {
    let username = Username::new(username).context("Invalid username")?;
    let email = email
        .map(EmailAddress::new)
        .transpose()
        .context("Invalid email address")?;

    let password = prompt_password("Choose password: ")?;
    let confirm = prompt_password("Confirm password: ")?;

    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    let outcome = api
        .user_authentication()
        .register(&username, &password, email)
        .await
        .context("Failed to register")?;
    accepted(outcome, "Registration")?;

    println!("Account created: {}", username);
    Ok(())
}

/// Log in.
async fn cmd_login(api: &ApiClient, username: &str, remember: bool) -> Result<()> {
    let username = Username::new(username).context("Invalid username")?;
    let password = prompt_password("Password: ")?;
    let token_type = if remember {
        TokenType::Device
    } else {
        TokenType::Session
    };

    let outcome = api
        .user_authentication()
        .login(&username, &password, token_type)
        .await
        .context("Failed to log in")?;
    accepted(outcome, "Login")?;

    println!("Logged in as {}", username);
    Ok(())
}

/// Renew the session.
async fn cmd_refresh(api: &ApiClient) -> Result<()> {
    let outcome = api
        .user_authentication()
        .refresh()
        .await
        .context("Failed to refresh session")?;
    accepted(outcome, "Session refresh")?;

    println!("Session renewed.");
    Ok(())
}

/// Log out.
async fn cmd_logout(api: &ApiClient) -> Result<()> {
    let outcome = api
        .user_authentication()
        .logout()
        .await
        .context("Failed to log out")?;
    if let Either::Left(error) = outcome {
        warn!(%error, "Server did not confirm logout; local session cleared anyway");
    }

    println!("Logged out.");
    Ok(())
}

/// Encrypt and upload a file.
async fn cmd_upload(
    orchestrator: &TransferOrchestrator,
    file: &Path,
    to: Option<String>,
    lifetime: Option<u32>,
    content_type: String,
    authenticated: bool,
) -> Result<()> {
    let recipient: Maybe<Username> = to
        .map(Username::new)
        .transpose()
        .context("Invalid recipient")?
        .into();
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("Upload path has no file name")?;

    let source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let plaintext_length = source.metadata().await?.len();

    info!("Uploading {} ({} bytes)", file.display(), plaintext_length);

    let tracker = TransferTracker::new();
    log_progress(&tracker);

    let request = UploadRequest {
        recipient,
        file_name,
        content_type,
        plaintext: source,
        plaintext_length,
        lifetime_hours: lifetime,
        authenticate_sender: authenticated,
    };
    let outcome = orchestrator
        .upload_tracked(request, cancel_on_interrupt(), &tracker)
        .await
        .context("Upload failed")?;
    accepted(outcome, "Upload")?;

    println!("File sent successfully: {} ({} bytes)", file.display(), plaintext_length);
    Ok(())
}

/// List received transfers.
async fn cmd_inbox(api: &ApiClient) -> Result<()> {
    let outcome = api
        .file_transfer()
        .received_transfers()
        .await
        .context("Failed to list transfers")?;
    let transfers = accepted(outcome, "Listing transfers")?;

    if transfers.is_empty() {
        println!("No transfers.");
    } else {
        println!("Received transfers:");
        for transfer in transfers {
            let sender = transfer
                .sender
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "anonymous".to_string());
            println!(
                "  {}  {} ({} bytes) from {}, expires {}",
                transfer.id,
                transfer.file_name,
                transfer.ciphertext_length,
                sender,
                transfer.expires_at
            );
        }
    }

    Ok(())
}

/// Download and decrypt a transfer into `out`.
async fn cmd_download(
    orchestrator: &TransferOrchestrator,
    id: &str,
    key: &Path,
    out: &Path,
) -> Result<()> {
    let id = TransferId::new(id).context("Invalid transfer id")?;
    let encoded = Zeroizing::new(
        tokio::fs::read_to_string(key)
            .await
            .context("Failed to read key file")?,
    );
    let secret = SecretKey::from_base64(&encoded).context("Invalid key file")?;

    let tracker = TransferTracker::new();
    log_progress(&tracker);

    let outcome = orchestrator
        .download_tracked(&id, &secret, out, cancel_on_interrupt(), &tracker)
        .await
        .with_context(|| format!("Download to {} failed", out.display()))?;
    let preview = accepted(outcome, "Download")?;

    println!("File received successfully: {} -> {}", preview.file_name, out.display());
    if let Some(sender) = &preview.sender {
        println!("  From: {}", sender);
    }
    Ok(())
}

/// Request a recovery email.
async fn cmd_recover(api: &ApiClient, email: &str) -> Result<()> {
    let email = EmailAddress::new(email).context("Invalid email address")?;
    let outcome = api
        .user_recovery()
        .send_recovery_email(&email)
        .await
        .context("Failed to request recovery email")?;
    accepted(outcome, "Recovery email")?;

    println!("Recovery email requested for {}", email.as_str());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealdrop_client::{ErrorResponse, KnownErrorCode};
    use tempfile::TempDir;

    #[test]
    fn test_server_override_replaces_base_url() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        ClientConfig::default().save(&path).unwrap();

        let config = load_config(Some(&path), Some("http://localhost:8080")).unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_bad_server_override_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        ClientConfig::default().save(&path).unwrap();

        assert!(load_config(Some(&path), Some("ftp://files.example")).is_err());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.json")), None).is_err());
    }

    #[test]
    fn test_refusal_names_the_server_error() {
        let outcome: Either<ErrorResponse, ()> =
            Either::Left(ErrorResponse::new(KnownErrorCode::RecipientNotFound));
        let message = accepted(outcome, "Upload").unwrap_err().to_string();
        assert!(message.contains("Upload refused by server"));
    }

    #[tokio::test]
    async fn test_key_file_is_created_private() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bob.key");

        write_secret_key(&path, "c2VjcmV0").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "c2VjcmV0");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_existing_key_file_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bob.key");
        std::fs::write(&path, "old key").unwrap();

        let error = write_secret_key(&path, "new key").await.unwrap_err();

        assert!(error.to_string().contains("Refusing to overwrite"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old key");
    }

    #[test]
    fn test_cli_parses_upload() {
        let cli = Cli::parse_from(["sealdrop", "upload", "report.pdf", "--to", "bob", "-a"]);
        match cli.command {
            Commands::Upload { to, authenticated, .. } => {
                assert_eq!(to.as_deref(), Some("bob"));
                assert!(authenticated);
            }
            _ => panic!("expected upload"),
        }
    }
}
