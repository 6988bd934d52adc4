//! veil client binary.
//!
//! # Usage
//!
//! ```bash
//! # Join an existing session (prompts for session ID, key, identity)
//! veil-client --addr 198.51.100.7:4040
//!
//! # Create a new session instead
//! veil-client --addr 198.51.100.7:4040 --new
//! ```

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use veil_client::{Client, Console, Credential, TerminalConsole};
use veil_proto::SessionId;

/// veil session chat client
#[derive(Parser, Debug)]
#[command(name = "veil-client")]
#[command(about = "Client for passphrase-guarded chat sessions")]
#[command(version)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:4040")]
    addr: String,

    /// Create a new session instead of joining an existing one
    #[arg(long)]
    new: bool,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(args.log_file.as_deref()) {
        eprintln!("could not set up logging: {e}");
        return ExitCode::FAILURE;
    }

    let console = Arc::new(TerminalConsole::new());

    let credential = match gather_credential(&args, console.as_ref()).await {
        Ok(Some(credential)) => credential,
        // End-of-input at a prompt; nothing to do.
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            console.display_line(&format!("err:\t{e}"));
            return ExitCode::FAILURE;
        }
    };

    let client = Client::new(credential);
    match client.run(&args.addr, console.clone()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "session ended on error");
            console.display_line(&format!("err:\t{e}"));
            ExitCode::FAILURE
        }
    }
}

/// Logs go to the named file when given, otherwise to stderr. `RUST_LOG`
/// overrides the default filter either way.
fn init_logging(log_file: Option<&std::path::Path>) -> std::io::Result<()> {
    let filter = |default: &str| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(std::sync::Mutex::new(file)))
                .with(filter("info"))
                .init();
        }
        None => {
            // Keep the conversation readable: warnings only by default.
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter("warn"))
                .init();
        }
    }
    Ok(())
}

/// Prompt for everything a credential needs. `Ok(None)` means the user
/// ended input at a prompt.
async fn gather_credential(
    args: &Args,
    console: &dyn Console,
) -> std::io::Result<Option<Credential>> {
    let session_id = if args.new {
        None
    } else {
        match prompt_session_id(console).await? {
            Some(session_id) => Some(session_id),
            None => return Ok(None),
        }
    };

    let Some(passphrase) = console.read_line("Session key: ", true).await? else {
        return Ok(None);
    };
    let Some(identity) = console.read_line("ident: ", false).await? else {
        return Ok(None);
    };

    Ok(Some(match session_id {
        Some(session_id) => {
            console.display_line(&format!("attempting to join session {session_id:04x}"));
            Credential::join(session_id, &passphrase, identity)
        }
        None => Credential::create(&passphrase, identity),
    }))
}

/// Session IDs are entered in hex; re-prompt until one parses.
async fn prompt_session_id(console: &dyn Console) -> std::io::Result<Option<SessionId>> {
    loop {
        let Some(raw) = console.read_line("Session ID: ", false).await? else {
            return Ok(None);
        };
        match SessionId::from_str_radix(raw.trim(), 16) {
            Ok(session_id) => return Ok(Some(session_id)),
            Err(e) => console.display_line(&format!("invalid session ID: {e}")),
        }
    }
}
