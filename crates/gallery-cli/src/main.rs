//! Gallery CLI - sign in to the gallery API and keep the session alive.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::AppContext;
use gallery_config_and_utils::{init_logging, parse_level, Config, Paths};
use tracing::debug;

/// Gallery CLI - Manage your gallery API session.
#[derive(Parser)]
#[command(name = "gallery")]
#[command(about = "Gallery CLI for authentication and API access")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with username (or email) and password
    Login {
        /// Username or email
        #[arg(short, long)]
        username: Option<String>,
        /// Password (prompted when omitted)
        #[arg(short, long, env = "GALLERY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Login with a Google OAuth access token
    LoginGoogle {
        /// Access token issued by Google
        #[arg(long, env = "GALLERY_GOOGLE_TOKEN", hide_env_values = true)]
        access_token: String,
    },

    /// Logout and clear stored credentials
    Logout,

    /// Check authentication status
    Status,

    /// Keep the session alive and print session events
    Watch,

    /// Send an authenticated GET request and print the JSON response
    Get {
        /// Path relative to the API base URL, e.g. api/photos/
        path: String,
    },
}

async fn run(command: Commands, ctx: &AppContext, format: &output::OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::Login { username, password } => {
            commands::login(ctx, username, password, format).await
        }
        Commands::LoginGoogle { access_token } => {
            commands::login_google(ctx, access_token, format).await
        }
        Commands::Logout => commands::logout(ctx, format).await,
        Commands::Status => commands::status(ctx, format).await,
        Commands::Watch => commands::watch(ctx, format).await,
        Commands::Get { path } => commands::get(ctx, &path, format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let setup = Paths::new()
        .map_err(anyhow::Error::from)
        .and_then(|paths| Ok((Config::load(&paths)?, paths)));
    let (config, paths) = match setup {
        Ok(setup) => setup,
        Err(e) => {
            output::print_error(&format!("{:#}", e), &cli.format);
            std::process::exit(1);
        }
    };

    // Initialize logging via observability crate
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let level = parse_level(level).as_str().to_ascii_lowercase();
    init_logging("cli", &level, Some(&paths), cli.verbose);
    debug!(base_dir = %paths.base_dir().display(), "Gallery CLI starting");

    let result = match AppContext::new(&paths, config) {
        Ok(ctx) => run(cli.command, &ctx, &cli.format).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e), &cli.format);
        std::process::exit(1);
    }
}
