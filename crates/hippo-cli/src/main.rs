//! Hippo CLI tool.

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "hippo")]
#[command(about = "Hippo platform CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "PEGASUS_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage applications
    Apps {
        #[command(subcommand)]
        command: AppCommands,
    },
    /// Manage builds
    Builds {
        #[command(subcommand)]
        command: BuildCommands,
    },
}

#[derive(Subcommand)]
enum AppCommands {
    /// Register an application
    Create {
        /// Application name (lowercase slug)
        name: String,
        /// Hostname override (defaults to name.default-domain)
        #[arg(long)]
        hostname: Option<String>,
    },
    /// List applications
    List,
    /// Show application details
    Show {
        /// Application ID
        id: String,
    },
}

#[derive(Subcommand)]
enum BuildCommands {
    /// Submit a build
    New {
        /// Owning application ID
        #[arg(long)]
        app: String,
        /// Git repository URL to build from
        #[arg(long, conflicts_with = "archive")]
        git: Option<String>,
        /// Source archive URL to build from
        #[arg(long)]
        archive: Option<String>,
        /// Git ref to check out
        #[arg(long, requires = "git")]
        reference: Option<String>,
        /// Git commit to check out
        #[arg(long, requires = "git")]
        commit: Option<String>,
        /// Archive SHA-256 checksum
        #[arg(long, requires = "archive")]
        checksum: Option<String>,
    },
    /// Show build details
    Show {
        /// Build ID
        id: String,
    },
    /// List an application's builds, newest first
    List {
        /// Application ID
        #[arg(long)]
        app: String,
    },
    /// Request cancellation of a build
    Cancel {
        /// Build ID
        id: String,
    },
    /// Archive a build (cancel if active, retain the record)
    Delete {
        /// Build ID
        id: String,
    },
    /// Print a build's log
    Logs {
        /// Build ID
        id: String,
        /// First log line to print
        #[arg(long, default_value = "0")]
        offset: u64,
        /// Maximum lines to print
        #[arg(long, default_value = "500")]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Apps { command } => match command {
            AppCommands::Create { name, hostname } => {
                commands::apps::create(&cli.api_url, &name, hostname).await?;
            }
            AppCommands::List => {
                commands::apps::list(&cli.api_url).await?;
            }
            AppCommands::Show { id } => {
                commands::apps::show(&cli.api_url, &id).await?;
            }
        },
        Commands::Builds { command } => match command {
            BuildCommands::New {
                app,
                git,
                archive,
                reference,
                commit,
                checksum,
            } => {
                commands::builds::new(&cli.api_url, &app, git, archive, reference, commit, checksum)
                    .await?;
            }
            BuildCommands::Show { id } => {
                commands::builds::show(&cli.api_url, &id).await?;
            }
            BuildCommands::List { app } => {
                commands::builds::list(&cli.api_url, &app).await?;
            }
            BuildCommands::Cancel { id } => {
                commands::builds::cancel(&cli.api_url, &id).await?;
            }
            BuildCommands::Delete { id } => {
                commands::builds::delete(&cli.api_url, &id).await?;
            }
            BuildCommands::Logs { id, offset, limit } => {
                commands::builds::logs(&cli.api_url, &id, offset, limit).await?;
            }
        },
    }

    Ok(())
}
