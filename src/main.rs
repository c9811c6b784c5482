//! nexadb - Command-line client for NexaDB
//!
//! Runs one command against a server over the binary protocol.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use nexadb_client::{Client, ConnectionConfig, OperationType, SubscribeParams};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nexadb")]
#[command(about = "Command-line client for the NexaDB document database")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(long, env = "NEXADB_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(short, long, env = "NEXADB_PORT")]
    port: Option<u16>,

    /// Username for the handshake
    #[arg(short, long, env = "NEXADB_USERNAME")]
    username: Option<String>,

    /// Password for the handshake
    #[arg(long, env = "NEXADB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Database to operate on
    #[arg(short, long, env = "NEXADB_DATABASE")]
    database: Option<String>,

    /// YAML configuration file
    #[arg(short, long, env = "NEXADB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Ping the server
    Ping,

    /// List databases
    Databases,

    /// List collections in the database
    Collections,

    /// Get a document by id
    Get {
        /// Collection name
        collection: String,

        /// Document id
        key: String,
    },

    /// Insert a document
    Insert {
        /// Collection name
        collection: String,

        /// Document JSON (or @file.json to read from file)
        document: String,
    },

    /// Update fields of a document
    Update {
        /// Collection name
        collection: String,

        /// Document id
        key: String,

        /// Updates JSON (or @file.json to read from file)
        updates: String,
    },

    /// Delete a document
    Delete {
        /// Collection name
        collection: String,

        /// Document id
        key: String,
    },

    /// Query documents
    Query {
        /// Collection name
        collection: String,

        /// Filter JSON
        #[arg(short, long)]
        filter: Option<String>,

        /// Maximum documents to return
        #[arg(short, long, default_value = "100")]
        limit: u32,
    },

    /// Stream change events until Ctrl+C
    Watch {
        /// Collection to watch (all collections if omitted)
        collection: Option<String>,

        /// Operations to watch
        #[arg(long, value_delimiter = ',')]
        operations: Vec<OperationType>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ConnectionConfig::load_from(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.username.is_some() {
        config.username = cli.username;
    }
    if cli.password.is_some() {
        config.password = cli.password;
    }
    if let Some(database) = cli.database {
        config.database = database;
    }
    config = config.with_client_name("nexadb-cli");
    config.validate()?;
    tracing::debug!("Using server {} (database {})", config.addr(), config.database);

    let client = Client::new(config);
    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    match cli.command {
        Commands::Watch {
            collection,
            operations,
        } => {
            let params = SubscribeParams {
                collection,
                ..Default::default()
            }
            .with_operations(operations);
            watch(&client, params).await?;
        }
        cmd => {
            let result = commands::execute(&client, cmd).await;
            client.disconnect().await;

            match result {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Prints change events as JSON lines until interrupted or the stream fails.
async fn watch(client: &Client, params: SubscribeParams) -> Result<(), Box<dyn std::error::Error>> {
    let target = params
        .collection
        .clone()
        .unwrap_or_else(|| "all collections".to_string());

    let mut stream = match client.watch(params).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    eprintln!("{} {}", "Watching".green(), target.cyan());
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    let mut failure = None;
    loop {
        tokio::select! {
            event = stream.next() => {
                match event {
                    Some(Ok(event)) => {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    Some(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping watch...".dimmed());
                break;
            }
        }
    }

    stream.stop().await;
    client.disconnect().await;

    if let Some(e) = failure {
        eprintln!("{}: {}", "Watch failed".red(), e);
        std::process::exit(1);
    }
    Ok(())
}
