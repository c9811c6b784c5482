//! Command execution.

use crate::Commands;
use colored::Colorize;
use nexadb_client::{Client, Query, Record, Value};

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Watch { .. } => unreachable!(),

        Commands::Ping => {
            client.ping().await?;
            Ok("PONG".green().to_string())
        }

        Commands::Databases => {
            let names = client.list_databases().await?;
            Ok(format_names(&names, "No databases"))
        }

        Commands::Collections => {
            let names = client.list_collections().await?;
            Ok(format_names(&names, "No collections"))
        }

        Commands::Get { collection, key } => match client.get(&collection, &key).await? {
            Some(document) => Ok(format_value(document)),
            None => Ok(format!(
                "{} {} in {}",
                "No document".yellow(),
                key.cyan(),
                collection
            )),
        },

        Commands::Insert {
            collection,
            document,
        } => {
            let document = parse_record_arg(&document)?;
            let id = client.insert(&collection, &document).await?;
            Ok(format!(
                "{} document {} in {}",
                "Inserted".green(),
                id.cyan(),
                collection
            ))
        }

        Commands::Update {
            collection,
            key,
            updates,
        } => {
            let updates = parse_record_arg(&updates)?;
            client.update(&collection, &key, &updates).await?;
            Ok(format!(
                "{} document {} in {}",
                "Updated".green(),
                key.cyan(),
                collection
            ))
        }

        Commands::Delete { collection, key } => {
            client.delete(&collection, &key).await?;
            Ok(format!(
                "{} document {} from {}",
                "Deleted".green(),
                key.cyan(),
                collection
            ))
        }

        Commands::Query {
            collection,
            filter,
            limit,
        } => {
            let mut query = Query::new().limit(limit);
            if let Some(filter) = filter {
                query = query.with_filters(parse_record_arg(&filter)?);
            }

            let documents = client.query(&collection, &query).await?;
            if documents.is_empty() {
                return Ok("No documents found".yellow().to_string());
            }

            let count = documents.len();
            Ok(format!(
                "{}\n{}",
                format_value(Value::Array(documents)),
                format!("{} document(s)", count).dimmed()
            ))
        }
    }
}

/// Parses a JSON object argument, or reads it from a file with `@path`.
fn parse_record_arg(arg: &str) -> Result<Record, Box<dyn std::error::Error>> {
    let json: serde_json::Value = if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    } else {
        serde_json::from_str(arg)?
    };

    Value::from(json)
        .into_map()
        .ok_or_else(|| "expected a JSON object".into())
}

/// Formats a payload value as pretty JSON for display.
fn format_value(value: Value) -> String {
    let json = serde_json::Value::from(value);
    serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
}

fn format_names(names: &[String], empty: &str) -> String {
    if names.is_empty() {
        return empty.yellow().to_string();
    }
    names
        .iter()
        .map(|name| format!("  {}", name.cyan()))
        .collect::<Vec<_>>()
        .join("\n")
}
