use clap::{Parser, Subcommand};
use flatdoc::{DocumentStore, EncryptionKey, StoreOptions};
use serde_json::Value;
use std::env;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the document (falls back to FLATDOC_DIR, then "data")
    #[arg(short, long)]
    dir: Option<String>,

    /// Document file name
    #[arg(short, long, default_value = "store.json")]
    file: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Create the document with an empty object if it is absent
    Init,
    /// Print the document
    Get,
    /// Replace the document with the given JSON value
    Set { value: String },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let dir = cli
        .dir
        .or_else(|| env::var("FLATDOC_DIR").ok())
        .unwrap_or_else(|| "data".to_string());

    let mut options = StoreOptions::new(dir.as_str(), cli.file.as_str());
    if let Ok(secret) = env::var("FLATDOC_SECRET") {
        options = options.encryption_key(EncryptionKey::derive(&secret));
    }
    let store = DocumentStore::new(options, || Value::Object(Default::default()))?;

    match cli.command {
        Commands::Init => {
            store.init()?;
            println!("OK");
        }
        Commands::Get => {
            let val = store.read()?;
            println!("{}", serde_json::to_string_pretty(&val)?);
        }
        Commands::Set { value } => {
            let val: Value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            store.write(val)?;
            println!("OK");
        }
    }

    Ok(())
}
