//! docpipe CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use docpipe::{
    chat::ChatRequest,
    commands::{
        cmd_add_schema, cmd_chat, cmd_delete, cmd_document_status, cmd_init, cmd_list_schemas,
        cmd_process, cmd_remove_schema, cmd_reprocess, cmd_search, cmd_status, cmd_upload,
        print_chat_response, print_document_outcome, print_document_status, print_init,
        print_schemas, print_search_results, print_status, FollowOptions,
    },
    config::{Config, DispatchMode},
    error::Result,
    meta::Stage,
    progress::LogWriterFactory,
    search::SearchRequest,
    server,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docpipe")]
#[command(version, about = "Document ingestion pipeline with hybrid search and RAG chat", long_about = None)]
struct Cli {
    /// Path to the config file or its directory
    #[arg(short, long, global = true, env = "DOCPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize docpipe configuration, database and blob storage
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Run the HTTP API server
    Serve {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the configured stage dispatch mode
        #[arg(long, value_parser = parse_dispatch)]
        dispatch: Option<DispatchMode>,
    },

    /// Upload a PDF or image and run its pipeline
    Upload {
        /// File to upload
        path: PathBuf,

        #[command(flatten)]
        follow: FollowArgs,
    },

    /// Run the remaining stages of a document
    Process {
        /// Document ID
        id: String,

        #[command(flatten)]
        follow: FollowArgs,
    },

    /// Re-run a document from a stage
    Reprocess {
        /// Document ID
        id: String,

        /// Stage to restart from: ocr, extract or embed
        #[arg(long, default_value = "ocr")]
        from: Stage,

        #[command(flatten)]
        follow: FollowArgs,
    },

    /// Show registry status, or one document's details
    Status {
        /// Document ID
        id: Option<String>,
    },

    /// Hybrid full-text and vector search
    Search {
        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Weight of the full-text score (0-1)
        #[arg(long)]
        fulltext_weight: Option<f32>,

        /// Weight of the vector score (0-1)
        #[arg(long)]
        vector_weight: Option<f32>,

        /// Only documents of this type
        #[arg(long = "type")]
        document_type: Option<String>,

        /// Only documents carrying any of these tags
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Ask a question about your documents
    Chat {
        /// The question
        message: String,

        /// Only use documents of this type as context
        #[arg(long = "type")]
        document_type: Option<String>,
    },

    /// Manage extraction schemas
    Schemas {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Delete a document and its stored file
    Delete {
        /// Document ID
        id: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// List schemas
    List,

    /// Add or replace a schema from inline JSON or a JSON file
    Add {
        /// `{"name", "document_type", "description"?, "field_schema": {"properties": {...}}}`
        schema: String,
    },

    /// Remove the schema for a document type
    Remove {
        document_type: String,
    },
}

#[derive(clap::Args)]
struct FollowArgs {
    /// With http dispatch, wait until the document is ready or failed
    #[arg(long)]
    wait: bool,

    /// Seconds to wait before giving up
    #[arg(long, default_value = "600")]
    timeout: u64,
}

impl FollowArgs {
    fn options(&self, json: bool) -> FollowOptions {
        FollowOptions {
            wait: self.wait,
            timeout: Duration::from_secs(self.timeout),
            quiet: json,
        }
    }
}

fn parse_dispatch(value: &str) -> std::result::Result<DispatchMode, String> {
    match value {
        "in_process" | "in-process" => Ok(DispatchMode::InProcess),
        "http" => Ok(DispatchMode::Http),
        other => Err(format!("unknown dispatch mode '{}'", other)),
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory))
        .with(filter)
        .init();

    if let Commands::Init { force } = cli.command {
        let config = cmd_init(base_dir(cli.config.as_deref()), force).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            print_init(&config);
        }
        return Ok(());
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "docpipe", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Serve {
            host,
            port,
            dispatch,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dispatch) = dispatch {
                config.pipeline.dispatch = dispatch;
            }
            config.validate()?;
            server::serve(config).await?;
        }

        Commands::Upload { path, follow } => {
            let doc = cmd_upload(&config, &path, follow.options(cli.json)).await?;
            print_json_or(cli.json, &doc, print_document_outcome)?;
        }

        Commands::Process { id, follow } => {
            let doc = cmd_process(&config, &id, follow.options(cli.json)).await?;
            print_json_or(cli.json, &doc, print_document_outcome)?;
        }

        Commands::Reprocess { id, from, follow } => {
            let doc = cmd_reprocess(&config, &id, from, follow.options(cli.json)).await?;
            print_json_or(cli.json, &doc, print_document_outcome)?;
        }

        Commands::Status { id: Some(id) } => {
            let info = cmd_document_status(&config, &id).await?;
            print_json_or(cli.json, &info, print_document_status)?;
        }

        Commands::Status { id: None } => {
            let status = cmd_status(&config).await?;
            print_json_or(cli.json, &status, print_status)?;
        }

        Commands::Search {
            query,
            limit,
            fulltext_weight,
            vector_weight,
            document_type,
            tags,
        } => {
            let request = SearchRequest {
                query,
                match_count: limit,
                fulltext_weight,
                vector_weight,
                filter_document_type: document_type,
                filter_tags: (!tags.is_empty()).then_some(tags),
            };
            let response = cmd_search(&config, &request).await?;
            print_json_or(cli.json, &response, print_search_results)?;
        }

        Commands::Chat {
            message,
            document_type,
        } => {
            let request = ChatRequest {
                message,
                history: Vec::new(),
                filter_document_type: document_type,
            };
            let response = cmd_chat(&config, &request).await?;
            print_json_or(cli.json, &response, print_chat_response)?;
        }

        Commands::Schemas { action } => match action {
            SchemaAction::List => {
                let schemas = cmd_list_schemas(&config).await?;
                print_json_or(cli.json, &schemas, |s| print_schemas(s))?;
            }
            SchemaAction::Add { schema } => {
                let schema = cmd_add_schema(&config, &schema).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&schema)?);
                } else {
                    println!("✓ Schema '{}' saved for type '{}'", schema.name, schema.document_type);
                }
            }
            SchemaAction::Remove { document_type } => {
                cmd_remove_schema(&config, &document_type).await?;
                if !cli.json {
                    println!("✓ Schema for type '{}' removed", document_type);
                }
            }
        },

        Commands::Delete { id } => {
            let doc = cmd_delete(&config, &id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                println!("✓ Deleted {} ({})", doc.id, doc.original_filename);
            }
        }
    }

    Ok(())
}

fn print_json_or<T: serde::Serialize + ?Sized>(
    json: bool,
    value: &T,
    print: impl FnOnce(&T),
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

/// `--config` may name the file or the directory holding it
fn config_location(path: Option<&std::path::Path>) -> (PathBuf, PathBuf) {
    match path {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path.to_path_buf())
        }
        Some(dir) => (dir.to_path_buf(), dir.join("config.toml")),
        None => {
            let base = Config::default_base_dir();
            let config = base.join("config.toml");
            (base, config)
        }
    }
}

fn base_dir(path: Option<&std::path::Path>) -> Option<PathBuf> {
    Some(config_location(path).0)
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let (_, config_path) = config_location(path);
    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'docpipe init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }
    Config::load(&config_path)
}
