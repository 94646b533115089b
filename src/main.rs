//! # Candor CLI (`candor`)
//!
//! ## Usage
//!
//! ```bash
//! candor --config ./config/candor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `candor init` | Create the SQLite database and run schema migrations |
//! | `candor retrieve "<query>"` | Print ranked matches with confidence annotations |
//! | `candor ask "<question>"` | Run the full answer pipeline |
//! | `candor serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! candor init
//! candor retrieve "what is the people powered ledger" --match-count 5
//! candor ask "who creates money?"
//! candor ask "and who destroys it?" --conversation 6f1c...
//! candor serve
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;

use candor::config;
use candor::logging;
use candor::migrate;
use candor::pipeline::{AnswerRequest, AppServices, ANONYMOUS_OWNER};
use candor::server;
use candor_core::models::{ChatMessage, Role};

/// Candor: retrieval-augmented answers that are honest about what they know.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/candor.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "candor", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/candor.toml")]
    config: PathBuf,

    /// Log at debug level regardless of `[logging] level` and `RUST_LOG`.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the documents, conversations,
    /// and turns tables. Idempotent.
    Init,

    /// Retrieve and rank reference documents for a query.
    Retrieve {
        /// The query text.
        query: String,

        /// Maximum number of matches (defaults to `retrieval.match_count`).
        #[arg(long)]
        match_count: Option<usize>,
    },

    /// Answer a question with retrieved context.
    Ask {
        /// The question.
        question: String,

        /// Continue (and persist to) an existing conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Start a new persisted conversation owned by this id.
        #[arg(long, conflicts_with = "conversation")]
        new_conversation: Option<String>,

        /// Print the whole answer at once instead of streaming it.
        #[arg(long)]
        no_stream: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Retrieve { query, match_count } => {
            let services = AppServices::from_config(&cfg).await?;
            let retriever = services.answers.retriever();
            let retrieval = retriever.query(&query, match_count).await?;

            println!("confidence: {}", retrieval.confidence);
            if retrieval.matches.is_empty() {
                println!("No matches.");
            }
            for (i, m) in retrieval.matches.iter().enumerate() {
                let tier = retriever.thresholds().tier_for_match(m);
                let score = m
                    .genuine_similarity()
                    .map(|s| format!("{:.2}", s))
                    .unwrap_or_else(|| "n/a".to_string());
                let snippet: String = m.content.chars().take(160).collect();
                println!(
                    "{}. [{}] score={} id={} title={}",
                    i + 1,
                    tier.label(),
                    score,
                    m.id,
                    m.title.as_deref().unwrap_or("unknown")
                );
                println!("    {}", snippet.replace('\n', " "));
            }
        }
        Commands::Ask {
            question,
            conversation,
            new_conversation,
            no_stream,
        } => {
            let services = AppServices::from_config(&cfg).await?;
            let request = build_ask_request(&services, question, conversation, new_conversation).await?;

            if no_stream {
                let message = services.answers.answer(request).await?;
                println!("{}", message.content);
            } else {
                let mut stream = services.answers.answer_stream(request).await?;
                let mut stdout = std::io::stdout();
                while let Some(item) = stream.next().await {
                    write!(stdout, "{}", item?)?;
                    stdout.flush()?;
                }
                writeln!(stdout)?;
            }

            services.answers.drain().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Load prior turns (when continuing a conversation) and append the question.
async fn build_ask_request(
    services: &AppServices,
    question: String,
    conversation: Option<String>,
    new_conversation: Option<String>,
) -> Result<AnswerRequest> {
    let store = &services.conversations;

    let (conversation_id, owner_id) = match (conversation, new_conversation) {
        (Some(id), _) => {
            let Some(existing) = store.get_conversation(&id).await? else {
                bail!("conversation not found: {}", id);
            };
            (existing.id, existing.owner_id)
        }
        (None, Some(owner)) => {
            let created = store.create_conversation(&owner).await?;
            eprintln!("conversation: {}", created.id);
            (created.id, created.owner_id)
        }
        (None, None) => {
            return Ok(AnswerRequest::new(vec![ChatMessage::user(question)]));
        }
    };

    let mut messages: Vec<ChatMessage> = store
        .list_turns(&conversation_id)
        .await?
        .into_iter()
        .filter(|t| t.role != Role::System)
        .map(|t| ChatMessage {
            role: t.role,
            content: t.content,
        })
        .collect();
    let is_first = messages.is_empty();
    messages.push(ChatMessage::user(question));

    let owner = if owner_id.is_empty() {
        ANONYMOUS_OWNER.to_string()
    } else {
        owner_id
    };
    Ok(AnswerRequest::new(messages)
        .in_conversation(conversation_id, owner)
        .first_message(is_first))
}
