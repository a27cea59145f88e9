//! Command-line interface parsing and handling
//!
//! Each invocation appends one message to a conversation log and, for user
//! messages, streams the model's reply to stdout and into the same log.

pub mod prompt;


use std::error::Error;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::prompt::{embed_files, read_prompt};
use crate::core::chat_stream::ChatStreamService;
use crate::core::config::{Config, Settings};
use crate::core::conversation::Conversation;
use crate::core::message::{Message, Role};
use crate::core::tools::ToolTable;
use crate::core::transcript::{Destination, TranscriptStore};
use crate::plugins::{default_plugin_dir, load_plugins};
use crate::utils::clipboard::copy_to_clipboard;

#[derive(Parser, Debug)]
#[command(name = "cli-gpt", version)]
#[command(about = "A CLI tool to interact with OpenAI's Chat Completion API")]
#[command(
    long_about = "A CLI tool to interact with OpenAI's Chat Completion API.\n\n\
When no prompt is given it is read from standard input. With --read or \
--multiline the prompt must come from standard input.\n\n\
Files (in the working directory):\n\
  .cli-gpt.initial.md               Initial messages set with --initial; sent first in every request\n\
  .cli-gpt.conversation.md          The conversation history\n\
  .cli-gpt.conversation.one-shot.md The last one-shot exchange\n\n\
Functions:\n\
  Executables in ~/.cli-gpt-plugins with a matching <name>.def.json definition \
are offered to the model as callable functions.\n\n\
Environment Variables (also read from ~/.cli-gpt as KEY=value lines; the environment wins):\n\
  OPENAI_API_KEY    Your OpenAI API key (required for user messages)\n\
  OPENAI_BASE_URL   Custom API base URL (optional, defaults to https://api.openai.com/v1)\n\
  MODEL_ID          Model to use (defaults to gpt-4)\n\
  MODEL_TEMPERATURE, MODEL_TOP_P, MODEL_N, MODEL_MAX_TOKENS,\n\
  MODEL_PRESENCE_PENALTY, MODEL_FREQUENCY_PENALTY,\n\
  MODEL_STOP, MODEL_LOGIT_BIAS (JSON)   Optional sampling parameters"
)]
pub struct Args {
    /// Set the role for the message as 'user' (default)
    #[arg(short, long, group = "role")]
    pub user: bool,

    /// Set the role for the message as 'assistant'
    #[arg(short, long, group = "role")]
    pub assistant: bool,

    /// Set the role for the message as 'system'
    #[arg(short, long, group = "role")]
    pub system: bool,

    /// Read every line of standard input as the prompt
    #[arg(short, long, conflicts_with = "prompt")]
    pub multiline: bool,

    /// Embed file(s) in the prompt
    #[arg(short, long, value_name = "FILE", num_args = 1.., conflicts_with = "prompt")]
    pub read: Vec<PathBuf>,

    /// Add to (or with --reset, also clear) the initial messages
    #[arg(short, long)]
    pub initial: bool,

    /// Prompt without the persisted conversation; the exchange is saved to a separate file
    #[arg(short, long, conflicts_with = "initial")]
    pub one_shot: bool,

    /// Copy the response to the clipboard
    #[arg(short, long, conflicts_with_all = ["assistant", "system"])]
    pub copy: bool,

    /// Reset the conversation
    #[arg(
        short = 'e',
        long,
        conflicts_with_all = ["user", "assistant", "system", "multiline", "read", "one_shot", "copy", "prompt"]
    )]
    pub reset: bool,

    /// Text to send (user role) or to add to the conversation (other roles)
    #[arg(trailing_var_arg = true, value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

impl Args {
    pub fn role(&self) -> Role {
        if self.assistant {
            Role::Assistant
        } else if self.system {
            Role::System
        } else {
            Role::User
        }
    }

    pub fn destination(&self) -> Destination {
        if self.initial {
            Destination::Initial
        } else if self.one_shot {
            Destination::OneShot
        } else {
            Destination::Conversation
        }
    }

    pub fn prompt_text(&self) -> Option<String> {
        (!self.prompt.is_empty()).then(|| self.prompt.join(" "))
    }

    /// Checks what clap cannot: every file passed to `--read` must exist.
    pub fn validate(&self) -> Result<(), String> {
        for path in &self.read {
            match path.metadata() {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(format!("File not found: {}", path.display()));
                }
                Err(_) => return Err(format!("Unable to read file: {}", path.display())),
            }
        }
        Ok(())
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();
    args.validate()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cli_gpt=warn")),
        )
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .init();
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let store = TranscriptStore::new(std::env::current_dir()?);

    if args.reset {
        reset_logs(&store, args.initial)?;
        return Ok(());
    }

    let role = args.role();
    let settings = match role {
        Role::User => Some(Config::load()?.resolve()?),
        _ => None,
    };

    let content = compose_content(&args)?;
    let destination = args.destination();
    if destination == Destination::OneShot {
        store.reset(Destination::OneShot)?;
    }
    store.append(destination, &Message::text(role, content))?;

    let Some(settings) = settings else {
        return Ok(());
    };

    let response = complete(&store, destination, settings).await?;
    if args.copy {
        if let Err(err) = copy_to_clipboard(&response) {
            warn!(error = %err, "Failed to copy response");
            eprintln!("Failed to copy response: {err}");
        }
    }
    Ok(())
}

fn reset_logs(store: &TranscriptStore, include_initial: bool) -> io::Result<()> {
    store.reset(Destination::Conversation)?;
    store.reset(Destination::OneShot)?;
    if include_initial {
        store.reset(Destination::Initial)?;
    }
    Ok(())
}

/// Message content from `--read` files followed by the prompt, which comes
/// from the arguments or standard input.
fn compose_content(args: &Args) -> io::Result<String> {
    let mut content = String::new();

    if !args.read.is_empty() {
        content = embed_files(&args.read)?;
        println!("{content}");
    }

    match args.prompt_text() {
        Some(prompt) if !args.multiline => content.push_str(&prompt),
        _ => {
            let stdin = io::stdin();
            content.push_str(&read_prompt(stdin.lock(), args.multiline)?);
            println!("\nResponse:");
        }
    }

    Ok(content)
}

async fn complete(
    store: &TranscriptStore,
    destination: Destination,
    settings: Settings,
) -> Result<String, Box<dyn Error>> {
    let tools = load_tools();
    let client = ChatStreamService::new(
        reqwest::Client::new(),
        settings.base_url,
        settings.api_key,
        settings.model,
        settings.params,
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received");
            interrupt.cancel();
        }
    });

    let messages = store.messages(destination)?;
    let mut conversation = Conversation::new(&client, &tools, store, destination, io::stdout());
    let outcome = conversation.run_turn(messages, &cancel).await?;
    conversation.into_output().flush()?;

    Ok(outcome.response().to_string())
}

fn load_tools() -> ToolTable {
    let Some(dir) = default_plugin_dir() else {
        return ToolTable::new();
    };
    match load_plugins(&dir) {
        Ok(tools) => tools,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "Failed to load plugins");
            ToolTable::new()
        }
    }
}
