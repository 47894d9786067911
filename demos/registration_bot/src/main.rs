//! Registration Bot Example
//!
//! A console bot that asks for a name and then a phone number. Each line on
//! stdin is a message from one user; bot output goes to stdout and logs to
//! stderr.
//!
//! ```text
//! /start               begin registration
//! Ada                  answer the current question
//! !press cancel        press a button on the latest bot message
//! !press cancel 3      press a button on message 3
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package registration-bot -- --timeout-secs 60
//! ```

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use futures::{Stream, stream};
use stepwise::core::ApiResult;
use stepwise::framework::CANCEL_ACTION;
use stepwise::prelude::*;
use stepwise::runtime::config::{LogOutput, LoggingConfig};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, info};

const ASK_NAME: &str = "registration.name";
const ASK_PHONE: &str = "registration.phone";
const TIMED_OUT: &str = "Registration timed out. Send /start to try again.";

#[derive(Debug, Parser)]
#[command(about = "Console registration bot")]
struct Args {
    /// Chat id used for every input line.
    #[arg(long, default_value_t = 1)]
    chat: i64,

    /// User id used for every input line.
    #[arg(long, default_value_t = 1)]
    user: i64,

    /// Configuration file (defaults to ./stepwise.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `continuations.timeout_secs`.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

// ============================================================================
// Console Client
// ============================================================================

/// Prints outbound calls to stdout.
#[derive(Debug, Default)]
struct ConsoleClient {
    next_message_id: AtomicI64,
    last_message_id: AtomicI64,
}

impl ConsoleClient {
    fn last_message(&self) -> i64 {
        self.last_message_id.load(Ordering::Acquire)
    }

    fn render(message: &OutgoingMessage) -> String {
        let mut out = message.text.clone();
        for row in &message.buttons {
            let row = row
                .iter()
                .map(|b| format!("[{}]({})", b.label, b.data))
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str("\n    ");
            out.push_str(&row);
        }
        out
    }
}

#[async_trait]
impl Client for ConsoleClient {
    async fn send(&self, chat_id: i64, message: OutgoingMessage) -> ApiResult<MessageRef> {
        let id = self.next_message_id.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_message_id.store(id, Ordering::Release);
        println!("bot #{id} → {chat_id}: {}", Self::render(&message));
        Ok(MessageRef::new(chat_id, id))
    }

    async fn edit(&self, target: MessageRef, message: OutgoingMessage) -> ApiResult<()> {
        println!("bot edits #{}: {}", target.message_id, Self::render(&message));
        Ok(())
    }

    async fn delete(&self, target: MessageRef) -> ApiResult<()> {
        println!("bot deletes #{}", target.message_id);
        Ok(())
    }

    async fn answer_interaction(&self, interaction_id: &str, text: Option<&str>) -> ApiResult<()> {
        println!("bot answers press {interaction_id}: {}", text.unwrap_or("(no text)"));
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ============================================================================
// Input
// ============================================================================

struct Input {
    lines: Lines<BufReader<Stdin>>,
    client: Arc<ConsoleClient>,
    chat: i64,
    user: i64,
    next_id: i64,
}

impl Input {
    fn parse(&mut self, line: &str) -> Option<Update> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.next_id += 1;
        let id = self.next_id;

        match line.strip_prefix("!press ") {
            Some(rest) => {
                let mut parts = rest.split_whitespace();
                let data = parts.next()?;
                let message_id = parts
                    .next()
                    .and_then(|m| m.parse().ok())
                    .unwrap_or_else(|| self.client.last_message());
                Some(Update::interaction(id, self.chat, self.user, message_id, data))
            }
            None => Some(Update::message(id, self.chat, self.user, line)),
        }
    }
}

fn events(input: Input) -> impl Stream<Item = BoxedEvent> {
    stream::unfold(input, |mut input| async move {
        loop {
            match input.lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(update) = input.parse(&line) {
                        return Some((BoxedEvent::new(update), input));
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    return None;
                }
            }
        }
    })
}

// ============================================================================
// Handlers
// ============================================================================

fn pending(step: &str, params: Params) -> Continuation {
    Continuation::new(step, params).cancellation_message(TIMED_OUT)
}

/// Logs every incoming plain message.
async fn log_message(ctx: Arc<HandlerContext>, _params: Params) -> HandlerResult {
    if let (Some(key), Some(text)) = (ctx.key(), ctx.event().text()) {
        info!(key = %key, text, "Message received");
    }
    Ok(())
}

async fn help(ctx: Arc<HandlerContext>, _params: Params) -> HandlerResult {
    ctx.reply("/start - register\n/help - this help\n!press <data> [message] - press a button")
        .await?;
    Ok(())
}

async fn start(ctx: Arc<HandlerContext>, _params: Params) -> HandlerResult {
    ctx.reply(OutgoingMessage::text("Welcome! What's your name?").button("Cancel", CANCEL_ACTION))
        .await?;
    ctx.continue_with(pending(ASK_NAME, Params::new()))?;
    Ok(())
}

async fn got_name(ctx: Arc<HandlerContext>, params: Params) -> HandlerResult {
    let name = ctx.event().text().unwrap_or_default().trim().to_string();
    if name.is_empty() {
        ctx.reply("Please tell me your name.").await?;
        ctx.continue_with(pending(ASK_NAME, params))?;
        return Ok(());
    }

    ctx.reply(
        OutgoingMessage::text(format!("Thanks, {name}. What's your phone number?"))
            .button("Cancel", CANCEL_ACTION),
    )
    .await?;
    ctx.continue_with(pending(ASK_PHONE, params.with("name", name)))?;
    Ok(())
}

async fn got_phone(ctx: Arc<HandlerContext>, params: Params) -> HandlerResult {
    let phone = ctx.event().text().unwrap_or_default().trim().to_string();
    if !is_phone_number(&phone) {
        ctx.reply("That doesn't look like a phone number, try again.")
            .await?;
        ctx.continue_with(pending(ASK_PHONE, params))?;
        return Ok(());
    }

    let name: String = params.require("name")?;
    ctx.reply(format!("Registered {name} with {phone}.")).await?;
    ctx.finish();
    Ok(())
}

fn is_phone_number(text: &str) -> bool {
    let digits = text.strip_prefix('+').unwrap_or(text);
    let digits: String = digits.chars().filter(|c| *c != '-' && *c != ' ').collect();
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut defaults = StepwiseConfig {
        logging: LoggingConfig {
            output: LogOutput::Stderr,
            ..Default::default()
        },
        ..Default::default()
    };
    if let Some(secs) = args.timeout_secs {
        defaults.continuations.timeout_secs = secs;
    }

    let mut builder = StepwiseRuntime::builder().merge(defaults);
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }

    let runtime = builder
        .build()?
        .route(on_message().name("log").handler(log_message))
        .route(on_command("help").handler(help))
        .route(on_command("start").handler(start))
        .step(ASK_NAME, got_name)
        .step(ASK_PHONE, got_phone);

    let client = Arc::new(ConsoleClient::default());
    let input = Input {
        lines: BufReader::new(tokio::io::stdin()).lines(),
        client: Arc::clone(&client),
        chat: args.chat,
        user: args.user,
        next_id: 0,
    };

    println!("Type /start to register, /help for commands. Ctrl+D to quit.");
    let report = runtime.run(events(input), client).await?;
    info!(
        drained = report.drained,
        total = report.metrics.total_events,
        failed = report.metrics.failed_events,
        "Bot stopped"
    );

    Ok(())
}
