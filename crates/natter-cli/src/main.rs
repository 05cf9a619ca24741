// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Natter Contributors

//! Natter CLI - line-oriented terminal client for the Natter chat relay.
//!
//! Each line typed on stdin is sent as a chat message; incoming messages are
//! printed as they arrive.

use anyhow::{bail, Context, Result};
use clap::Parser;
use natter_relay::transport::DEFAULT_MAX_FRAME_BYTES;
use natter_relay::{
    ClientMessage, Identity, InitiatorTransport, MessageSink, MessageSource, ServerMessage,
    StoredMessage, TransportError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn, Level};

/// Natter CLI - terminal client for the Natter chat relay
#[derive(Parser, Debug)]
#[command(name = "natter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Relay address
    #[arg(short, long, default_value = "127.0.0.1:6080")]
    endpoint: String,

    /// Username to log in as
    #[arg(short, long)]
    username: String,

    /// Default recipient; without it every line must start with `@name`
    #[arg(short, long)]
    to: Option<String>,

    /// Print your message log from this sequence number after logging in
    #[arg(short = 'H', long, value_name = "SINCE")]
    history: Option<u64>,

    /// Log relay traffic to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let stream = TcpStream::connect(&cli.endpoint)
        .await
        .with_context(|| format!("Failed to connect to {}", cli.endpoint))?;
    debug!(endpoint = %cli.endpoint, "Connected");

    let (mut sink, mut source) =
        InitiatorTransport::new(stream, DEFAULT_MAX_FRAME_BYTES).split();

    sink.send(ClientMessage::Auth {
        username: Identity::new(cli.username.clone()),
    })
    .await
    .context("Failed to send login")?;

    match source.receive().await.context("Failed to read login reply")? {
        ServerMessage::AuthAck => eprintln!("logged in as {}", cli.username),
        ServerMessage::Err { code, message } => bail!("login rejected [{}]: {}", code, message),
        other => bail!("unexpected login reply: {}", other.kind()),
    }

    if let Some(since_seq) = cli.history {
        sink.send(ClientMessage::History { since_seq })
            .await
            .context("Failed to request history")?;
    }

    let mut printer = tokio::spawn(async move {
        loop {
            match source.receive().await {
                Ok(message) => println!("{}", format_message(&message)),
                Err(TransportError::Closed) => {
                    eprintln!("connection closed by relay");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Connection lost");
                    break;
                }
            }
        }
    });

    let default_to = cli.to.map(Identity::new);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = &mut printer => return Ok(()),
        };
        let Some(line) = line else { break };

        match parse_line(&line, default_to.as_ref()) {
            Ok(Some((to, content))) => {
                sink.send(ClientMessage::Chat { to, content })
                    .await
                    .context("Failed to send message")?;
            }
            Ok(None) => {}
            Err(hint) => eprintln!("{}", hint),
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Failed to close connection");
    }
    printer.abort();
    Ok(())
}

/// Turn an input line into a recipient and message text.
///
/// `@name text` addresses `name`; anything else goes to `default_to`.
/// Blank lines yield `Ok(None)`.
fn parse_line(line: &str, default_to: Option<&Identity>) -> Result<Option<(Identity, String)>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    if let Some(rest) = line.strip_prefix('@') {
        let (name, content) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let content = content.trim();
        if name.is_empty() || content.is_empty() {
            return Err("usage: @name message".to_string());
        }
        return Ok(Some((Identity::from(name), content.to_string())));
    }

    match default_to {
        Some(to) => Ok(Some((to.clone(), line.to_string()))),
        None => Err("no recipient: start the line with @name or pass --to".to_string()),
    }
}

fn format_message(message: &ServerMessage) -> String {
    match message {
        ServerMessage::AuthAck => "logged in".to_string(),
        ServerMessage::Chat { from, content } => format!("[{}] {}", from, content),
        ServerMessage::Err { code, message } => format!("error [{}] {}", code, message),
        ServerMessage::History { messages } if messages.is_empty() => "no history".to_string(),
        ServerMessage::History { messages } => messages
            .iter()
            .map(format_stored)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn format_stored(message: &StoredMessage) -> String {
    format!(
        "#{} {} {} -> {}: {}",
        message.seq,
        message.timestamp.format("%Y-%m-%d %H:%M:%S"),
        message.from,
        message.to,
        message.content
    )
}
