//! chatline - terminal client for a streaming chat backend

mod commands;
mod config;
mod utils;

use anyhow::Context;
use chatline_client::{HttpBackend, LocalFile};
use chatline_session::{ChatSession, SessionEvent, SubmitOutcome};
use clap::Parser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// chatline - chat with a streaming backend from the terminal
#[derive(Parser, Debug)]
#[command(name = "chatline")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend API root (default: http://localhost:5000/api)
    #[arg(long)]
    base_url: Option<String>,

    /// Open an existing conversation by ID
    #[arg(long)]
    conversation: Option<String>,

    /// Send a single message and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Attach a file to the first message
    #[arg(long)]
    attach: Option<PathBuf>,

    /// Wait for complete replies instead of streaming
    #[arg(long)]
    no_stream: bool,

    /// List conversations and exit
    #[arg(long)]
    list: bool,

    /// Delete a conversation by ID and exit
    #[arg(long)]
    delete: Option<String>,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("chatline=debug,chatline_client=debug,chatline_session=debug")
            .with_writer(io::stderr)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Merge config with CLI args (CLI takes precedence)
    let mut cfg = config::Config::load();
    if let Some(base_url) = args.base_url {
        cfg.base_url = base_url;
    }
    if args.no_stream {
        cfg.streaming = false;
    }

    let backend = Arc::new(
        HttpBackend::new(cfg.client_config())
            .with_context(|| format!("Invalid backend URL {}", cfg.base_url))?,
    );
    tracing::debug!("Using backend at {}", backend.base_url());
    let session = ChatSession::new(backend.clone());

    if args.list {
        return list_conversations(&session).await;
    }

    if let Some(id) = args.delete {
        session
            .delete(&id)
            .await
            .with_context(|| format!("Failed to delete conversation {}", id))?;
        println!("Deleted conversation {}", id);
        return Ok(());
    }

    let conversation_id = session
        .open(args.conversation.as_deref())
        .await
        .context("Failed to open conversation")?;

    let attachment = match args.attach {
        Some(path) => Some(load_attachment(&path).await?),
        None => None,
    };

    // Non-interactive mode
    if let Some(command) = args.command {
        let printer = spawn_printer(&session);
        let outcome = send(&session, &command, attachment, cfg.streaming).await;

        // Wait a bit for final events
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        printer.abort();
        return match outcome? {
            SubmitOutcome::Failed { reason, .. } => anyhow::bail!("Request failed: {}", reason),
            _ => Ok(()),
        };
    }

    if let Some(interval) = cfg.refresh_interval() {
        let _refresher = session.spawn_refresher(interval);
    }
    spawn_interrupt_handler(&session);

    run_interactive(&session, &backend, &conversation_id, attachment, cfg.streaming).await?;
    session.handle().shutdown();
    Ok(())
}

async fn load_attachment(path: &Path) -> anyhow::Result<LocalFile> {
    LocalFile::from_path(path)
        .await
        .with_context(|| format!("Cannot attach {}", path.display()))
}

async fn send(
    session: &ChatSession,
    text: &str,
    attachment: Option<LocalFile>,
    streaming: bool,
) -> anyhow::Result<SubmitOutcome> {
    let outcome = if streaming {
        session.submit(text, attachment).await?
    } else {
        session.send(text, attachment).await?
    };

    // Streamed text and failures are printed by the event printer
    match &outcome {
        SubmitOutcome::Completed { message } if !streaming => println!("{}", message.text),
        SubmitOutcome::Discarded => eprintln!("\n[Reply dropped: conversation changed]"),
        _ => {}
    }
    Ok(outcome)
}

/// Print streamed fragments as they arrive
fn spawn_printer(session: &ChatSession) -> tokio::task::JoinHandle<()> {
    let mut receiver = session.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(SessionEvent::StreamDelta { fragment, .. }) => {
                    print!("{}", fragment);
                    let _ = io::stdout().flush();
                }
                Ok(SessionEvent::MessageCompleted { .. }) => println!(),
                Ok(SessionEvent::MessageFailed { message, reason }) => {
                    println!();
                    tracing::debug!("Reply failed: {}", reason);
                    eprintln!("[{}]", message.error.as_deref().unwrap_or(&message.text));
                }
                Ok(SessionEvent::AttachmentUploaded { server_path, .. }) => {
                    tracing::debug!("Attachment stored as {}", server_path);
                }
                Ok(SessionEvent::Error { message }) => {
                    eprintln!("Error: {}", message);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Display fell behind by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Ctrl-C stops a streaming reply, or exits when idle
fn spawn_interrupt_handler(session: &ChatSession) {
    let handle = session.handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.is_streaming() {
                handle.abort();
            } else {
                handle.shutdown();
                std::process::exit(130);
            }
        }
    });
}

async fn list_conversations(session: &ChatSession) -> anyhow::Result<()> {
    let conversations = session
        .refresh_conversations()
        .await
        .context("Failed to list conversations")?;

    if conversations.is_empty() {
        println!("No conversations found.");
        return Ok(());
    }

    println!("{:<38} {:<4} Preview", "ID", "Pin");
    println!("{}", "-".repeat(90));
    for c in conversations {
        println!(
            "{:<38} {:<4} {}",
            c.id,
            if c.pinned { "*" } else { "" },
            utils::preview_line(&c.preview)
        );
    }
    println!("\nOpen with: chatline --conversation <id>");
    Ok(())
}

fn print_transcript(session: &ChatSession, backend: &HttpBackend) {
    for message in session.messages() {
        println!("{}", utils::format_message(&message, backend));
    }
}

async fn run_interactive(
    session: &ChatSession,
    backend: &HttpBackend,
    conversation_id: &str,
    mut attachment: Option<LocalFile>,
    streaming: bool,
) -> anyhow::Result<()> {
    // Show minimal startup info (only if TTY)
    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("chatline conversation: {}", conversation_id);
        eprintln!("Type /help for commands.");
        eprintln!();
    }
    print_transcript(session, backend);

    let printer = spawn_printer(session);

    loop {
        if let Some(file) = &attachment {
            print!("[{}] ", file.name);
        }
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() && attachment.is_none() {
            continue;
        }

        // Handle slash commands
        if let Some(result) = commands::execute_command(input) {
            use commands::CommandResult;
            match result {
                CommandResult::New => match session.new_conversation().await {
                    Ok(id) => println!("Started conversation {}", id),
                    Err(e) => eprintln!("Error: {}", e),
                },
                CommandResult::List => {
                    if let Err(e) = list_conversations(session).await {
                        eprintln!("Error: {:#}", e);
                    }
                }
                CommandResult::Open(id) => match session.open(Some(&id)).await {
                    Ok(_) => print_transcript(session, backend),
                    Err(e) => eprintln!("Error: {}", e),
                },
                CommandResult::Delete(id) => match session.delete(&id).await {
                    Ok(()) => {
                        println!("Deleted conversation {}", id);
                        if session.conversation_id().is_none() {
                            println!("Use /new or /open <id> to continue.");
                        }
                    }
                    Err(e) => eprintln!("Error: {}", e),
                },
                CommandResult::Pin { id, pinned } => match session.set_pinned(&id, pinned).await {
                    Ok(true) => println!("Pinned {}", id),
                    Ok(false) => println!("Unpinned {}", id),
                    Err(e) => eprintln!("Error: {}", e),
                },
                CommandResult::Attach(path) => match load_attachment(&path).await {
                    Ok(file) => {
                        println!("Attached {} ({} bytes)", file.name, file.size);
                        attachment = Some(file);
                    }
                    Err(e) => eprintln!("Error: {:#}", e),
                },
                CommandResult::Detach => {
                    attachment = None;
                    println!("Attachment removed.");
                }
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::Exit => break,
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            continue;
        }

        match send(session, input, attachment.clone(), streaming).await {
            Ok(_) => attachment = None,
            Err(e) => eprintln!("Error: {:#}", e),
        }

        // Wait for events to finish
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        println!();
    }

    printer.abort();
    Ok(())
}
