//! Interactive terminal client for the assistant.
//! Run with: cargo run --bin scriptdesk-chat

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use scriptdesk_assistant::chat::{
    ChatError, ChatSession, ChatStatus, ClientConfig, ConversationView, HttpChatTransport,
    PageSource, Role, SendOutcome, SendRejected, materialize_history,
};
use scriptdesk_assistant::notes::NotesAutosave;
use scriptdesk_assistant::prefs::ClientPreferences;

const HELP: &str = "commands: /page N, /clear, /export PATH, /notes TEXT, /sound on|off, /quit";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(String),
    Page(u32),
    Clear,
    Export(PathBuf),
    Notes(String),
    Sound(bool),
    Quit,
    Empty,
    Invalid(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };
    let (name, arg) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(n, a)| (n, a.trim()));
    match name {
        "page" => arg
            .parse()
            .map_or_else(|_| Command::Invalid(format!("bad page: {arg}")), Command::Page),
        "clear" => Command::Clear,
        "export" if !arg.is_empty() => Command::Export(PathBuf::from(arg)),
        "notes" => Command::Notes(arg.to_string()),
        "sound" => match arg {
            "on" => Command::Sound(true),
            "off" => Command::Sound(false),
            _ => Command::Invalid("usage: /sound on|off".to_string()),
        },
        "quit" | "exit" => Command::Quit,
        _ => Command::Invalid(HELP.to_string()),
    }
}

fn render_page(view: &ConversationView) {
    let (total, pages) = view
        .totals
        .map_or((0, 1), |t| (t.total, t.total_pages.max(1)));
    println!("-- page {}/{pages} ({total} messages) --", view.page);
    for entry in &view.entries {
        let who = match entry.role() {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        let marker = if entry.is_pending() {
            " (pending)"
        } else {
            ""
        };
        println!("[{who}]{marker} {}", entry.content());
    }
}

/// Print partial text as it grows.
fn spawn_renderer(session: &ChatSession) {
    let mut views = session.subscribe();
    tokio::spawn(async move {
        let mut printed = 0;
        while views.changed().await.is_ok() {
            let partial = views.borrow_and_update().partial.clone();
            match partial {
                Some(text) if text.len() > printed => {
                    if printed == 0 {
                        print!("[assistant] ");
                    }
                    print!("{}", &text[printed..]);
                    let _ = std::io::stdout().flush();
                    printed = text.len();
                }
                Some(_) => {}
                None => {
                    if printed > 0 {
                        println!();
                    }
                    printed = 0;
                }
            }
        }
    });
}

/// Ring the terminal bell on cue edges.
fn spawn_cues(session: &ChatSession, sound: Arc<AtomicBool>) {
    let mut cues = session.cues();
    tokio::spawn(async move {
        while let Ok(_cue) = cues.recv().await {
            if sound.load(Ordering::Relaxed) {
                print!("\x07");
                let _ = std::io::stdout().flush();
            }
        }
    });
}

/// Ctrl-C aborts the reply in flight instead of exiting.
fn spawn_cancel(session: &ChatSession) {
    let session = session.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            session.cancel();
        }
    });
}

async fn send(session: &ChatSession, text: String) {
    session.set_input(text).await;
    match session.send().await {
        Ok(SendOutcome::Completed) => {}
        Ok(SendOutcome::Rejected(SendRejected::Busy)) => println!("(still answering)"),
        Ok(SendOutcome::Rejected(SendRejected::EmptyInput)) => {}
        Ok(SendOutcome::Cancelled) => println!("(cancelled)"),
        Ok(SendOutcome::Abandoned) => println!("(discarded)"),
        Err(err @ ChatError::IdleTimeout(_)) => println!("(timed out: {err})"),
        Err(err) => println!("(failed: {err})"),
    }
    if let ChatStatus::Error(message) = session.view().status {
        warn!(%message, "last exchange failed");
    }
}

/// Write the full transcript to `path` as JSON. Returns the message count.
async fn export_history(source: &dyn PageSource, path: &Path) -> Result<usize> {
    let messages = materialize_history(source)
        .await
        .context("history export failed")?;
    let json = serde_json::to_string_pretty(&messages)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(messages.len())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env();
    let transport =
        Arc::new(HttpChatTransport::new(&config).context("invalid client configuration")?);
    let session = ChatSession::new(transport.clone(), &config);
    let mut prefs = ClientPreferences::load(&config.preferences_path)
        .with_context(|| format!("failed to read {}", config.preferences_path.display()))?;
    let sound = Arc::new(AtomicBool::new(prefs.sound_enabled));
    let notes = NotesAutosave::spawn(transport.clone(), config.notes_quiet_window);

    spawn_renderer(&session);
    spawn_cues(&session, sound.clone());
    spawn_cancel(&session);

    match session.refresh_page(1).await {
        Ok(_) => render_page(&session.view()),
        Err(err) => warn!(%err, "could not load history"),
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Command::Empty => {}
            Command::Quit => break,
            Command::Send(text) => send(&session, text).await,
            Command::Page(page) => match session.select_page(page).await {
                Ok(_) => render_page(&session.view()),
                Err(err) => println!("(page fetch failed: {err})"),
            },
            Command::Clear => match session.clear_history().await {
                Ok(()) => render_page(&session.view()),
                Err(err) => println!("(clear failed: {err})"),
            },
            Command::Export(path) => match export_history(transport.as_ref(), &path).await {
                Ok(count) => println!("(exported {count} messages to {})", path.display()),
                Err(err) => println!("(export failed: {err:#})"),
            },
            Command::Notes(text) => {
                if !notes.edit(text) {
                    println!("(notes autosave stopped)");
                }
            }
            Command::Sound(enabled) => {
                prefs.sound_enabled = enabled;
                sound.store(enabled, Ordering::Relaxed);
                if let Err(err) = prefs.save(&config.preferences_path) {
                    println!("(could not save preferences: {err})");
                }
            }
            Command::Invalid(message) => println!("{message}"),
        }
    }

    notes.shutdown().await;
    Ok(())
}
