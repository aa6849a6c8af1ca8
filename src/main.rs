use std::path::PathBuf;

use anyhow::Result;
use chatwire::config::ClientConfig;
use chatwire::encoder::FileSource;
use chatwire::session::{Session, SessionClient, SessionHandle};
use chatwire::tools::{format_tool_args, format_tool_result};
use chatwire::transcript::{ChatEvent, EventBody};
use chatwire::transport::ConnectionStatus;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "chatwire", about = "Terminal client for the assistant chat service.")]
struct Cli {
    /// WebSocket endpoint (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Access token used by `/auth` without an argument
    #[arg(long)]
    token: Option<String>,

    /// Explicit config file instead of the user/project layers
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "chatwire=debug" } else { "chatwire=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load(),
    };
    if let Some(url) = cli.url {
        config.websocket.url = url;
    }

    info!(url = %config.websocket.url, "chatwire starting");
    let handle = SessionClient::spawn(config.clone());
    let printer = tokio::spawn(print_updates(handle.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !dispatch(line, &handle, &config, cli.token.as_deref()).await? {
            break;
        }
    }

    handle.shutdown().await?;
    printer.abort();
    Ok(())
}

/// Run one input line. Returns false on `/quit`.
async fn dispatch(
    line: &str,
    handle: &SessionHandle,
    config: &ClientConfig,
    token: Option<&str>,
) -> Result<bool> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "/quit" | "/exit" => return Ok(false),
        "/auth" => {
            let token = Some(rest)
                .filter(|t| !t.is_empty())
                .or(token)
                .map(str::to_string);
            match config.credentials(token) {
                Some(credentials) => handle.authenticate(credentials).await?,
                None => eprintln!("usage: /auth TOKEN (or pass --token / set CHATWIRE_ACCESS_TOKEN)"),
            }
        }
        "/model" if !rest.is_empty() => handle.set_model(rest).await?,
        "/upload" if !rest.is_empty() => {
            let files = rest.split_whitespace().map(FileSource::new).collect();
            handle.upload_files(files).await?;
        }
        "/clear" => handle.clear_conversation().await?,
        "/tools" => print_tools(&handle.snapshot()),
        _ if command.starts_with('/') => {
            eprintln!("commands: /auth [TOKEN], /model NAME, /upload PATH..., /clear, /tools, /quit");
        }
        _ => {
            let (words, files): (Vec<&str>, Vec<&str>) =
                line.split_whitespace().partition(|w| !w.starts_with('@'));
            let files = files
                .into_iter()
                .map(|f| FileSource::new(&f[1..]))
                .collect();
            handle.send_query(words.join(" "), files).await?;
        }
    }
    Ok(true)
}

async fn print_updates(mut rx: watch::Receiver<Session>) {
    let mut status = ConnectionStatus::default();
    let mut last_printed: Option<String> = None;

    loop {
        {
            let session = rx.borrow_and_update();
            if session.connection_status != status {
                status = session.connection_status;
                eprintln!("[{status}]");
            }

            for event in unprinted(session.transcript.events(), last_printed.as_deref()) {
                println!("{}", render(event));
                last_printed = Some(event.id.clone());
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Finalized entries after `last_printed`. When that entry is gone (the
/// conversation was cleared) everything is new. Provisional replies are
/// held back until they stop changing.
fn unprinted<'a>(events: &'a [ChatEvent], last_printed: Option<&str>) -> &'a [ChatEvent] {
    let start = last_printed
        .and_then(|id| events.iter().position(|e| e.id == id))
        .map_or(0, |i| i + 1);
    let rest = &events[start..];
    let ready = rest
        .iter()
        .position(ChatEvent::is_provisional)
        .unwrap_or(rest.len());
    &rest[..ready]
}

fn render(event: &ChatEvent) -> String {
    match &event.body {
        EventBody::User { .. } => format!("you> {}", event.content),
        EventBody::Assistant { .. } if event.is_placeholder() => "assistant> (processing...)".into(),
        EventBody::Assistant { .. } => format!("assistant> {}", event.content),
        EventBody::ToolCall { arguments, .. } => {
            format!("tool> {}\n{}", event.content, format_tool_args(arguments))
        }
        EventBody::ToolResult { .. } => format!("tool> {}", event.content),
        EventBody::Thinking => "assistant> thinking...".into(),
        EventBody::Error => format!("error> {}", event.content),
        EventBody::FilesUploaded => format!("files> {}", event.content),
    }
}

fn print_tools(session: &Session) {
    let tools = session.tool_executions();
    if tools.executions.is_empty() && tools.unmatched.is_empty() {
        println!("no tool executions");
    }
    for exec in &tools.executions {
        let state = if exec.completed { "done" } else { "running" };
        println!("[{state}] {} ({})", exec.tool_name(), exec.invocation_id);
        if let Some(EventBody::ToolResult { result, .. }) = exec.result.map(|r| &r.body) {
            println!("{}", format_tool_result(result));
        }
    }
    for orphan in &tools.unmatched {
        println!("[unmatched] {}", orphan.content);
    }
}
