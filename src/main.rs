use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use ollama_chat::chat::{
    frame_event, run_buffered_turn, run_streaming_turn, Conversation, TurnOutcome,
};
use ollama_chat::inference::config::expand_tilde;
use ollama_chat::inference::{
    resolve_config, ClassifiedEvent, Image, InferenceClient, InferenceError,
};

#[derive(Parser)]
#[command(name = "ollama-chat", version, about = "Chat with a local Ollama model")]
struct Cli {
    /// Path to an ollama-chat.yaml config file
    #[arg(long, env = "OLLAMA_CHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Model to chat with
    #[arg(long)]
    model: Option<String>,

    /// Ollama server URL, e.g. http://localhost:11434
    #[arg(long)]
    host: Option<String>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Print streamed replies as `data: <json>` event frames
    #[arg(long)]
    events: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

/// A parsed REPL input line.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Exit,
    Reset,
    Model(&'a str),
    Models,
    Image(&'a str),
    Help,
    Unknown(&'a str),
    Say(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line);
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name {
        "exit" | "quit" => Command::Exit,
        "reset" => Command::Reset,
        "models" => Command::Models,
        "model" if !arg.is_empty() => Command::Model(arg),
        "image" if !arg.is_empty() => Command::Image(arg),
        "help" => Command::Help,
        _ => Command::Unknown(line),
    }
}

fn print_help() {
    println!("/exit or /quit     leave");
    println!("/reset             clear the conversation");
    println!("/model NAME        switch model");
    println!("/models            list installed models");
    println!("/image PATH        attach an image to the next message");
    println!("Ctrl-C while a reply streams cancels it. Empty lines are ignored.");
}

fn print_troubleshooting(model: &str, host: &str) {
    println!("Things to check:");
    println!("- Is Ollama running? (`ollama serve`)");
    println!("- Is the model name right? (current: {model})");
    println!("- Is the host URL right? (current: {host})");
    println!("- If the model is not installed, run `ollama pull {model}`");
}

/// Hints only help when the server could not be reached or rejected the call.
fn wants_troubleshooting(err: &InferenceError) -> bool {
    err.is_transport() || err.status().is_some()
}

async fn load_image(path: &Path) -> anyhow::Result<Image> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let mime = Image::mime_from_extension(ext)
        .with_context(|| format!("unsupported image type: {}", path.display()))?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Image::from_bytes(&bytes, mime)?)
}

/// Print events as they arrive, labelling the switch between thinking and
/// answer text.
struct EventPrinter {
    in_thinking: Option<bool>,
    framed: bool,
}

impl EventPrinter {
    fn new(framed: bool) -> Self {
        Self {
            in_thinking: None,
            framed,
        }
    }

    fn print(&mut self, event: &ClassifiedEvent) {
        let mut out = std::io::stdout().lock();
        if self.framed {
            let _ = write!(out, "{}", frame_event(event));
            let _ = out.flush();
            return;
        }
        match event {
            ClassifiedEvent::Thinking { content } => {
                if self.in_thinking != Some(true) {
                    let _ = write!(out, "\n[thinking] ");
                    self.in_thinking = Some(true);
                }
                let _ = write!(out, "{content}");
            }
            ClassifiedEvent::Response { content } => {
                if self.in_thinking != Some(false) {
                    let _ = write!(out, "\nAI> ");
                    self.in_thinking = Some(false);
                }
                let _ = write!(out, "{content}");
            }
            ClassifiedEvent::Done => {
                let _ = writeln!(out);
            }
            ClassifiedEvent::Error { .. } => {}
        }
        let _ = out.flush();
    }
}

async fn run_turn(
    client: &mut InferenceClient,
    conversation: &mut Conversation,
    stream: bool,
    framed: bool,
) {
    if !stream {
        match run_buffered_turn(client, conversation).await {
            Ok(reply) => {
                if let Some(thinking) = &reply.thinking {
                    println!("[thinking] {thinking}");
                }
                println!("AI> {}", reply.content);
            }
            Err(e) => {
                println!("Error: {e}");
                if wants_troubleshooting(&e) {
                    print_troubleshooting(client.model(), client.host());
                }
            }
        }
        return;
    }

    let token = CancellationToken::new();
    let watcher = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        })
    };

    let mut printer = EventPrinter::new(framed);
    let outcome = run_streaming_turn(client, conversation, token, |e| printer.print(e)).await;
    watcher.abort();

    match outcome {
        TurnOutcome::Completed(_) => {}
        TurnOutcome::Failed(message) if framed => tracing::warn!(error = %message, "streamed turn failed"),
        TurnOutcome::Failed(message) => {
            println!("\nError: {message}");
            print_troubleshooting(client.model(), client.host());
        }
        TurnOutcome::Cancelled => println!("\n(cancelled)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = resolve_config(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(system) = cli.system {
        config.system_prompt = Some(system);
    }
    if let Some(secs) = cli.timeout {
        config.request_timeout_secs = secs;
        config.stream_timeout_secs = secs;
    }
    if cli.no_stream {
        config.stream = false;
    }
    let config = config.validate().context("invalid configuration")?;

    ollama_chat::init_tracing(cli.debug, config.log_file.as_deref())
        .context("failed to initialize logging")?;

    let stream = config.stream;
    let framed = cli.events;
    let mut conversation = Conversation::new(config.system_prompt.as_deref());
    let mut client = InferenceClient::new(config)?;

    if let Err(e) = client.ensure_available_model().await {
        tracing::warn!(error = %e, "model check failed");
    }

    println!("Chatting with {} at {}.", client.model(), client.host());
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_images: Vec<Image> = Vec::new();

    loop {
        print!("You> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!("\nBye.");
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Command::Exit => {
                println!("Bye.");
                return Ok(());
            }
            Command::Reset => {
                conversation.clear();
                pending_images.clear();
                println!("Conversation cleared.");
            }
            Command::Model(name) => match client.set_model(name) {
                Ok(()) => println!("Model: {}", client.model()),
                Err(e) => println!("Error: {e}"),
            },
            Command::Models => {
                let models = client.list_models().await;
                if models.is_empty() {
                    println!("No models found.");
                    print_troubleshooting(client.model(), client.host());
                }
                for name in models {
                    let marker = if name == client.model() { "*" } else { " " };
                    println!("{marker} {name}");
                }
            }
            Command::Image(path) => match load_image(Path::new(&expand_tilde(path))).await {
                Ok(image) => {
                    pending_images.push(image);
                    println!("Attached {path} ({} pending).", pending_images.len());
                }
                Err(e) => println!("Error: {e:#}"),
            },
            Command::Help => print_help(),
            Command::Unknown(input) => println!("Unknown command: {input} (try /help)"),
            Command::Say(text) => {
                conversation.add_user(text, std::mem::take(&mut pending_images));
                run_turn(&mut client, &mut conversation, stream, framed).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("/quit"), Command::Exit);
        assert_eq!(parse_command("/exit"), Command::Exit);
        assert_eq!(parse_command("/model  qwen3:8b "), Command::Model("qwen3:8b"));
        assert_eq!(parse_command("/image ~/cat.png"), Command::Image("~/cat.png"));
        assert_eq!(parse_command("/model"), Command::Unknown("/model"));
        assert_eq!(parse_command("/models"), Command::Models);
        assert_eq!(parse_command("hello /there"), Command::Say("hello /there"));
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from(["ollama-chat", "--model", "llava", "--no-stream", "--timeout", "30"]);
        assert_eq!(cli.model.as_deref(), Some("llava"));
        assert!(cli.no_stream);
        assert_eq!(cli.timeout, Some(30));
        assert!(!cli.debug);
        assert!(!cli.events);
    }

    #[test]
    fn test_troubleshooting_only_for_server_failures() {
        assert!(wants_troubleshooting(&InferenceError::Timeout { duration_secs: 60 }));
        assert!(wants_troubleshooting(&InferenceError::from_http_body(404, "u", "")));
        assert!(!wants_troubleshooting(&InferenceError::StreamError {
            reason: "bad json".into()
        }));
    }
}
