//! Relay Demo
//!
//! Drives a Herald runtime from stdin, standing in for both the push transport
//! and the UI layer. Each line is one command:
//!
//! ```text
//! {"message":"hi"}          push a raw payload
//! attach                    attach a foreground listener (events print to stdout)
//! detach                    detach it again
//! click {"message":"hi"}    app launched from a notification tap
//! register                  register the background entry point and handler
//! state                     show context state, queue length and listener
//! quit                      stop the runtime
//! ```
//!
//! Payloads pushed before `register` are queued and flushed to the background
//! handler once it reports ready. The store is durable, so queued payloads and
//! registered handles survive a restart of the demo.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package relay-demo -- --temporary
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use herald::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "relay-demo", about = "Feed push payloads through Herald from stdin")]
struct Args {
    /// Configuration file (defaults to herald.toml lookup)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile
    #[arg(short, long)]
    profile: Option<String>,

    /// Use a throwaway store instead of the configured database
    #[arg(long)]
    temporary: bool,

    /// Handle of the background entry point
    #[arg(long, default_value_t = 1)]
    entry: i64,

    /// Handle of the background notification handler
    #[arg(long, default_value_t = 2)]
    handler: i64,
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug)]
enum Command {
    Push(String),
    Attach,
    Detach,
    Click(String),
    Register,
    State,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.starts_with('{') {
            return Some(Self::Push(line.to_string()));
        }
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        match word {
            "attach" => Some(Self::Attach),
            "detach" => Some(Self::Detach),
            "click" => Some(Self::Click(rest.trim().to_string())),
            "register" => Some(Self::Register),
            "state" => Some(Self::State),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// The demo's stand-in UI: at most one live sink.
struct Ui {
    sink: Option<(ListenerToken, Arc<dyn ListenerSink>)>,
}

impl Ui {
    async fn attach(&mut self, bridge: &PluginBridge) {
        let (sink, mut events) = ChannelSink::pair();
        let token = bridge.on_listener_attached(sink.clone()).await;

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                println!("listener <- {event}");
            }
        });

        self.sink = Some((token, sink));
        println!("attached {token}");
    }

    fn detach(&mut self, bridge: &PluginBridge) {
        match self.sink.take() {
            Some((token, _sink)) => {
                bridge.on_listener_detached(token);
                println!("detached {token}");
            }
            None => println!("no listener attached"),
        }
    }
}

async fn repl(bridge: Arc<PluginBridge>, handles: CallbackHandles) {
    let mut ui = Ui { sink: None };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(command) = Command::parse(&line) else {
            println!("unknown command: {line}");
            continue;
        };

        match command {
            Command::Push(json) => {
                let route = bridge.on_raw_push(json.as_bytes()).await;
                println!("routed: {route}");
            }
            Command::Attach => ui.attach(&bridge).await,
            Command::Detach => ui.detach(&bridge),
            Command::Click(json) => match bridge.on_launched_from_click_raw(&json).await {
                Some(route) => println!("click routed: {route}"),
                None => println!("click ignored"),
            },
            Command::Register => match bridge.register_background_handlers(handles) {
                Ok(()) => println!("background handlers registered"),
                Err(e) => println!("registration failed: {e}"),
            },
            Command::State => {
                let router = bridge.router();
                let pending = router
                    .queue()
                    .len()
                    .map_or_else(|e| format!("unknown ({e})"), |n| n.to_string());
                println!(
                    "context: {}, pending: {}, listener: {}",
                    router.state(),
                    pending,
                    router.listeners().is_attached()
                );
            }
            Command::Quit => break,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = HeraldRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    if args.temporary {
        builder = builder.store(SledStore::temporary()?.shared());
    }

    let runtime = builder
        .entry_point(args.entry, |ctx: BackgroundContext| async move {
            info!(handles = ?ctx.handles(), "Background context booting");
            ctx.ready();
        })
        .notification_handler(args.handler, |payload: NotificationPayload| async move {
            info!(%payload, clicked = payload.is_clicked(), "Background handler got notification");
            anyhow::Ok(())
        })
        .build()?;

    let handles = CallbackHandles::new(args.entry, args.handler);
    runtime.run_until(repl(runtime.bridge(), handles)).await?;

    Ok(())
}
