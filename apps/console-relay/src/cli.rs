use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use relay_proto::{split_page_identity, RelayMessage, VIEWER_PATH_SUFFIX};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error};

use crate::console::console_line;
use crate::relay::ResultDelivery;

type ViewerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "console-relay", version)]
#[command(about = "Relay browser console output to remote viewers and run code on connected pages")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server options, used when no subcommand is given
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay server (default)
    Serve(ServeArgs),

    /// Attach as a viewer and print relayed logs until the relay closes
    Tail(ViewerArgs),

    /// Print the pages currently connected to the relay
    Pages(ViewerArgs),

    /// Run code on a connected page and print its result
    Exec {
        #[command(flatten)]
        viewer: ViewerArgs,

        /// Directory identity of the target page (`tag@url`, as listed by `pages`)
        #[arg(short, long)]
        target: String,

        /// Code to evaluate; it runs as the body of an async function
        code: String,

        /// Seconds to wait for the page to answer
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the HTTP/WebSocket listener to
    #[arg(long, env = "CONSOLE_RELAY_LISTEN_ADDR", default_value = "127.0.0.1:5175")]
    pub listen_addr: String,

    /// Path sockets connect under; `<prefix>/viewer` attaches a viewer
    #[arg(long, env = "CONSOLE_RELAY_PATH_PREFIX", default_value = "/ws-logger")]
    pub path_prefix: String,

    /// Number of recent log records replayed to newly attached viewers
    #[arg(long, env = "CONSOLE_RELAY_BUFFER_SIZE", default_value_t = relay_proto::MAX_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Who receives execution results
    #[arg(long, env = "CONSOLE_RELAY_RESULT_DELIVERY", value_enum, default_value_t = ResultDelivery::Broadcast)]
    pub result_delivery: ResultDelivery,

    /// Hosted viewer UI to advertise at startup
    #[arg(long, env = "CONSOLE_RELAY_VIEWER_URL")]
    pub viewer_url: Option<String>,

    /// Seconds to let close frames flush on shutdown
    #[arg(long, env = "CONSOLE_RELAY_SHUTDOWN_GRACE_SECS", default_value_t = 1)]
    pub shutdown_grace_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ViewerArgs {
    /// Relay socket URL, without the `/viewer` suffix
    #[arg(short, long, env = "CONSOLE_RELAY_URL", default_value = "ws://127.0.0.1:5175/ws-logger")]
    pub url: String,
}

impl ViewerArgs {
    fn viewer_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        if base.ends_with(VIEWER_PATH_SUFFIX) {
            base.to_string()
        } else {
            format!("{base}{VIEWER_PATH_SUFFIX}")
        }
    }
}

async fn connect_viewer(args: &ViewerArgs) -> Result<ViewerSocket> {
    let url = args.viewer_url();
    debug!("connecting to {url}");
    match timeout(CONNECT_TIMEOUT, connect_async(&url)).await {
        Ok(Ok((socket, _))) => Ok(socket),
        Ok(Err(e)) => {
            error!("failed to connect to {url}: {e}");
            Err(anyhow!("connection failed: {e}"))
        }
        Err(_) => Err(anyhow!("connection timeout - is the relay running at {url}?")),
    }
}

/// Reads the next relay message, skipping control frames. `None` once the socket closes.
async fn next_message(socket: &mut ViewerSocket) -> Result<Option<RelayMessage>> {
    while let Some(frame) = socket.next().await {
        match frame.context("websocket receive failed")? {
            Message::Text(text) => match serde_json::from_str::<RelayMessage>(&text) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => debug!("skipping unrecognized frame: {e}"),
            },
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

fn print_record(record: &relay_proto::LogRecord) {
    let (tag, url) = split_page_identity(&record.url).unwrap_or(("", record.url.as_str()));
    println!("{}", console_line(record, tag, url));
}

pub async fn run_tail(args: ViewerArgs) -> Result<()> {
    let mut socket = connect_viewer(&args).await?;
    while let Some(message) = next_message(&mut socket).await? {
        match message {
            RelayMessage::Log(record) => print_record(&record),
            RelayMessage::Pages { pages } => {
                println!("-- pages ({}): {}", pages.len(), pages.join(", "));
            }
            RelayMessage::Result(result) => match result.error {
                Some(error) => println!("<- [{}] error: {error}", result.url),
                None => println!("<- [{}] {}", result.url, result.result.unwrap_or_default()),
            },
            RelayMessage::Execute { .. } => {}
        }
    }
    println!("-- relay closed the connection");
    Ok(())
}

pub async fn run_pages(args: ViewerArgs) -> Result<()> {
    let mut socket = connect_viewer(&args).await?;
    let pages = timeout(CONNECT_TIMEOUT, async {
        while let Some(message) = next_message(&mut socket).await? {
            if let RelayMessage::Pages { pages } = message {
                return Ok::<_, anyhow::Error>(pages);
            }
        }
        bail!("relay closed before sending the page list")
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for the page list"))??;

    if pages.is_empty() {
        println!("no pages connected");
    }
    for page in pages {
        println!("{page}");
    }
    let _ = socket.send(Message::Close(None)).await;
    Ok(())
}

/// Sends one execute request and prints the first result that comes back.
///
/// With broadcast delivery the first result may belong to another viewer's
/// request if several are in flight at once.
pub async fn run_exec(args: ViewerArgs, target: String, code: String, wait: Duration) -> Result<()> {
    let mut socket = connect_viewer(&args).await?;
    let request = serde_json::json!({
        "type": "execute",
        "code": code,
        "targetUrl": target,
    });
    socket.send(Message::Text(request.to_string().into())).await?;

    let result = timeout(wait, async {
        while let Some(message) = next_message(&mut socket).await? {
            if let RelayMessage::Result(result) = message {
                return Ok::<_, anyhow::Error>(result);
            }
        }
        bail!("relay closed before the page answered")
    })
    .await
    .map_err(|_| anyhow!("no result from {target} after {}s", wait.as_secs()))??;

    let _ = socket.send(Message::Close(None)).await;
    match result.error {
        Some(error) => bail!("remote execution failed: {error}"),
        None => {
            println!("{}", result.result.unwrap_or_default());
            Ok(())
        }
    }
}
