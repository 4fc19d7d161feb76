//! # parley-chat
//!
//! Terminal client for the Parley relay.
//!
//! ```bash
//! parley-chat alice
//! parley-chat bob ws://relay.example:8000/ws
//! ```
//!
//! Type to talk to everyone, `/msg <user> <text>` to whisper, `/who` to
//! list who is online and `/quit` to leave.

mod input;
mod view;

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::Parser;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use input::Command;
use parley_protocol::{codec, Frame, PROTOCOL_VERSION};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use view::RosterView;

const DEFAULT_URL: &str = "ws://127.0.0.1:8000/ws";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<Socket, Message>;
type Reader = SplitStream<Socket>;

/// Parley chat - terminal client for the Parley relay
#[derive(Debug, Parser)]
#[command(name = "parley-chat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Display name to join with
    name: String,

    /// Relay WebSocket endpoint
    #[arg(default_value = DEFAULT_URL)]
    url: String,
}

async fn send(writer: &mut Writer, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    writer
        .send(Message::Binary(data.to_vec()))
        .await
        .context("Failed to send to relay")
}

/// Read until at least one complete frame is buffered.
///
/// Returns `None` once the relay closes the connection.
async fn next_frames(reader: &mut Reader, buf: &mut BytesMut) -> Result<Option<Vec<Frame>>> {
    loop {
        let mut frames = Vec::new();
        while let Some(frame) = codec::decode_from(buf)? {
            frames.push(frame);
        }
        if !frames.is_empty() {
            return Ok(Some(frames));
        }

        match reader.next().await {
            Some(Ok(Message::Binary(data))) => buf.extend_from_slice(&data),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e).context("Connection to relay failed"),
        }
    }
}

/// Print a pushed frame.
fn show(frame: Frame, roster: &mut RosterView, own_name: &str) {
    match frame {
        Frame::Message { text } => println!("{text}"),
        Frame::Roster { revision, names } => {
            if roster.apply(revision, names) {
                println!("{}", roster.render(own_name));
            }
        }
        Frame::Error { code, message } => eprintln!("relay error {code}: {message}"),
        Frame::Pong { .. } => {}
        other => debug!(frame_type = ?other.frame_type(), "Ignoring frame"),
    }
}

/// Send `connect` and wait for the outcome. Returns the heartbeat interval.
async fn join(
    writer: &mut Writer,
    reader: &mut Reader,
    buf: &mut BytesMut,
    roster: &mut RosterView,
    name: &str,
) -> Result<Option<u32>> {
    send(writer, &Frame::connect(1, PROTOCOL_VERSION.major, name)).await?;

    while let Some(frames) = next_frames(reader, buf).await? {
        for frame in frames {
            match frame {
                Frame::ConnectResult {
                    accepted: true,
                    heartbeat,
                    ..
                } => return Ok(Some(heartbeat)),
                Frame::ConnectResult { reason, .. } => {
                    if let Some(reason) = reason {
                        eprintln!("{reason}");
                    }
                    return Ok(None);
                }
                // The first roster can arrive before the result.
                other => show(other, roster, name),
            }
        }
    }

    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let (socket, _) = match connect_async(args.url.as_str()).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!(url = %args.url, error = %e, "Connect failed");
            println!("Failed to connect.");
            return Ok(());
        }
    };
    let (mut writer, mut reader) = socket.split();
    let mut buf = BytesMut::with_capacity(4096);
    let mut roster = RosterView::default();

    let Some(heartbeat) = join(&mut writer, &mut reader, &mut buf, &mut roster, &args.name).await?
    else {
        println!("Failed to connect.");
        return Ok(());
    };
    println!("Connected to chat.");
    println!("{}", roster.render(&args.name));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(u64::from(heartbeat.max(1000))));
    ticker.tick().await;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    send(&mut writer, &Frame::Disconnect).await?;
                    break;
                };

                match input::parse(&line, &args.name) {
                    Command::Group(body) => send(&mut writer, &Frame::send_group(body)).await?,
                    Command::Private { recipient, body } => {
                        send(&mut writer, &Frame::send_private(&recipient, &body)).await?;
                        println!("{}", view::private_echo(&chrono::Local::now(), &recipient, &body));
                    }
                    Command::Who => println!("{}", roster.render(&args.name)),
                    Command::Help => println!("{}", input::HELP),
                    Command::Quit => {
                        send(&mut writer, &Frame::Disconnect).await?;
                        break;
                    }
                    Command::Empty => {}
                    Command::Invalid(why) => eprintln!("{why}"),
                }
            }

            frames = next_frames(&mut reader, &mut buf) => {
                let Some(frames) = frames? else {
                    println!("Disconnected from relay.");
                    return Ok(());
                };
                for frame in frames {
                    show(frame, &mut roster, &args.name);
                }
            }

            _ = ticker.tick() => send(&mut writer, &Frame::ping()).await?,
        }
    }

    writer.close().await.ok();
    Ok(())
}
