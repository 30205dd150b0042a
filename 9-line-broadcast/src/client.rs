use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    wire::{LineReader, line_reader, read_line, write_line},
};

/// One participant's connection to the server.
///
/// `submit` sends a raw line; `next_display` yields everything the server
/// broadcasts, including this participant's own lines echoed back.
pub struct ClientSession {
    username: String,
    lines: LineReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ClientSession {
    /// Connects and announces `username` as the first line.
    pub async fn connect(server: SocketAddr, username: &str) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("failed to connect to {server}"))?;
        info!("connected to {}", server);

        let (reader, mut writer) = stream.into_split();
        write_line(&mut writer, username)
            .await
            .context("failed to send username")?;

        Ok(Self {
            username: username.to_string(),
            lines: line_reader(reader),
            writer,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn submit(&mut self, line: &str) -> io::Result<()> {
        write_line(&mut self.writer, line).await
    }

    /// Sends `text` the way the chat window does: prefixed with our name.
    pub async fn say(&mut self, text: &str) -> io::Result<()> {
        let line = attributed(&self.username, text);
        self.submit(&line).await
    }

    /// Next broadcast line, or `None` once the server closes the connection.
    pub async fn next_display(&mut self) -> io::Result<Option<String>> {
        read_line(&mut self.lines).await
    }

    pub async fn shutdown(&mut self) {
        shutdown_connection(&mut self.writer).await;
    }
}

fn attributed(username: &str, text: &str) -> String {
    format!("{username}: {text}")
}

/// Terminal front end: stdin lines go out, broadcast lines come in.
pub async fn run(args: ClientArgs) -> Result<()> {
    let session = ClientSession::connect(args.server, &args.username).await?;
    write_stdout(&format!("*** connected to {} as {}", args.server, args.username)).await?;

    let ClientSession {
        username,
        mut lines,
        mut writer,
    } = session;
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            server_line = read_line(&mut lines) => {
                if !handle_server_line(server_line).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, &username, &mut writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }

    shutdown_connection(&mut writer).await;
    Ok(())
}

async fn handle_server_line(line: io::Result<Option<String>>) -> Result<bool> {
    match line? {
        Some(line) => {
            write_stdout(&line).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    username: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.trim().eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    write_line(writer, &attributed(username, text)).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
