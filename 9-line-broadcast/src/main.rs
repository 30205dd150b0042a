use anyhow::{Context, Result};
use clap::Parser;
use tokio::{io::AsyncWriteExt, net::TcpListener, sync::broadcast};
use tracing::{info, warn};

use line_broadcast::{
    cli::{Cli, Command, ServerArgs},
    client,
    event::ServerEvent,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => run_server(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = Server::new(listener, args.config());
    let addr = server.local_addr()?;
    info!("server listening on {}", addr);

    let transcript = tokio::spawn(print_transcript(server.subscribe_events()));
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    let _ = transcript.await;

    Ok(())
}

/// Prints server events on stdout, one per line, until the server is gone.
async fn print_transcript(mut events: broadcast::Receiver<ServerEvent>) {
    let mut stdout = tokio::io::stdout();
    loop {
        match events.recv().await {
            Ok(event) => {
                let line = format!("{event}\n");
                if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "transcript fell behind; events skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
