#![forbid(unsafe_code)]

use clap::Parser;
use parley_common::{ClientFrame, ServerFrame};
use parleyc::backoff::ReconnectState;
use parleyc::config::{ClientConfig, Cli, Commands};
use parleyc::relay::relay_connection_manager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How long one-shot commands wait for the relay's answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing(cli: &Cli) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Link {
    outbox: mpsc::Sender<ClientFrame>,
    inbox: broadcast::Receiver<ServerFrame>,
    state: watch::Receiver<ReconnectState>,
    task: JoinHandle<anyhow::Result<()>>,
}

fn spawn_link(config: Arc<ClientConfig>) -> Link {
    let (outbox, outbox_rx) = mpsc::channel(64);
    let (inbox_tx, inbox) = broadcast::channel(256);
    let (state_tx, state) = watch::channel(ReconnectState::Disconnected);
    let task = tokio::spawn(relay_connection_manager(
        config, outbox_rx, inbox_tx, state_tx,
    ));
    Link {
        outbox,
        inbox,
        state,
        task,
    }
}

impl Link {
    /// Wait until the relay has accepted `authenticate`.
    async fn connected(mut self) -> anyhow::Result<Self> {
        loop {
            if *self.state.borrow_and_update() == ReconnectState::Connected {
                return Ok(self);
            }
            if self.state.changed().await.is_err() {
                break;
            }
        }
        // The manager has returned and dropped its state sender.
        match self.task.await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => Err(anyhow::anyhow!("relay link closed")),
            Err(e) => Err(anyhow::anyhow!("relay task failed: {e}")),
        }
    }

    async fn send(&self, frame: ClientFrame) -> anyhow::Result<()> {
        self.outbox
            .send(frame)
            .await
            .map_err(|_| anyhow::anyhow!("relay link is gone"))
    }

    /// Next inbound frame `wanted` accepts, or `None` on timeout.
    async fn next_matching(
        &mut self,
        within: Duration,
        wanted: impl Fn(&ServerFrame) -> bool,
    ) -> Option<ServerFrame> {
        tokio::time::timeout(within, async {
            loop {
                match self.inbox.recv().await {
                    Ok(frame) if wanted(&frame) => return Some(frame),
                    Ok(other) => debug!(?other, "ignoring frame"),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    async fn shutdown(self) -> anyhow::Result<()> {
        let Self { outbox, task, .. } = self;
        drop(outbox);
        match task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("relay task failed: {e}")),
        }
    }
}

fn print_frame(frame: &ServerFrame) {
    match frame.encode() {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "could not encode frame for output"),
    }
}

async fn run_listen(mut link: Link) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            frame = link.inbox.recv() => match frame {
                Ok(frame) => {
                    print_frame(&frame);
                    if let ServerFrame::Message { id: Some(id), .. } = &frame {
                        link.send(ClientFrame::ack(id.as_str())).await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "output fell behind, frames skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    link.shutdown().await
}

async fn run_send(link: Link, sender: &str, recipient: &str, content: &str) -> anyhow::Result<()> {
    let mut link = link.connected().await?;
    link.send(ClientFrame::message(sender, recipient, content))
        .await?;

    let reply = link
        .next_matching(REPLY_TIMEOUT, |f| {
            matches!(f, ServerFrame::MessageSent { .. } | ServerFrame::Error { .. })
        })
        .await;
    let accepted = match reply {
        Some(frame @ ServerFrame::MessageSent { .. }) => {
            print_frame(&frame);
            // An offline recipient is reported right after `message_sent`.
            if let Some(notice) = link
                .next_matching(Duration::from_millis(200), |f| {
                    matches!(f, ServerFrame::Error { .. })
                })
                .await
            {
                print_frame(&notice);
            }
            true
        }
        Some(frame) => {
            print_frame(&frame);
            false
        }
        None => false,
    };

    link.shutdown().await?;
    if !accepted {
        anyhow::bail!("relay did not accept the message");
    }
    Ok(())
}

async fn run_read(link: Link, wallet: &str, message_id: &str) -> anyhow::Result<()> {
    let mut link = link.connected().await?;
    link.send(ClientFrame::mark_read(message_id, wallet)).await?;
    // mark_read has no reply; a pong proves the relay processed it.
    link.send(ClientFrame::Ping).await?;

    let confirmed = link
        .next_matching(REPLY_TIMEOUT, |f| matches!(f, ServerFrame::Pong { .. }))
        .await
        .is_some();

    link.shutdown().await?;
    if !confirmed {
        anyhow::bail!("relay did not confirm mark_read");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = ClientConfig::from_cli(&cli).map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    let wallet = config.wallet.clone();
    let link = spawn_link(Arc::new(config));

    match &cli.command {
        Commands::Listen => run_listen(link).await,
        Commands::Send { recipient, content } => run_send(link, &wallet, recipient, content).await,
        Commands::Read { message_id } => run_read(link, &wallet, message_id).await,
    }
}
