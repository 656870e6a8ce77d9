use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::Result;
use tokio::{
    net::TcpStream,
    select,
    sync::{mpsc, watch},
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    config::{BackoffConfig, ClientConfig},
    connection::{CloseSignal, Closer, Connection, TcpReader, TcpWriter, close_pair},
    error::TransportError,
    framer::Message,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Things a session reports while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectAttempt { attempt: u64 },
    Connected { peer: SocketAddr, attempts: u64 },
    MessageSent { bytes: usize },
    MessageReceived(Message),
    Disconnected,
}

/// Keeps one connection to the server alive, forever.
///
/// Each connection runs a send loop and a receive loop side by side. When
/// either hits a transport failure both stop, the connection is dropped and
/// the session starts connecting again.
pub struct ClientSession {
    config: ClientConfig,
    state: watch::Sender<SessionState>,
    events: EventSink,
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            state,
            events: EventSink(None),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = EventSink(Some(events));
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            self.set_state(SessionState::Connecting);
            let connection = select! {
                _ = &mut shutdown => break,
                connection = self.connect_with_retry() => connection,
            };

            self.set_state(SessionState::Connected);
            select! {
                _ = &mut shutdown => break,
                _ = self.run_connection(connection) => {}
            }

            self.set_state(SessionState::Failed);
            self.events.emit(SessionEvent::Disconnected);
            info!(server = %self.config.server, "connection lost, reconnecting");
            self.set_state(SessionState::Disconnected);
        }

        self.set_state(SessionState::Disconnected);
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    async fn connect_with_retry(&self) -> Connection {
        let mut backoff = Backoff::new(self.config.backoff);
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.events.emit(SessionEvent::ConnectAttempt { attempt: attempts });

            let connected = TcpStream::connect(self.config.server)
                .await
                .and_then(|stream| Connection::new(stream, &self.config.framing));
            match connected {
                Ok(connection) => {
                    let peer = connection.peer_addr();
                    info!(%peer, attempts, "connected");
                    self.events.emit(SessionEvent::Connected { peer, attempts });
                    return connection;
                }
                Err(error) => {
                    debug!(attempt = attempts, ?error, "connection attempt failed");
                    backoff.wait().await;
                }
            }
        }
    }

    /// Returns once both loops have stopped.
    async fn run_connection(&self, connection: Connection) {
        let (reader, writer) = connection.into_split();
        let (closer, signal) = close_pair();

        tokio::join!(
            send_loop(
                writer,
                self.config.outgoing_text(),
                self.config.send_interval,
                signal.clone(),
                &closer,
                &self.events,
            ),
            receive_loop(reader, signal, &closer, &self.events),
        );
    }
}

async fn send_loop(
    mut writer: TcpWriter,
    text: String,
    interval: Duration,
    mut signal: CloseSignal,
    closer: &Closer,
    events: &EventSink,
) {
    writer.build_message(&text);

    let outcome = loop {
        select! {
            _ = signal.closed() => break Ok(()),
            _ = sleep(interval) => {}
        }
        match writer.send_outgoing().await {
            Ok(bytes) => {
                debug!(bytes, "message sent");
                events.emit(SessionEvent::MessageSent { bytes });
            }
            Err(error) => break Err(error),
        }
    };

    log_loop_exit("send", &outcome);
    closer.close();
    writer.close().await;
}

async fn receive_loop(
    mut reader: TcpReader,
    mut signal: CloseSignal,
    closer: &Closer,
    events: &EventSink,
) {
    let outcome = loop {
        select! {
            _ = signal.closed() => break Ok(()),
            received = reader.receive_messages() => match received {
                Ok(messages) => {
                    for message in messages {
                        debug!(bytes = message.len(), message = %message, "message received");
                        events.emit(SessionEvent::MessageReceived(message));
                    }
                }
                Err(error) => break Err(error),
            },
        }
    };

    log_loop_exit("receive", &outcome);
    closer.close();
}

fn log_loop_exit(side: &'static str, outcome: &Result<(), TransportError>) {
    match outcome {
        Ok(()) => debug!(side, "loop stopped"),
        Err(TransportError::Closed) => info!(side, "server closed the connection"),
        Err(error) => warn!(side, %error, "connection failed"),
    }
}

struct EventSink(Option<mpsc::UnboundedSender<SessionEvent>>);

impl EventSink {
    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.0 {
            let _ = events.send(event);
        }
    }
}

/// Bounded exponential delay between reconnect attempts.
#[derive(Debug)]
struct Backoff {
    config: BackoffConfig,
    next: Duration,
}

impl Backoff {
    fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            next: config.initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.config.max);
        self.next = delay.saturating_mul(2).min(self.config.max);
        delay
    }

    async fn wait(&mut self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            sleep(delay).await;
        }
    }
}
