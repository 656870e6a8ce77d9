use std::{net::SocketAddr, time::Duration};

use anyhow::{Result, anyhow};
use terminator_echo::{
    client::{ClientSession, SessionEvent, SessionState},
    config::{BackoffConfig, ClientConfig, ServerConfig},
    server::Server,
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{Instant, timeout},
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

struct RunningServer {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl RunningServer {
    async fn start(listen: SocketAddr) -> Result<(Self, SocketAddr)> {
        let server = Server::bind(&ServerConfig {
            listen,
            ..ServerConfig::default()
        })
        .await?;
        let addr = server.local_addr()?;
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async move {
            let _ = shutdown_rx.await;
        }));
        Ok((Self { shutdown, task }, addr))
    }

    async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        timeout(Duration::from_secs(2), self.task).await???;
        Ok(())
    }
}

struct RunningClient {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl RunningClient {
    fn start(server: SocketAddr, send_interval: Duration) -> Self {
        let mut config = ClientConfig::new("Client 1");
        config.server = server;
        config.send_interval = send_interval;
        config.backoff = BackoffConfig {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
        };

        let (events_tx, events) = mpsc::unbounded_channel();
        let session = ClientSession::new(config).with_events(events_tx);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(session.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            events,
            shutdown,
            task,
        }
    }

    /// Skips events until one matches.
    async fn expect<F>(&mut self, description: &str, mut matches: F) -> Result<SessionEvent>
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            let event = timeout(deadline.saturating_duration_since(Instant::now()), self.events.recv())
                .await
                .map_err(|_| anyhow!("timed out waiting for {description}"))?
                .ok_or_else(|| anyhow!("session ended while waiting for {description}"))?;
            if matches(&event) {
                return Ok(event);
            }
        }
    }

    async fn expect_reply(&mut self) -> Result<String> {
        match self
            .expect("reply", |event| matches!(event, SessionEvent::MessageReceived(_)))
            .await?
        {
            SessionEvent::MessageReceived(message) => Ok(message.as_str().to_string()),
            other => Err(anyhow!("unexpected event {other:?}")),
        }
    }

    async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        timeout(Duration::from_secs(2), self.task).await???;
        Ok(())
    }
}

async fn unused_addr() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?)
}

#[tokio::test]
async fn every_send_gets_one_reply_in_order() -> Result<()> {
    let (server, addr) = RunningServer::start("127.0.0.1:0".parse()?).await?;
    let mut client = RunningClient::start(addr, Duration::from_millis(50));

    client
        .expect("connect", |event| matches!(event, SessionEvent::Connected { .. }))
        .await?;

    let mut replies = Vec::new();
    while replies.len() < 3 {
        match client.expect("traffic", |_| true).await? {
            SessionEvent::MessageSent { bytes } => {
                assert_eq!(bytes, "Message from Client 1<END>".len());
            }
            SessionEvent::MessageReceived(message) => replies.push(message),
            other => panic!("unexpected event {other:?}"),
        }
    }

    for reply in &replies {
        assert_eq!(reply.as_str(), "Message Received<END>");
        assert_eq!(reply.payload(), "Message Received");
    }

    client.stop().await?;
    server.stop().await
}

#[tokio::test]
async fn client_connects_once_server_appears() -> Result<()> {
    let addr = unused_addr().await?;
    let mut client = RunningClient::start(addr, Duration::from_millis(50));

    client
        .expect("third failed attempt", |event| {
            matches!(event, SessionEvent::ConnectAttempt { attempt } if *attempt >= 3)
        })
        .await?;

    let (server, _) = RunningServer::start(addr).await?;
    match client
        .expect("connect", |event| matches!(event, SessionEvent::Connected { .. }))
        .await?
    {
        SessionEvent::Connected { peer, attempts } => {
            assert_eq!(peer, addr);
            assert!(attempts >= 3);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(client.expect_reply().await?, "Message Received<END>");

    client.stop().await?;
    server.stop().await
}

#[tokio::test]
async fn client_reconnects_after_server_restart() -> Result<()> {
    let (server, addr) = RunningServer::start("127.0.0.1:0".parse()?).await?;
    let mut client = RunningClient::start(addr, Duration::from_millis(50));
    assert_eq!(client.expect_reply().await?, "Message Received<END>");

    server.stop().await?;
    client
        .expect("disconnect", |event| matches!(event, SessionEvent::Disconnected))
        .await?;

    let (server, _) = RunningServer::start(addr).await?;
    client
        .expect("reconnect", |event| matches!(event, SessionEvent::Connected { .. }))
        .await?;
    assert_eq!(client.expect_reply().await?, "Message Received<END>");

    client.stop().await?;
    server.stop().await
}

#[tokio::test]
async fn session_state_follows_the_connection() -> Result<()> {
    let (server, addr) = RunningServer::start("127.0.0.1:0".parse()?).await?;

    let mut config = ClientConfig::new("Client 2");
    config.server = addr;
    config.send_interval = Duration::from_millis(50);
    let session = ClientSession::new(config);
    let mut state = session.subscribe_state();
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(session.run_until(async move {
        let _ = shutdown_rx.await;
    }));

    timeout(
        EVENT_TIMEOUT,
        state.wait_for(|state| *state == SessionState::Connected),
    )
    .await??;

    server.stop().await?;
    timeout(
        EVENT_TIMEOUT,
        state.wait_for(|state| *state != SessionState::Connected),
    )
    .await??;

    let _ = shutdown.send(());
    timeout(Duration::from_secs(2), task).await???;
    assert_eq!(*state.borrow(), SessionState::Disconnected);
    Ok(())
}
