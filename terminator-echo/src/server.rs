use std::{future::Future, io, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    select,
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    config::{FramingConfig, ServerConfig},
    connection::{CloseSignal, Connection},
    error::TransportError,
    registry::{ConnectionHandle, ConnectionId, Registry},
};

/// Accepts clients and answers every complete message with an acknowledgement.
pub struct Server {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

/// State shared by the acceptor and every connection task.
struct ServerContext {
    registry: Arc<Registry>,
    framing: FramingConfig,
    acknowledgement: String,
}

impl Server {
    /// Binds `config.listen` with the configured backlog.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = listen(config)
            .with_context(|| format!("failed to listen on {}", config.listen))?;
        Ok(Self::new(listener, config))
    }

    pub fn new(listener: TcpListener, config: &ServerConfig) -> Self {
        Self {
            listener,
            context: Arc::new(ServerContext {
                registry: Arc::new(Registry::new()),
                framing: config.framing.clone(),
                acknowledgement: config.acknowledgement.clone(),
            }),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.context.registry)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, context } = self;
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &context, &mut connections).await;
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = ?err, "connection task failed");
                    }
                }
            }
        }

        drop(listener);
        handle_shutdown(&context, connections).await;
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
}

fn listen(config: &ServerConfig) -> io::Result<TcpListener> {
    let socket = match config.listen {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(config.listen)?;
    socket.listen(config.backlog)
}

async fn handle_shutdown(context: &ServerContext, mut connections: JoinSet<()>) {
    let closing = context.registry.close_all().await;
    info!(connections = closing, "server shutting down");

    while let Some(joined) = connections.join_next().await {
        if let Err(err) = joined {
            warn!(error = ?err, "connection task failed during shutdown");
        }
    }
}

async fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    context: &Arc<ServerContext>,
    connections: &mut JoinSet<()>,
) {
    let (stream, peer) = match result {
        Ok(accepted) => accepted,
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            return;
        }
    };

    let connection = match Connection::new(stream, &context.framing) {
        Ok(connection) => connection,
        Err(err) => {
            warn!(%peer, error = ?err, "failed to set up connection");
            return;
        }
    };

    let id = context.registry.next_id();
    let (handle, signal) = ConnectionHandle::new(id, peer);
    if !context.registry.register(handle).await {
        warn!(%peer, id, "connection id already registered, dropping connection");
        return;
    }
    info!(%peer, id, "connection received");

    connections.spawn(serve_connection(connection, id, signal, Arc::clone(context)));
}

async fn serve_connection(
    mut connection: Connection,
    id: ConnectionId,
    mut signal: CloseSignal,
    context: Arc<ServerContext>,
) {
    let peer = connection.peer_addr();
    let outcome = select! {
        _ = signal.closed() => Ok(()),
        result = receive_and_reply(&mut connection, &context.acknowledgement) => result,
    };

    match outcome {
        Ok(()) => info!(%peer, id, "closing connection"),
        Err(TransportError::Closed) => info!(%peer, id, "client disconnected"),
        Err(error) => warn!(%peer, id, %error, "connection failed"),
    }

    context.registry.deregister(id).await;
    connection.close().await;
}

async fn receive_and_reply(
    connection: &mut Connection,
    acknowledgement: &str,
) -> Result<(), TransportError> {
    let peer = connection.peer_addr();
    loop {
        for message in connection.receive_messages().await? {
            info!(%peer, bytes = message.len(), message = %message, "message received");
            let sent = connection.send_message(acknowledgement).await?;
            debug!(%peer, bytes = sent, "reply sent");
        }
    }
}
