use std::{
    future::Future,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    handler::handle_connection, observer::RosterObserver, registry::Registry,
    session::DEFAULT_OUTBOUND_CAPACITY,
};

pub const DEFAULT_PORT: u16 = 5003;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// `0` asks the OS for an ephemeral port.
    pub port: u16,
    /// Lines buffered per session before fan-out starts dropping for it.
    pub outbound_capacity: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Accepts connections and runs one session handler task per connection.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    outbound_capacity: usize,
}

impl Server {
    /// Binds the listening socket. A failure here is fatal and is reported to
    /// the observer once before being returned.
    pub async fn bind(
        config: &ServerConfig,
        observer: Arc<dyn RosterObserver>,
    ) -> Result<Self, ServerError> {
        let addr = config.socket_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                observer.error(&format!("failed to start server on {addr}: {source}"));
                return Err(ServerError::Bind { addr, source });
            }
        };

        let server = Self::new(listener, observer, config.outbound_capacity);
        if let Ok(local) = server.local_addr() {
            server
                .registry
                .observer()
                .log(&format!("server started on port {}", local.port()));
        }
        Ok(server)
    }

    pub fn new(
        listener: TcpListener,
        observer: Arc<dyn RosterObserver>,
        outbound_capacity: usize,
    ) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new(observer)),
            outbound_capacity,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accepts until `shutdown` resolves, then drops the listener. Sessions
    /// that are already running keep going until their clients leave.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            registry,
            outbound_capacity,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry, outbound_capacity);
                }
            }
        }

        drop(listener);
        info!("server stopped accepting connections");
        registry.observer().log("server stopped");
    }

    pub async fn run_until_ctrl_c(self) {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
    outbound_capacity: usize,
) {
    match result {
        Ok((stream, peer)) => spawn_session_handler(stream, peer, registry, outbound_capacity),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session_handler(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<Registry>,
    outbound_capacity: usize,
) {
    info!(peer = %peer, "connection accepted");
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, &registry, outbound_capacity).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}
