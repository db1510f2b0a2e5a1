//! DNS server setup and lifecycle management.

use hickory_proto::rr::Name;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::AuthModel;
use crate::config::DnsConfig;
use crate::control::ControlProtocol;
use crate::dispatch::{Dispatcher, Transport};
use crate::error::DnsError;
use crate::loader::{DefaultZoneLoader, ZoneLoader};
use crate::registry::ZoneRegistry;
use crate::resolver::Resolver;

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Largest UDP datagram read from the socket.
const MAX_DATAGRAM: usize = 65_535;

/// Periodically emit state metrics.
async fn metrics_loop(registry: ZoneRegistry, auth: AuthModel, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                registry.emit_metrics();
                crate::metrics::record_user_count(auth.len());
                debug!(
                    zones = registry.len(),
                    users = auth.len(),
                    generation = registry.generation(),
                    "emitted state metrics"
                );
            }
            _ = shutdown.changed() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Authoritative DNS server with a control channel.
pub struct DnsServer {
    config: DnsConfig,
    registry: ZoneRegistry,
    auth: AuthModel,
    loader: Arc<dyn ZoneLoader>,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: DnsConfig) -> Result<Self, DnsError> {
        let loader = Arc::new(DefaultZoneLoader::new(config.transfer_timeout()));
        Self::with_loader(config, loader)
    }

    /// Create a server that loads zones through `loader`.
    pub fn with_loader(config: DnsConfig, loader: Arc<dyn ZoneLoader>) -> Result<Self, DnsError> {
        let superuser = Name::from_ascii(&config.superuser)
            .map_err(|e| DnsError::Config(format!("superuser {}: {e}", config.superuser)))?;
        let auth = AuthModel::new(&superuser, config.superuser_key.clone());
        Ok(Self {
            config,
            registry: ZoneRegistry::new(),
            auth,
            loader,
        })
    }

    /// Zones served by this server.
    pub fn registry(&self) -> &ZoneRegistry {
        &self.registry
    }

    /// User table of the control channel.
    pub fn auth(&self) -> &AuthModel {
        &self.auth
    }

    fn dispatcher(&self) -> Dispatcher {
        let control = ControlProtocol::new(
            self.registry.clone(),
            self.auth.clone(),
            self.loader.clone(),
        )
        .with_enforce_capabilities(self.config.enforce_capabilities)
        .with_max_fudge(self.config.tsig_fudge);
        Dispatcher::new(
            self.registry.clone(),
            Resolver::new(self.config.log_queries),
            control,
        )
    }

    /// Run the DNS server until an interrupt signal arrives.
    pub async fn run(self) -> Result<(), DnsError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for interrupt: {}", e);
            }
        })
        .await
    }

    /// Run the DNS server until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), DnsError>
    where
        F: Future<Output = ()>,
    {
        let (udp, tcp) = self.bind().await?;
        self.serve(udp, tcp, shutdown).await
    }

    /// Bind the UDP socket and TCP listener on the configured address.
    pub async fn bind(&self) -> Result<(UdpSocket, TcpListener), DnsError> {
        info!(
            listen_addr = %self.config.listen_addr,
            superuser = %self.auth.superuser(),
            enforce_capabilities = self.config.enforce_capabilities,
            "Starting fksd server"
        );

        let udp = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %udp.local_addr()?, "DNS UDP listening");

        // TCP shares the UDP port so that port 0 binds a matching pair.
        let tcp = TcpListener::bind(udp.local_addr()?).await?;
        info!(addr = %tcp.local_addr()?, "DNS TCP listening");
        Ok((udp, tcp))
    }

    /// Serve on already bound sockets until `shutdown` completes.
    pub async fn serve<F>(self, udp: UdpSocket, tcp: TcpListener, shutdown: F) -> Result<(), DnsError>
    where
        F: Future<Output = ()>,
    {
        let dispatcher = self.dispatcher();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let metrics_handle = tokio::spawn(metrics_loop(
            self.registry.clone(),
            self.auth.clone(),
            shutdown_rx.clone(),
        ));
        self.registry.emit_metrics();

        let udp_handle = tokio::spawn(udp_loop(udp, dispatcher.clone(), shutdown_rx.clone()));
        let tcp_handle = tokio::spawn(tcp_loop(
            tcp,
            dispatcher,
            self.config.tcp_timeout(),
            shutdown_rx,
        ));

        info!("DNS server ready to serve queries");
        shutdown.await;
        info!("DNS server shutdown requested");
        let _ = shutdown_tx.send(true);

        let _ = metrics_handle.await;
        let _ = udp_handle.await;
        let _ = tcp_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}

/// Serve datagrams one at a time.
async fn udp_loop(socket: UdpSocket, dispatcher: Dispatcher, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, src) = tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => {
                debug!("UDP loop shutting down");
                return;
            }
        };

        if let Some(reply) = dispatcher.handle(&buf[..len], src, Transport::Udp).await {
            if let Err(e) = socket.send_to(&reply, src).await {
                warn!(%src, "UDP send error: {}", e);
            }
        }
    }
}

/// Accept connections, one task each.
async fn tcp_loop(
    listener: TcpListener,
    dispatcher: Dispatcher,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, src)) => {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, src, dispatcher, timeout).await {
                            debug!(%src, "TCP connection closed: {}", e);
                        }
                    });
                }
                Err(e) => warn!("TCP accept error: {}", e),
            },
            _ = shutdown.changed() => {
                debug!("TCP loop shutting down");
                return;
            }
        }
    }
}

/// Serve length-prefixed messages until the peer closes or goes idle.
async fn serve_connection(
    mut stream: TcpStream,
    src: SocketAddr,
    dispatcher: Dispatcher,
    timeout: Duration,
) -> std::io::Result<()> {
    loop {
        let len = match tokio::time::timeout(timeout, stream.read_u16()).await {
            Ok(Ok(len)) => len as usize,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(%src, "TCP connection idle, closing");
                return Ok(());
            }
        };

        let mut buf = vec![0u8; len];
        tokio::time::timeout(timeout, stream.read_exact(&mut buf))
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

        if let Some(reply) = dispatcher.handle(&buf, src, Transport::Tcp).await {
            let Ok(reply_len) = u16::try_from(reply.len()) else {
                warn!(%src, len = reply.len(), "response too large for TCP framing");
                continue;
            };
            stream.write_u16(reply_len).await?;
            stream.write_all(&reply).await?;
            stream.flush().await?;
        }
    }
}
