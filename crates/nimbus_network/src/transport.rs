//! Stream transport: binds a [`Connection`] to a byte stream.
//!
//! Each connection runs two tasks. The writer drains the outbound frame
//! queue onto the stream; the reader decodes frames off the stream and hands
//! them to the dispatch core. Either side stopping (end of stream, I/O error,
//! explicit close) closes the connection, which fails its pending requests.

use crate::codec::{read_frame, write_frame};
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::TransportError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

/// Spawns the reader and writer tasks for `stream` and returns the connection.
pub fn spawn_connection<S>(
    stream: S,
    remote: impl Into<String>,
    dispatcher: &Arc<Dispatcher>,
    request_timeout: Duration,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (connection, mut outbound) = Connection::new(remote, request_timeout);
    let (mut reader, mut writer) = tokio::io::split(stream);

    let writer_connection = connection.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    trace!(connection = %writer_connection.id(), kind = frame.kind(), "Writing frame");
                    if let Err(err) = write_frame(&mut writer, &frame).await {
                        warn!(connection = %writer_connection.id(), "❌ Write failed: {}", err);
                        break;
                    }
                }
                _ = writer_connection.closed() => break,
            }
        }
        writer_connection.close();
        let _ = writer.shutdown().await;
    });

    let router = dispatcher.attach(connection.clone());
    tokio::spawn(async move {
        let connection = router.connection().clone();
        loop {
            tokio::select! {
                read = read_frame(&mut reader) => match read {
                    Ok(Some(bytes)) => router.route_bytes(&bytes),
                    Ok(None) => {
                        debug!(connection = %connection.id(), "Peer closed the stream");
                        break;
                    }
                    Err(err) => {
                        warn!(connection = %connection.id(), "❌ Read failed: {}", err);
                        break;
                    }
                },
                _ = connection.closed() => break,
            }
        }
        connection.close();
    });

    connection
}

/// Opens a TCP connection to a cluster member.
pub async fn connect(
    addr: &str,
    dispatcher: &Arc<Dispatcher>,
    request_timeout: Duration,
) -> Result<Connection, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let remote = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| addr.to_string());
    info!("🔗 Connected to {}", remote);
    Ok(spawn_connection(stream, remote, dispatcher, request_timeout))
}

/// Accepts inbound TCP connections and wires each to the dispatcher.
pub struct NetworkListener {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    request_timeout: Duration,
}

impl NetworkListener {
    pub async fn bind(
        addr: &str,
        dispatcher: Arc<Dispatcher>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!("🌐 Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            dispatcher,
            request_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the next peer.
    pub async fn accept(&self) -> Result<Connection, TransportError> {
        let (stream, addr) = self.listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, err);
        }
        info!("🔗 New connection from {}", addr);
        Ok(spawn_connection(
            stream,
            addr.to_string(),
            &self.dispatcher,
            self.request_timeout,
        ))
    }
}
