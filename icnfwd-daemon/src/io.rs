//! TCP and UDP connectors.
//!
//! Connectors own the sockets; the forwarder core never touches I/O. Each
//! listener or connection runs as local tasks on the dispatcher thread's
//! `LocalSet`, feeding fully framed packets into the event channel and
//! draining bounded egress queues. A full egress queue drops packets
//! rather than blocking the loop.

use crate::connections::{ConnKind, ConnectionSink, SinkError};
use crate::dispatcher::Event;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use icnfwd_common::codec::MAX_PACKET_SIZE;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

/// Bounded per-connection egress queue.
pub const EGRESS_QUEUE_DEPTH: usize = 256;

/// Slack over the wire maximum for the stream frame header.
const MAX_FRAME_LEN: usize = MAX_PACKET_SIZE + 64;

/* ---------------------------------------------------------------- *
 * Length-prefixed framing (packet streams and the control socket)
 * ---------------------------------------------------------------- */

/// Read one `u32`-length-prefixed frame; `None` on clean EOF.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> std::io::Result<Option<Bytes>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len == 0 || len > max_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("bad frame length {}", len),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> std::io::Result<()> {
    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/* ---------------------------------------------------------------- *
 * Egress sinks
 * ---------------------------------------------------------------- */

/// Egress onto a stream connection's writer task.
pub struct StreamSink {
    tx: mpsc::Sender<Bytes>,
}

impl ConnectionSink for StreamSink {
    fn send(&self, bytes: Bytes) -> Result<(), SinkError> {
        match self.tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkError::Full),
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}

/// Egress toward one datagram peer through the shared socket writer.
pub struct DatagramSink {
    peer: SocketAddr,
    tx: mpsc::Sender<(SocketAddr, Bytes)>,
}

impl DatagramSink {
    pub fn new(peer: SocketAddr, tx: mpsc::Sender<(SocketAddr, Bytes)>) -> Self {
        Self { peer, tx }
    }
}

impl ConnectionSink for DatagramSink {
    fn send(&self, bytes: Bytes) -> Result<(), SinkError> {
        match self.tx.try_send((self.peer, bytes)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkError::Full),
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}

/* ---------------------------------------------------------------- *
 * Listeners
 * ---------------------------------------------------------------- */

/// A bound socket waiting to be spawned onto the dispatcher's `LocalSet`.
#[async_trait(?Send)]
pub trait Listener {
    fn local_addr(&self) -> SocketAddr;
    async fn run(self: Box<Self>);
}

/// Spawn a bound listener. Must be called from within the `LocalSet`.
pub fn spawn_listener(listener: Box<dyn Listener>) {
    info!("listener on {}", listener.local_addr());
    tokio::task::spawn_local(listener.run());
}

pub struct TcpPacketListener {
    inner: tokio::net::TcpListener,
    events: mpsc::Sender<Event>,
}

/// Bind synchronously so configuration errors surface immediately.
pub fn bind_tcp(addr: SocketAddr, events: mpsc::Sender<Event>) -> Result<TcpPacketListener> {
    let listener =
        std::net::TcpListener::bind(addr).with_context(|| format!("binding tcp {}", addr))?;
    listener.set_nonblocking(true)?;
    Ok(TcpPacketListener {
        inner: tokio::net::TcpListener::from_std(listener)?,
        events,
    })
}

#[async_trait(?Send)]
impl Listener for TcpPacketListener {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr().expect("listener is bound")
    }

    async fn run(self: Box<Self>) {
        loop {
            match self.inner.accept().await {
                Ok((stream, peer)) => {
                    debug!("accepted stream from {}", peer);
                    spawn_stream(stream, peer, None, self.events.clone());
                }
                Err(err) => {
                    warn!("tcp accept failed: {}", err);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

pub struct UdpPacketListener {
    socket: Arc<UdpSocket>,
    events: mpsc::Sender<Event>,
}

pub fn bind_udp(addr: SocketAddr, events: mpsc::Sender<Event>) -> Result<UdpPacketListener> {
    let socket =
        std::net::UdpSocket::bind(addr).with_context(|| format!("binding udp {}", addr))?;
    socket.set_nonblocking(true)?;
    Ok(UdpPacketListener {
        socket: Arc::new(UdpSocket::from_std(socket)?),
        events,
    })
}

#[async_trait(?Send)]
impl Listener for UdpPacketListener {
    fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("socket is bound")
    }

    async fn run(self: Box<Self>) {
        let local = self.local_addr();
        let (writer_tx, mut writer_rx) = mpsc::channel::<(SocketAddr, Bytes)>(EGRESS_QUEUE_DEPTH);

        let write_socket = self.socket.clone();
        tokio::task::spawn_local(async move {
            while let Some((peer, bytes)) = writer_rx.recv().await {
                if let Err(err) = write_socket.send_to(&bytes, peer).await {
                    debug!("udp send to {} failed: {}", peer, err);
                }
            }
        });

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, peer)) => {
                    let event = Event::Datagram {
                        local,
                        peer,
                        bytes: Bytes::copy_from_slice(&buf[..len]),
                        writer: writer_tx.clone(),
                    };
                    if self.events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!("udp recv on {} failed: {}", local, err);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/* ---------------------------------------------------------------- *
 * Per-connection tasks
 * ---------------------------------------------------------------- */

/// Start the reader/writer pair for one stream connection. The reader
/// registers the connection and waits for its id before delivering
/// frames.
pub fn spawn_stream(
    stream: TcpStream,
    peer: SocketAddr,
    name: Option<String>,
    events: mpsc::Sender<Event>,
) {
    let _ = stream.set_nodelay(true);
    let (mut read_half, mut write_half) = stream.into_split();
    let (sink_tx, mut sink_rx) = mpsc::channel::<Bytes>(EGRESS_QUEUE_DEPTH);

    tokio::task::spawn_local(async move {
        while let Some(bytes) = sink_rx.recv().await {
            if let Err(err) = write_frame(&mut write_half, &bytes).await {
                debug!("stream writer for {} ended: {}", peer, err);
                break;
            }
        }
    });

    tokio::task::spawn_local(async move {
        let (id_tx, id_rx) = oneshot::channel();
        let opened = Event::StreamOpened {
            name,
            kind: ConnKind::Tcp,
            peer,
            sink: Box::new(StreamSink { tx: sink_tx }),
            id_tx,
        };
        if events.send(opened).await.is_err() {
            return;
        }
        let Ok(connection) = id_rx.await else {
            return;
        };

        loop {
            match read_frame(&mut read_half, MAX_FRAME_LEN).await {
                Ok(Some(bytes)) => {
                    if events.send(Event::Frame { connection, bytes }).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!("connection {} read error: {}", connection, err);
                    break;
                }
            }
        }
        let _ = events.send(Event::StreamClosed { connection }).await;
    });
}

/// `add connection <name> tcp ...`: dial out, then run the stream tasks.
pub fn spawn_outbound_tcp(name: String, remote: SocketAddr, events: mpsc::Sender<Event>) {
    tokio::task::spawn_local(async move {
        match TcpStream::connect(remote).await {
            Ok(stream) => {
                info!("connection '{}' established to {}", name, remote);
                spawn_stream(stream, remote, Some(name), events);
            }
            Err(err) => {
                warn!("connection '{}' to {} failed: {}", name, remote, err);
            }
        }
    });
}

/// `add connection <name> udp <local> <remote>`: a dedicated socket bound
/// to `local` and connected to `remote`.
pub fn spawn_outbound_udp(
    name: String,
    local: SocketAddr,
    remote: SocketAddr,
    events: mpsc::Sender<Event>,
) -> Result<()> {
    let socket =
        std::net::UdpSocket::bind(local).with_context(|| format!("binding udp {}", local))?;
    socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_std(socket)?;

    tokio::task::spawn_local(async move {
        if let Err(err) = socket.connect(remote).await {
            warn!("connection '{}' to {} failed: {}", name, remote, err);
            return;
        }
        let socket = Arc::new(socket);
        let (writer_tx, mut writer_rx) = mpsc::channel::<(SocketAddr, Bytes)>(EGRESS_QUEUE_DEPTH);

        let write_socket = socket.clone();
        tokio::task::spawn_local(async move {
            while let Some((_peer, bytes)) = writer_rx.recv().await {
                if let Err(err) = write_socket.send(&bytes).await {
                    debug!("udp send failed: {}", err);
                }
            }
        });

        let (id_tx, id_rx) = oneshot::channel();
        let opened = Event::StreamOpened {
            name: Some(name),
            kind: ConnKind::Udp,
            peer: remote,
            sink: Box::new(DatagramSink::new(remote, writer_tx)),
            id_tx,
        };
        if events.send(opened).await.is_err() {
            return;
        }
        let Ok(connection) = id_rx.await else {
            return;
        };

        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match socket.recv(&mut buf).await {
                Ok(len) => {
                    let event = Event::Frame {
                        connection,
                        bytes: Bytes::copy_from_slice(&buf[..len]),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    debug!("connection {} udp recv error: {}", connection, err);
                    break;
                }
            }
        }
        let _ = events.send(Event::StreamClosed { connection }).await;
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (client, mut server) = tokio::io::duplex(1024);
            let mut client = client;
            write_frame(&mut client, b"hello frames").await.unwrap();
            write_frame(&mut client, b"x").await.unwrap();
            drop(client);

            let first = read_frame(&mut server, 1024).await.unwrap().unwrap();
            assert_eq!(first.as_ref(), b"hello frames");
            let second = read_frame(&mut server, 1024).await.unwrap().unwrap();
            assert_eq!(second.as_ref(), b"x");
            assert!(read_frame(&mut server, 1024).await.unwrap().is_none());
        });
    }

    #[test]
    fn oversized_frame_is_invalid() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (client, mut server) = tokio::io::duplex(1024);
            let mut client = client;
            write_frame(&mut client, &vec![0u8; 512]).await.unwrap();
            drop(client);
            assert!(read_frame(&mut server, 100).await.is_err());
        });
    }

    #[test]
    fn stream_sink_reports_backpressure_and_close() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(1);
        let sink = StreamSink { tx };
        assert!(sink.send(Bytes::from_static(b"a")).is_ok());
        assert_eq!(sink.send(Bytes::from_static(b"b")), Err(SinkError::Full));

        rx.close();
        // Draining the queued item leaves a closed, empty channel.
        assert!(rx.try_recv().is_ok());
        assert_eq!(sink.send(Bytes::from_static(b"c")), Err(SinkError::Closed));
    }
}
