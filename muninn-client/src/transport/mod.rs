//! Wire layer: TCP/TLS sockets and the combined send/receive pump.
//!
//! The pump (`send_and_receive_for_a_while`) is what lets one transaction
//! keep uploading a request body while response bytes are already coming
//! back. Within one turn the pump polls the read side before the write
//! side, so a completed send can never starve the next `produce` call of
//! the fact that a response has already arrived.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bytes::Bytes;
use http::Version;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::tls::{alpn_to_http_version, classify_handshake_error, TlsVersion};

/// Upper bound for a single `receive_some` / pump read.
pub const RECV_CHUNK: usize = 65_536;

/// What `produce` hands the pump on each call.
pub enum Produced {
    /// Bytes to send.
    Bytes(Vec<u8>),
    /// Cannot produce until at least one inbound chunk has been consumed
    /// (the 100-continue gate). The pump stops calling `produce` until a
    /// read delivers data.
    BlockedUntilNextRead,
    /// No further output will be produced.
    Done,
}

/// What `consume` tells the pump after each inbound chunk. An empty chunk
/// means the peer closed its sending direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed {
    Continue,
    /// Terminate the pump cleanly. Outstanding outbound data stays with
    /// the caller.
    Abort,
}

/// Extra knobs applied to the TCP socket at connect time.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    /// Disable Nagle. On by default for request/response traffic.
    pub no_delay: Option<bool>,
    pub keepalive: Option<Duration>,
    pub recv_buffer_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
}

#[derive(Debug)]
enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl MaybeTlsStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            MaybeTlsStream::Plain(tcp) => tcp,
            MaybeTlsStream::Tls(tls) => tls.get_ref().0,
        }
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            MaybeTlsStream::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(tcp) => Pin::new(tcp).poll_write(cx, buf),
            MaybeTlsStream::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(tcp) => Pin::new(tcp).poll_flush(cx),
            MaybeTlsStream::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(tcp) => Pin::new(tcp).poll_shutdown(cx),
            MaybeTlsStream::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A connected socket, possibly TLS-wrapped.
#[derive(Debug)]
pub struct Socket {
    stream: MaybeTlsStream,
    peer: SocketAddr,
}

impl Socket {
    /// Resolves `host` and connects, honoring `connect_timeout` and the
    /// optional source address / socket options.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        source_address: Option<SocketAddr>,
        options: &SocketOptions,
    ) -> Result<Socket> {
        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|_| Error::NameResolution { host: host.to_string(), port })?
            .collect();
        if addrs.is_empty() {
            return Err(Error::NameResolution { host: host.to_string(), port });
        }

        let mut last_err: Option<Error> = None;
        for addr in addrs {
            match tokio::time::timeout(
                connect_timeout,
                Self::connect_addr(addr, source_address, options),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    trace!(%addr, "connected");
                    return Ok(Socket { stream: MaybeTlsStream::Plain(stream), peer: addr });
                }
                Ok(Err(err)) => last_err = Some(err.into()),
                Err(_elapsed) => {
                    last_err = Some(Error::ConnectTimeout {
                        host: host.to_string(),
                        port,
                        timeout: connect_timeout,
                    })
                }
            }
        }
        Err(last_err.unwrap_or(Error::Connection(format!("no route to {host}:{port}"))))
    }

    async fn connect_addr(
        addr: SocketAddr,
        source_address: Option<SocketAddr>,
        options: &SocketOptions,
    ) -> std::io::Result<TcpStream> {
        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        if let Some(source) = source_address {
            socket.bind(source)?;
        }
        {
            let sock_ref = socket2::SockRef::from(&socket);
            sock_ref.set_tcp_nodelay(options.no_delay.unwrap_or(true))?;
            if let Some(interval) = options.keepalive {
                sock_ref
                    .set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(interval))?;
            }
            if let Some(size) = options.recv_buffer_size {
                sock_ref.set_recv_buffer_size(size)?;
            }
            if let Some(size) = options.send_buffer_size {
                sock_ref.set_send_buffer_size(size)?;
            }
        }
        socket.connect(addr).await
    }

    /// Upgrades the connection to TLS. Consumes the plain socket and hands
    /// back the TLS-wrapped one; the handshake runs to completion here.
    pub async fn start_tls(
        self,
        server_hostname: &str,
        config: Arc<rustls::ClientConfig>,
    ) -> Result<Socket> {
        let tcp = match self.stream {
            MaybeTlsStream::Plain(tcp) => tcp,
            MaybeTlsStream::Tls(_) => {
                return Err(Error::Config("socket is already TLS-wrapped".into()))
            }
        };
        let server_name = rustls_pki_types::ServerName::try_from(server_hostname.to_string())
            .map_err(|_| Error::Config(format!("invalid SNI hostname '{server_hostname}'")))?;
        let connector = TlsConnector::from(config);
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|err| classify_handshake_error(&err))?;
        debug!(peer = %self.peer, server_hostname, "TLS handshake complete");
        Ok(Socket { stream: MaybeTlsStream::Tls(Box::new(tls)), peer: self.peer })
    }

    pub async fn send_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receives one bounded chunk. An empty return means EOF. `read_timeout`
    /// bounds the wait for the first byte.
    pub async fn receive_some(&mut self, read_timeout: Option<Duration>) -> Result<Bytes> {
        let mut buf = vec![0u8; RECV_CHUNK];
        let read = async {
            use tokio::io::AsyncReadExt;
            self.stream.read(&mut buf).await
        };
        let n = match read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| Error::ReadTimeout(timeout))??,
            None => read.await?,
        };
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// The cooperative pump: concurrently sends bytes obtained from
    /// `produce` and delivers received bytes to `consume`.
    ///
    /// Terminates when `consume` signals [`Consumed::Abort`] (normal exit),
    /// when the peer closed and nothing remains to send, on error, or when
    /// the read-idle timer exceeds `read_timeout` (the timer resets on any
    /// inbound byte).
    pub async fn send_and_receive_for_a_while<P, C>(
        &mut self,
        mut produce: P,
        mut consume: C,
        read_timeout: Option<Duration>,
    ) -> Result<()>
    where
        P: FnMut() -> Result<Produced>,
        C: FnMut(&[u8]) -> Result<Consumed>,
    {
        let mut outgoing: Option<(Vec<u8>, usize)> = None;
        let mut produce_done = false;
        let mut waiting_for_read = false;
        let mut saw_eof = false;
        let mut read_storage = vec![0u8; RECV_CHUNK];
        let mut idle_timer = read_timeout.map(|t| Box::pin(tokio::time::sleep(t)));

        let stream = &mut self.stream;
        std::future::poll_fn(move |cx| {
            loop {
                if !produce_done && outgoing.is_none() && !waiting_for_read {
                    match produce() {
                        Ok(Produced::Bytes(bytes)) => {
                            if !bytes.is_empty() {
                                outgoing = Some((bytes, 0));
                            }
                            // An empty production is a no-op; the producer
                            // advanced its own state, ask again next turn.
                        }
                        Ok(Produced::BlockedUntilNextRead) => waiting_for_read = true,
                        Ok(Produced::Done) => produce_done = true,
                        Err(err) => return Poll::Ready(Err(err)),
                    }
                }

                let mut made_progress = false;

                // Receive before send; see the module docs for why the
                // order matters.
                if !saw_eof {
                    let mut read_buf = ReadBuf::new(&mut read_storage);
                    match Pin::new(&mut *stream).poll_read(cx, &mut read_buf) {
                        Poll::Ready(Ok(())) => {
                            made_progress = true;
                            let filled = read_buf.filled();
                            if filled.is_empty() {
                                saw_eof = true;
                            } else {
                                waiting_for_read = false;
                                if let Some(timer) = idle_timer.as_mut() {
                                    if let Some(timeout) = read_timeout {
                                        timer
                                            .as_mut()
                                            .reset(tokio::time::Instant::now() + timeout);
                                    }
                                }
                            }
                            match consume(filled) {
                                Ok(Consumed::Abort) => return Poll::Ready(Ok(())),
                                Ok(Consumed::Continue) => {}
                                Err(err) => return Poll::Ready(Err(err)),
                            }
                        }
                        Poll::Ready(Err(err)) => return Poll::Ready(Err(err.into())),
                        Poll::Pending => {}
                    }
                }

                if !waiting_for_read {
                    if let Some((bytes, pos)) = outgoing.as_mut() {
                        match Pin::new(&mut *stream).poll_write(cx, &bytes[*pos..]) {
                            Poll::Ready(Ok(written)) => {
                                made_progress = true;
                                *pos += written;
                                if *pos >= bytes.len() {
                                    outgoing = None;
                                }
                            }
                            Poll::Ready(Err(err)) => return Poll::Ready(Err(err.into())),
                            Poll::Pending => {}
                        }
                    }
                }

                if saw_eof && produce_done && outgoing.is_none() {
                    // Nothing left to move in either direction.
                    return Poll::Ready(Ok(()));
                }

                if !made_progress {
                    if let Some(timer) = idle_timer.as_mut() {
                        if timer.as_mut().poll(cx).is_ready() {
                            let timeout = read_timeout.unwrap_or_default();
                            return Poll::Ready(Err(Error::ReadTimeout(timeout)));
                        }
                    }
                    return Poll::Pending;
                }
            }
        })
        .await
    }

    /// Non-blocking liveness probe for pooled sockets: peeks the TCP stream
    /// without a waker. A half-closed peer or stale unread bytes both
    /// disqualify the socket from reuse.
    pub fn is_connected(&self) -> bool {
        let mut storage = [0u8; 1];
        let mut buf = ReadBuf::new(&mut storage);
        let mut cx = Context::from_waker(Waker::noop());
        match self.stream.tcp().poll_peek(&mut cx, &mut buf) {
            Poll::Pending => true,
            Poll::Ready(Ok(_)) => false,
            Poll::Ready(Err(_)) => false,
        }
    }

    /// Drops the connection without a graceful TLS close-notify.
    pub fn forceful_close(self) {
        drop(self);
    }

    /// HTTP version negotiated via ALPN; plain sockets are HTTP/1.1.
    pub fn http_version(&self) -> Version {
        match &self.stream {
            MaybeTlsStream::Plain(_) => Version::HTTP_11,
            MaybeTlsStream::Tls(tls) => alpn_to_http_version(tls.get_ref().1.alpn_protocol()),
        }
    }

    pub fn tls_version(&self) -> Option<TlsVersion> {
        match &self.stream {
            MaybeTlsStream::Plain(_) => None,
            MaybeTlsStream::Tls(tls) => {
                tls.get_ref().1.protocol_version().and_then(TlsVersion::from_protocol)
            }
        }
    }

    /// DER bytes of the peer's leaf certificate, when TLS is active.
    pub fn peer_certificate(&self) -> Option<Vec<u8>> {
        match &self.stream {
            MaybeTlsStream::Plain(_) => None,
            MaybeTlsStream::Tls(tls) => tls
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map(|cert| cert.as_ref().to_vec()),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn local_pair() -> (Socket, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let options = SocketOptions::default();
        let client = Socket::connect(
            "127.0.0.1",
            addr.port(),
            Duration::from_secs(5),
            None,
            &options,
        );
        let (client, (server, _)) = tokio::join!(client, async {
            listener.accept().await.unwrap()
        });
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn send_all_and_receive_some() {
        let (mut client, mut server) = local_pair().await;
        client.send_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        use tokio::io::AsyncWriteExt;
        server.write_all(b"pong").await.unwrap();
        let got = client.receive_some(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(&got[..], b"pong");
    }

    #[tokio::test]
    async fn receive_some_times_out() {
        let (mut client, _server) = local_pair().await;
        let err = client.receive_some(Some(Duration::from_millis(50))).await.unwrap_err();
        assert!(matches!(err, Error::ReadTimeout(_)));
    }

    #[tokio::test]
    async fn pump_aborts_on_consume_signal() {
        let (mut client, mut server) = local_pair().await;
        let server_task = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut buf = [0u8; 5];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            server.write_all(b"resp").await.unwrap();
            server
        });

        let mut sent = false;
        let mut received = Vec::new();
        client
            .send_and_receive_for_a_while(
                || {
                    if sent {
                        Ok(Produced::Done)
                    } else {
                        sent = true;
                        Ok(Produced::Bytes(b"hello".to_vec()))
                    }
                },
                |chunk| {
                    received.extend_from_slice(chunk);
                    Ok(Consumed::Abort)
                },
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(received, b"resp");
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn pump_blocked_producer_waits_for_read() {
        let (mut client, mut server) = local_pair().await;
        let server_task = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            // Send the go-ahead first; only then expect the body.
            server.write_all(b"go").await.unwrap();
            let mut buf = [0u8; 4];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"body");
        });

        let unblocked = std::cell::Cell::new(false);
        let mut body_sent = false;
        client
            .send_and_receive_for_a_while(
                || {
                    if !unblocked.get() {
                        Ok(Produced::BlockedUntilNextRead)
                    } else if !body_sent {
                        body_sent = true;
                        Ok(Produced::Bytes(b"body".to_vec()))
                    } else {
                        Ok(Produced::Done)
                    }
                },
                |chunk| {
                    if !chunk.is_empty() {
                        unblocked.set(true);
                        Ok(Consumed::Continue)
                    } else {
                        Ok(Consumed::Abort)
                    }
                },
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert!(body_sent, "producer should have resumed after the first read");
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn pump_read_idle_timeout() {
        let (mut client, _server) = local_pair().await;
        let err = client
            .send_and_receive_for_a_while(
                || Ok(Produced::Done),
                |_chunk| Ok(Consumed::Continue),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadTimeout(_)));
    }

    #[tokio::test]
    async fn is_connected_detects_peer_close() {
        let (client, server) = local_pair().await;
        assert!(client.is_connected());
        drop(server);
        // Give the kernel a moment to deliver the FIN.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn connect_timeout_maps_to_error() {
        // RFC 5737 TEST-NET-1, guaranteed unroutable in tests.
        let err = Socket::connect(
            "192.0.2.1",
            81,
            Duration::from_millis(100),
            None,
            &SocketOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ConnectTimeout { .. } | Error::Io(_)));
    }

    #[tokio::test]
    async fn dns_failure_maps_to_name_resolution() {
        let err = Socket::connect(
            "definitely-not-a-real-host.invalid",
            80,
            Duration::from_secs(1),
            None,
            &SocketOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NameResolution { .. }));
    }
}
