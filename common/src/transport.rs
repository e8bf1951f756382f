use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};

use crate::error::HttpError;

pub trait Connector {
    type Stream: AsyncRead + AsyncWrite + Unpin;

    fn connect(
        &self,
        host: &str,
        port: u16,
        use_tls: bool,
    ) -> impl Future<Output = Result<Self::Stream, HttpError>>;
}

impl<C: Connector> Connector for &C {
    type Stream = C::Stream;

    fn connect(
        &self,
        host: &str,
        port: u16,
        use_tls: bool,
    ) -> impl Future<Output = Result<Self::Stream, HttpError>> {
        (**self).connect(host, port, use_tls)
    }
}

pub enum HubStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for HubStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for HubStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[derive(Clone)]
pub struct TcpConnector {
    #[cfg(feature = "tls")]
    tls: tokio_rustls::TlsConnector,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpConnector {
    pub fn new() -> Self {
        #[cfg(feature = "tls")]
        {
            use std::sync::Arc;
            use tokio_rustls::rustls::{ClientConfig, RootCertStore};

            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();

            Self {
                tls: tokio_rustls::TlsConnector::from(Arc::new(config)),
            }
        }

        #[cfg(not(feature = "tls"))]
        {
            Self {}
        }
    }
}

impl Connector for TcpConnector {
    type Stream = HubStream;

    async fn connect(&self, host: &str, port: u16, use_tls: bool) -> Result<HubStream, HttpError> {
        let connection_error = |source: io::Error| HttpError::Connection {
            host: host.to_string(),
            port,
            source,
        };

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(connection_error)?;
        if let Err(err) = tcp.set_nodelay(true) {
            tracing::debug!("failed to disable nagle on hub socket: {err}");
        }

        if !use_tls {
            return Ok(HubStream::Plain(tcp));
        }

        #[cfg(feature = "tls")]
        {
            use tokio_rustls::rustls::pki_types::ServerName;

            let name = ServerName::try_from(host.to_string()).map_err(|err| {
                connection_error(io::Error::new(io::ErrorKind::InvalidInput, err))
            })?;
            let stream = self
                .tls
                .connect(name, tcp)
                .await
                .map_err(connection_error)?;
            Ok(HubStream::Tls(Box::new(stream)))
        }

        #[cfg(not(feature = "tls"))]
        {
            drop(tcp);
            Err(connection_error(io::Error::new(
                io::ErrorKind::Unsupported,
                "built without TLS support",
            )))
        }
    }
}
