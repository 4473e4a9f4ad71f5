//! Utility functions for dealing with TLS.

use std::io;
use std::fs::File;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use futures::{ready, TryFuture};
use log::error;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{Accept, TlsAcceptor};
use tokio_rustls::rustls::{Certificate, PrivateKey, ServerConfig};
use tokio_rustls::server::TlsStream;
use crate::error::Failed;


//------------ create_acceptor -----------------------------------------------

/// Creates a TLS acceptor from a PEM key and certificate chain.
///
/// The key file must contain exactly one PKCS#8 private key. The certificate
/// file must contain the chain starting with the server’s own certificate.
pub fn create_acceptor(
    key_path: &Path, cert_path: &Path
) -> Result<TlsAcceptor, Failed> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;
    ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map(|config| TlsAcceptor::from(Arc::new(config)))
        .map_err(|err| {
            error!("Failed to create TLS server config: {}", err);
            Failed
        })
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>, Failed> {
    let mut reader = open_pem(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut reader).map_err(|err| {
        error!(
            "Failed to read TLS certificate file '{}': {}.",
            path.display(), err
        );
        Failed
    })?;
    if certs.is_empty() {
        error!(
            "TLS certificate file '{}' does not contain any certificates.",
            path.display()
        );
        return Err(Failed)
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> Result<PrivateKey, Failed> {
    let mut reader = open_pem(path, "key")?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(
        &mut reader
    ).map_err(|err| {
        error!(
            "Failed to read TLS key file '{}': {}.",
            path.display(), err
        );
        Failed
    })?;
    match (keys.pop(), keys.is_empty()) {
        (Some(key), true) => Ok(PrivateKey(key)),
        (Some(_), false) => {
            error!(
                "TLS key file '{}' contains multiple keys.",
                path.display()
            );
            Err(Failed)
        }
        (None, _) => {
            error!(
                "TLS key file '{}' does not contain any usable keys.",
                path.display()
            );
            Err(Failed)
        }
    }
}

fn open_pem(path: &Path, what: &str) -> Result<io::BufReader<File>, Failed> {
    File::open(path).map(io::BufReader::new).map_err(|err| {
        error!(
            "Failed to open TLS {} file '{}': {}.",
            what, path.display(), err
        );
        Failed
    })
}


//------------ MaybeTlsStream ------------------------------------------------

pin_project! {
    /// A TCP stream that may or may not use TLS.
    ///
    /// For a TLS stream, `AsyncRead` and `AsyncWrite` return
    /// `Poll::Pending` until the handshake has concluded.
    #[project = MaybeTlsProj]
    pub enum MaybeTlsStream {
        /// A plain TCP stream.
        Plain { #[pin] sock: TcpStream },

        /// The TLS handshake is going on.
        Handshake { #[pin] fut: Accept<TcpStream> },

        /// We have a working TLS stream.
        Tls { #[pin] sock: TlsStream<TcpStream> },

        /// The TLS handshake has failed.
        ///
        /// Because hyper still wants to do a clean flush and shutdown, we
        /// keep answering with zero length operations in this state.
        Broken,
    }
}

impl MaybeTlsStream {
    /// Creates a new stream.
    ///
    /// If `tls` is some, the stream starts a TLS handshake, otherwise it
    /// will be a plain TCP stream.
    pub fn new(sock: TcpStream, tls: Option<&TlsAcceptor>) -> Self {
        match tls {
            Some(tls) => MaybeTlsStream::Handshake { fut: tls.accept(sock) },
            None => MaybeTlsStream::Plain { sock },
        }
    }

    /// Drives a pending handshake to completion.
    fn poll_handshake(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Pin<&mut Self>, io::Error>> {
        if let MaybeTlsProj::Handshake { fut } = self.as_mut().project() {
            match ready!(fut.try_poll(cx)) {
                Ok(sock) => self.set(MaybeTlsStream::Tls { sock }),
                Err(err) => {
                    self.set(MaybeTlsStream::Broken);
                    return Poll::Ready(Err(err))
                }
            }
        }
        Poll::Ready(Ok(self))
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>
    ) -> Poll<Result<(), io::Error>> {
        let this = ready!(self.poll_handshake(cx))?;
        match this.project() {
            MaybeTlsProj::Plain { sock } => sock.poll_read(cx, buf),
            MaybeTlsProj::Tls { sock } => sock.poll_read(cx, buf),
            _ => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8]
    ) -> Poll<Result<usize, io::Error>> {
        let this = ready!(self.poll_handshake(cx))?;
        match this.project() {
            MaybeTlsProj::Plain { sock } => sock.poll_write(cx, buf),
            MaybeTlsProj::Tls { sock } => sock.poll_write(cx, buf),
            _ => Poll::Ready(Ok(0)),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Result<(), io::Error>> {
        let this = ready!(self.poll_handshake(cx))?;
        match this.project() {
            MaybeTlsProj::Plain { sock } => sock.poll_flush(cx),
            MaybeTlsProj::Tls { sock } => sock.poll_flush(cx),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Result<(), io::Error>> {
        let this = ready!(self.poll_handshake(cx))?;
        match this.project() {
            MaybeTlsProj::Plain { sock } => sock.poll_shutdown(cx),
            MaybeTlsProj::Tls { sock } => sock.poll_shutdown(cx),
            _ => Poll::Ready(Ok(())),
        }
    }
}
