//! The HTTP listener.

use std::{fmt, io};
use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use hyper::server::accept::Accept;
use hyper::service::{make_service_fn, service_fn};
use log::error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use crate::error::Failed;
use crate::utils::net::{bind, resolve_addr};
use crate::utils::tls::{create_acceptor, MaybeTlsStream};
use super::dispatch::Server;
use super::request::Request;


//------------ ListenOptions -------------------------------------------------

/// Options for the transport of a listener.
///
/// If both a key and a certificate are given, the listener uses TLS.
#[derive(Clone, Debug, Default)]
pub struct ListenOptions {
    /// The path to the PEM file with the private key.
    pub tls_key: Option<PathBuf>,

    /// The path to the PEM file with the certificate chain.
    pub tls_cert: Option<PathBuf>,
}

impl ListenOptions {
    /// Returns the TLS acceptor if TLS has been configured.
    fn acceptor(&self) -> Result<Option<TlsAcceptor>, Failed> {
        match (self.tls_key.as_ref(), self.tls_cert.as_ref()) {
            (Some(key), Some(cert)) => create_acceptor(key, cert).map(Some),
            (None, None) => Ok(None),
            _ => {
                error!(
                    "TLS requires both a key and a certificate file."
                );
                Err(Failed)
            }
        }
    }
}


//------------ AddressFamily -------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            AddressFamily::IPv4 => "IPv4",
            AddressFamily::IPv6 => "IPv6",
        })
    }
}


//------------ Listening -----------------------------------------------------

/// Information about a bound listener.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Listening {
    /// The local address of the listener.
    pub address: IpAddr,

    /// The local port of the listener.
    ///
    /// If the listener was asked to bind to port 0, this is the port picked
    /// by the system.
    pub port: u16,

    /// The address family of the address.
    pub family: AddressFamily,

    /// Does the listener use TLS?
    pub tls: bool,
}

impl Listening {
    fn new(addr: SocketAddr, tls: bool) -> Self {
        Listening {
            address: addr.ip(),
            port: addr.port(),
            family: if addr.is_ipv4() {
                AddressFamily::IPv4
            }
            else {
                AddressFamily::IPv6
            },
            tls
        }
    }

    /// Returns the socket address of the listener.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Returns the base URL of the listener.
    pub fn url(&self) -> String {
        format!(
            "{}://{}/",
            if self.tls { "https" } else { "http" },
            self.socket_addr()
        )
    }
}


//------------ listen --------------------------------------------------------

/// Starts listening for HTTP requests.
///
/// Resolves `host` and binds a socket to the first address it resolves to
/// and `port`. Returns information about the bound socket and a future that
/// needs to be driven to actually serve requests. The future only resolves
/// if the listener fails.
pub async fn listen(
    server: Arc<Server>,
    port: u16,
    host: &str,
    options: &ListenOptions,
) -> Result<(Listening, impl Future<Output = ()> + Send), Failed> {
    let tls = options.acceptor()?;
    let addr = resolve_addr(host, port).await?;
    let listener = bind(&addr)?;
    let local = match listener.local_addr() {
        Ok(local) => local,
        Err(err) => {
            error!("Failed to get local address for {}: {}", addr, err);
            return Err(Failed)
        }
    };
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed on HTTP listener {}: {}", local, err);
            return Err(Failed)
        }
    };
    let listening = Listening::new(local, tls.is_some());
    Ok((listening, serve(server, HttpAccept { sock: listener, tls })))
}

/// Serves requests accepted by the listener.
async fn serve(server: Arc<Server>, listener: HttpAccept) {
    let make_service = make_service_fn(|_conn| {
        let server = server.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let server = server.clone();
                async move {
                    let req = Request::from(req);
                    Ok::<_, Infallible>(server.serve(&req).await.into_hyper())
                }
            }))
        }
    });
    if let Err(err) = hyper::Server::builder(listener).serve(make_service).await {
        error!("HTTP server error: {}", err);
    }
}


//------------ HttpAccept ----------------------------------------------------

/// The listening socket.
///
/// Accepted connections start the TLS handshake right away if TLS is
/// configured.
struct HttpAccept {
    sock: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl Accept for HttpAccept {
    type Conn = MaybeTlsStream;
    type Error = io::Error;

    fn poll_accept(
        self: Pin<&mut Self>,
        cx: &mut Context
    ) -> Poll<Option<Result<Self::Conn, Self::Error>>> {
        match self.sock.poll_accept(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok((sock, _addr))) => {
                Poll::Ready(Some(Ok(
                    MaybeTlsStream::new(sock, self.tls.as_ref())
                )))
            }
            Poll::Ready(Err(err)) => {
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use hyper::StatusCode;
    use hyper::header::{HeaderValue, HOST};
    use tempfile::TempDir;
    use crate::http::ServerOptions;
    use crate::ssi::{HandlerChain, HandlerKind};

    async fn start(dir: &TempDir, options: ServerOptions) -> Listening {
        let server = Arc::new(
            Server::new(dir.path().into(), options).unwrap()
        );
        let (listening, fut) = listen(
            server, 0, "127.0.0.1", &ListenOptions::default()
        ).await.unwrap();
        tokio::spawn(fut);
        listening
    }

    #[tokio::test]
    async fn serve_over_tcp() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page.html"), "page").unwrap();
        let listening = start(&dir, ServerOptions::default()).await;
        assert_eq!(listening.family, AddressFamily::IPv4);
        assert_ne!(listening.port, 0);
        assert!(!listening.tls);
        assert_eq!(
            listening.url(), format!("http://127.0.0.1:{}/", listening.port)
        );

        let res = reqwest::get(
            format!("{}page.html", listening.url())
        ).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.text().await.unwrap(), "page");

        let res = reqwest::get(
            format!("{}nothing", listening.url())
        ).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn include_url() {
        let remote_dir = TempDir::new().unwrap();
        std::fs::write(remote_dir.path().join("page.html"), "remote").unwrap();
        let remote = start(&remote_dir, ServerOptions::default()).await;

        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("abs.shtml"),
            format!(r#"[<!--#include url="{}page.html"-->]"#, remote.url())
        ).unwrap();
        std::fs::write(
            dir.path().join("rel.shtml"),
            r#"[<!--#include url="page.html"-->]"#
        ).unwrap();
        std::fs::write(
            dir.path().join("gone.shtml"),
            r#"[<!--#include url="missing.html"-->]"#
        ).unwrap();
        let mut ssi = HashMap::new();
        ssi.insert(
            String::from("shtml"),
            HandlerChain::from_kinds(&[HandlerKind::Url])
        );
        let server = Server::new(
            dir.path().into(), ServerOptions { ssi, .. Default::default() }
        ).unwrap();

        let res = server.serve(&Request::get("/abs.shtml")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.into_text().await.unwrap(), "[remote]");

        // Relative URLs need the Host header.
        let res = server.serve(&Request::get("/rel.shtml")).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let host = HeaderValue::from_str(
            &remote.socket_addr().to_string()
        ).unwrap();
        let mut req = Request::get("/rel.shtml");
        req.headers_mut().insert(HOST, host.clone());
        let res = server.serve(&req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.into_text().await.unwrap(), "[remote]");

        let mut req = Request::get("/gone.shtml");
        req.headers_mut().insert(HOST, host);
        let res = server.serve(&req).await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    fn testdata(name: &str) -> PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("src/http/testdata").join(name)
    }

    #[tokio::test]
    async fn serve_over_tls() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page.html"), "secret").unwrap();
        let server = Arc::new(
            Server::new(dir.path().into(), ServerOptions::default()).unwrap()
        );
        let options = ListenOptions {
            tls_key: Some(testdata("key.pem")),
            tls_cert: Some(testdata("cert.pem")),
        };
        let (listening, fut) = listen(
            server, 0, "127.0.0.1", &options
        ).await.unwrap();
        tokio::spawn(fut);
        assert!(listening.tls);
        assert_eq!(
            listening.url(), format!("https://127.0.0.1:{}/", listening.port)
        );

        // The certificate is issued for localhost.
        let cert = reqwest::Certificate::from_pem(
            &std::fs::read(testdata("cert.pem")).unwrap()
        ).unwrap();
        let client = reqwest::Client::builder()
            .add_root_certificate(cert)
            .resolve("localhost", listening.socket_addr())
            .build().unwrap();
        let res = client.get(
            format!("https://localhost:{}/page.html", listening.port)
        ).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.text().await.unwrap(), "secret");

        // Plain HTTP doesn’t get through.
        assert!(
            reqwest::get(
                format!("http://{}/page.html", listening.socket_addr())
            ).await.is_err()
        );
    }

    #[tokio::test]
    async fn tls_needs_key_and_cert() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(
            Server::new(dir.path().into(), ServerOptions::default()).unwrap()
        );
        let options = ListenOptions {
            tls_key: Some(dir.path().join("key.pem")),
            tls_cert: None,
        };
        assert!(listen(server, 0, "127.0.0.1", &options).await.is_err());
    }
}
