//! Dispatching requests.
//!
//! The [`Server`] takes a request through the complete pipeline: the path is
//! decoded and resolved against the root directory and the outcome is
//! turned into a redirect, a directory listing, a processed SSI document,
//! a streamed file, or an error.

use std::fmt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use futures::FutureExt;
use hyper::{HeaderMap, StatusCode};
use log::{error, info};
use crate::config::Config;
use crate::error::Failed;
use crate::log::REQUEST_TARGET;
use crate::resolve::{NodeKind, PathResolver, PathSegments, Resolution};
use crate::resolve::ResolvedNode;
use crate::ssi::{HandlerChain, SsiContext};
use super::listing;
use super::request::Request;
use super::response::Response;


//------------ RequestLog ----------------------------------------------------

/// A function called once for every request that has been answered.
///
/// It receives the raw request path, the response status, and a short
/// description of what happened.
pub type RequestLog = Arc<dyn Fn(&str, StatusCode, &str) + Send + Sync>;

/// Returns the request log used by default.
///
/// This logs a single line at info level using the request log target.
pub fn default_request_log() -> RequestLog {
    Arc::new(|url: &str, status: StatusCode, diagnostic: &str| {
        info!(
            target: REQUEST_TARGET,
            "{} {} {}", status.as_u16(), url, diagnostic
        )
    })
}


//------------ ServerOptions -------------------------------------------------

/// The options of a server.
///
/// These can’t be changed once the server has been created.
#[derive(Clone)]
pub struct ServerOptions {
    /// Are directories without an index document listed?
    pub directory_list: bool,

    /// The SSI handler chains by file extension.
    ///
    /// Only files with an extension present here are processed.
    pub ssi: HashMap<String, HandlerChain>,

    /// The value of the max-age directive of the Cache-Control header.
    pub max_age: u64,

    /// The extensions tried for path segments that don’t exist verbatim.
    pub extensions: Vec<String>,

    /// The request log.
    pub log: RequestLog,

    /// The maximum number of nested includes.
    pub ssi_max_depth: usize,

    /// The timeout for fetching includes from URLs.
    pub include_timeout: Option<Duration>,
}

impl ServerOptions {
    /// The default for the maximum number of nested includes.
    pub const DEFAULT_SSI_MAX_DEPTH: usize = 16;

    /// The default for the max-age directive.
    pub const DEFAULT_MAX_AGE: u64 = 2;
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            directory_list: false,
            ssi: HashMap::new(),
            max_age: Self::DEFAULT_MAX_AGE,
            extensions: Vec::new(),
            log: default_request_log(),
            ssi_max_depth: Self::DEFAULT_SSI_MAX_DEPTH,
            include_timeout: None,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("directory_list", &self.directory_list)
            .field("ssi", &self.ssi)
            .field("max_age", &self.max_age)
            .field("extensions", &self.extensions)
            .field("ssi_max_depth", &self.ssi_max_depth)
            .field("include_timeout", &self.include_timeout)
            .finish()
    }
}


//------------ Server --------------------------------------------------------

/// A server for the files under a root directory.
#[derive(Debug)]
pub struct Server {
    /// The root directory.
    root: PathBuf,

    /// The options.
    options: ServerOptions,

    /// The client for fetching includes from URLs.
    client: reqwest::Client,
}

impl Server {
    /// Creates a new server.
    pub fn new(root: PathBuf, options: ServerOptions) -> Result<Self, Failed> {
        let mut client = reqwest::Client::builder();
        if let Some(timeout) = options.include_timeout {
            client = client.timeout(timeout);
        }
        let client = match client.build() {
            Ok(client) => client,
            Err(err) => {
                error!("Failed to initialize HTTP client: {}.", err);
                return Err(Failed)
            }
        };
        Ok(Server { root, options, client })
    }

    /// Creates a server from the configuration.
    pub fn from_config(config: &Config) -> Result<Self, Failed> {
        Self::new(
            config.root.clone(),
            ServerOptions {
                directory_list: config.directory_list,
                ssi: config.ssi.iter().map(|(ext, kinds)| {
                    (ext.clone(), HandlerChain::from_kinds(kinds))
                }).collect(),
                max_age: config.max_age,
                extensions: config.extensions.clone(),
                log: default_request_log(),
                ssi_max_depth: config.ssi_max_depth,
                include_timeout: config.include_timeout,
            }
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Returns the maximum number of nested includes.
    pub fn ssi_max_depth(&self) -> usize {
        self.options.ssi_max_depth
    }

    /// Returns the HTTP client for fetching includes.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Answers a request.
    ///
    /// Every failure, including a panic somewhere down the line, results in
    /// an Internal Server Error with an empty body. Either way, the request
    /// log is called with the outcome.
    pub async fn serve(&self, req: &Request) -> Response {
        let res = AssertUnwindSafe(
            self.respond(req.path(), req.headers(), 0)
        ).catch_unwind().await;
        let res = match res {
            Ok(Ok(res)) => res,
            Ok(Err(Failed)) => {
                error!("{}: request processing failed.", req.path());
                Response::server_error("request processing failed")
            }
            Err(_) => {
                error!("{}: request processing panicked.", req.path());
                Response::server_error("request processing panicked")
            }
        };
        (self.options.log)(req.path(), res.status(), res.diagnostic());
        res
    }

    /// Produces the response for a raw request path.
    ///
    /// This is also used for virtual includes, in which case `depth` is the
    /// nesting level of the including document.
    pub(crate) async fn respond(
        &self,
        path: &str,
        headers: &HeaderMap,
        depth: usize,
    ) -> Result<Response, Failed> {
        let segments = PathSegments::decode(path)?;
        let resolution = PathResolver::new(
            &self.root, &self.options.extensions, self.options.directory_list
        ).resolve(&segments).await;
        match resolution {
            Resolution::NotFound => Ok(Response::not_found()),
            Resolution::Redirect => {
                Ok(Response::moved_permanently(&format!("{}/", path)))
            }
            Resolution::Found(node) => match node.kind {
                NodeKind::Directory => {
                    Ok(listing::list(
                        &node.path, self.options.directory_list
                    ).await)
                }
                NodeKind::File => {
                    self.respond_file(path, headers, &node, depth).await
                }
            }
        }
    }

    /// Produces the response for a file.
    async fn respond_file(
        &self,
        path: &str,
        headers: &HeaderMap,
        node: &ResolvedNode,
        depth: usize,
    ) -> Result<Response, Failed> {
        let chain = node.extension().and_then(|ext| {
            self.options.ssi.get(ext)
        });
        let chain = match chain {
            Some(chain) => chain,
            None => {
                return Ok(
                    Response::file(headers, node, self.options.max_age).await
                )
            }
        };
        let text = SsiContext {
            url: path,
            headers,
            file: &node.path,
            server: self,
            chain,
            depth,
        }.process().await?;
        Ok(Response::ssi(text, node, self.options.max_age))
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use async_trait::async_trait;
    use hyper::header::{
        CONTENT_TYPE, ETAG, HeaderValue, IF_NONE_MATCH, LOCATION
    };
    use tempfile::TempDir;
    use crate::ssi::{Directive, DirectiveHandler, HandlerKind};

    /// Creates the test site.
    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("index.html"), "<h1>home</h1>").unwrap();
        fs::create_dir(root.join("docs")).unwrap();
        fs::write(root.join("page.html"), "page").unwrap();
        fs::write(root.join("notes.txt"), "notes").unwrap();
        fs::create_dir(root.join("inc")).unwrap();
        fs::write(root.join("inc/head.html"), "HEAD").unwrap();
        fs::write(
            root.join("inc/nested.shtml"),
            r#"[<!--#include file="head.html"-->]"#
        ).unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/index.shtml"), "sub index").unwrap();
        fs::write(
            root.join("ssi.shtml"),
            r#"A<!--#include file="inc/head.html"-->B<!--#include virtual="page"-->C<!--#echo var="x"-->"#
        ).unwrap();
        fs::write(
            root.join("nested.shtml"),
            r#"<!--#include file="inc/nested.shtml"-->"#
        ).unwrap();
        fs::write(
            root.join("loop.shtml"), r#"<!--#include file="loop.shtml"-->"#
        ).unwrap();
        fs::write(
            root.join("vloop.shtml"),
            r#"<!--#include virtual="vloop.shtml"-->"#
        ).unwrap();
        fs::write(
            root.join("broken.shtml"), r#"<!--#include virtual="nope"-->"#
        ).unwrap();
        fs::write(root.join("panic.shtml"), r#"<!--#panic now-->"#).unwrap();
        dir
    }

    fn options() -> ServerOptions {
        let mut ssi = HashMap::new();
        ssi.insert(
            "shtml".into(), HandlerChain::from_kinds(HandlerKind::DEFAULT_CHAIN)
        );
        ServerOptions {
            ssi,
            extensions: vec!["html".into()],
            .. Default::default()
        }
    }

    async fn get(server: &Server, path: &str) -> Response {
        server.serve(&Request::get(path)).await
    }

    async fn get_text(server: &Server, path: &str) -> (StatusCode, String) {
        let res = get(server, path).await;
        (res.status(), res.into_text().await.unwrap())
    }

    #[tokio::test]
    async fn example_site() {
        let dir = site();
        let server = Server::new(dir.path().into(), options()).unwrap();

        assert_eq!(
            get_text(&server, "/").await,
            (StatusCode::OK, "<h1>home</h1>".into())
        );

        let res = get(&server, "/docs").await;
        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.headers()[LOCATION], "/docs/");

        assert_eq!(get(&server, "/docs/").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get(&server, "/missing").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn directory_listing() {
        let dir = site();
        let server = Server::new(
            dir.path().into(),
            ServerOptions { directory_list: true, .. options() }
        ).unwrap();
        let res = get(&server, "/inc/").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[CONTENT_TYPE], "text/html; charset=UTF-8");
        let text = res.into_text().await.unwrap();
        assert!(text.contains("<div><a href='./head.html'>head.html</a></div>"));

        // An index document still wins.
        assert_eq!(
            get_text(&server, "/sub/").await,
            (StatusCode::OK, "sub index".into())
        );
    }

    #[tokio::test]
    async fn extension_fallback() {
        let dir = site();
        let server = Server::new(dir.path().into(), options()).unwrap();
        assert_eq!(
            get_text(&server, "/page").await, (StatusCode::OK, "page".into())
        );
        assert_eq!(get(&server, "/notes").await.status(), StatusCode::NOT_FOUND);

        let server = Server::new(
            dir.path().into(), ServerOptions::default()
        ).unwrap();
        assert_eq!(get(&server, "/page").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn conditional_requests() {
        let dir = site();
        let server = Server::new(dir.path().into(), options()).unwrap();

        let first = get(&server, "/notes.txt").await;
        let second = get(&server, "/notes.txt").await;
        assert_eq!(first.headers()[ETAG], second.headers()[ETAG]);
        assert_eq!(
            first.headers()[CONTENT_TYPE], second.headers()[CONTENT_TYPE]
        );
        assert_eq!(
            first.headers()[CONTENT_TYPE], "text/plain; charset=UTF-8"
        );
        let etag = first.headers()[ETAG].clone();

        let mut req = Request::get("/notes.txt");
        req.headers_mut().insert(IF_NONE_MATCH, etag.clone());
        let res = server.serve(&req).await;
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(res.headers()[ETAG], etag);
        assert_eq!(res.into_text().await.unwrap(), "");

        let mut req = Request::get("/notes.txt");
        req.headers_mut().insert(
            IF_NONE_MATCH, HeaderValue::from_static("0-0")
        );
        let res = server.serve(&req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.into_text().await.unwrap(), "notes");
    }

    #[tokio::test]
    async fn server_side_includes() {
        let dir = site();
        let server = Server::new(dir.path().into(), options()).unwrap();

        let res = get(&server, "/ssi.shtml").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(ETAG).is_none());
        assert_eq!(res.headers()[CONTENT_TYPE], "text/html; charset=UTF-8");
        assert_eq!(
            res.into_text().await.unwrap(),
            r#"AHEADBpageC<!--#echo var="x"-->"#
        );

        // Nested includes are relative to the including file.
        assert_eq!(
            get_text(&server, "/nested.shtml").await,
            (StatusCode::OK, "[HEAD]".into())
        );

        // Without SSI, the directives are served verbatim.
        let plain = Server::new(
            dir.path().into(), ServerOptions::default()
        ).unwrap();
        assert_eq!(
            get_text(&plain, "/nested.shtml").await,
            (
                StatusCode::OK,
                r#"<!--#include file="inc/nested.shtml"-->"#.into()
            )
        );

        // Processed documents ignore If-None-Match, even with the file's
        // own ETag.
        let etag = get(&plain, "/ssi.shtml").await.headers()[ETAG].clone();
        let mut req = Request::get("/ssi.shtml");
        req.headers_mut().insert(IF_NONE_MATCH, etag);
        let res = server.serve(&req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(ETAG).is_none());
        assert_eq!(
            res.into_text().await.unwrap(),
            r#"AHEADBpageC<!--#echo var="x"-->"#
        );
    }

    #[tokio::test]
    async fn include_depth_limit() {
        let dir = site();
        fs::create_dir(dir.path().join("deep")).unwrap();
        for i in 0..3 {
            fs::write(
                dir.path().join(format!("deep/c{}.shtml", i)),
                format!(r#"<!--#include file="c{}.shtml"-->"#, i + 1)
            ).unwrap();
        }
        fs::write(dir.path().join("deep/c3.shtml"), "end").unwrap();

        // c0 is at depth 0, c3 at depth 3.
        let server = Server::new(
            dir.path().into(), ServerOptions { ssi_max_depth: 3, .. options() }
        ).unwrap();
        assert_eq!(
            get_text(&server, "/deep/c0.shtml").await,
            (StatusCode::OK, "end".into())
        );

        let server = Server::new(
            dir.path().into(), ServerOptions { ssi_max_depth: 2, .. options() }
        ).unwrap();
        assert_eq!(
            get_text(&server, "/deep/c0.shtml").await,
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        );
        assert_eq!(
            get_text(&server, "/deep/c1.shtml").await,
            (StatusCode::OK, "end".into())
        );
    }

    #[tokio::test]
    async fn include_failures() {
        let dir = site();
        let server = Server::new(dir.path().into(), options()).unwrap();
        for path in ["/loop.shtml", "/vloop.shtml", "/broken.shtml"] {
            assert_eq!(
                get_text(&server, path).await,
                (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
                "{}", path
            );
        }
    }

    #[tokio::test]
    async fn malformed_paths() {
        let dir = site();
        let server = Server::new(dir.path().into(), options()).unwrap();
        assert_eq!(
            get_text(&server, "/%zz").await,
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        );
        assert_eq!(
            get(&server, "/%ff.html").await.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get(&server, "/inc/../page.html").await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get(&server, "/inc/..%2fpage.html").await.status(),
            StatusCode::NOT_FOUND
        );

        // An encoded slash is part of the segment, not a separator.
        assert_eq!(
            get(&server, "/docs%2F").await.status(), StatusCode::NOT_FOUND
        );
        assert_eq!(
            get(&server, "/docs").await.status(),
            StatusCode::MOVED_PERMANENTLY
        );
    }

    struct Panicking;

    #[async_trait]
    impl DirectiveHandler for Panicking {
        async fn try_handle(
            &self, _ctx: &SsiContext<'_>, directive: &Directive,
        ) -> Result<Option<String>, Failed> {
            if directive.command() == "panic" {
                panic!("handler panicked")
            }
            Ok(None)
        }
    }

    #[tokio::test]
    async fn panics_and_request_log() {
        let dir = site();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log_seen = seen.clone();
        let mut chain = HandlerChain::new();
        chain.push(Panicking);
        let mut options = options();
        options.ssi.insert("shtml".into(), chain);
        options.log = Arc::new(
            move |url: &str, status: StatusCode, _diagnostic: &str| {
                log_seen.lock().unwrap().push((url.to_string(), status))
            }
        );
        let server = Server::new(dir.path().into(), options).unwrap();

        assert_eq!(
            get_text(&server, "/panic.shtml").await,
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        );
        assert_eq!(get(&server, "/page.html").await.status(), StatusCode::OK);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("/panic.shtml".to_string(), StatusCode::INTERNAL_SERVER_ERROR),
                ("/page.html".to_string(), StatusCode::OK),
            ]
        );
    }
}
