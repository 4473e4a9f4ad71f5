//! Building responses.

use std::fmt;
use hyper::{Body, HeaderMap, StatusCode};
use hyper::body::Bytes;
use hyper::header::{
    CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH,
    LOCATION,
};
use hyper::http::response::Builder;
use log::{error, warn};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use crate::error::Failed;
use crate::mime::mime_type_for;
use crate::resolve::ResolvedNode;


//------------ Response ------------------------------------------------------

/// A response to be sent back to the client.
///
/// Next to the actual HTTP response, this keeps a short description of what
/// happened. This is only ever given to the request log and never included
/// in the body.
pub struct Response {
    inner: hyper::Response<Body>,
    diagnostic: String,
}

impl Response {
    /// Returns a Not Found response.
    pub fn not_found() -> Self {
        ResponseBuilder::new(StatusCode::NOT_FOUND)
            .diagnostic("not found")
            .empty()
    }

    /// Returns an Internal Server Error response.
    ///
    /// The body is always empty. The diagnostic only goes to the log.
    pub fn server_error(diagnostic: impl fmt::Display) -> Self {
        ResponseBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
            .diagnostic(diagnostic)
            .empty()
    }

    /// Returns a Moved Permanently response pointing to the given location.
    pub fn moved_permanently(location: &str) -> Self {
        ResponseBuilder::new(StatusCode::MOVED_PERMANENTLY)
            .location(location)
            .diagnostic(format_args!("redirect to {}", location))
            .empty()
    }

    /// Returns a Not Modified response.
    pub fn not_modified(etag: &str, max_age: u64) -> Self {
        ResponseBuilder::new(StatusCode::NOT_MODIFIED)
            .etag(etag)
            .cache_control(max_age)
            .diagnostic("not modified")
            .empty()
    }

    /// Returns a response streaming the content of a file.
    ///
    /// If the request already has the current version of the file as
    /// indicated by the If-None-Match header, the response is a 304 Not
    /// Modified instead.
    pub async fn file(
        headers: &HeaderMap,
        node: &ResolvedNode,
        max_age: u64,
    ) -> Self {
        let etag = node.etag();
        if etag_matches(headers, &etag) {
            return Self::not_modified(&etag, max_age)
        }
        let file = match File::open(&node.path).await {
            Ok(file) => file,
            Err(err) => {
                warn!("Failed to open {}: {}", node.path.display(), err);
                return Self::not_found()
            }
        };
        ResponseBuilder::ok()
            .content_type(&mime_type_for(&node.path))
            .cache_control(max_age)
            .etag(&etag)
            .content_length(node.size)
            .diagnostic(node.path.display())
            .stream(ReaderStream::new(file))
    }

    /// Returns a response with the processed text of an SSI document.
    ///
    /// Because the content differs from what’s in the file, there is no
    /// ETag.
    pub fn ssi(text: String, node: &ResolvedNode, max_age: u64) -> Self {
        ResponseBuilder::ok()
            .content_type(&mime_type_for(&node.path))
            .cache_control(max_age)
            .diagnostic(format_args!("{} (processed)", node.path.display()))
            .body(text)
    }

    /// Returns a response with an HTML page.
    pub fn html(text: String, diagnostic: impl fmt::Display) -> Self {
        ResponseBuilder::ok()
            .content_type("text/html; charset=UTF-8")
            .diagnostic(diagnostic)
            .body(text)
    }

    /// Returns the status code of the response.
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Returns the headers of the response.
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Returns the description of what happened.
    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    /// Converts the response into a hyper response.
    pub fn into_hyper(self) -> hyper::Response<Body> {
        self.inner
    }

    /// Reads the complete body and returns it as a string.
    pub async fn into_text(self) -> Result<String, Failed> {
        let bytes = match hyper::body::to_bytes(self.inner.into_body()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("Failed to read response body: {}", err);
                return Err(Failed)
            }
        };
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            warn!("Response body is not valid UTF-8.");
            Failed
        })
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.inner.status())
            .field("headers", self.inner.headers())
            .field("diagnostic", &self.diagnostic)
            .finish()
    }
}


//------------ ResponseBuilder ----------------------------------------------

#[derive(Debug)]
pub struct ResponseBuilder {
    builder: Builder,
    diagnostic: String,
}

impl ResponseBuilder {
    /// Creates a new builder with the given status.
    pub fn new(status: StatusCode) -> Self {
        ResponseBuilder {
            builder: Builder::new().status(status),
            diagnostic: String::new(),
        }
    }

    /// Creates a new builder for a 200 OK response.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// Adds the content type header.
    pub fn content_type(self, content_type: &str) -> Self {
        ResponseBuilder {
            builder: self.builder.header(CONTENT_TYPE, content_type),
            .. self
        }
    }

    /// Adds the ETag header.
    pub fn etag(self, etag: &str) -> Self {
        ResponseBuilder {
            builder: self.builder.header(ETAG, etag),
            .. self
        }
    }

    /// Adds the Cache-Control header with the given max age in seconds.
    pub fn cache_control(self, max_age: u64) -> Self {
        ResponseBuilder {
            builder: self.builder.header(
                CACHE_CONTROL, format!("max-age={}", max_age)
            ),
            .. self
        }
    }

    /// Adds the Content-Length header.
    pub fn content_length(self, len: u64) -> Self {
        ResponseBuilder {
            builder: self.builder.header(CONTENT_LENGTH, len),
            .. self
        }
    }

    /// Adds the Location header.
    pub fn location(self, location: &str) -> Self {
        ResponseBuilder {
            builder: self.builder.header(LOCATION, location),
            .. self
        }
    }

    /// Sets the diagnostic passed on to the request log.
    pub fn diagnostic(self, diagnostic: impl fmt::Display) -> Self {
        ResponseBuilder {
            diagnostic: diagnostic.to_string(),
            .. self
        }
    }

    fn finalize(self, body: Body) -> Response {
        let inner = match self.builder.body(body) {
            Ok(inner) => inner,
            Err(err) => {
                // Only happens with header values we can’t encode.
                error!("Failed to build HTTP response: {}", err);
                let mut inner = hyper::Response::new(Body::empty());
                *inner.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                inner
            }
        };
        Response { inner, diagnostic: self.diagnostic }
    }

    /// Finalizes the response by adding a body.
    pub fn body(self, body: impl Into<Bytes>) -> Response {
        self.finalize(Body::from(body.into()))
    }

    /// Finalizes the response by adding an empty body.
    pub fn empty(self) -> Response {
        self.finalize(Body::empty())
    }

    /// Finalizes the response with a body read from a file.
    ///
    /// The file is read lazily and closed when the body is dropped, whether
    /// it was sent completely or not.
    pub fn stream(self, body: ReaderStream<File>) -> Response {
        self.finalize(Body::wrap_stream(body))
    }
}


//------------ Entity Tags ---------------------------------------------------

/// Returns whether the If-None-Match headers contain the given tag.
///
/// The header values are split at commas and each item is compared after
/// trimming white space. Quotes and a weak prefix are ignored, so clients
/// that add them still match.
fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers.get_all(IF_NONE_MATCH).iter().filter_map(|value| {
        value.to_str().ok()
    }).flat_map(|value| value.split(',')).any(|item| {
        let item = item.trim();
        let item = item.strip_prefix("W/").unwrap_or(item);
        item.trim_matches('"') == etag
    })
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use hyper::header::HeaderValue;
    use crate::resolve::NodeKind;

    fn if_none_match(values: &[&'static str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(IF_NONE_MATCH, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn etags() {
        assert!(etag_matches(&if_none_match(&["12-345"]), "12-345"));
        assert!(etag_matches(&if_none_match(&["1-1, 12-345 "]), "12-345"));
        assert!(etag_matches(&if_none_match(&["1-1", "12-345"]), "12-345"));
        assert!(etag_matches(&if_none_match(&["W/\"12-345\""]), "12-345"));
        assert!(!etag_matches(&if_none_match(&["12-3456"]), "12-345"));
        assert!(!etag_matches(&HeaderMap::new(), "12-345"));
    }

    #[test]
    fn redirect() {
        let res = Response::moved_permanently("/docs/");
        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.headers()[LOCATION], "/docs/");
    }

    #[tokio::test]
    async fn file_and_not_modified() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        let node = ResolvedNode {
            path: file.path().into(),
            kind: NodeKind::File,
            size: 5,
            modified: 1000,
        };

        let res = Response::file(&HeaderMap::new(), &node, 2).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[ETAG], "5-1000");
        assert_eq!(res.headers()[CACHE_CONTROL], "max-age=2");
        assert_eq!(res.headers()[CONTENT_LENGTH], "5");
        assert_eq!(
            res.headers()[CONTENT_TYPE], "application/octet-stream"
        );
        assert_eq!(res.into_text().await.unwrap(), "hello");

        let res = Response::file(&if_none_match(&["5-1000"]), &node, 2).await;
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(res.headers()[ETAG], "5-1000");
        assert_eq!(res.into_text().await.unwrap(), "");
    }

    #[tokio::test]
    async fn server_error_has_empty_body() {
        let res = Response::server_error("something broke");
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.diagnostic(), "something broke");
        assert_eq!(res.into_text().await.unwrap(), "");
    }
}
