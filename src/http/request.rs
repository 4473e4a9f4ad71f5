//! Request handling.

use hyper::{Body, Uri};
use hyper::header::HeaderMap;


//------------ Request -------------------------------------------------------

/// The parts of an HTTP request the server cares about.
///
/// All requests are treated like a GET request, so the method and body are
/// dropped.
#[derive(Clone, Debug)]
pub struct Request {
    uri: Uri,
    headers: HeaderMap,
}

impl Request {
    /// Creates a new request from a URI and headers.
    pub fn new(uri: Uri, headers: HeaderMap) -> Self {
        Request { uri, headers }
    }

    /// Creates a request for a path without any headers.
    #[cfg(test)]
    pub fn get(path: &str) -> Self {
        Request {
            uri: path.parse().unwrap(),
            headers: HeaderMap::new(),
        }
    }

    /// Returns the URI of the request.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the raw, still percent-encoded path of the request.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the headers for modification.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}


//--- From

impl From<hyper::Request<Body>> for Request {
    fn from(req: hyper::Request<Body>) -> Self {
        let (parts, _) = req.into_parts();
        Request { uri: parts.uri, headers: parts.headers }
    }
}
