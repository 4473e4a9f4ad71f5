//! Resolving request paths to filesystem entities.
//!
//! This module contains the [`PathResolver`] which walks the decoded
//! segments of a request path down from the configured root directory. At
//! each step it tries the segment verbatim and then with each configured
//! fallback extension appended. Once all segments are consumed, the node
//! arrived at is classified into a file, a directory to be listed, a
//! redirect to the slash-terminated version of the path, or nothing at all.
//!
//! Resolution never leaves the root: segments that are empty, `.` or `..`,
//! or that would be interpreted as anything other than a single plain path
//! component, end resolution right away.

use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use log::{debug, warn};
use percent_encoding::percent_decode_str;
use tokio::fs;
use crate::error::Failed;


//------------ Configuration Constants ---------------------------------------

/// The documents tried in order when a directory is requested.
pub const INDEX_DOCUMENTS: &[&str] = &["index.html", "index.shtml"];


//------------ PathSegments --------------------------------------------------

/// The decoded segments of a request path.
///
/// The segments are what remains of the path after dropping the leading
/// slash, splitting at all other slashes, and percent-decoding each part. A
/// path with a trailing slash thus ends in an empty segment.
///
/// Because splitting happens first, an encoded slash `%2F` stays inside its
/// segment. Such a segment can never name an entry of a directory, so
/// `/docs%2F` is not found rather than being taken for `/docs/`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathSegments(Vec<String>);

impl PathSegments {
    /// Decodes a raw, percent-encoded request path.
    ///
    /// Fails if the path contains a percent sign not followed by two hex
    /// digits or if the decoded octets aren’t valid UTF-8.
    pub fn decode(raw: &str) -> Result<Self, Failed> {
        let bytes = raw.as_bytes();
        let mut pos = 0;
        while let Some(idx) = raw[pos..].find('%') {
            let start = pos + idx;
            let valid = bytes.len() > start + 2
                && bytes[start + 1].is_ascii_hexdigit()
                && bytes[start + 2].is_ascii_hexdigit();
            if !valid {
                warn!("Malformed percent-encoding in request path '{}'", raw);
                return Err(Failed)
            }
            pos = start + 3;
        }
        let raw_path = raw.strip_prefix('/').unwrap_or(raw);
        raw_path.split('/').map(|segment| {
            match percent_decode_str(segment).decode_utf8() {
                Ok(segment) => Ok(segment.into_owned()),
                Err(err) => {
                    warn!(
                        "Request path '{}' is not valid UTF-8: {}", raw, err
                    );
                    Err(Failed)
                }
            }
        }).collect::<Result<Vec<_>, _>>().map(PathSegments)
    }

    /// Creates the segments from an already decoded path.
    pub fn from_decoded(path: &str) -> Self {
        let path = path.strip_prefix('/').unwrap_or(path);
        PathSegments(path.split('/').map(Into::into).collect())
    }

    /// Returns whether the path ends in a slash.
    pub fn has_trailing_slash(&self) -> bool {
        matches!(self.0.last(), Some(last) if last.is_empty())
    }

    /// Returns the segments as a slice.
    pub fn as_slice(&self) -> &[String] {
        self.0.as_slice()
    }
}


//------------ NodeKind ------------------------------------------------------

/// The kind of filesystem entity a request resolved to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    File,
    Directory,
}


//------------ ResolvedNode --------------------------------------------------

/// A filesystem entity under the root that a request resolved to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedNode {
    /// The path of the entity.
    ///
    /// This is the root joined with the matched segments, i.e., with any
    /// fallback extension or index document included.
    pub path: PathBuf,

    /// Whether this is a file or a directory.
    pub kind: NodeKind,

    /// The size of the entity in octets.
    pub size: u64,

    /// The modification time in milliseconds since the Unix epoch.
    pub modified: i64,
}

impl ResolvedNode {
    fn new(path: PathBuf, kind: NodeKind, metadata: &Metadata) -> Self {
        let modified = metadata.modified().ok().map(|time| {
            match time.duration_since(UNIX_EPOCH) {
                Ok(since) => since.as_millis() as i64,
                Err(err) => -(err.duration().as_millis() as i64),
            }
        }).unwrap_or(0);
        ResolvedNode {
            path,
            kind,
            size: metadata.len(),
            modified,
        }
    }

    /// Returns the entity tag for the node.
    ///
    /// The tag only depends on size and modification time.
    pub fn etag(&self) -> String {
        format!("{}-{}", self.size, self.modified)
    }

    /// Returns the file extension of the node if it has one.
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }
}


//------------ Resolution ----------------------------------------------------

/// The outcome of resolving a request path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// The path resolved to a file or a directory to be listed.
    Found(ResolvedNode),

    /// The path names a directory but lacks the trailing slash.
    Redirect,

    /// There is nothing to serve for the path.
    NotFound,
}


//------------ PathResolver --------------------------------------------------

/// Resolves path segments against a root directory.
#[derive(Clone, Copy, Debug)]
pub struct PathResolver<'a> {
    /// The root directory.
    root: &'a Path,

    /// The extensions to try if a segment doesn’t exist verbatim.
    extensions: &'a [String],

    /// Are directories without index documents resolved for listing?
    directory_list: bool,
}

impl<'a> PathResolver<'a> {
    pub fn new(
        root: &'a Path, extensions: &'a [String], directory_list: bool
    ) -> Self {
        PathResolver { root, extensions, directory_list }
    }

    /// Resolves the segments.
    pub async fn resolve(&self, segments: &PathSegments) -> Resolution {
        let mut current = self.root.to_path_buf();
        let mut metadata = match fs::metadata(&current).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(
                    "Cannot access root directory {}: {}",
                    current.display(), err
                );
                return Resolution::NotFound
            }
        };
        let mut rest = segments.as_slice();
        loop {
            match rest {
                [] => return self.evaluate(current, &metadata, false).await,
                [last] if last.is_empty() => {
                    return self.evaluate(current, &metadata, true).await
                }
                [head, tail @ ..] => {
                    if !is_plain_segment(head) {
                        debug!("Refusing path segment '{}'", head);
                        return Resolution::NotFound
                    }
                    match self.descend(&current, head).await {
                        Some((path, child)) => {
                            current = path;
                            metadata = child;
                            rest = tail;
                        }
                        None => return Resolution::NotFound
                    }
                }
            }
        }
    }

    /// Finds the child of `dir` matching `segment`.
    ///
    /// Tries the segment verbatim first and then with each of the fallback
    /// extensions in order.
    async fn descend(
        &self, dir: &Path, segment: &str
    ) -> Option<(PathBuf, Metadata)> {
        let candidates = Some(segment.to_string()).into_iter().chain(
            self.extensions.iter().map(|ext| format!("{}.{}", segment, ext))
        );
        for name in candidates {
            let path = dir.join(&name);
            if let Ok(metadata) = fs::metadata(&path).await {
                return Some((path, metadata))
            }
        }
        None
    }

    /// Classifies the node reached after all segments are consumed.
    async fn evaluate(
        &self, path: PathBuf, metadata: &Metadata, trailing_slash: bool
    ) -> Resolution {
        if metadata.is_file() {
            return Resolution::Found(
                ResolvedNode::new(path, NodeKind::File, metadata)
            )
        }
        if !metadata.is_dir() {
            return Resolution::NotFound
        }
        if !trailing_slash {
            return Resolution::Redirect
        }
        for name in INDEX_DOCUMENTS {
            let index = path.join(name);
            if let Ok(index_meta) = fs::metadata(&index).await {
                if index_meta.is_file() {
                    return Resolution::Found(
                        ResolvedNode::new(index, NodeKind::File, &index_meta)
                    )
                }
            }
        }
        if self.directory_list {
            Resolution::Found(
                ResolvedNode::new(path, NodeKind::Directory, metadata)
            )
        }
        else {
            Resolution::NotFound
        }
    }
}


//------------ Helpers -------------------------------------------------------

/// Returns whether a segment may be joined to a path.
///
/// This excludes the empty segment, `.` and `..`, as well as anything the
/// platform would treat as more than one normal path component.
fn is_plain_segment(segment: &str) -> bool {
    if segment.is_empty() || segment == "." || segment == ".." {
        return false
    }
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !segment.contains(['/', '\\'])
}


//============ Tests =========================================================
