//! Server-side includes.
//!
//! Documents with an extension registered for SSI processing are scanned
//! for directives of the form `<!--#command key="value" ...-->`. Each
//! directive is run through the [`HandlerChain`] registered for the
//! extension and replaced by whatever the first willing handler returns.
//! Directives no handler cares about are left in the document as they are.
//!
//! The handlers for a document run concurrently. The output still has the
//! replacements in the order the directives appear in the document.
//!
//! Handlers may process other documents in turn, either directly via the
//! filesystem or through the complete request pipeline. The nesting depth is
//! limited by the server’s configuration.

pub use self::directive::Directive;
pub use self::handler::{DirectiveHandler, HandlerChain, HandlerKind};
pub use self::include::{IncludeFile, IncludeUrl, IncludeVirtual};

pub mod directive;
pub mod handler;
pub mod include;

use std::path::Path;
use futures::future::try_join_all;
use hyper::HeaderMap;
use log::error;
use tokio::fs;
use crate::error::Failed;
use crate::http::Server;


//------------ SsiContext ----------------------------------------------------

/// Everything a handler needs to know about the document being processed.
///
/// A context is shared by all directives of one document. Nested
/// documents get a context of their own via [`nested`](Self::nested).
#[derive(Clone, Copy)]
pub struct SsiContext<'a> {
    /// The raw path of the request that lead to this document.
    pub url: &'a str,

    /// The headers of the request.
    pub headers: &'a HeaderMap,

    /// The path of the document being processed.
    pub file: &'a Path,

    /// The server processing the request.
    pub server: &'a Server,

    /// The handlers to run the directives through.
    pub chain: &'a HandlerChain,

    /// How many documents are wrapped around this one.
    pub depth: usize,
}

impl<'a> SsiContext<'a> {
    /// Returns a context for a document included by this one.
    pub fn nested(&self, file: &'a Path) -> Self {
        SsiContext {
            file,
            depth: self.depth + 1,
            .. *self
        }
    }

    /// Processes the document and returns the result.
    pub async fn process(&self) -> Result<String, Failed> {
        if self.depth > self.server.ssi_max_depth() {
            error!(
                "{}: includes nested deeper than {} levels.",
                self.file.display(), self.server.ssi_max_depth()
            );
            return Err(Failed)
        }
        let text = match fs::read_to_string(self.file).await {
            Ok(text) => text,
            Err(err) => {
                error!("Failed to read {}: {}", self.file.display(), err);
                return Err(Failed)
            }
        };
        self.substitute(&text).await
    }

    /// Replaces all directives in `text`.
    pub async fn substitute(&self, text: &str) -> Result<String, Failed> {
        let found = directive::scan(text);
        if found.is_empty() {
            return Ok(text.into())
        }
        let replacements = try_join_all(
            found.iter().map(|(_, directive)| async move {
                Ok::<_, Failed>(
                    match self.chain.handle(self, directive).await? {
                        Some(res) => res,
                        None => directive.raw().into(),
                    }
                )
            })
        ).await?;
        let mut res = String::with_capacity(text.len());
        let mut pos = 0;
        for ((range, _), replacement) in found.iter().zip(replacements) {
            res.push_str(&text[pos..range.start]);
            res.push_str(&replacement);
            pos = range.end;
        }
        res.push_str(&text[pos..]);
        Ok(res)
    }
}


//============ Tests =========================================================
