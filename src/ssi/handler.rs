//! Directive handlers and the chains they form.

use std::{fmt, str};
use std::sync::Arc;
use async_trait::async_trait;
use crate::error::Failed;
use super::SsiContext;
use super::directive::Directive;
use super::include::{IncludeFile, IncludeUrl, IncludeVirtual};


//------------ DirectiveHandler ----------------------------------------------

/// Something that can produce the replacement text for a directive.
#[async_trait]
pub trait DirectiveHandler: Send + Sync {
    /// Tries to handle a directive.
    ///
    /// Returns `Ok(None)` if the handler isn’t responsible for the
    /// directive, in which case the next handler in the chain is asked.
    /// An error fails the whole document.
    async fn try_handle(
        &self,
        ctx: &SsiContext<'_>,
        directive: &Directive,
    ) -> Result<Option<String>, Failed>;
}


//------------ HandlerChain --------------------------------------------------

/// An ordered list of directive handlers.
///
/// The first handler that returns a replacement wins.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn DirectiveHandler>>,
}

impl HandlerChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the chain for the given list of standard handlers.
    pub fn from_kinds(kinds: &[HandlerKind]) -> Self {
        HandlerChain {
            handlers: kinds.iter().map(|kind| kind.handler()).collect()
        }
    }

    /// Appends a handler to the end of the chain.
    pub fn push(&mut self, handler: impl DirectiveHandler + 'static) {
        self.handlers.push(Arc::new(handler))
    }

    /// Returns the number of handlers in the chain.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns whether the chain has no handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the directive through the chain.
    ///
    /// Returns `Ok(None)` if no handler took care of it.
    pub async fn handle(
        &self,
        ctx: &SsiContext<'_>,
        directive: &Directive,
    ) -> Result<Option<String>, Failed> {
        for handler in &self.handlers {
            if let Some(res) = handler.try_handle(ctx, directive).await? {
                return Ok(Some(res))
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("len", &self.handlers.len())
            .finish()
    }
}


//------------ HandlerKind ---------------------------------------------------

/// The standard handlers that can be named in the configuration.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HandlerKind {
    /// Include a file relative to the current file.
    File,

    /// Include the response for a path relative to the request.
    Virtual,

    /// Include the body fetched from a URL.
    Url,
}

impl HandlerKind {
    /// The chain used when none is given explicitly.
    pub const DEFAULT_CHAIN: &'static [HandlerKind] = &[
        HandlerKind::File, HandlerKind::Virtual
    ];

    /// Returns a handler of this kind.
    pub fn handler(self) -> Arc<dyn DirectiveHandler> {
        match self {
            HandlerKind::File => Arc::new(IncludeFile),
            HandlerKind::Virtual => Arc::new(IncludeVirtual),
            HandlerKind::Url => Arc::new(IncludeUrl),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::File => "file",
            HandlerKind::Virtual => "virtual",
            HandlerKind::Url => "url",
        }
    }
}

impl str::FromStr for HandlerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(HandlerKind::File),
            "virtual" => Ok(HandlerKind::Virtual),
            "url" => Ok(HandlerKind::Url),
            _ => Err(format!("invalid SSI handler '{}'", s))
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn handler_kinds() {
        for kind in [HandlerKind::File, HandlerKind::Virtual, HandlerKind::Url] {
            assert_eq!(kind.as_str().parse::<HandlerKind>(), Ok(kind));
        }
        assert!("exec".parse::<HandlerKind>().is_err());
        assert_eq!(
            HandlerChain::from_kinds(HandlerKind::DEFAULT_CHAIN).len(), 2
        );
        assert!(HandlerChain::new().is_empty());
    }
}
