//! The standard include handlers.
//!
//! There are three ways to include content: [`IncludeFile`] reads another
//! file relative to the current one and processes it with the same handler
//! chain, [`IncludeVirtual`] runs a sub-request for a path relative to the
//! current request through the server, and [`IncludeUrl`] fetches content
//! from anywhere on the web.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use hyper::StatusCode;
use hyper::header::{HOST, IF_NONE_MATCH};
use log::{error, warn};
use reqwest::Url;
use crate::error::Failed;
use super::SsiContext;
use super::directive::Directive;
use super::handler::DirectiveHandler;


//------------ IncludeFile ---------------------------------------------------

/// Handles `<!--#include file="..."-->`.
///
/// The file is relative to the directory of the current document.
#[derive(Clone, Copy, Debug, Default)]
pub struct IncludeFile;

#[async_trait]
impl DirectiveHandler for IncludeFile {
    async fn try_handle(
        &self,
        ctx: &SsiContext<'_>,
        directive: &Directive,
    ) -> Result<Option<String>, Failed> {
        if directive.command() != "include" {
            return Ok(None)
        }
        let target = match directive.value("file") {
            Some(target) => target,
            None => return Ok(None),
        };
        let path = sibling_path(ctx.file, target);
        ctx.nested(&path).process().await.map(Some)
    }
}

/// Returns the path of `target` relative to the directory of `file`.
fn sibling_path(file: &Path, target: &str) -> PathBuf {
    let target = target.trim_start_matches('/');
    match file.parent() {
        Some(dir) => dir.join(target),
        None => PathBuf::from(target),
    }
}


//------------ IncludeVirtual ------------------------------------------------

/// Handles directives with a `virtual` parameter.
///
/// The parameter is a URL path relative to the current request. It is
/// served through the complete request pipeline and the body of the
/// response is included.
#[derive(Clone, Copy, Debug, Default)]
pub struct IncludeVirtual;

#[async_trait]
impl DirectiveHandler for IncludeVirtual {
    async fn try_handle(
        &self,
        ctx: &SsiContext<'_>,
        directive: &Directive,
    ) -> Result<Option<String>, Failed> {
        let target = match directive.value("virtual") {
            Some(target) => target,
            None => return Ok(None),
        };
        let path = virtual_path(ctx.url, target)?;

        // A conditional sub-request would produce an empty body.
        let mut headers = ctx.headers.clone();
        headers.remove(IF_NONE_MATCH);

        let response = ctx.server.respond(
            &path, &headers, ctx.depth + 1
        ).await?;
        if response.status() != StatusCode::OK {
            warn!(
                "{}: virtual include of '{}' failed with status {}.",
                ctx.file.display(), path, response.status()
            );
            return Err(Failed)
        }
        response.into_text().await.map(Some)
    }
}

/// Resolves `target` relative to the request path `base`.
///
/// Returns the resulting path still percent-encoded. Dot segments are
/// removed so the path can never climb above the root.
fn virtual_path(base: &str, target: &str) -> Result<String, Failed> {
    Url::parse("http://localhost/").and_then(|root| {
        root.join(base)
    }).and_then(|base| {
        base.join(target)
    }).map(|url| {
        url.path().to_string()
    }).map_err(|err| {
        warn!(
            "Cannot resolve virtual include '{}' relative to '{}': {}",
            target, base, err
        );
        Failed
    })
}


//------------ IncludeUrl ----------------------------------------------------

/// Handles directives with a `url` parameter.
///
/// The content is fetched from the URL and included verbatim. Relative URLs
/// are resolved against the `Host` header of the request.
#[derive(Clone, Copy, Debug, Default)]
pub struct IncludeUrl;

#[async_trait]
impl DirectiveHandler for IncludeUrl {
    async fn try_handle(
        &self,
        ctx: &SsiContext<'_>,
        directive: &Directive,
    ) -> Result<Option<String>, Failed> {
        let target = match directive.value("url") {
            Some(target) => target,
            None => return Ok(None),
        };
        let url = absolute_url(ctx, target)?;
        let response = match ctx.server.client().get(url.clone()).send().await {
            Ok(response) => response,
            Err(err) => {
                error!("{}: fetching {} failed: {}", ctx.file.display(), url, err);
                return Err(Failed)
            }
        };
        if !response.status().is_success() {
            error!(
                "{}: fetching {} failed with status {}.",
                ctx.file.display(), url, response.status()
            );
            return Err(Failed)
        }
        match response.text().await {
            Ok(text) => Ok(Some(text)),
            Err(err) => {
                error!("{}: reading {} failed: {}", ctx.file.display(), url, err);
                Err(Failed)
            }
        }
    }
}

/// Makes `target` an absolute URL.
fn absolute_url(ctx: &SsiContext<'_>, target: &str) -> Result<Url, Failed> {
    let host = ctx.headers.get(HOST).and_then(|host| host.to_str().ok());
    include_url(host, ctx.url, target).map_err(|err| {
        warn!(
            "{}: cannot resolve include URL '{}': {}",
            ctx.file.display(), target, err
        );
        Failed
    })
}

/// Resolves an include URL.
///
/// Relative targets are resolved against the request URL rebuilt from the
/// `Host` header. Without that header only absolute targets work.
fn include_url(
    host: Option<&str>, path: &str, target: &str,
) -> Result<Url, String> {
    let res = match host {
        Some(host) => {
            Url::parse(&format!("http://{}/", host)).and_then(|base| {
                base.join(path)
            }).and_then(|base| {
                base.join(target)
            })
        }
        None => Url::parse(target),
    };
    res.map_err(|err| err.to_string())
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sibling_paths() {
        assert_eq!(
            sibling_path(Path::new("/site/docs/a.shtml"), "b.shtml"),
            Path::new("/site/docs/b.shtml")
        );
        assert_eq!(
            sibling_path(Path::new("/site/docs/a.shtml"), "/inc/b.shtml"),
            Path::new("/site/docs/inc/b.shtml")
        );
    }

    #[test]
    fn include_urls() {
        assert_eq!(
            include_url(Some("example.com:8080"), "/a/b.shtml", "c.txt")
                .unwrap().as_str(),
            "http://example.com:8080/a/c.txt"
        );
        assert_eq!(
            include_url(Some("example.com"), "/a/", "https://other.net/x")
                .unwrap().as_str(),
            "https://other.net/x"
        );
        assert_eq!(
            include_url(None, "/a/", "http://other.net/x").unwrap().as_str(),
            "http://other.net/x"
        );
        assert!(include_url(None, "/a/", "x.txt").is_err());
    }

    #[test]
    fn virtual_paths() {
        assert_eq!(virtual_path("/a/b.shtml", "c.html").unwrap(), "/a/c.html");
        assert_eq!(virtual_path("/a/b.shtml", "/x/y").unwrap(), "/x/y");
        assert_eq!(virtual_path("/a/b/c", "../x").unwrap(), "/a/x");
        assert_eq!(virtual_path("/a/", "../../../x").unwrap(), "/x");
        assert_eq!(virtual_path("/", "a b.html").unwrap(), "/a%20b.html");
    }
}
