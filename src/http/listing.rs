//! Directory listings.

use std::path::Path;
use log::warn;
use tokio::fs;
use crate::utils::str::{encode_href, escape_entities};
use super::response::Response;


const HEADER: &str = "<!DOCTYPE html>\n<html>\n\
    <head><title>List</title></head>\n<body>\n";

const TRAILER: &str = "\n</body>\n</html>\n";


/// Returns a response listing the content of a directory.
///
/// If listing is not `enabled`, returns a Not Found response instead.
/// Entries starting with a dot are skipped. The entries are sorted by name
/// so the page doesn’t depend on the order the filesystem hands them out.
pub async fn list(path: &Path, enabled: bool) -> Response {
    if !enabled {
        return Response::not_found()
    }
    let entries = match read_entries(path).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Failed to list directory {}: {}", path.display(), err);
            return Response::not_found()
        }
    };
    let mut res = String::from(HEADER);
    for (name, is_dir) in entries {
        let escaped = escape_entities(&name);
        let slash = if is_dir { "/" } else { "" };
        res.push_str(&format!(
            "<div><a href='./{}{}'>{}</a></div>",
            encode_href(&escaped), slash, escaped
        ));
    }
    res.push_str(TRAILER);
    Response::html(res, format_args!("listing {}", path.display()))
}

/// Returns the visible entries of a directory sorted by name.
///
/// Entries whose name isn’t valid Unicode are skipped.
async fn read_entries(
    path: &Path
) -> Result<Vec<(String, bool)>, std::io::Error> {
    let mut dir = fs::read_dir(path).await?;
    let mut res = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if name.starts_with('.') {
            continue
        }
        // Follows symlinks so a link to a directory is listed as one.
        let is_dir = match fs::metadata(entry.path()).await {
            Ok(metadata) => metadata.is_dir(),
            Err(_) => false,
        };
        res.push((name, is_dir));
    }
    res.sort();
    Ok(res)
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use hyper::StatusCode;
    use tempfile::TempDir;

    #[tokio::test]
    async fn listing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a <&>.txt"), "a").unwrap();
        std::fs::write(dir.path().join(".hidden"), "h").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let res = list(dir.path(), true).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.into_text().await.unwrap(),
            "<!DOCTYPE html>\n<html>\n<head><title>List</title></head>\n\
             <body>\n\
             <div><a href='./a%20&lt;&amp;&gt;.txt'>a &lt;&amp;&gt;.txt</a></div>\
             <div><a href='./b.txt'>b.txt</a></div>\
             <div><a href='./sub/'>sub</a></div>\
             \n</body>\n</html>\n"
        );
    }

    #[tokio::test]
    async fn disabled() {
        let dir = TempDir::new().unwrap();
        assert_eq!(list(dir.path(), false).await.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            list(&dir.path().join("missing"), true).await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
