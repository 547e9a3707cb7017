//! The static-files stage: serves files under a configured path prefix from
//! a directory root, falling through to the rest of the chain on a miss.

use std::path::{Component, Path, PathBuf};

use http::Method;

use super::{Exchange, Next, Responder, RespondFuture};
use crate::http::{MediaType, Reply};

pub struct StaticFilesStage {
    prefix: String,
    root: PathBuf,
}

impl StaticFilesStage {
    pub fn new(prefix: String, root: PathBuf) -> StaticFilesStage {
        StaticFilesStage { prefix, root }
    }

    /// Resolve a request path under the root, refusing traversal escapes.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let rest = path.strip_prefix(&self.prefix)?;
        let rest = rest.trim_start_matches('/');
        if rest.is_empty() {
            return None;
        }
        let relative = Path::new(rest);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl Responder for StaticFilesStage {
    fn respond<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> RespondFuture<'a> {
        Box::pin(async move {
            if exchange.request.method() != Method::GET {
                return next.run(exchange).await;
            }
            let Some(file) = self.resolve(exchange.request.path()) else {
                return next.run(exchange).await;
            };
            match tokio::fs::read(&file).await {
                Ok(data) => {
                    let mime = mime_guess::from_path(&file).first_or_octet_stream();
                    let media = MediaType::essence_only(mime.essence_str());
                    Ok(Reply::bytes(media, data))
                }
                Err(_) => next.run(exchange).await,
            }
        })
    }
}
