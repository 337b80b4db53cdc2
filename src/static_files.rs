use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use httpstatus::StatusCode;
use tracing::{debug, warn};

use crate::router::{Context, Handler};

/// Serves one file from disk, read fresh on every request, whatever the method
pub struct StaticFile {
    path: PathBuf,
}

impl StaticFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Handler for StaticFile {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        match tokio::fs::read(&self.path).await {
            Ok(contents) => {
                debug!(path = %self.path.display(), len = contents.len(), "serving file");
                ctx.response
                    .content_type(content_type(&self.path).to_string())
                    .write(&contents);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "static file not found");
                ctx.response.status_code(StatusCode::NotFound);
                ctx.response.write(b"404 page not found");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
