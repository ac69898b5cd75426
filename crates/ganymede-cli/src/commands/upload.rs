//! `ganymede upload <path>`: push a local file to the server.

use std::path::Path;

use anyhow::{Context, Result};
use ganymede_client::{upload, ClientConfig, GResult, SessionHandle, UploadReport};
use tokio::fs::File;
use tracing::{debug, info};

use super::Login;

pub async fn run(config: &ClientConfig, path: &Path, name: Option<&str>) -> Result<()> {
    let file = File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();
    let name = match name {
        Some(name) => name.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("path has no file name; pass --name")?,
    };

    let login = Login::open(config).await?;
    info!(%name, size, "uploading");
    let result = send(&login.session, file, &name, size, config.chunk_size()).await;
    login.close().await;

    let report = result.with_context(|| format!("upload of {} failed", path.display()))?;
    println!("Uploaded {name}: {} bytes in {} chunk(s).", report.bytes, report.chunks);
    Ok(())
}

async fn send(
    session: &SessionHandle,
    file: File,
    name: &str,
    size: u64,
    chunk_size: usize,
) -> GResult<UploadReport> {
    let receiver = session.open_upload(name, size).await?;
    upload(file, &*receiver, chunk_size, |sent| {
        debug!(sent, size, "upload progress");
    })
    .await
}
