//! `ganymede download <name>`: have the server push a file to disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ganymede_client::{
    Client, ClientConfig, DiskSink, GResult, GanymedeError, TransferOutcome, TransferReport,
};
use tracing::info;

use super::Login;

pub async fn run(config: &ClientConfig, name: &str, output: Option<&Path>) -> Result<()> {
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => Path::new(name)
            .file_name()
            .map(PathBuf::from)
            .context("server name has no file component; pass --output")?,
    };

    let login = Login::open(config).await?;
    info!(%name, path = %path.display(), "downloading");
    let result = fetch(&login.client, name, &path).await;
    login.close().await;

    let report = result.with_context(|| format!("download of {name} failed"))?;
    println!("Downloaded {name} to {}: {} bytes.", path.display(), report.bytes);
    Ok(())
}

/// The partial file is removed unless the transfer completes.
async fn fetch(client: &Client, name: &str, path: &Path) -> GResult<TransferReport> {
    let sink = DiskSink::create(path).await?;
    let receiver = client.receive_file(name, Box::new(sink)).await?;
    let report = receiver.finished().await;
    match report.outcome {
        TransferOutcome::Completed => Ok(report),
        outcome => Err(GanymedeError::RemoteBusiness {
            title: "Transfer incomplete".into(),
            message: format!("{name} ended as {outcome:?} after {} bytes", report.bytes),
        }),
    }
}
