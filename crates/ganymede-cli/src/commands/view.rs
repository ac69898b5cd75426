//! `ganymede view <type:num>`: show one object's fields.
//!
//! The view loads in the background; the command waits for it up to the
//! configured load ceiling.

use anyhow::{bail, Context, Result};
use ganymede_client::{ClientConfig, LoadState};
use ganymede_core::Invid;

use super::{print_json, Login};

pub async fn run(config: &ClientConfig, invid: &str, as_json: bool) -> Result<()> {
    let invid: Invid = invid
        .parse()
        .with_context(|| format!("'{invid}' is not an object id (expected type:num)"))?;

    let login = Login::open(config).await?;
    let loader = login.client.open_view(invid).await?;

    let view = match loader.wait_for_load().await {
        LoadState::Loaded(view) => view,
        LoadState::Failed(reason) => {
            login.close().await;
            bail!("could not load {invid}: {reason}");
        }
        LoadState::Pending => {
            login.close().await;
            bail!(
                "{invid} did not load within {}s",
                config.load_ceiling().as_secs()
            );
        }
    };

    if as_json {
        print_json(&*view)?;
    } else {
        println!("{} ({})", view.label, view.invid);
        let width = view.fields.iter().map(|f| f.name.len()).max().unwrap_or(0);
        for field in &view.fields {
            let marker = if field.editable { "*" } else { " " };
            println!("{marker} {:<width$}  {}", field.name, field.value);
        }
    }

    login.close().await;
    Ok(())
}
