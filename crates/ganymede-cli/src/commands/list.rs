//! `ganymede list <type>`: list the objects of one type.
//!
//! Shows only objects this account may edit unless `--all` is given.

use anyhow::Result;
use ganymede_client::{ClientConfig, TreeCache};
use tracing::debug;

use super::{print_json, Login};

pub async fn run(config: &ClientConfig, type_label: &str, all: bool, as_json: bool) -> Result<()> {
    let login = Login::open(config).await?;
    let mut tree = TreeCache::new(login.session.clone());
    tree.load_roots().await?;
    tree.node_mut(type_label)?.set_show_all(all);

    let children = tree.expand(type_label).await?;
    debug!(type_label, objects = children.len(), all, "expanded");

    if as_json {
        let handles: Vec<_> = children.iter().map(|c| c.handle()).collect();
        print_json(&handles)?;
    } else if children.is_empty() {
        println!("No {type_label} objects visible.");
    } else {
        println!("{:<12} {:<32} {}", "INVID", "LABEL", "FLAGS");
        for child in children {
            let mut flags = Vec::new();
            if child.is_editable() {
                flags.push("editable");
            }
            if child.is_inactive() {
                flags.push("inactive");
            }
            println!(
                "{:<12} {:<32} {}",
                child.invid().to_string(),
                child.label(),
                flags.join(",")
            );
        }
    }

    login.close().await;
    Ok(())
}
