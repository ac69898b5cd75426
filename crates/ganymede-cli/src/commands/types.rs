//! `ganymede types`: list the object types visible to this account.

use anyhow::Result;
use ganymede_client::{ClientConfig, TreeCache};
use serde_json::json;
use tracing::info;

use super::{print_json, Login};

pub async fn run(config: &ClientConfig, as_json: bool) -> Result<()> {
    let login = Login::open(config).await?;
    let mut tree = TreeCache::new(login.session.clone());
    let roots = tree.load_roots().await?;
    info!(types = roots.len(), "listing types");

    if as_json {
        let rows: Vec<_> = roots
            .iter()
            .map(|n| {
                json!({
                    "label": n.label(),
                    "type_ref": &n.type_ref().0,
                    "can_create": n.can_create(),
                    "can_inactivate": n.can_inactivate(),
                })
            })
            .collect();
        print_json(&rows)?;
    } else {
        println!("{:<28} {:<8} {}", "TYPE", "CREATE", "INACTIVATE");
        for node in roots {
            println!(
                "{:<28} {:<8} {}",
                node.label(),
                yes_no(node.can_create()),
                yes_no(node.can_inactivate())
            );
        }
    }

    login.close().await;
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
