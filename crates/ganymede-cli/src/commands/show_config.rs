//! `ganymede config`: print the effective settings.

use anyhow::Result;

use super::print_json;
use crate::config::Config;

pub fn run(config: &Config, as_json: bool) -> Result<()> {
    if as_json {
        print_json(config)
    } else {
        print!("{}", config.to_toml()?);
        Ok(())
    }
}
