//! Print the effective configuration.

use anyhow::Result;

use sandpool::Config;

/// Entry point: prints `config` as TOML
pub fn run(config: &Config) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
