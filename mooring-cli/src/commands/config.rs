//! `mooring config show|save`

use anyhow::{Context, Result};
use clap::Subcommand;

use mooring_core::config::{self, config_path_at};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective config (file plus environment), secrets masked.
    Show,
    /// Write the effective config to ~/.mooring/config.yaml (mode 0600).
    Save,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let effective = config::load_at(&home).context("failed to load config")?;

    match command {
        ConfigCommand::Show => {
            println!("# {}", config_path_at(&home).display());
            print!(
                "{}",
                serde_yaml::to_string(&effective.masked()).context("failed to render config")?
            );
            if !effective.is_configured() {
                println!("# R2 storage is not configured");
            }
        }
        ConfigCommand::Save => {
            let path = config::save_at(&home, &effective)
                .with_context(|| format!("failed to save {}", config_path_at(&home).display()))?;
            println!("saved config: {}", path.display());
        }
    }
    Ok(())
}
