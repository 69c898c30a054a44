//! Config Commands

use anyhow::Result;
use clap::Subcommand;

use crate::context::CliContext;
use crate::output::print_success;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write the effective configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn execute(cmd: ConfigCommands, ctx: &CliContext) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            println!("# {}", ctx.config_path.display());
            println!("{}", ctx.config.to_toml()?);
        }

        ConfigCommands::Init { force } => {
            if ctx.config_path.exists() && !force {
                anyhow::bail!("{:?} already exists; pass --force to overwrite", ctx.config_path);
            }
            ctx.config.save(&ctx.config_path)?;
            print_success(&format!("Configuration written to {}", ctx.config_path.display()));
        }
    }

    Ok(())
}
