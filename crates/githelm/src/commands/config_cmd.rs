//! Config subcommand handlers.

use githelm_config::{config_path, load_config_or_default};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_line(&config_path().display().to_string());
            Ok(())
        }
        ConfigCommand::Show => {
            let config = load_config_or_default();
            let rendered = match global.output {
                OutputFormat::Text => config.to_redacted_toml()?,
                OutputFormat::Json => serde_json::to_string_pretty(&config.redacted())?,
            };
            output::print_line(rendered.trim_end());
            Ok(())
        }
    }
}
