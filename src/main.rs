use anyhow::Result;
use clap::Parser;

use gateway_doctor::{app::load_config, cli::{handle_command, Cli}, utils::init_logger};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Logs go to stderr so reports on stdout stay machine-readable
    init_logger(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let code = handle_command(&cli, &config).await?;

    // Exit with appropriate code
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}
