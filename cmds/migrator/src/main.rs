use anyhow::{Context, Result};
use clap::Parser;
use migrator::{cli::Cli, commands, config::RunConfig, error::MigratorError, telemetry};

fn main() -> Result<()> {
	let cli = Cli::parse();

	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.context("building async runtime")?;

	runtime.block_on(async {
		let _telemetry = telemetry::init(cli.log_level)?;

		let invocation = cli.validate().map_err(MigratorError::from)?;
		let config = RunConfig::default();
		commands::run(&invocation, &config).await?;
		Ok(())
	})
}
