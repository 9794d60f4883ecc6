use anyhow::{Context, Result};
use picteus_example_extension::ExampleExtension;
use picteus_extension_sdk::{ExtensionRuntime, ExtensionRuntimeConfig};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    // Stdout carries protocol frames.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ExtensionRuntimeConfig::from_env().context("invalid extension environment")?;
    let report = ExtensionRuntime::new(config)
        .run_stdio(ExampleExtension::new())
        .await
        .context("extension run failed")?;
    tracing::info!(
        extension_id = %report.extension_id,
        state = %report.final_state.as_str(),
        cause = ?report.cause,
        completed = report.dispatch.completed,
        "extension stopped"
    );
    Ok(())
}
