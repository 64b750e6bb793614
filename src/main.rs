use clap::Parser;
use gcodelink::cli::{run, Cli};
use gcodelink::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging()?;
    tracing::debug!("gcodelink {} (built {})", gcodelink::VERSION, gcodelink::BUILD_DATE);

    if let Some(output) = run(cli).await? {
        println!("{}", output);
    }

    Ok(())
}
