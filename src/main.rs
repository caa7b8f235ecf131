use canopy::cli::commands::Cli;
use canopy::cli::handlers;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(handlers::dispatch(cli)) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr, filtered by `CANOPY_LOG` (default `warn`)
fn init_tracing() {
    let filter = EnvFilter::try_from_env("CANOPY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
