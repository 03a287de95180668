use clap::Parser;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = fwmark_exporter::cli::Cli::parse();
    let code = match fwmark_exporter::app::run(cli).await {
        Ok(exit) => exit.code(),
        Err(e) => {
            eprintln!("fwmark-exporter: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}
