use clap::Parser;

fn main() -> anyhow::Result<()> {
    invload::logging::init();
    let cli = invload::cli::Cli::parse();
    invload::core::start(&cli)
}
