use pagegauge_cli::cli;

#[tokio::main]
async fn main() {
    let result = cli::run().await;
    std::process::exit(cli::app::status(&result));
}
