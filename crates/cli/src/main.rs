use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    feedloop_cli::run().await
}
