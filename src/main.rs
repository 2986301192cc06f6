//! CLI entry point for spotify-relay.

use std::process::ExitCode;

mod app;
mod cli;

pub(crate) use app::exit::ProcessExit;

#[tokio::main]
async fn main() -> ExitCode {
    let result = app::runtime::run().await;
    app::exit::exit_for_result(result).into()
}
