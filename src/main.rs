pub mod broker;
pub mod config;
pub mod process;
pub mod shell;
pub mod sink;
pub mod subscription;

use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::sink::TerminalProvider;
use crate::subscription::ManagerHandle;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load();
    info!(
        "Starting mqttdeck (defaults {}:{}, console {})",
        config.host, config.port, config.use_console
    );

    // Terminal surfaces never close, but the provider keeps the event channel
    // open so the manager's close handling stays armed.
    let (sink_tx, sink_rx) = mpsc::channel(32);
    let provider = TerminalProvider::new(sink_tx);

    let manager = ManagerHandle::spawn(config, Box::new(provider), sink_rx);
    let client = manager.client();

    shell::run(client).await?;

    manager.join().await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .pretty()
        .init();
}
