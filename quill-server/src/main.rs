use std::env;

use log::error;
use tokio::io::BufReader;

use quill_server::{
    Console, MemoryDocumentStore, MemoryUserDirectory, ServerConfig, SyncCoordinator, SyncServer,
};

/// Environment variable naming a JSON config file.
const CONFIG_ENV: &str = "QUILL_CONFIG";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match env::var_os(CONFIG_ENV) {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve(config));
    // the stdin reader may still be parked in a blocking read
    runtime.shutdown_background();
    result
}

async fn serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let users = MemoryUserDirectory::new();
    let mut server = SyncServer::bind(config).await?;
    server.add_handler(SyncCoordinator::new(MemoryDocumentStore::new(), users.clone()));

    let shutdown = server.shutdown_handle();
    let console = Console::new(users, shutdown.clone());

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move { ctrl_c.shutdown_on(tokio::signal::ctrl_c()).await });

    let operator = tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(err) = console.run(stdin, tokio::io::stdout()).await {
            error!("console failed: {err}");
        }
    });

    let result = server.run().await;
    operator.abort();
    result?;
    Ok(())
}
