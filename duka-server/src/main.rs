use duka_server::{Config, Server, init_logger_with_file, print_banner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    init_logger_with_file(None, Some(&config.work_dir));

    print_banner();
    tracing::info!(environment = %config.environment, "Duka server starting...");

    let server = Server::new(config);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {e}");
        anyhow::bail!("server exited with error: {e}");
    }

    Ok(())
}
