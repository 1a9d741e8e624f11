use mio::Poll;
use proxy_log::{errors, info};
use server_proxy::config::{AppConfig, FromYaml};
use server_proxy::error::Result;
use server_proxy::server::Server;
use std::sync::atomic::Ordering;

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let content = std::fs::read_to_string(&config_path)?;
    let config = AppConfig::from_str(&content)?;

    let problems = config.validate();
    if !problems.is_empty() {
        for p in &problems {
            errors!("config: {}", p);
        }
        return Err("configuration failed validation".into());
    }
    config.display_config();

    let mut poll = Poll::new()?;
    let mut server = Server::new(config, &poll)?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        shutdown.store(true, Ordering::Relaxed);
    })
    .map_err(|e| format!("failed to install signal handler: {}", e))?;

    if let Ok(addr) = server.local_addr() {
        info!("listening on {}", addr);
    }
    server.run(&mut poll)
}
