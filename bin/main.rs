//! Entry point: load configuration, then run the instance until shutdown.

fn main() -> anyhow::Result<()> {
    let config_path = sendcored::config::find_config_file();
    let raw = match &config_path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?,
        None => String::new(),
    };
    let config: sendcored::Config =
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing config: {e}"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(config.run())
}
