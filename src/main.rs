#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use quic_bridge::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.rtp.port_range.size() == 0 {
        log::warn!(
            "The rtp port range is empty, nothing will be bound, it's just a program without any functionality :-)"
        );

        return Ok(());
    }

    quic_bridge::startup(config).await
}
