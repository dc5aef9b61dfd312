use std::{net::SocketAddr, sync::Arc};

use eyre::Result;

use crate::{
    bridge::Bridge, channel::vcontrold::VcontroldChannel, config::Config,
    refresh::RefreshScheduler, server,
};

/// Brings the whole bridge up: configuration, channel, queue, refresh
/// scheduler and the HTTP API. Runs until the server fails or Ctrl-C.
pub async fn launch(config_path: &str) -> Result<()> {
    let config = Config::load(config_path).await?;

    let channel = Arc::new(VcontroldChannel::from_config(&config.vcontrold));
    let bridge = Bridge::new(&config, channel);

    let _scheduler = match config.refresh.enabled {
        true => Some(RefreshScheduler::start(
            bridge.clone(),
            config.refresh.interval,
        )),

        false => {
            tracing::info!("Periodic refresh is disabled");
            None
        }
    };

    let addr = SocketAddr::new(config.server.ip, config.server.port);

    tokio::select! {
        result = server::serve(addr, bridge, config.device.clone()) => result,

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}
