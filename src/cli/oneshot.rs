use std::sync::Arc;

use eyre::{Result, bail};

use crate::{
    bridge::Bridge,
    channel::vcontrold::VcontroldChannel,
    config::Config,
    defs::{Circuit, Field, Mode},
};

/// Single read through the same validation and queue path the server uses.
pub async fn get(config_path: &str, circuit: Circuit, field: Field, cached: bool) -> Result<()> {
    let bridge = connect(config_path).await?;

    let value = match cached {
        true => bridge.cached(circuit, field)?,
        false => bridge.read_fresh(circuit, field).await?,
    };

    println!("{value}");

    Ok(())
}

pub async fn set(config_path: &str, circuit: Circuit, field: Field, raw: &str) -> Result<()> {
    let bridge = connect(config_path).await?;

    if field == Field::TargetMode
        && let Ok(mode) = raw.parse::<Mode>()
    {
        bridge.set_target_mode(circuit, mode).await?;
        println!("{circuit} {field} set to {mode}");

        return Ok(());
    }

    let Ok(value) = raw.parse::<f32>() else {
        bail!("{raw:?} is neither a number nor a mode");
    };

    bridge.write_raw(circuit, field, value).await?;
    println!("{circuit} {field} set to {value}");

    Ok(())
}

async fn connect(config_path: &str) -> Result<Bridge> {
    let config = Config::load(config_path).await?;
    let channel = Arc::new(VcontroldChannel::from_config(&config.vcontrold));

    Ok(Bridge::new(&config, channel))
}
