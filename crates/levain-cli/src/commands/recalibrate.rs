use std::sync::Arc;

use clap::Args;
use levain_core::capability::SystemClock;
use levain_core::{EngineConfig, RecalibrationService, StaticSensor};

use super::{open_bakes, CliResult};

#[derive(Args)]
pub struct RecalibrateArgs {
    /// Bake ID
    pub bake_id: String,
    /// Temperature in tenths of a degree Celsius (e.g. 215 for 21.5°C)
    #[arg(long, allow_hyphen_values = true)]
    pub temperature: Option<i32>,
    /// Relative humidity in percent
    #[arg(long)]
    pub humidity: Option<i32>,
}

pub async fn run(args: RecalibrateArgs) -> CliResult {
    let config = EngineConfig::load_or_default();
    let service = RecalibrationService::new(
        Arc::new(open_bakes()?),
        Arc::new(StaticSensor {
            temperature: args.temperature,
            humidity: args.humidity,
        }),
        Arc::new(SystemClock),
        config.recalibration,
    );
    let bake = service.recalibrate_bake(&args.bake_id).await?;
    println!("{}", serde_json::to_string_pretty(&bake)?);
    Ok(())
}
