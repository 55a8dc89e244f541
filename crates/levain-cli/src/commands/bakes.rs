use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use levain_core::{Bake, BakeStorage};

use super::{open_bakes, CliResult};

#[derive(Subcommand)]
pub enum BakesAction {
    /// Store a bake (replaces an existing one with the same ID)
    Put {
        /// Bake ID
        id: String,
        /// Recipe name
        #[arg(long, default_value = "")]
        recipe: String,
        /// Start time (RFC 3339); defaults to now
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// Minutes from start to the estimated end
        #[arg(long)]
        minutes: i64,
    },
    /// Print a bake as JSON
    Show {
        /// Bake ID
        id: String,
    },
}

pub async fn run(action: BakesAction) -> CliResult {
    let storage = open_bakes()?;
    match action {
        BakesAction::Put {
            id,
            recipe,
            start,
            minutes,
        } => {
            let start = start.unwrap_or_else(Utc::now);
            let bake = Bake {
                id,
                recipe_name: recipe,
                current_step: 0,
                start_time: start,
                estimated_end_time: start + Duration::minutes(minutes),
                timeline_adjustments: Vec::new(),
            };
            storage.put(&bake)?;
            println!("{}", serde_json::to_string_pretty(&bake)?);
        }
        BakesAction::Show { id } => match storage.get_bake(&id).await? {
            Some(bake) => println!("{}", serde_json::to_string_pretty(&bake)?),
            None => {
                eprintln!("bake not found: {id}");
                std::process::exit(1);
            }
        },
    }
    Ok(())
}
