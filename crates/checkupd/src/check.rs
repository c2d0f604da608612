//! One-shot `check` and `history` commands.

use std::path::Path;

use anyhow::{Context, anyhow, bail};
use tracing::info;

use checkup_core::{CheckResult, CheckupError};
use checkup_engine::Checkup;

use crate::Outcome;

fn load(config: &Path) -> anyhow::Result<Checkup> {
    Checkup::from_file(config).with_context(|| format!("loading {}", config.display()))
}

fn outcome(results: &[CheckResult]) -> Outcome {
    if results.iter().all(|r| r.healthy) {
        Outcome::Healthy
    } else {
        Outcome::Unhealthy
    }
}

/// `checkupd check [--store]`
pub async fn run(config: &Path, store: bool) -> anyhow::Result<Outcome> {
    let checkup = load(config)?;
    if checkup.probes.is_empty() {
        bail!("no checkers configured in {}", config.display());
    }

    if store {
        let results = checkup.check_and_store().await?;
        info!(checks = results.len(), "results stored");
        return Ok(Outcome::Healthy);
    }

    let results = checkup.check().await?;
    for result in &results {
        println!("{result}");
    }
    Ok(outcome(&results))
}

/// `checkupd history [--fetch <name>]`
pub fn history(config: &Path, fetch: Option<&str>) -> anyhow::Result<Outcome> {
    let checkup = load(config)?;
    let storage = checkup.storage.ok_or(CheckupError::NoStorage)?;
    let reader = storage
        .reader()
        .ok_or_else(|| anyhow!("{} storage cannot be read back", storage.kind()))?;

    match fetch {
        Some(name) => {
            for result in reader.fetch(name)? {
                println!("{result}");
            }
        }
        None => {
            for (name, stored_at) in reader.index()? {
                println!("{name}\t{stored_at}");
            }
        }
    }
    Ok(Outcome::Healthy)
}
