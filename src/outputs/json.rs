//! JSON run summaries.
//!
//! One file per site, overwritten on every run:
//! ```text
//! <base>/logs/run_<site-folder>.json
//! ```

use std::path::Path;

use tokio::fs;
use tracing::{error, info, instrument};

use crate::error::{Result, ScrapeError};
use crate::models::RunSummary;

/// Write a [`RunSummary`] as pretty JSON, creating the parent directory.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create summary dir");
            return Err(ScrapeError::io(dir, e));
        }
    }

    fs::write(path, json).await.map_err(|e| ScrapeError::io(path, e))?;
    info!("Wrote run summary");
    Ok(())
}
