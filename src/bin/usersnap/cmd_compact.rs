use anyhow::{Context, Result};
use std::path::PathBuf;

use usersnap::snapshot::{compact, LoadOutcome};

pub fn exec(path: PathBuf, pretty: bool) -> Result<()> {
    let (loaded, bytes) =
        compact(&path, pretty).with_context(|| format!("compact {}", path.display()))?;
    let dropped = match loaded.outcome {
        LoadOutcome::Restored { skipped, .. } => skipped,
        _ => 0,
    };
    println!(
        "compact: {} record(s), {} dropped, {} B -> {}",
        loaded.dataset.users.len(),
        dropped,
        bytes,
        path.display()
    );
    Ok(())
}
