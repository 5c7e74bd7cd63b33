use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;

use usersnap::snapshot::{load, LoadOutcome};

/// Report what a startup would restore. Corrupt files are reported, not fatal.
pub fn exec(path: PathBuf, json: bool) -> Result<()> {
    let loaded = load(&path);
    let (status, skipped, reason) = match &loaded.outcome {
        LoadOutcome::Missing => ("missing", 0, None),
        LoadOutcome::Restored { skipped, .. } => ("restored", *skipped, None),
        LoadOutcome::Corrupt(why) => ("corrupt", 0, Some(why.clone())),
    };

    if json {
        let v = json!({
            "path": path.display().to_string(),
            "status": status,
            "records": loaded.dataset.users.len(),
            "skipped": skipped,
            "next_id": loaded.dataset.next_id,
            "reason": reason,
        });
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(());
    }

    println!("snapshot: {}", path.display());
    println!("  status:  {}", loaded.outcome);
    println!("  records: {}", loaded.dataset.users.len());
    println!("  next_id: {}", loaded.dataset.next_id);
    if let Some(max) = loaded.dataset.max_id() {
        println!("  max_id:  {}", max);
    }
    Ok(())
}
