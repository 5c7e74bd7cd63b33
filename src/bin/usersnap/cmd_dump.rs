use anyhow::{bail, Result};
use std::path::PathBuf;

use usersnap::snapshot::{load, LoadOutcome};

/// Вывести восстановленные записи одним JSON-массивом (stdout).
/// Missing/skipped сообщаются в stderr; corrupt-файл — ошибка, а не пустой `[]`.
pub fn exec(path: PathBuf) -> Result<()> {
    let loaded = load(&path);
    match &loaded.outcome {
        LoadOutcome::Corrupt(why) => bail!("dump: {} is corrupt: {}", path.display(), why),
        LoadOutcome::Missing => eprintln!("dump: {} not found, nothing restored", path.display()),
        LoadOutcome::Restored { skipped, .. } if *skipped > 0 => {
            eprintln!("dump: skipped {} malformed entr(ies)", skipped)
        }
        LoadOutcome::Restored { .. } => {}
    }
    println!("{}", serde_json::to_string_pretty(&loaded.dataset.users)?);
    Ok(())
}
