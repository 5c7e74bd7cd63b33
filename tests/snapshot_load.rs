// tests/snapshot_load.rs
//
// Запуск только этого файла:
//   cargo test --test snapshot_load -- --nocapture
//
// Покрываем:
// 1) save -> load round-trip (набор записей + счётчик id > max id).
// 2) Идемпотентность load на неизменённом файле.
// 3) Фоллбэки: нет файла, не-JSON, чужая форма -> пустой набор без ошибки.
// 4) Legacy-форма {"<id>": {...}} и pass-through неизвестных полей.
// 5) Граница диапазона id: u64::MAX не имеет преемника и пропускается.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde_json::{json, Value};

use usersnap::{load, save, LoadOutcome, SnapshotManager, Store, StoreError, User, UserAttrs, MAX_USER_ID};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("ustest-load-{prefix}-{pid}-{t}-{id}"))
}

fn sample() -> Vec<User> {
    vec![
        User::new(1, UserAttrs::new("Ann", "Lee")),
        User::new(4, UserAttrs::new("Bo", "Park").with_extra("email", json!("bo@example.org"))),
        User::new(9, UserAttrs::new("Cy", "")),
    ]
}

#[test]
fn save_then_load_roundtrip() -> Result<()> {
    let root = unique_root("roundtrip");
    fs::create_dir_all(&root)?;
    let path = root.join("snapshot.users.json");

    let users = sample();
    let bytes = save(&path, &users)?;
    assert_eq!(bytes, fs::metadata(&path)?.len());

    let loaded = load(&path);
    assert_eq!(
        loaded.outcome,
        LoadOutcome::Restored { records: 3, skipped: 0 }
    );
    assert_eq!(loaded.dataset.users, users);
    assert_eq!(loaded.dataset.next_id, 10, "counter must pass the max restored id");

    // pass-through поля доживают до диска
    let on_disk: Value = serde_json::from_slice(&fs::read(&path)?)?;
    assert_eq!(on_disk[1]["email"], json!("bo@example.org"));
    Ok(())
}

#[test]
fn load_is_idempotent() -> Result<()> {
    let root = unique_root("idem");
    fs::create_dir_all(&root)?;
    let path = root.join("snapshot.users.json");
    save(&path, &sample())?;

    let a = load(&path);
    let b = load(&path);
    assert_eq!(a.dataset, b.dataset);
    assert_eq!(a.outcome, b.outcome);
    Ok(())
}

#[test]
fn missing_file_yields_empty_dataset() {
    let path = unique_root("missing").join("snapshot.users.json");
    let loaded = load(&path);
    assert_eq!(loaded.outcome, LoadOutcome::Missing);
    assert!(loaded.dataset.is_empty());
    assert_eq!(loaded.dataset.next_id, 1);
}

#[test]
fn corrupt_files_fall_back_to_empty() -> Result<()> {
    let root = unique_root("corrupt");
    fs::create_dir_all(&root)?;

    let cases: [(&str, &[u8]); 5] = [
        ("text", b"not json"),
        ("string", b"\"not json\""),
        ("wrong-shape", br#"{"wrong":"shape"}"#),
        ("truncated", br#"[{"id": 1, "first_name": "Ann""#),
        ("empty", b""),
    ];
    for (name, body) in cases {
        let path = root.join(format!("{name}.json"));
        fs::write(&path, body)?;
        let loaded = load(&path);
        assert!(
            matches!(loaded.outcome, LoadOutcome::Corrupt(_)),
            "{name}: expected corrupt, got {:?}",
            loaded.outcome
        );
        assert!(loaded.dataset.is_empty(), "{name}: dataset must be empty");
        assert_eq!(loaded.dataset.next_id, 1);
    }
    Ok(())
}

#[test]
fn malformed_entries_are_skipped_not_fatal() -> Result<()> {
    let root = unique_root("entries");
    fs::create_dir_all(&root)?;
    let path = root.join("snapshot.users.json");
    fs::write(
        &path,
        br#"[{"id": 3, "first_name": "Ann"}, {"name": "no id"}, 7, {"id": "5", "last_name": "Lee"}]"#,
    )?;

    let loaded = load(&path);
    assert_eq!(
        loaded.outcome,
        LoadOutcome::Restored { records: 2, skipped: 2 }
    );
    let ids: Vec<u64> = loaded.dataset.users.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![3, 5]);
    assert_eq!(loaded.dataset.next_id, 6);
    Ok(())
}

#[test]
fn legacy_map_snapshot_is_restored() -> Result<()> {
    let root = unique_root("legacy");
    fs::create_dir_all(&root)?;
    let path = root.join("snapshot.users.json");
    fs::write(
        &path,
        r#"{
  "1": {"first_name": "Ann", "last_name": "Lee"},
  "12": {"first_name": "Bo", "last_name": "Park"}
}
"#,
    )?;

    let loaded = load(&path);
    assert_eq!(
        loaded.outcome,
        LoadOutcome::Restored { records: 2, skipped: 0 }
    );
    assert_eq!(loaded.dataset.users[1].id, 12);
    assert_eq!(loaded.dataset.users[1].attrs.first_name, "Bo");
    assert_eq!(loaded.dataset.next_id, 13);
    Ok(())
}

#[test]
fn ids_without_a_successor_are_skipped() -> Result<()> {
    let root = unique_root("maxid");
    fs::create_dir_all(&root)?;

    // Массив: u64::MAX (числом и строкой) пропускается, MAX_USER_ID принимается.
    let path = root.join("array.json");
    let body = json!([
        {"id": u64::MAX, "first_name": "x"},
        {"id": u64::MAX.to_string(), "first_name": "y"},
        {"id": MAX_USER_ID, "first_name": "last"},
    ]);
    fs::write(&path, serde_json::to_vec(&body)?)?;
    let loaded = load(&path);
    assert_eq!(
        loaded.outcome,
        LoadOutcome::Restored { records: 1, skipped: 2 }
    );
    assert_eq!(loaded.dataset.users[0].id, MAX_USER_ID);
    assert_eq!(loaded.dataset.next_id, u64::MAX);

    // Legacy-ключ тоже проверяется по диапазону.
    let legacy = root.join("legacy.json");
    fs::write(
        &legacy,
        format!(r#"{{"{}": {{"first_name": "x"}}, "7": {{"first_name": "ok"}}}}"#, u64::MAX),
    )?;
    let loaded = load(&legacy);
    assert_eq!(
        loaded.outcome,
        LoadOutcome::Restored { records: 1, skipped: 1 }
    );
    assert_eq!(loaded.dataset.next_id, 8);

    // Стор после такого старта не выдаёт id с переполнением.
    let store = Store::new();
    SnapshotManager::new(&path).load_into(&store)?;
    assert_eq!(store.len(), 1);
    assert_eq!(store.create(UserAttrs::new("more", "")), Err(StoreError::IdsExhausted));
    assert_eq!(store.len(), 1);
    Ok(())
}
