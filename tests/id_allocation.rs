// tests/id_allocation.rs
//
// Запуск только этого файла:
//   cargo test --test id_allocation -- --nocapture
//
// Случайные последовательности create/update/delete (oorandom, фиксированные seed'ы):
// - id от create строго возрастают и не переиспользуются после delete;
// - delete(id) -> get(id) == NotFound;
// - list() совпадает с моделью (BTreeMap) после каждого шага.

use std::collections::BTreeMap;

use anyhow::Result;
use oorandom::Rand64;

use usersnap::{Store, StoreError, UserAttrs};

fn run_seed(seed: u64, steps: usize) -> Result<()> {
    let mut rng = Rand64::new(seed as u128);
    let store = Store::new();
    let mut model: BTreeMap<u64, String> = BTreeMap::new();
    let mut last_id = 0u64;
    let mut retired: Vec<u64> = Vec::new();

    for step in 0..steps {
        match rng.rand_range(0..10) {
            // create
            0..=4 => {
                let name = format!("s{seed}-{step}");
                let u = store.create(UserAttrs::new(name.clone(), ""))?;
                assert!(u.id > last_id, "seed {seed}: id {} not above {}", u.id, last_id);
                assert!(!retired.contains(&u.id), "seed {seed}: id {} reused", u.id);
                last_id = u.id;
                model.insert(u.id, name);
            }
            // delete (existing or random)
            5..=7 => {
                let id = pick(&mut rng, &model, last_id);
                let res = store.delete(id);
                if model.remove(&id).is_some() {
                    res?;
                    retired.push(id);
                    assert_eq!(store.get(id), Err(StoreError::NotFound(id)));
                } else {
                    assert_eq!(res, Err(StoreError::NotFound(id)));
                }
            }
            // update
            _ => {
                let id = pick(&mut rng, &model, last_id);
                let name = format!("upd{step}");
                let res = store.update(id, UserAttrs::new(name.clone(), ""));
                match model.get_mut(&id) {
                    Some(slot) => {
                        assert_eq!(res?.attrs.first_name, name);
                        *slot = name;
                    }
                    None => assert_eq!(res, Err(StoreError::NotFound(id))),
                }
            }
        }

        let listed: Vec<(u64, String)> = store
            .list()
            .into_iter()
            .map(|u| (u.id, u.attrs.first_name))
            .collect();
        let expected: Vec<(u64, String)> = model.iter().map(|(k, v)| (*k, v.clone())).collect();
        assert_eq!(listed, expected, "seed {seed}: divergence at step {step}");
    }
    Ok(())
}

fn pick(rng: &mut Rand64, model: &BTreeMap<u64, String>, last_id: u64) -> u64 {
    if !model.is_empty() && rng.rand_range(0..4) != 0 {
        let idx = rng.rand_range(0..model.len() as u64) as usize;
        *model.keys().nth(idx).unwrap_or(&1)
    } else {
        1 + rng.rand_range(0..last_id + 2)
    }
}

#[test]
fn random_sequences_keep_ids_monotonic_and_unique() -> Result<()> {
    for seed in [1u64, 7, 42, 2024, 0xDEAD_BEEF] {
        run_seed(seed, 400)?;
    }
    Ok(())
}
