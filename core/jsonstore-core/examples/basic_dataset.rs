//! Dataset walkthrough: open, insert, look up, reopen.
//!
//! Run: RUST_LOG=debug cargo run --example basic_dataset --features logging

use jsonstore_core::config::{Column, DatasetConfig, Mode, RepositoryConfig};
use jsonstore_core::dataset::Dataset;
use jsonstore_core::record::record_of;
use serde_json::json;

fn main() -> jsonstore_core::StoreResult<()> {
    jsonstore_core::logging::init();

    let dir = tempfile::tempdir()?;
    let config = DatasetConfig::new(
        RepositoryConfig::new(dir.path(), "accounts_")
            .with_mode(Mode::Rewritable)
            .with_readme("account records, one JSON object per line"),
        vec![
            Column::case_insensitive("screen_name"),
            Column::case_sensitive("id"),
        ],
    );

    println!("=== jsonstore dataset example ===\n");
    let accounts = Dataset::open_with_config(config.clone())?;
    for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "alice")] {
        accounts.put_unique(&record_of([("id", json!(id)), ("screen_name", json!(name))]))?;
    }

    // "alice" (id 3) collided with "Alice" and did not take the slot
    let alice = accounts.get("screen_name", "ALICE")?;
    println!("screen_name=ALICE -> {alice:?}");
    println!("id=3 -> {:?}", accounts.get("id", 3)?);
    println!("size: {}", accounts.size());
    accounts.close()?;

    println!("\nReopening, the index is rebuilt from the dump files...");
    let reopened = Dataset::open_with_config(config)?;
    println!("size after reopen: {}", reopened.size());
    for path in reopened.repository().get_own_dumps(usize::MAX)? {
        println!("  dump: {}", path.display());
    }
    reopened.close()?;

    println!("\n=== done ===");
    Ok(())
}
