//! Cross-backend integration tests for debugscope
//!
//! `contract` holds the behavioral checks every `StorageAdapter` must pass;
//! `tests/storage_contract.rs` runs them against each backend.

use chrono::{DateTime, Duration, TimeZone, Utc};
use debugscope_core::{Entry, EntryType};
use serde_json::Value;

/// Fixed reference time, whole seconds so every backend stores it exactly
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Entry created `offset_secs` after `base_time()`
pub fn entry_at(entry_type: EntryType, batch_id: &str, content: Value, offset_secs: i64) -> Entry {
    Entry::new(entry_type, batch_id, content).with_created_at(base_time() + Duration::seconds(offset_secs))
}

pub mod contract {
    //! Each check starts from an initialized, empty store.

    use super::{base_time, entry_at};
    use chrono::Duration;
    use debugscope_core::{EntryType, ListOptions, StorageAdapter};
    use serde_json::json;

    pub async fn save_and_find(storage: &dyn StorageAdapter) {
        let entry = entry_at(EntryType::Request, "b1", json!({"method": "GET", "url": "/users"}), 0)
            .with_tags(vec!["status:200".to_string()])
            .with_duration(Some(12.5))
            .with_memory_usage(Some(2048));
        storage.save(&entry).await.unwrap();

        let found = storage.find(&entry.id).await.unwrap().unwrap();
        assert_eq!(found.id, entry.id);
        assert_eq!(found.batch_id, "b1");
        assert_eq!(found.entry_type, EntryType::Request);
        assert_eq!(found.content, entry.content);
        assert_eq!(found.tags, entry.tags);
        assert_eq!(found.created_at, entry.created_at);
        assert_eq!(found.duration, Some(12.5));
        assert_eq!(found.memory_usage, Some(2048));

        assert!(storage.find("missing").await.unwrap().is_none());
    }

    pub async fn save_upserts_by_id(storage: &dyn StorageAdapter) {
        let mut entry = entry_at(EntryType::Job, "b1", json!({"status": "queued"}), 0);
        storage.save(&entry).await.unwrap();

        let original = entry.clone();

        // Only the mutable fields follow a re-save; identity columns stay put
        entry.content = json!({"status": "processed"});
        entry.tags = vec!["job:done".to_string()];
        entry.duration = Some(12.5);
        entry.batch_id = "b2".to_string();
        entry.entry_type = EntryType::Log;
        entry.created_at = base_time() + Duration::seconds(90);
        storage.save(&entry).await.unwrap();

        let page = storage.list(&ListOptions::default()).await.unwrap();
        assert_eq!(page.total, 1);
        let stored = &page.data[0];
        assert_eq!(stored.content["status"], "processed");
        assert_eq!(stored.tags, vec!["job:done".to_string()]);
        assert_eq!(stored.duration, Some(12.5));
        assert_eq!(stored.batch_id, original.batch_id);
        assert_eq!(stored.entry_type, original.entry_type);
        assert_eq!(stored.created_at, original.created_at);

        assert_eq!(storage.find_by_batch("b1").await.unwrap().len(), 1);
        assert!(storage.find_by_batch("b2").await.unwrap().is_empty());
        let logs = storage
            .list(&ListOptions::default().with_type(EntryType::Log))
            .await
            .unwrap();
        assert_eq!(logs.total, 0);
    }

    pub async fn list_newest_first_with_pagination(storage: &dyn StorageAdapter) {
        let entries: Vec<_> = (0..5)
            .map(|i| entry_at(EntryType::Log, "b1", json!({"message": format!("m{}", i)}), i))
            .collect();
        storage.save_batch(&entries).await.unwrap();

        let page = storage
            .list(&ListOptions::default().with_page(2, 1))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.limit, 2);
        assert_eq!(page.offset, 1);
        assert!(page.has_more);
        let messages: Vec<_> = page.data.iter().map(|e| e.content["message"].clone()).collect();
        assert_eq!(messages, vec![json!("m3"), json!("m2")]);

        let last = storage
            .list(&ListOptions::default().with_page(2, 4))
            .await
            .unwrap();
        assert_eq!(last.data.len(), 1);
        assert!(!last.has_more);

        let beyond = storage
            .list(&ListOptions::default().with_page(10, 50))
            .await
            .unwrap();
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.total, 5);
    }

    pub async fn list_filters_compose(storage: &dyn StorageAdapter) {
        let entries = vec![
            entry_at(EntryType::Query, "b1", json!({"sql": "SELECT * FROM Users"}), 0)
                .with_tags(vec!["slow".to_string()]),
            entry_at(EntryType::Query, "b2", json!({"sql": "DELETE FROM orders"}), 10),
            entry_at(EntryType::Cache, "b1", json!({"key": "users:1"}), 20)
                .with_tags(vec!["hit".to_string()]),
            entry_at(EntryType::Log, "b3", json!({"message": "user signed in"}), 30)
                .with_tags(vec!["auth".to_string(), "slow".to_string()]),
        ];
        storage.save_batch(&entries).await.unwrap();

        let by_type = storage
            .list(&ListOptions::default().with_type(EntryType::Query))
            .await
            .unwrap();
        assert_eq!(by_type.total, 2);

        let by_batch = storage
            .list(&ListOptions::default().with_batch_id("b1"))
            .await
            .unwrap();
        assert_eq!(by_batch.total, 2);

        // Any-of: entries carrying either tag
        let tagged = storage
            .list(&ListOptions::default().with_tags(["hit", "auth"]))
            .await
            .unwrap();
        assert_eq!(tagged.total, 2);
        assert_eq!(tagged.data[0].entry_type, EntryType::Log);
        assert_eq!(tagged.data[1].entry_type, EntryType::Cache);

        let search = storage
            .list(&ListOptions::default().with_search("users"))
            .await
            .unwrap();
        assert_eq!(search.total, 2);

        let combined = storage
            .list(
                &ListOptions::default()
                    .with_type(EntryType::Query)
                    .with_tags(["slow"])
                    .with_search("select"),
            )
            .await
            .unwrap();
        assert_eq!(combined.total, 1);
        assert_eq!(combined.data[0].batch_id, "b1");

        // Bounds are exclusive
        let window = storage
            .list(
                &ListOptions::default()
                    .with_after(base_time())
                    .with_before(base_time() + Duration::seconds(30)),
            )
            .await
            .unwrap();
        assert_eq!(window.total, 2);
        assert!(window.data.iter().all(|e| e.entry_type != EntryType::Log));
    }

    pub async fn search_folds_ascii_only(storage: &dyn StorageAdapter) {
        let entries = vec![
            entry_at(EntryType::Log, "b1", json!({"message": "Café Straße"}), 0),
            entry_at(EntryType::Log, "b1", json!({"message": "CAFÉ OPEN"}), 10),
            entry_at(EntryType::Log, "b1", json!({"message": "cafe plain"}), 20),
        ];
        storage.save_batch(&entries).await.unwrap();

        let total = |term: &'static str| async move {
            storage
                .list(&ListOptions::default().with_search(term))
                .await
                .unwrap()
                .total
        };

        // ASCII letters fold both ways; accents and non-ASCII case do not
        assert_eq!(total("CAF").await, 3);
        assert_eq!(total("café").await, 1);
        assert_eq!(total("CAFÉ").await, 1);
        assert_eq!(total("cafe").await, 1);
        assert_eq!(total("STRASSE").await, 0);
        assert_eq!(total("straße").await, 1);
    }

    pub async fn find_by_batch_ascending(storage: &dyn StorageAdapter) {
        let late = entry_at(EntryType::Request, "b1", json!({"url": "/"}), 5);
        let early = entry_at(EntryType::Query, "b1", json!({"sql": "SELECT 1"}), 1);
        let other = entry_at(EntryType::Query, "b2", json!({"sql": "SELECT 2"}), 3);
        storage.save(&late).await.unwrap();
        storage.save(&early).await.unwrap();
        storage.save(&other).await.unwrap();

        let batch = storage.find_by_batch("b1").await.unwrap();
        let ids: Vec<_> = batch.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);

        assert!(storage.find_by_batch("unknown").await.unwrap().is_empty());
    }

    pub async fn prune_removes_older_entries(storage: &dyn StorageAdapter) {
        let entries: Vec<_> = (0..4)
            .map(|i| entry_at(EntryType::Event, "b1", json!({"name": i}), i * 60))
            .collect();
        storage.save_batch(&entries).await.unwrap();

        let deleted = storage.prune(base_time() + Duration::seconds(120)).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = storage.list(&ListOptions::default()).await.unwrap();
        assert_eq!(remaining.total, 2);
        assert!(remaining.data.iter().all(|e| e.created_at >= base_time() + Duration::seconds(120)));

        assert_eq!(storage.prune(base_time()).await.unwrap(), 0);
    }

    pub async fn stats_and_clear(storage: &dyn StorageAdapter) {
        let empty = storage.stats().await.unwrap();
        assert_eq!(empty.total_entries, 0);
        assert_eq!(empty.entries_by_type.len(), EntryType::ALL.len());
        assert!(empty.entries_by_type.values().all(|n| *n == 0));
        assert!(empty.oldest_entry.is_none());

        let entries = vec![
            entry_at(EntryType::Query, "b1", json!({}), 0),
            entry_at(EntryType::Query, "b1", json!({}), 10),
            entry_at(EntryType::Exception, "b1", json!({}), 20),
        ];
        storage.save_batch(&entries).await.unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.entries_by_type[&EntryType::Query], 2);
        assert_eq!(stats.entries_by_type[&EntryType::Exception], 1);
        assert_eq!(stats.entries_by_type[&EntryType::Dump], 0);
        assert_eq!(stats.oldest_entry, Some(base_time()));
        assert_eq!(stats.newest_entry, Some(base_time() + Duration::seconds(20)));

        storage.clear().await.unwrap();
        assert_eq!(storage.stats().await.unwrap().total_entries, 0);
        assert!(storage.find(&entries[0].id).await.unwrap().is_none());
    }
}
