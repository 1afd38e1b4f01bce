//! Behaviour shared by every storage backend, plus vector-specific checks.

use std::path::Path;
use std::sync::Arc;

use futures_util::TryStreamExt;
use persona_mcp::config::{StorageConfig, StorageKind};
use persona_mcp::storage::memory::MemoryStore;
use persona_mcp::storage::sqlite::{SqliteStore, IN_MEMORY_PATH};
use persona_mcp::storage::vector::VectorStore;
use persona_mcp::storage::{Predicate, Record, Storage, PAGE_SIZE};
use persona_mcp::AppError;
use serde_json::json;

async fn sqlite() -> Storage {
    let store = SqliteStore::open(Path::new(IN_MEMORY_PATH))
        .await
        .expect("in-memory sqlite");
    Storage::new(Arc::new(store))
}

fn vector(dimensions: usize) -> Storage {
    Storage::new(Arc::new(VectorStore::new(
        Arc::new(MemoryStore::new()),
        dimensions,
    )))
}

async fn backends() -> Vec<Storage> {
    vec![Storage::in_memory(), sqlite().await, vector(2)]
}

async fn keys(storage: &Storage, collection: &str, predicate: Predicate) -> Vec<String> {
    storage
        .query(collection, predicate)
        .map_ok(|record| record.key)
        .try_collect()
        .await
        .expect("query")
}

#[tokio::test]
async fn put_then_get_observes_the_write() {
    for storage in backends().await {
        storage
            .put("personas", "mentor", json!({"tone": "warm"}))
            .await
            .expect("put");
        assert_eq!(
            storage.get("personas", "mentor").await.expect("get"),
            json!({"tone": "warm"})
        );

        storage
            .put("personas", "mentor", json!({"tone": "stern"}))
            .await
            .expect("overwrite");
        assert_eq!(
            storage.get("personas", "mentor").await.expect("get"),
            json!({"tone": "stern"}),
            "{:?}",
            storage.kind()
        );
    }
}

#[tokio::test]
async fn missing_keys_and_deletes() {
    for storage in backends().await {
        let err = storage.get("personas", "ghost").await.expect_err("absent");
        assert!(matches!(err, AppError::NotFound(_)));

        storage.put("personas", "k", json!(1)).await.expect("put");
        assert!(storage.delete("personas", "k").await.expect("delete"));
        assert!(!storage.delete("personas", "k").await.expect("second delete"));
        assert!(storage.collections().await.expect("collections").is_empty());
    }
}

#[tokio::test]
async fn collections_are_isolated() {
    for storage in backends().await {
        storage.put("a", "same", json!("from a")).await.expect("put a");
        storage.put("b", "same", json!("from b")).await.expect("put b");
        assert_eq!(storage.get("a", "same").await.expect("get"), json!("from a"));
        assert_eq!(
            storage.collections().await.expect("collections"),
            vec!["a".to_owned(), "b".to_owned()]
        );
    }
}

#[tokio::test]
async fn empty_names_are_invalid() {
    let storage = Storage::in_memory();
    assert!(matches!(
        storage.put("", "k", json!(1)).await,
        Err(AppError::InvalidParams(_))
    ));
    assert!(matches!(
        storage.get("c", "").await,
        Err(AppError::InvalidParams(_))
    ));
    let result: Result<Vec<Record>, AppError> = storage.query("  ", Predicate::All).try_collect().await;
    assert!(matches!(result, Err(AppError::InvalidParams(_))));
}

#[tokio::test]
async fn query_streams_every_page_in_key_order() {
    let total = PAGE_SIZE * 2 + 5;
    for storage in backends().await {
        for i in 0..total {
            storage
                .put("notes", &format!("note:{i:04}"), json!({"n": i, "even": i % 2 == 0}))
                .await
                .expect("put");
        }
        storage.put("notes", "other", json!({})).await.expect("put");

        let all = keys(&storage, "notes", Predicate::All).await;
        assert_eq!(all.len(), total + 1);
        let mut sorted = all.clone();
        sorted.sort();
        assert_eq!(all, sorted);

        let prefixed = keys(
            &storage,
            "notes",
            Predicate::KeyPrefix {
                prefix: "note:".into(),
            },
        )
        .await;
        assert_eq!(prefixed.len(), total);

        let even = keys(
            &storage,
            "notes",
            Predicate::And {
                predicates: vec![
                    Predicate::KeyPrefix {
                        prefix: "note:".into(),
                    },
                    Predicate::FieldEquals {
                        path: "/even".into(),
                        value: json!(true),
                    },
                ],
            },
        )
        .await;
        assert_eq!(even.len(), total.div_ceil(2));
    }
}

#[tokio::test]
async fn dropping_a_query_early_and_restarting_begins_at_the_first_key() {
    let storage = Storage::in_memory();
    for key in ["a", "b", "c"] {
        storage.put("letters", key, json!(key)).await.expect("put");
    }
    let mut stream = storage.query("letters", Predicate::All);
    let first = stream.try_next().await.expect("next").expect("record");
    assert_eq!(first.key, "a");
    drop(stream);

    assert_eq!(keys(&storage, "letters", Predicate::All).await, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn prefix_with_like_wildcards_is_literal_in_sqlite() {
    let storage = sqlite().await;
    storage.put("c", "100%_done", json!(1)).await.expect("put");
    storage.put("c", "100x", json!(2)).await.expect("put");
    let found = keys(
        &storage,
        "c",
        Predicate::KeyPrefix {
            prefix: "100%".into(),
        },
    )
    .await;
    assert_eq!(found, vec!["100%_done"]);
}

#[tokio::test]
async fn vector_store_validates_embedding_dimensions() {
    let storage = vector(3);
    storage
        .put("docs", "ok", json!({"embedding": [0.1, 0.2, 0.3]}))
        .await
        .expect("valid embedding");
    storage
        .put("docs", "plain", json!({"text": "no embedding"}))
        .await
        .expect("embedding is optional");

    let short = storage
        .put("docs", "short", json!({"embedding": [0.1, 0.2]}))
        .await
        .expect_err("wrong length");
    assert!(matches!(short, AppError::InvalidParams(_)));

    let garbage = storage
        .put("docs", "bad", json!({"embedding": "nope"}))
        .await
        .expect_err("not numbers");
    assert!(matches!(garbage, AppError::InvalidParams(_)));
}

#[tokio::test]
async fn similarity_query_scores_and_filters() {
    let storage = vector(2);
    storage
        .put("docs", "east", json!({"embedding": [1.0, 0.0]}))
        .await
        .expect("put");
    storage
        .put("docs", "north", json!({"embedding": [0.0, 1.0]}))
        .await
        .expect("put");
    storage
        .put("docs", "northeast", json!({"embedding": [1.0, 1.0]}))
        .await
        .expect("put");
    storage
        .put("docs", "unembedded", json!({"title": "x"}))
        .await
        .expect("put");

    let records: Vec<Record> = storage
        .query(
            "docs",
            Predicate::Similar {
                field: "embedding".into(),
                vector: vec![1.0, 0.0],
                min_score: 0.5,
            },
        )
        .try_collect()
        .await
        .expect("query");

    let hits: Vec<(&str, f64)> = records
        .iter()
        .map(|r| (r.key.as_str(), r.score.expect("scored")))
        .collect();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].0, "east");
    assert!((hits[0].1 - 1.0).abs() < 1e-9);
    assert_eq!(hits[1].0, "northeast");
    assert!((hits[1].1 - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
}

#[tokio::test]
async fn connect_opens_the_configured_backend() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StorageConfig {
        kind: StorageKind::Vector,
        path: dir.path().join("nested/store.db"),
        vector_dimensions: 2,
    };
    let storage = Storage::connect(&config).await.expect("connect");
    assert_eq!(storage.kind(), StorageKind::Vector);
    storage
        .put("docs", "a", json!({"embedding": [1, 2]}))
        .await
        .expect("put");
    assert!(dir.path().join("nested/store.db").exists());

    let reopened = Storage::connect(&StorageConfig {
        kind: StorageKind::Document,
        ..config
    })
    .await
    .expect("reconnect");
    assert_eq!(
        reopened.get("docs", "a").await.expect("persisted"),
        json!({"embedding": [1, 2]})
    );
}
