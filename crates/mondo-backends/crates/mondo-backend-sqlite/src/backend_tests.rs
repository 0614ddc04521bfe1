//! Integration-style tests for the embedded SQL backend

use bson::{Bson, doc};
use mondo_core::{FindOptions, IndexSpec, MondoError};
use tempfile::TempDir;

use super::backend::{SqliteBackend, SqliteBackendConfig};

fn backend() -> (TempDir, SqliteBackend) {
    let dir = TempDir::new().expect("temp dir");
    let backend = SqliteBackend::new(SqliteBackendConfig {
        data_dir: dir.path().join("data"),
    })
    .expect("backend");
    (dir, backend)
}

mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_always_contains_admin() {
        let (_dir, backend) = backend();
        let dbs = backend.list_databases().await.unwrap();
        assert!(dbs.iter().any(|d| d.name == "admin"));
    }

    #[tokio::test]
    async fn test_create_and_drop_database() {
        let (_dir, backend) = backend();
        backend.create_database("shop").await.unwrap();
        assert!(backend.database_exists("shop").await.unwrap());
        let dbs = backend.list_databases().await.unwrap();
        assert!(dbs.iter().any(|d| d.name == "shop"));

        backend.drop_database("shop").await.unwrap();
        assert!(!backend.database_exists("shop").await.unwrap());
    }

    #[tokio::test]
    async fn test_hostile_database_name_is_rejected() {
        let (_dir, backend) = backend();
        let err = backend.create_database("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, MondoError::IllegalName(_)));
    }
}

mod crud_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_then_find_round_trips() {
        let (_dir, backend) = backend();
        let oid = bson::oid::ObjectId::new();
        let when = bson::DateTime::from_millis(1_705_314_645_123);
        let doc = doc! {
            "_id": oid,
            "name": "widget",
            "qty": 7_i64,
            "price": 2.5,
            "ok": true,
            "made": when,
            "tags": ["a", "b"],
            "nested": { "deep": { "x": 1_i64 } }
        };
        backend
            .insert_one("shop", "items", doc.clone())
            .await
            .unwrap();

        let found = backend
            .find(
                "shop",
                "items",
                FindOptions {
                    filter: Some(doc! { "_id": oid }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.documents.len(), 1);
        assert_eq!(found.cursor_id, 0);
        assert_eq!(found.documents[0], doc);
    }

    #[tokio::test]
    async fn test_insert_assigns_object_id_when_missing() {
        let (_dir, backend) = backend();
        let result = backend
            .insert_one("shop", "items", doc! { "name": "anon" })
            .await
            .unwrap();
        assert!(matches!(result.inserted_id, Bson::ObjectId(_)));

        let all = backend
            .find("shop", "items", FindOptions::default())
            .await
            .unwrap();
        assert!(matches!(all.documents[0].get("_id"), Some(Bson::ObjectId(_))));
    }

    #[tokio::test]
    async fn test_duplicate_id_is_conflict() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "_id": "same" })
            .await
            .unwrap();
        let err = backend
            .insert_one("shop", "items", doc! { "_id": "same" })
            .await
            .unwrap_err();
        assert!(matches!(err, MondoError::DuplicateKey(_)));
        assert_eq!(err.code(), 11000);
    }

    #[tokio::test]
    async fn test_filters_sorts_limit_skip() {
        let (_dir, backend) = backend();
        for i in 0..10_i64 {
            backend
                .insert_one(
                    "shop",
                    "items",
                    doc! { "n": i, "parity": if i % 2 == 0 { "even" } else { "odd" } },
                )
                .await
                .unwrap();
        }
        let found = backend
            .find(
                "shop",
                "items",
                FindOptions {
                    filter: Some(doc! { "parity": "even", "n": { "$gte": 2_i64 } }),
                    sort: Some(doc! { "n": -1 }),
                    limit: Some(2),
                    skip: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let ns: Vec<i64> = found
            .documents
            .iter()
            .map(|d| d.get_i64("n").unwrap())
            .collect();
        assert_eq!(ns, vec![6, 4]);
    }

    #[tokio::test]
    async fn test_projection_applies_in_memory() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "_id": 1_i64, "a": 1_i64, "b": 2_i64 })
            .await
            .unwrap();
        let found = backend
            .find(
                "shop",
                "items",
                FindOptions {
                    projection: Some(doc! { "a": 1 }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.documents[0], doc! { "_id": 1_i64, "a": 1_i64 });
    }

    #[tokio::test]
    async fn test_count_matches_find_length() {
        let (_dir, backend) = backend();
        for i in 0..25_i64 {
            backend
                .insert_one("shop", "items", doc! { "n": i })
                .await
                .unwrap();
        }
        let filter = doc! { "n": { "$lt": 9_i64 } };
        let count = backend
            .count("shop", "items", Some(filter.clone()))
            .await
            .unwrap();
        let found = backend
            .find(
                "shop",
                "items",
                FindOptions {
                    filter: Some(filter),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(count as usize, found.documents.len());
    }

    #[tokio::test]
    async fn test_find_on_missing_namespace_is_empty() {
        let (_dir, backend) = backend();
        let found = backend
            .find("nowhere", "nothing", FindOptions::default())
            .await
            .unwrap();
        assert!(found.documents.is_empty());
        assert_eq!(found.cursor_id, 0);
    }
}

mod update_tests {
    use super::*;

    #[tokio::test]
    async fn test_update_one_set() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "_id": 1_i64, "qty": 1_i64 })
            .await
            .unwrap();
        let result = backend
            .update_one(
                "shop",
                "items",
                doc! { "_id": 1_i64 },
                doc! { "$set": { "qty": 5_i64 } },
                false,
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);
        assert!(result.upserted_id.is_none());

        let found = backend
            .find(
                "shop",
                "items",
                FindOptions {
                    filter: Some(doc! { "_id": 1_i64 }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.documents[0].get_i64("qty").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_update_one_no_change_counts_zero_modified() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "_id": 1_i64, "qty": 5_i64 })
            .await
            .unwrap();
        let result = backend
            .update_one(
                "shop",
                "items",
                doc! { "_id": 1_i64 },
                doc! { "$set": { "qty": 5_i64 } },
                false,
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 0);
    }

    #[tokio::test]
    async fn test_update_many_touches_all_matches() {
        let (_dir, backend) = backend();
        for i in 0..6_i64 {
            backend
                .insert_one("shop", "items", doc! { "n": i, "flag": false })
                .await
                .unwrap();
        }
        let result = backend
            .update_many(
                "shop",
                "items",
                doc! { "n": { "$gte": 3_i64 } },
                doc! { "$set": { "flag": true } },
                false,
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 3);
        assert_eq!(result.modified_count, 3);
    }

    #[tokio::test]
    async fn test_upsert_synthesizes_from_filter() {
        let (_dir, backend) = backend();
        let result = backend
            .update_one(
                "shop",
                "items",
                doc! { "sku": "x-1", "size": { "$eq": "L" } },
                doc! { "$set": { "qty": 4_i64 } },
                true,
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 0);
        assert_eq!(result.modified_count, 0);
        let upserted = result.upserted_id.expect("upserted id");

        let found = backend
            .find(
                "shop",
                "items",
                FindOptions {
                    filter: Some(doc! { "sku": "x-1" }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let doc = &found.documents[0];
        assert_eq!(doc.get_str("size").unwrap(), "L");
        assert_eq!(doc.get_i64("qty").unwrap(), 4);
        assert_eq!(doc.get("_id"), Some(&upserted));
    }

    #[tokio::test]
    async fn test_update_many_upsert_zero_matches_inserts_one() {
        let (_dir, backend) = backend();
        let result = backend
            .update_many(
                "shop",
                "items",
                doc! { "kind": "ghost" },
                doc! { "$set": { "seen": false } },
                true,
            )
            .await
            .unwrap();
        assert!(result.upserted_id.is_some());
        let count = backend.count("shop", "items", None).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_replacement_update_preserves_id() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "_id": 9_i64, "old": true })
            .await
            .unwrap();
        backend
            .update_one(
                "shop",
                "items",
                doc! { "_id": 9_i64 },
                doc! { "fresh": true },
                false,
            )
            .await
            .unwrap();
        let found = backend
            .find(
                "shop",
                "items",
                FindOptions {
                    filter: Some(doc! { "_id": 9_i64 }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(found.documents[0], doc! { "_id": 9_i64, "fresh": true });
    }
}

mod delete_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_one_removes_first_by_insertion_order() {
        let (_dir, backend) = backend();
        for i in 0..3_i64 {
            backend
                .insert_one("shop", "items", doc! { "n": i, "kind": "x" })
                .await
                .unwrap();
        }
        let result = backend
            .delete_one("shop", "items", doc! { "kind": "x" })
            .await
            .unwrap();
        assert_eq!(result.deleted_count, 1);
        let remaining = backend
            .find("shop", "items", FindOptions::default())
            .await
            .unwrap();
        let ns: Vec<i64> = remaining
            .documents
            .iter()
            .map(|d| d.get_i64("n").unwrap())
            .collect();
        assert_eq!(ns, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_delete_many() {
        let (_dir, backend) = backend();
        for i in 0..10_i64 {
            backend
                .insert_one("shop", "items", doc! { "n": i })
                .await
                .unwrap();
        }
        let result = backend
            .delete_many("shop", "items", doc! { "n": { "$gte": 4_i64 } })
            .await
            .unwrap();
        assert_eq!(result.deleted_count, 6);
        assert_eq!(backend.count("shop", "items", None).await.unwrap(), 4);
    }
}

mod scalar_tests {
    use super::*;

    #[tokio::test]
    async fn test_distinct_flattens_arrays_and_dedupes() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "tags": ["a", "b"] })
            .await
            .unwrap();
        backend
            .insert_one("shop", "items", doc! { "tags": ["b", "c"] })
            .await
            .unwrap();
        backend
            .insert_one("shop", "items", doc! { "tags": "solo" })
            .await
            .unwrap();
        let values = backend
            .distinct("shop", "items", "tags", None)
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![
                Bson::String("a".into()),
                Bson::String("b".into()),
                Bson::String("c".into()),
                Bson::String("solo".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_distinct_with_filter() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "kind": "a", "n": 1_i64 })
            .await
            .unwrap();
        backend
            .insert_one("shop", "items", doc! { "kind": "b", "n": 2_i64 })
            .await
            .unwrap();
        let values = backend
            .distinct("shop", "items", "kind", Some(doc! { "n": { "$lt": 2_i64 } }))
            .await
            .unwrap();
        assert_eq!(values, vec![Bson::String("a".into())]);
    }
}

mod aggregate_tests {
    use super::*;

    #[tokio::test]
    async fn test_match_group_pipeline() {
        let (_dir, backend) = backend();
        let rows = [
            ("ann", "active", 10_i64),
            ("ann", "active", 20),
            ("bob", "done", 5),
            ("bob", "active", 7),
        ];
        for (user, status, amount) in rows {
            backend
                .insert_one(
                    "shop",
                    "orders",
                    doc! { "user": user, "status": status, "amount": amount },
                )
                .await
                .unwrap();
        }
        let result = backend
            .aggregate(
                "shop",
                "orders",
                vec![
                    doc! { "$match": { "status": "active" } },
                    doc! { "$group": { "_id": "$user", "total": { "$sum": "$amount" } } },
                    doc! { "$sort": { "_id": 1 } },
                ],
                Default::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.documents.len(), 2);
        assert_eq!(result.documents[0].get_str("_id").unwrap(), "ann");
        assert_eq!(result.documents[0].get_i64("total").unwrap(), 30);
        assert_eq!(result.documents[1].get_i64("total").unwrap(), 7);
    }

    #[tokio::test]
    async fn test_lookup_joins_sibling_collection() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "users", doc! { "name": "ann" })
            .await
            .unwrap();
        backend
            .insert_one("shop", "orders", doc! { "user": "ann", "sku": "x" })
            .await
            .unwrap();
        backend
            .insert_one("shop", "orders", doc! { "user": "ann", "sku": "y" })
            .await
            .unwrap();
        let result = backend
            .aggregate(
                "shop",
                "users",
                vec![doc! { "$lookup": {
                    "from": "orders",
                    "localField": "name",
                    "foreignField": "user",
                    "as": "orders"
                } }],
                Default::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.documents[0].get_array("orders").unwrap().len(), 2);
    }
}

mod cursor_tests {
    use std::time::Duration;

    use mondo_core::CURSOR_TTL;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_evicts_expired_cursors() {
        let (_dir, backend) = backend();
        let docs: Vec<bson::Document> = (0..10_i64).map(|i| doc! { "i": i }).collect();
        let stale = backend
            .create_cursor("shop.items", docs.clone(), 2)
            .await
            .unwrap();
        let fresh = backend.create_cursor("shop.items", docs, 2).await.unwrap();
        backend
            .cursor_manager()
            .backdate(stale.cursor_id, CURSOR_TTL + Duration::from_secs(1));

        let sweeper = backend.start_cursor_sweeper();
        // Paused time auto-advances past the sweep interval.
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(backend.get_cursor(stale.cursor_id).await.is_none());
        assert!(backend.get_cursor(fresh.cursor_id).await.is_some());
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_overflowing_find_spills_into_cursor() {
        let (_dir, backend) = backend();
        let docs: Vec<bson::Document> = (0..250_i64).map(|i| doc! { "i": i }).collect();
        backend.insert_many("shop", "items", docs).await.unwrap();

        let first = backend
            .find(
                "shop",
                "items",
                FindOptions {
                    batch_size: Some(101),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.documents.len(), 101);
        assert_ne!(first.cursor_id, 0);
        assert!(first.has_more);

        let second = backend.advance_cursor(first.cursor_id, 101).await;
        assert_eq!(second.len(), 101);
        let third = backend.advance_cursor(first.cursor_id, 101).await;
        assert_eq!(third.len(), 48);
        assert!(backend.advance_cursor(first.cursor_id, 101).await.is_empty());

        assert!(backend.close_cursor(first.cursor_id).await);
        assert!(!backend.close_cursor(first.cursor_id).await);
    }
}

mod stats_tests {
    use super::*;

    #[tokio::test]
    async fn test_coll_stats_counts_and_sizes() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "a": 1_i64 })
            .await
            .unwrap();
        backend
            .insert_one("shop", "items", doc! { "b": 2_i64 })
            .await
            .unwrap();
        let stats = backend.collection_stats("shop", "items").await.unwrap();
        assert_eq!(stats.ns, "shop.items");
        assert_eq!(stats.count, 2);
        assert!(stats.size > 0);
        assert!(stats.avg_obj_size > 0);
        assert_eq!(stats.n_indexes, 1);
    }

    #[tokio::test]
    async fn test_coll_stats_missing_namespace() {
        let (_dir, backend) = backend();
        let err = backend.collection_stats("shop", "ghost").await.unwrap_err();
        assert!(matches!(err, MondoError::NamespaceNotFound(_)));
        assert_eq!(err.code(), 26);
    }

    #[tokio::test]
    async fn test_db_stats() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "a", doc! { "x": 1_i64 })
            .await
            .unwrap();
        backend
            .insert_one("shop", "b", doc! { "y": 2_i64 })
            .await
            .unwrap();
        let stats = backend.database_stats("shop").await.unwrap();
        assert_eq!(stats.collections, 2);
        assert_eq!(stats.objects, 2);
        assert!(stats.data_size > 0);
    }
}

mod index_tests {
    use super::*;

    #[tokio::test]
    async fn test_id_index_is_implicit() {
        let (_dir, backend) = backend();
        let indexes = backend.list_indexes("shop", "items").await.unwrap();
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name.as_deref(), Some("_id_"));
    }

    #[tokio::test]
    async fn test_create_list_drop_indexes() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "email": "a@b.c" })
            .await
            .unwrap();
        let created = backend
            .create_indexes(
                "shop",
                "items",
                vec![
                    IndexSpec {
                        keys: doc! { "email": 1 },
                        name: None,
                        unique: true,
                        sparse: false,
                    },
                    IndexSpec {
                        keys: doc! { "name": 1, "age": -1 },
                        name: Some("name_age".into()),
                        unique: false,
                        sparse: false,
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(created, 2);

        let indexes = backend.list_indexes("shop", "items").await.unwrap();
        assert_eq!(indexes.len(), 3);
        assert!(indexes.iter().any(|i| i.name.as_deref() == Some("email_1")));

        backend.drop_index("shop", "items", "email_1").await.unwrap();
        let indexes = backend.list_indexes("shop", "items").await.unwrap();
        assert_eq!(indexes.len(), 2);

        let dropped = backend.drop_indexes("shop", "items").await.unwrap();
        assert_eq!(dropped, 1);
    }

    #[tokio::test]
    async fn test_dropping_id_index_is_rejected() {
        let (_dir, backend) = backend();
        assert!(backend.drop_index("shop", "items", "_id_").await.is_err());
    }

    #[tokio::test]
    async fn test_hostile_index_name_never_reaches_ddl() {
        let (_dir, backend) = backend();
        backend
            .insert_one("shop", "items", doc! { "email": "a@b.c" })
            .await
            .unwrap();
        let hostile = "x\" ON documents(data); DROP TABLE documents; --";
        backend
            .create_indexes(
                "shop",
                "items",
                vec![IndexSpec {
                    keys: doc! { "email": 1 },
                    name: Some(hostile.to_string()),
                    unique: false,
                    sparse: false,
                }],
            )
            .await
            .unwrap();

        // The documents table survives and stays queryable.
        assert_eq!(backend.count("shop", "items", None).await.unwrap(), 1);
        let indexes = backend.list_indexes("shop", "items").await.unwrap();
        assert!(indexes.iter().any(|i| i.name.as_deref() == Some(hostile)));
    }
}
