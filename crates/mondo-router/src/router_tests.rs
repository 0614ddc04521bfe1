//! Unit tests for routing decisions

use bson::doc;
use mondo_backends::{Backend, ProxyBackend, ProxyConfig, SqliteBackend, SqliteBackendConfig};
use mondo_core::{AggregateOptions, EngineKind, FindOptions};
use tempfile::TempDir;

use super::router::*;

fn oltp(dir: &TempDir) -> Backend {
    Backend::from(
        SqliteBackend::new(SqliteBackendConfig {
            data_dir: dir.path().join("data"),
        })
        .expect("sqlite backend"),
    )
}

fn olap() -> Backend {
    Backend::from(
        ProxyBackend::new(ProxyConfig {
            endpoint: "http://localhost:9800/rpc".into(),
            ..Default::default()
        })
        .expect("proxy backend"),
    )
}

fn dual_router(dir: &TempDir, config: RouterConfig) -> QueryRouter {
    QueryRouter::new(oltp(dir), Some(olap()), config)
}

fn find_options(filter: bson::Document) -> FindOptions {
    FindOptions {
        filter: Some(filter),
        ..Default::default()
    }
}

mod precedence_tests {
    use super::*;

    #[test]
    fn test_oltp_only_router_always_picks_oltp() {
        let dir = TempDir::new().unwrap();
        let router = QueryRouter::new(oltp(&dir), None, RouterConfig::default());

        let decisions = [
            router.route_find(&find_options(doc! { "created_at": { "$gt": 0_i64 } })),
            router.route_find(&FindOptions::default()),
            router.route_aggregate(
                &[doc! { "$group": { "_id": "$a" } }],
                &AggregateOptions::default(),
            ),
            router.route_scalar(None, None),
        ];
        for decision in decisions {
            assert_eq!(decision.backend, EngineKind::Oltp);
        }
    }

    #[test]
    fn test_explicit_override_is_honored() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let mut options = find_options(doc! { "_id": "x" });
        options.backend = Some(EngineKind::Olap);
        let decision = router.route_find(&options);
        assert_eq!(decision.backend, EngineKind::Olap);
        assert_eq!(decision.reason, "Explicit backend override");
    }

    #[test]
    fn test_explicit_olap_without_backend_falls_back_silently() {
        let dir = TempDir::new().unwrap();
        let router = QueryRouter::new(oltp(&dir), None, RouterConfig::default());
        let mut options = FindOptions::default();
        options.backend = Some(EngineKind::Olap);
        let decision = router.route_find(&options);
        assert_eq!(decision.backend, EngineKind::Oltp);
        assert!(!decision.warnings.is_empty());
    }

    #[test]
    fn test_auto_routing_disabled_pins_oltp() {
        let dir = TempDir::new().unwrap();
        let config = RouterConfig {
            auto_routing: false,
            ..Default::default()
        };
        let router = dual_router(&dir, config);
        let decision = router.route_find(&find_options(doc! { "created_at": { "$gt": 0_i64 } }));
        assert_eq!(decision.backend, EngineKind::Oltp);
        assert_eq!(decision.reason, "Auto-routing disabled");
    }
}

mod find_routing_tests {
    use super::*;

    #[test]
    fn test_id_lookup_goes_oltp() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let decision =
            router.route_find(&find_options(doc! { "_id": "507f1f77bcf86cd799439011" }));
        assert_eq!(decision.backend, EngineKind::Oltp);
        assert_eq!(decision.reason, "Simple _id lookup");
        assert!(decision.characteristics.has_id_lookup);
    }

    #[test]
    fn test_time_range_goes_olap() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let decision = router.route_find(&find_options(
            doc! { "created_at": { "$gte": 1_700_000_000_i64 } },
        ));
        assert_eq!(decision.backend, EngineKind::Olap);
        assert!(decision.characteristics.is_time_range_query);
    }

    #[test]
    fn test_full_scan_goes_olap() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let decision = router.route_find(&FindOptions::default());
        assert_eq!(decision.backend, EngineKind::Olap);
    }

    #[test]
    fn test_selective_filter_stays_oltp() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let decision = router.route_find(&find_options(doc! { "status": "active" }));
        assert_eq!(decision.backend, EngineKind::Oltp);
    }
}

mod aggregate_routing_tests {
    use super::*;

    #[test]
    fn test_heavy_aggregation_goes_olap() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let pipeline = vec![
            doc! { "$match": { "status": "active" } },
            doc! { "$group": { "_id": "$user", "n": { "$sum": 1 } } },
        ];
        let decision = router.route_aggregate(&pipeline, &AggregateOptions::default());
        assert_eq!(decision.backend, EngineKind::Olap);
        assert!(decision.reason.contains("Heavy aggregation"));
        assert!(
            decision
                .characteristics
                .olap_stages
                .contains(&"$group".to_string())
        );
    }

    #[test]
    fn test_id_match_pipeline_stays_oltp() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let pipeline = vec![
            doc! { "$match": { "_id": "abc" } },
            doc! { "$project": { "a": 1 } },
        ];
        let decision = router.route_aggregate(&pipeline, &AggregateOptions::default());
        assert_eq!(decision.backend, EngineKind::Oltp);
        assert_eq!(decision.reason, "Simple _id lookup");
    }

    #[test]
    fn test_prefer_olap_flag_uses_olap_signals() {
        let dir = TempDir::new().unwrap();
        let pipeline = vec![
            doc! { "$match": { "status": "active" } },
            doc! { "$lookup": {
                "from": "other", "localField": "a", "foreignField": "b", "as": "j"
            } },
        ];

        let plain = dual_router(&dir, RouterConfig::default());
        assert_eq!(
            plain
                .route_aggregate(&pipeline, &AggregateOptions::default())
                .backend,
            EngineKind::Oltp
        );

        let preferring = dual_router(
            &dir,
            RouterConfig {
                prefer_olap_for_aggregations: true,
                ..Default::default()
            },
        );
        assert_eq!(
            preferring
                .route_aggregate(&pipeline, &AggregateOptions::default())
                .backend,
            EngineKind::Olap
        );
    }
}

mod scalar_routing_tests {
    use super::*;

    #[test]
    fn test_filtered_count_stays_oltp() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let filter = doc! { "status": "active" };
        let decision = router.route_scalar(Some(&filter), None);
        assert_eq!(decision.backend, EngineKind::Oltp);
    }

    #[test]
    fn test_unfiltered_count_goes_olap() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let decision = router.route_scalar(None, None);
        assert_eq!(decision.backend, EngineKind::Olap);
    }
}

mod execution_tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_always_run_on_oltp() {
        // OLAP configured, but writes must land in the sqlite store.
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        router
            .insert_one("shop", "items", doc! { "_id": "a", "n": 1_i64 })
            .await
            .unwrap();
        let count = router.count("shop", "items", Some(doc! { "_id": "a" })).await;
        assert_eq!(count.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cursor_delegation_tries_oltp_first() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        let docs: Vec<bson::Document> = (0..10_i64).map(|i| doc! { "i": i }).collect();
        let first = router.create_cursor("shop.items", docs, 4).await.unwrap();
        assert!(first.has_more);

        let info = router.get_cursor(first.cursor_id).await.unwrap();
        assert_eq!(info.namespace, "shop.items");
        let next = router.advance_cursor(first.cursor_id, 4).await;
        assert_eq!(next.len(), 4);
        assert!(router.close_cursor(first.cursor_id).await);
        assert!(!router.close_cursor(first.cursor_id).await);
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_both_engines() {
        let dir = TempDir::new().unwrap();
        let router = dual_router(&dir, RouterConfig::default());
        assert_eq!(router.cleanup_expired_cursors().await, 0);
    }
}
