//! Unit tests for the cursor manager

use std::time::Duration;

use bson::doc;

use super::*;

fn docs(n: usize) -> Vec<bson::Document> {
    (0..n).map(|i| doc! { "i": i as i64 }).collect()
}

mod register_tests {
    use super::*;

    #[test]
    fn test_small_result_needs_no_cursor() {
        let mgr = CursorManager::new();
        let result = mgr.register("db.coll", docs(5), 101);
        assert_eq!(result.cursor_id, 0);
        assert!(!result.has_more);
        assert_eq!(result.documents.len(), 5);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_overflow_mints_cursor() {
        let mgr = CursorManager::new();
        let result = mgr.register("db.coll", docs(250), 101);
        assert_ne!(result.cursor_id, 0);
        assert!(result.has_more);
        assert_eq!(result.documents.len(), 101);
        let info = mgr.get(result.cursor_id).unwrap();
        assert_eq!(info.namespace, "db.coll");
        assert_eq!(info.remaining, 149);
    }

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let mgr = CursorManager::new();
        let a = mgr.register("db.a", docs(10), 2).cursor_id;
        let b = mgr.register("db.b", docs(10), 2).cursor_id;
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }
}

mod advance_tests {
    use super::*;

    #[test]
    fn test_batched_drain() {
        let mgr = CursorManager::new();
        let result = mgr.register("db.coll", docs(250), 101);
        let id = result.cursor_id;

        let second = mgr.advance(id, 101);
        assert_eq!(second.len(), 101);
        let third = mgr.advance(id, 101);
        assert_eq!(third.len(), 48);
        assert!(mgr.advance(id, 101).is_empty());
        assert!(mgr.advance(id, 101).is_empty());
    }

    #[test]
    fn test_zero_uses_cursor_batch_size() {
        let mgr = CursorManager::new();
        let id = mgr.register("db.coll", docs(30), 10).cursor_id;
        assert_eq!(mgr.advance(id, 0).len(), 10);
    }

    #[test]
    fn test_unknown_id_yields_empty() {
        let mgr = CursorManager::new();
        assert!(mgr.advance(9999, 10).is_empty());
    }

    #[test]
    fn test_documents_keep_order() {
        let mgr = CursorManager::new();
        let first = mgr.register("db.coll", docs(7), 3);
        let id = first.cursor_id;
        assert_eq!(first.documents[0], doc! { "i": 0_i64 });
        let next = mgr.advance(id, 3);
        assert_eq!(next[0], doc! { "i": 3_i64 });
        let last = mgr.advance(id, 3);
        assert_eq!(last[0], doc! { "i": 6_i64 });
    }
}

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_close_reports_existence() {
        let mgr = CursorManager::new();
        let id = mgr.register("db.coll", docs(10), 2).cursor_id;
        assert!(mgr.close(id));
        assert!(!mgr.close(id));
        assert!(mgr.get(id).is_none());
    }

    #[test]
    fn test_expired_cursor_is_swept() {
        let mgr = CursorManager::new();
        let id = mgr.register("db.coll", docs(10), 2).cursor_id;
        let fresh = mgr.register("db.coll", docs(10), 2).cursor_id;

        mgr.backdate(id, CURSOR_TTL + Duration::from_secs(1));
        let evicted = mgr.cleanup_expired();

        assert_eq!(evicted, 1);
        assert!(mgr.get(id).is_none());
        assert!(mgr.get(fresh).is_some());
    }

    #[test]
    fn test_cleanup_keeps_young_cursors() {
        let mgr = CursorManager::new();
        mgr.register("db.coll", docs(10), 2);
        assert_eq!(mgr.cleanup_expired(), 0);
        assert_eq!(mgr.len(), 1);
    }
}
