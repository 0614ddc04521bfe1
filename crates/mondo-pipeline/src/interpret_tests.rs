//! Unit tests for the pipeline interpreter

use bson::{Bson, doc};

use super::interpret::*;

fn people() -> Vec<bson::Document> {
    vec![
        doc! { "_id": 1, "user": "ann",  "status": "active", "amount": 10, "tags": ["a", "b"] },
        doc! { "_id": 2, "user": "bob",  "status": "active", "amount": 25, "tags": ["b"] },
        doc! { "_id": 3, "user": "ann",  "status": "done",   "amount": 5,  "tags": [] },
        doc! { "_id": 4, "user": "cleo", "status": "active", "amount": 40 },
    ]
}

fn run(input: Vec<bson::Document>, pipeline: Vec<bson::Document>) -> Vec<bson::Document> {
    run_pipeline(input, &pipeline, &PipelineContext::new()).unwrap()
}

mod stage_tests {
    use super::*;

    #[test]
    fn test_match_filters_stream() {
        let out = run(people(), vec![doc! { "$match": { "status": "active" } }]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_project_inclusion_keeps_id() {
        let out = run(people(), vec![doc! { "$project": { "user": 1 } }]);
        assert_eq!(out[0], doc! { "_id": 1, "user": "ann" });
    }

    #[test]
    fn test_project_exclusion_removes_fields() {
        let out = run(
            people(),
            vec![doc! { "$project": { "tags": 0, "amount": 0 } }],
        );
        assert_eq!(out[0], doc! { "_id": 1, "user": "ann", "status": "active" });
    }

    #[test]
    fn test_project_can_drop_id() {
        let out = run(
            people(),
            vec![doc! { "$project": { "user": 1, "_id": 0 } }],
        );
        assert_eq!(out[0], doc! { "user": "ann" });
    }

    #[test]
    fn test_add_fields_merges() {
        let out = run(
            people(),
            vec![doc! { "$addFields": { "kind": "person", "who": "$user" } }],
        );
        assert_eq!(out[0].get_str("kind").unwrap(), "person");
        assert_eq!(out[0].get_str("who").unwrap(), "ann");
    }

    #[test]
    fn test_sort_with_direction_and_tiebreak() {
        let out = run(
            people(),
            vec![doc! { "$sort": { "user": 1, "amount": -1 } }],
        );
        let users: Vec<&str> = out.iter().map(|d| d.get_str("user").unwrap()).collect();
        assert_eq!(users, vec!["ann", "ann", "bob", "cleo"]);
        assert_eq!(out[0].get_i32("amount").unwrap(), 10);
    }

    #[test]
    fn test_sort_is_stable() {
        let input = vec![
            doc! { "k": 1, "tag": "first" },
            doc! { "k": 1, "tag": "second" },
            doc! { "k": 0, "tag": "third" },
        ];
        let out = run(input, vec![doc! { "$sort": { "k": 1 } }]);
        assert_eq!(out[0].get_str("tag").unwrap(), "third");
        assert_eq!(out[1].get_str("tag").unwrap(), "first");
        assert_eq!(out[2].get_str("tag").unwrap(), "second");
    }

    #[test]
    fn test_limit_skip_count() {
        let out = run(
            people(),
            vec![doc! { "$skip": 1_i64 }, doc! { "$limit": 2_i64 }],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_i32("_id").unwrap(), 2);

        let counted = run(people(), vec![doc! { "$count": "total" }]);
        assert_eq!(counted, vec![doc! { "total": 4_i64 }]);
    }

    #[test]
    fn test_sample_truncates_to_size() {
        let out = run(people(), vec![doc! { "$sample": { "size": 2_i64 } }]);
        assert_eq!(out.len(), 2);
        let out = run(people(), vec![doc! { "$sample": { "size": 100_i64 } }]);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_unwind_one_doc_per_element() {
        let out = run(people(), vec![doc! { "$unwind": "$tags" }]);
        // 2 + 1 elements; empty and missing arrays drop.
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].get_str("tags").unwrap(), "a");
        assert_eq!(out[1].get_str("tags").unwrap(), "b");
    }

    #[test]
    fn test_unwind_preserves_empty_when_asked() {
        let out = run(
            people(),
            vec![doc! { "$unwind": {
                "path": "$tags",
                "preserveNullAndEmptyArrays": true
            } }],
        );
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_unknown_stage_passes_through() {
        let out = run(people(), vec![doc! { "$weirdStage": { "x": 1 } }]);
        assert_eq!(out.len(), 4);
    }
}

mod group_tests {
    use super::*;

    #[test]
    fn test_group_count_by_field() {
        let out = run(
            people(),
            vec![doc! { "$group": { "_id": "$user", "n": { "$sum": 1 } } }],
        );
        assert_eq!(out.len(), 3);
        let ann = out
            .iter()
            .find(|d| d.get_str("_id") == Ok("ann"))
            .unwrap();
        assert_eq!(ann.get_i64("n").unwrap(), 2);
    }

    #[test]
    fn test_group_null_id_collapses_all() {
        let out = run(
            people(),
            vec![doc! { "$group": {
                "_id": Bson::Null,
                "total": { "$sum": "$amount" },
                "avg": { "$avg": "$amount" }
            } }],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("_id"), Some(&Bson::Null));
        assert_eq!(out[0].get_i64("total").unwrap(), 80);
        assert_eq!(out[0].get_f64("avg").unwrap(), 20.0);
    }

    #[test]
    fn test_group_min_max_first_last() {
        let out = run(
            people(),
            vec![doc! { "$group": {
                "_id": "$status",
                "lo": { "$min": "$amount" },
                "hi": { "$max": "$amount" },
                "first": { "$first": "$user" },
                "last": { "$last": "$user" }
            } }],
        );
        let active = out
            .iter()
            .find(|d| d.get_str("_id") == Ok("active"))
            .unwrap();
        assert_eq!(active.get_i32("lo").unwrap(), 10);
        assert_eq!(active.get_i32("hi").unwrap(), 40);
        assert_eq!(active.get_str("first").unwrap(), "ann");
        assert_eq!(active.get_str("last").unwrap(), "cleo");
    }

    #[test]
    fn test_group_push_and_add_to_set() {
        let out = run(
            people(),
            vec![doc! { "$group": {
                "_id": Bson::Null,
                "users": { "$push": "$user" },
                "unique": { "$addToSet": "$user" }
            } }],
        );
        let users = out[0].get_array("users").unwrap();
        assert_eq!(users.len(), 4);
        let unique = out[0].get_array("unique").unwrap();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_group_sum_treats_missing_as_zero() {
        let input = vec![doc! { "v": 3 }, doc! {}];
        let out = run(
            input,
            vec![doc! { "$group": { "_id": Bson::Null, "s": { "$sum": "$v" } } }],
        );
        assert_eq!(out[0].get_i64("s").unwrap(), 3);
    }

    #[test]
    fn test_group_compound_key() {
        let out = run(
            people(),
            vec![doc! { "$group": {
                "_id": { "u": "$user", "s": "$status" },
                "n": { "$sum": 1 }
            } }],
        );
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_group_without_id_is_error() {
        let result = run_pipeline(
            people(),
            &[doc! { "$group": { "n": { "$sum": 1 } } }],
            &PipelineContext::new(),
        );
        assert!(result.is_err());
    }
}

mod lookup_facet_tests {
    use super::*;

    #[test]
    fn test_lookup_joins_from_context() {
        let orders = vec![
            doc! { "user": "ann", "sku": "x" },
            doc! { "user": "ann", "sku": "y" },
            doc! { "user": "bob", "sku": "z" },
        ];
        let ctx = PipelineContext::new().with_lookup("orders", orders);
        let out = run_pipeline(
            people(),
            &[doc! { "$lookup": {
                "from": "orders",
                "localField": "user",
                "foreignField": "user",
                "as": "orders"
            } }],
            &ctx,
        )
        .unwrap();
        assert_eq!(out[0].get_array("orders").unwrap().len(), 2);
        assert_eq!(out[3].get_array("orders").unwrap().len(), 0);
    }

    #[test]
    fn test_lookup_missing_collection_is_empty() {
        let out = run_pipeline(
            people(),
            &[doc! { "$lookup": {
                "from": "nowhere",
                "localField": "user",
                "foreignField": "user",
                "as": "hits"
            } }],
            &PipelineContext::new(),
        )
        .unwrap();
        assert!(out[0].get_array("hits").unwrap().is_empty());
    }

    #[test]
    fn test_facet_runs_subpipelines_over_same_input() {
        let out = run(
            people(),
            vec![doc! { "$facet": {
                "byUser": [ { "$group": { "_id": "$user", "n": { "$sum": 1 } } } ],
                "active": [ { "$match": { "status": "active" } }, { "$count": "n" } ]
            } }],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_array("byUser").unwrap().len(), 3);
        let active = out[0].get_array("active").unwrap();
        let Bson::Document(count) = &active[0] else {
            panic!("expected document");
        };
        assert_eq!(count.get_i64("n").unwrap(), 3);
    }
}

mod projection_tests {
    use super::*;

    #[test]
    fn test_mixed_projection_is_rejected() {
        let doc = doc! { "a": 1, "b": 2 };
        assert!(apply_projection(&doc, &doc! { "a": 1, "b": 0 }).is_err());
    }

    #[test]
    fn test_id_only_projections() {
        let doc = doc! { "_id": 7, "a": 1 };
        assert_eq!(
            apply_projection(&doc, &doc! { "_id": 1 }).unwrap(),
            doc! { "_id": 7 }
        );
        assert_eq!(
            apply_projection(&doc, &doc! { "_id": 0 }).unwrap(),
            doc! { "a": 1 }
        );
    }

    #[test]
    fn test_dotted_inclusion_builds_nested_doc() {
        let doc = doc! { "_id": 1, "user": { "name": "ann", "age": 30 } };
        let out = apply_projection(&doc, &doc! { "user.name": 1 }).unwrap();
        assert_eq!(out, doc! { "_id": 1, "user": { "name": "ann" } });
    }
}
