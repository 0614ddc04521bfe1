//! Unit tests for pipeline rewriting

use bson::doc;

use super::interpret::{PipelineContext, run_pipeline};
use super::optimize::optimize;

mod rewrite_tests {
    use super::*;

    #[test]
    fn test_empty_match_is_dropped() {
        let out = optimize(vec![
            doc! { "$match": {} },
            doc! { "$limit": 5_i64 },
        ]);
        assert_eq!(out, vec![doc! { "$limit": 5_i64 }]);
    }

    #[test]
    fn test_adjacent_matches_fuse_with_and() {
        let out = optimize(vec![
            doc! { "$match": { "a": 1 } },
            doc! { "$match": { "b": 2 } },
        ]);
        assert_eq!(
            out,
            vec![doc! { "$match": { "$and": [ { "a": 1 }, { "b": 2 } ] } }]
        );
    }

    #[test]
    fn test_adjacent_add_fields_fuse_later_wins() {
        let out = optimize(vec![
            doc! { "$addFields": { "x": 1, "y": 1 } },
            doc! { "$addFields": { "y": 2, "z": 3 } },
        ]);
        assert_eq!(out, vec![doc! { "$addFields": { "x": 1, "y": 2, "z": 3 } }]);
    }

    #[test]
    fn test_match_pushes_past_sort() {
        let out = optimize(vec![
            doc! { "$sort": { "a": 1 } },
            doc! { "$match": { "b": 2 } },
        ]);
        assert_eq!(
            out,
            vec![doc! { "$match": { "b": 2 } }, doc! { "$sort": { "a": 1 } }]
        );
    }

    #[test]
    fn test_match_pushes_past_unrelated_add_fields() {
        let out = optimize(vec![
            doc! { "$addFields": { "computed": "$a" } },
            doc! { "$match": { "b": 2 } },
        ]);
        assert_eq!(out[0], doc! { "$match": { "b": 2 } });
    }

    #[test]
    fn test_match_stays_behind_rewriting_add_fields() {
        let out = optimize(vec![
            doc! { "$addFields": { "b": "$a" } },
            doc! { "$match": { "b": 2 } },
        ]);
        assert_eq!(out[0], doc! { "$addFields": { "b": "$a" } });
    }

    #[test]
    fn test_match_never_crosses_group_or_limit() {
        let grouped = vec![
            doc! { "$group": { "_id": "$a", "n": { "$sum": 1 } } },
            doc! { "$match": { "n": { "$gt": 1 } } },
        ];
        assert_eq!(optimize(grouped.clone()), grouped);

        let limited = vec![
            doc! { "$limit": 10_i64 },
            doc! { "$match": { "a": 1 } },
        ];
        assert_eq!(optimize(limited.clone()), limited);
    }

    #[test]
    fn test_match_stays_behind_projection_dropping_its_field() {
        let stages = vec![
            doc! { "$project": { "a": 1 } },
            doc! { "$match": { "b": 2 } },
        ];
        // b is not passed through by the inclusion projection.
        assert_eq!(optimize(stages.clone()), stages);
    }

    #[test]
    fn test_projects_never_fuse() {
        let stages = vec![
            doc! { "$project": { "a": 1 } },
            doc! { "$project": { "b": 0 } },
        ];
        assert_eq!(optimize(stages.clone()), stages);
    }
}

mod equivalence_tests {
    use super::*;

    fn dataset() -> Vec<bson::Document> {
        (0..40)
            .map(|i| {
                doc! {
                    "_id": i,
                    "a": i % 5,
                    "b": i % 3,
                    "s": if i % 2 == 0 { "even" } else { "odd" }
                }
            })
            .collect()
    }

    fn both_ways(pipeline: Vec<bson::Document>) {
        let ctx = PipelineContext::new();
        let plain = run_pipeline(dataset(), &pipeline, &ctx).unwrap();
        let optimized = run_pipeline(dataset(), &optimize(pipeline), &ctx).unwrap();
        assert_eq!(plain, optimized);
    }

    #[test]
    fn test_optimized_pipeline_is_equivalent() {
        both_ways(vec![
            doc! { "$match": { "s": "even" } },
            doc! { "$match": { "a": { "$lte": 3 } } },
            doc! { "$sort": { "b": 1, "_id": 1 } },
            doc! { "$match": { "b": { "$gte": 1 } } },
            doc! { "$limit": 7_i64 },
        ]);
    }

    #[test]
    fn test_equivalence_with_add_fields_pushdown() {
        both_ways(vec![
            doc! { "$addFields": { "double": "$a" } },
            doc! { "$match": { "b": 1 } },
            doc! { "$group": { "_id": "$s", "n": { "$sum": 1 } } },
        ]);
    }

    #[test]
    fn test_equivalence_with_empty_match() {
        both_ways(vec![
            doc! { "$match": {} },
            doc! { "$sort": { "_id": -1 } },
            doc! { "$skip": 2_i64 },
        ]);
    }
}
