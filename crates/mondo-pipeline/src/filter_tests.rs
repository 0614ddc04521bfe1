//! Unit tests for filter evaluation and the value total order

use bson::{Bson, doc};

use super::filter::*;

mod total_order_tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_null_and_missing_sort_below_everything() {
        assert_eq!(
            compare_values(None, Some(&Bson::Int32(0))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&Bson::Null), Some(&Bson::String("".into()))),
            Ordering::Less
        );
        assert_eq!(compare_values(None, Some(&Bson::Null)), Ordering::Equal);
    }

    #[test]
    fn test_numeric_kinds_compare_by_value() {
        assert_eq!(
            compare_values(Some(&Bson::Int32(5)), Some(&Bson::Int64(5))),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(Some(&Bson::Double(2.5)), Some(&Bson::Int32(3))),
            Ordering::Less
        );
    }

    #[test]
    fn test_unlike_types_have_stable_order() {
        // number < string < bool per the type ranking
        assert_eq!(
            compare_values(Some(&Bson::Int32(999)), Some(&Bson::String("a".into()))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(
                Some(&Bson::String("z".into())),
                Some(&Bson::Boolean(false))
            ),
            Ordering::Less
        );
    }

    #[test]
    fn test_arrays_compare_elementwise() {
        let a = Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)]);
        let b = Bson::Array(vec![Bson::Int32(1), Bson::Int32(3)]);
        assert_eq!(compare_values(Some(&a), Some(&b)), Ordering::Less);
        let shorter = Bson::Array(vec![Bson::Int32(1)]);
        assert_eq!(compare_values(Some(&shorter), Some(&a)), Ordering::Less);
    }
}

mod match_tests {
    use super::*;

    #[test]
    fn test_direct_equality() {
        let doc = doc! { "status": "active", "n": 3 };
        assert!(matches_filter(&doc, &doc! { "status": "active" }).unwrap());
        assert!(!matches_filter(&doc, &doc! { "status": "done" }).unwrap());
        assert!(matches_filter(&doc, &doc! { "n": 3_i64 }).unwrap());
    }

    #[test]
    fn test_dotted_path_lookup() {
        let doc = doc! { "user": { "address": { "city": "Oslo" } } };
        assert!(matches_filter(&doc, &doc! { "user.address.city": "Oslo" }).unwrap());
        assert!(!matches_filter(&doc, &doc! { "user.address.zip": "1234" }).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let doc = doc! { "age": 30 };
        assert!(matches_filter(&doc, &doc! { "age": { "$gt": 18 } }).unwrap());
        assert!(matches_filter(&doc, &doc! { "age": { "$lte": 30 } }).unwrap());
        assert!(!matches_filter(&doc, &doc! { "age": { "$lt": 30 } }).unwrap());
        assert!(matches_filter(&doc, &doc! { "age": { "$ne": 31 } }).unwrap());
        assert!(matches_filter(&doc, &doc! { "age": { "$gte": 18, "$lt": 65 } }).unwrap());
    }

    #[test]
    fn test_in_membership() {
        let doc = doc! { "color": "green" };
        let filter = doc! { "color": { "$in": ["red", "green"] } };
        assert!(matches_filter(&doc, &filter).unwrap());
        let miss = doc! { "color": { "$in": ["red", "blue"] } };
        assert!(!matches_filter(&doc, &miss).unwrap());
    }

    #[test]
    fn test_in_requires_array() {
        let doc = doc! { "color": "green" };
        assert!(matches_filter(&doc, &doc! { "color": { "$in": "red" } }).is_err());
    }

    #[test]
    fn test_exists() {
        let doc = doc! { "a": 1, "b": Bson::Null };
        assert!(matches_filter(&doc, &doc! { "a": { "$exists": true } }).unwrap());
        // Null counts as present.
        assert!(matches_filter(&doc, &doc! { "b": { "$exists": true } }).unwrap());
        assert!(matches_filter(&doc, &doc! { "c": { "$exists": false } }).unwrap());
        assert!(!matches_filter(&doc, &doc! { "c": { "$exists": true } }).unwrap());
    }

    #[test]
    fn test_and_or_recursion() {
        let doc = doc! { "a": 1, "b": 2 };
        let both = doc! { "$and": [ { "a": 1 }, { "b": 2 } ] };
        assert!(matches_filter(&doc, &both).unwrap());
        let either = doc! { "$or": [ { "a": 9 }, { "b": 2 } ] };
        assert!(matches_filter(&doc, &either).unwrap());
        let neither = doc! { "$or": [ { "a": 9 }, { "b": 9 } ] };
        assert!(!matches_filter(&doc, &neither).unwrap());
    }

    #[test]
    fn test_missing_field_equals_null() {
        let doc = doc! { "a": 1 };
        assert!(matches_filter(&doc, &doc! { "b": Bson::Null }).unwrap());
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let doc = doc! { "a": 1 };
        assert!(matches_filter(&doc, &doc! {}).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let doc = doc! { "a": 1 };
        assert!(matches_filter(&doc, &doc! { "a": { "$regex": "x" } }).is_err());
        assert!(matches_filter(&doc, &doc! { "$nor": [ { "a": 1 } ] }).is_err());
    }
}
