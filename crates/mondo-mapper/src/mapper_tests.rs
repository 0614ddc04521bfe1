//! Unit tests for columnar <-> document conversion

use bson::spec::BinarySubtype;
use bson::{Bson, doc};
use serde_json::json;

use super::mapper::*;

fn meta(pairs: &[(&str, &str)]) -> Vec<ColumnMeta> {
    pairs
        .iter()
        .map(|(name, ty)| ColumnMeta::new(*name, *ty))
        .collect()
}

mod row_conversion_tests {
    use super::*;

    #[test]
    fn test_scenario_datetime_objectid_array() {
        let row = json!({
            "created": "2024-01-15 10:30:45.123",
            "id": "507f1f77bcf86cd799439011",
            "tags": ["a", "b"]
        });
        let meta = meta(&[
            ("created", "DateTime64(3)"),
            ("id", "String"),
            ("tags", "Array(String)"),
        ]);
        let options = MapperOptions {
            preserve_object_id: true,
            ..Default::default()
        };

        let doc = row_to_document(&row, &meta, &options).unwrap();

        let created = doc.get_datetime("created").unwrap();
        assert_eq!(created.timestamp_millis() % 1000, 123);
        assert!(matches!(doc.get("id"), Some(Bson::ObjectId(_))));
        let tags = doc.get_array("tags").unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0], Bson::String("a".into()));
    }

    #[test]
    fn test_integers_parse_base10_strings() {
        let row = json!({ "a": 42, "b": "17" });
        let meta = meta(&[("a", "UInt32"), ("b", "Int64")]);
        let doc = row_to_document(&row, &meta, &MapperOptions::default()).unwrap();
        assert_eq!(doc.get_i64("a").unwrap(), 42);
        assert_eq!(doc.get_i64("b").unwrap(), 17);
    }

    #[test]
    fn test_float_falls_back_to_nan() {
        let row = json!({ "x": "not-a-number" });
        let meta = meta(&[("x", "Float64")]);
        let doc = row_to_document(&row, &meta, &MapperOptions::default()).unwrap();
        assert!(doc.get_f64("x").unwrap().is_nan());
    }

    #[test]
    fn test_bool_accepts_numbers_and_strings() {
        let row = json!({ "a": 1, "b": "TRUE", "c": false });
        let meta = meta(&[("a", "Bool"), ("b", "Bool"), ("c", "Bool")]);
        let doc = row_to_document(&row, &meta, &MapperOptions::default()).unwrap();
        assert!(doc.get_bool("a").unwrap());
        assert!(doc.get_bool("b").unwrap());
        assert!(!doc.get_bool("c").unwrap());
    }

    #[test]
    fn test_uint8_as_bool_option() {
        let row = json!({ "flag": 1 });
        let plain = row_to_document(
            &row,
            &meta(&[("flag", "UInt8")]),
            &MapperOptions::default(),
        )
        .unwrap();
        assert_eq!(plain.get_i64("flag").unwrap(), 1);

        let options = MapperOptions {
            treat_uint8_as_bool: true,
            ..Default::default()
        };
        let coerced = row_to_document(&row, &meta(&[("flag", "UInt8")]), &options).unwrap();
        assert!(coerced.get_bool("flag").unwrap());
    }

    #[test]
    fn test_date_is_midnight_utc() {
        let row = json!({ "d": "2024-01-15" });
        let doc =
            row_to_document(&row, &meta(&[("d", "Date")]), &MapperOptions::default()).unwrap();
        let millis = doc.get_datetime("d").unwrap().timestamp_millis();
        assert_eq!(millis % 86_400_000, 0);
    }

    #[test]
    fn test_datetime_accepts_unix_seconds() {
        let row = json!({ "t": 1_700_000_000 });
        let doc = row_to_document(&row, &meta(&[("t", "DateTime")]), &MapperOptions::default())
            .unwrap();
        assert_eq!(
            doc.get_datetime("t").unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_uuid_preserves_canonical_string() {
        let canonical = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        let row = json!({ "u": canonical });
        let doc = row_to_document(&row, &meta(&[("u", "UUID")]), &MapperOptions::default())
            .unwrap();
        let Bson::Binary(bin) = doc.get("u").unwrap() else {
            panic!("expected binary uuid");
        };
        assert_eq!(bin.subtype, BinarySubtype::Uuid);
        assert_eq!(
            uuid::Uuid::from_slice(&bin.bytes).unwrap().to_string(),
            canonical
        );
    }

    #[test]
    fn test_decimal_preserves_string_form() {
        let row = json!({ "d": "123456789.000000001" });
        let doc = row_to_document(&row, &meta(&[("d", "Decimal(18, 9)")]), &MapperOptions::default())
            .unwrap();
        let Bson::Decimal128(d) = doc.get("d").unwrap() else {
            panic!("expected decimal");
        };
        assert_eq!(d.to_string(), "123456789.000000001");
    }

    #[test]
    fn test_enum_surfaces_as_string() {
        let row = json!({ "e": "active" });
        let doc = row_to_document(
            &row,
            &meta(&[("e", "Enum8('active' = 1, 'done' = 2)")]),
            &MapperOptions::default(),
        )
        .unwrap();
        assert_eq!(doc.get_str("e").unwrap(), "active");
    }

    #[test]
    fn test_nullable_null_maps_to_null() {
        let row = json!({ "s": null });
        let doc = row_to_document(
            &row,
            &meta(&[("s", "Nullable(String)")]),
            &MapperOptions::default(),
        )
        .unwrap();
        assert_eq!(doc.get("s"), Some(&Bson::Null));
    }

    #[test]
    fn test_json_string_parses_into_document() {
        let row = json!({ "payload": r#"{"a": 1, "b": ["x"]}"# });
        let doc = row_to_document(
            &row,
            &meta(&[("payload", "String")]),
            &MapperOptions::default(),
        )
        .unwrap();
        let payload = doc.get_document("payload").unwrap();
        assert_eq!(payload.get_i64("a").unwrap(), 1);
    }

    #[test]
    fn test_object_id_not_lifted_without_option() {
        let row = json!({ "id": "507f1f77bcf86cd799439011" });
        let doc = row_to_document(&row, &meta(&[("id", "String")]), &MapperOptions::default())
            .unwrap();
        assert!(matches!(doc.get("id"), Some(Bson::String(_))));
    }

    #[test]
    fn test_object_ids_lift_recursively() {
        let row = json!({
            "payload": r#"{"ref": "507f1f77bcf86cd799439011", "nested": {"ids": ["507f1f77bcf86cd799439012"]}}"#
        });
        let options = MapperOptions {
            preserve_object_id: true,
            ..Default::default()
        };
        let doc = row_to_document(&row, &meta(&[("payload", "String")]), &options).unwrap();
        let payload = doc.get_document("payload").unwrap();
        assert!(matches!(payload.get("ref"), Some(Bson::ObjectId(_))));
        let nested = payload.get_document("nested").unwrap();
        assert!(matches!(
            nested.get_array("ids").unwrap()[0],
            Bson::ObjectId(_)
        ));
    }

    #[test]
    fn test_binary_heuristic_is_opt_in() {
        let base64ish = "AAAAB3NzaC1yc2EAAAADAQ==";
        let row = json!({ "blob": base64ish });
        let plain = row_to_document(&row, &meta(&[("blob", "String")]), &MapperOptions::default())
            .unwrap();
        assert!(matches!(plain.get("blob"), Some(Bson::String(_))));

        let options = MapperOptions {
            preserve_binary: true,
            ..Default::default()
        };
        let lifted = row_to_document(&row, &meta(&[("blob", "String")]), &options).unwrap();
        assert!(matches!(lifted.get("blob"), Some(Bson::Binary(_))));
    }

    #[test]
    fn test_plain_words_never_lift_to_binary() {
        let options = MapperOptions {
            preserve_binary: true,
            ..Default::default()
        };
        let row = json!({ "word": "organization" });
        let doc = row_to_document(&row, &meta(&[("word", "String")]), &options).unwrap();
        assert!(matches!(doc.get("word"), Some(Bson::String(_))));
    }

    #[test]
    fn test_renames_include_exclude() {
        let row = json!({ "a": 1, "b": 2, "c": 3 });
        let options = MapperOptions {
            renames: [("a".to_string(), "alpha".to_string())].into(),
            exclude: vec!["c".into()],
            ..Default::default()
        };
        let doc = row_to_document(
            &row,
            &meta(&[("a", "UInt8"), ("b", "UInt8"), ("c", "UInt8")]),
            &options,
        )
        .unwrap();
        assert_eq!(doc.get_i64("alpha").unwrap(), 1);
        assert!(doc.get("a").is_none());
        assert!(doc.get("c").is_none());
        assert_eq!(doc.get_i64("b").unwrap(), 2);
    }

    #[test]
    fn test_custom_field_mapper_wins() {
        let options = MapperOptions {
            field_mappers: [(
                "n".to_string(),
                std::sync::Arc::new(|_: &serde_json::Value| Bson::String("mapped".into()))
                    as FieldMapper,
            )]
            .into(),
            ..Default::default()
        };
        let row = json!({ "n": 5 });
        let doc = row_to_document(&row, &meta(&[("n", "UInt64")]), &options).unwrap();
        assert_eq!(doc.get_str("n").unwrap(), "mapped");
    }

    #[test]
    fn test_timestamp_as_date_option() {
        let options = MapperOptions {
            treat_timestamp_as_date: true,
            ..Default::default()
        };
        let row = json!({ "ts": 1_700_000_000_i64, "small": 42 });
        let doc = row_to_document(
            &row,
            &meta(&[("ts", "UInt32"), ("small", "UInt32")]),
            &options,
        )
        .unwrap();
        assert!(matches!(doc.get("ts"), Some(Bson::DateTime(_))));
        assert_eq!(doc.get_i64("small").unwrap(), 42);
    }
}

mod document_rendering_tests {
    use super::*;

    #[test]
    fn test_rich_types_render_canonically() {
        let oid = bson::oid::ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        let doc = doc! {
            "_id": oid,
            "when": bson::DateTime::from_millis(1_705_314_645_123),
            "price": "12.50".parse::<bson::Decimal128>().unwrap(),
            "n": 3_i64,
            "nested": { "ok": true }
        };
        let row = document_to_row(&doc);
        assert_eq!(row["_id"], json!("507f1f77bcf86cd799439011"));
        assert!(row["when"].as_str().unwrap().starts_with("2024-01-15T"));
        assert_eq!(row["price"], json!("12.50"));
        assert_eq!(row["n"], json!(3));
        assert_eq!(row["nested"]["ok"], json!(true));
    }

    #[test]
    fn test_undefined_fields_are_omitted() {
        let mut doc = bson::Document::new();
        doc.insert("keep", 1_i32);
        doc.insert("drop", Bson::Undefined);
        let row = document_to_row(&doc);
        assert!(row.get("drop").is_none());
        assert!(row.get("keep").is_some());
    }

    #[test]
    fn test_round_trip_through_columnar_form() {
        let doc = doc! {
            "id": "507f1f77bcf86cd799439011",
            "count": 7_i64,
            "name": "widget",
            "scores": [1_i64, 2_i64, 3_i64]
        };
        let row = document_to_row(&doc);
        let back = row_to_document(
            &row,
            &meta(&[
                ("id", "String"),
                ("count", "Int64"),
                ("name", "String"),
                ("scores", "Array(Int64)"),
            ]),
            &MapperOptions::default(),
        )
        .unwrap();
        assert_eq!(back, doc);
    }
}
