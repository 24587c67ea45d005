// In: src/transforms/tests.rs

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use chrono::NaiveDate;

use super::*;
use crate::table::{to_f64_opts, to_rendered_opts, CmpOp};
use crate::transforms::groupby::{group_by_aggregate, AggFunc, Aggregation};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn floats(table: &LogicalTable, col: &str) -> Vec<Option<f64>> {
    to_f64_opts(&table.evaluate(col).unwrap()).unwrap()
}

fn strings(table: &LogicalTable, col: &str) -> Vec<Option<String>> {
    to_rendered_opts(&table.evaluate(col).unwrap()).unwrap()
}

fn events() -> LogicalTable {
    LogicalTable::from_columns(vec![
        (
            "uid".into(),
            Arc::new(StringArray::from(vec!["u1", "u1", "u2", "u3", "u2"])) as ArrayRef,
        ),
        (
            "event_type".into(),
            Arc::new(StringArray::from(vec![
                "click", "purchase", "click", "view", "purchase",
            ])) as ArrayRef,
        ),
        (
            "amount".into(),
            Arc::new(Float64Array::from(vec![
                Some(1.0),
                None,
                Some(3.0),
                Some(4.0),
                Some(2.0),
            ])) as ArrayRef,
        ),
    ])
    .unwrap()
}

//==================================================================================
// Cleaning
//==================================================================================

#[test]
fn test_fillna_is_idempotent() {
    let t = events();
    let filled = fillna(&t, &["amount".into()], &Cell::Float(0.0)).unwrap();
    assert_eq!(floats(&filled, "amount")[1], Some(0.0));
    let again = fillna(&filled, &["amount".into()], &Cell::Float(0.0)).unwrap();
    assert_eq!(floats(&filled, "amount"), floats(&again, "amount"));
}

#[test]
fn test_force_int_truncates_floats() {
    let t = events();
    let t = fillna(&t, &["amount".into()], &Cell::Float(0.0)).unwrap();
    let t = force_int(&t, &["amount".into()]).unwrap();
    let arr = t.evaluate("amount").unwrap();
    let arr = arr.as_any().downcast_ref::<Int64Array>().unwrap();
    assert_eq!(arr.values(), &[1, 0, 3, 4, 2]);
}

#[test]
fn test_normalize_date_extracts_substring() {
    let t = LogicalTable::from_columns(vec![(
        "ts".into(),
        Arc::new(StringArray::from(vec![
            Some("2024-01-10 08:30:00"),
            Some("2024-01-01T00:00:00Z"),
            None,
        ])) as ArrayRef,
    )])
    .unwrap();
    let t = normalize_date(&t, &["ts".into()], d(1970, 1, 1), None).unwrap();
    let values = strings(&t, "ts");
    assert_eq!(
        values,
        vec![
            Some("2024-01-10".to_string()),
            Some("2024-01-01".to_string()),
            Some("1970-01-01".to_string()),
        ]
    );
}

#[test]
fn test_normalize_date_reports_offending_column() {
    let t = LogicalTable::from_columns(vec![(
        "ts".into(),
        Arc::new(StringArray::from(vec!["not a date"])) as ArrayRef,
    )])
    .unwrap();
    let err = normalize_date(&t, &["ts".into()], d(1970, 1, 1), None).unwrap_err();
    match err {
        CarouselError::DateParse { column, value, .. } => {
            assert_eq!(column, "ts");
            assert_eq!(value, "not a date");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_date_difference_in_days() {
    let t = LogicalTable::from_columns(vec![
        (
            "refresh".into(),
            Arc::new(StringArray::from(vec!["2024-01-10", "2024-01-10"])) as ArrayRef,
        ),
        (
            "event".into(),
            Arc::new(StringArray::from(vec!["2024-01-01", "2024-01-10"])) as ArrayRef,
        ),
    ])
    .unwrap();
    let t = normalize_date(&t, &["refresh".into(), "event".into()], d(1970, 1, 1), None).unwrap();
    let t = date_difference(&t, &["event".into()], "refresh", true).unwrap();
    assert!(!t.has_column("refresh"));
    assert_eq!(floats(&t, "event"), vec![Some(9.0), Some(0.0)]);
}

#[test]
fn test_add_constant_rejects_existing_column() {
    let t = events();
    let err = add_constant(&t, "uid", Cell::Int(1)).unwrap_err();
    assert!(matches!(err, CarouselError::DuplicateColumn(_)));
}

#[test]
fn test_add_constant_rejects_hidden_column() {
    let t = LogicalTable::from_columns(vec![(
        "amount".into(),
        Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])) as ArrayRef,
    )])
    .unwrap()
    .set_virtual(
        "double",
        Expr::Mul(
            Box::new(Expr::col("amount")),
            Box::new(Expr::Literal(Cell::Float(2.0))),
        ),
    );
    // "amount" is hidden, not deleted: "double" still resolves against it.
    let t = drop_columns(&t, &["amount".into()]);
    assert!(!t.has_column("amount"));

    // Re-adding the name would rebind the pending expression to the constant.
    let err = add_constant(&t, "amount", Cell::Float(100.0)).unwrap_err();
    assert!(matches!(err, CarouselError::DuplicateColumn(_)));
    assert_eq!(
        floats(&t, "double"),
        vec![Some(2.0), Some(4.0), Some(6.0)]
    );
}

//==================================================================================
// Encoders
//==================================================================================

#[test]
fn test_one_hot_schema_is_stable_across_tables() {
    let train = events();
    let (encoded, enc) =
        one_hot_encode(&train, &["event_type".into()], None, false, true).unwrap();
    assert!(!encoded.has_column("event_type"));
    assert!(encoded.has_column("event_type_click"));
    assert!(encoded.has_column("event_type_purchase"));
    assert!(encoded.has_column("event_type_view"));

    // A table missing a category still yields the full indicator set.
    let apply = LogicalTable::from_columns(vec![(
        "event_type".into(),
        Arc::new(StringArray::from(vec!["click", "click"])) as ArrayRef,
    )])
    .unwrap();
    let (applied, _) =
        one_hot_encode(&apply, &["event_type".into()], Some(enc), true, true).unwrap();
    assert_eq!(
        floats(&applied, "event_type_purchase"),
        vec![Some(0.0), Some(0.0)]
    );
    assert_eq!(
        floats(&applied, "event_type_click"),
        vec![Some(1.0), Some(1.0)]
    );
}

#[test]
fn test_one_hot_numeric_vocabulary_sorts_numerically() {
    let t = LogicalTable::from_columns(vec![(
        "offer_id".into(),
        Arc::new(Int64Array::from(vec![10, 2, 10, 1])) as ArrayRef,
    )])
    .unwrap();
    let enc = OneHotEncoder::fit(&t, &["offer_id".into()]).unwrap();
    assert_eq!(
        enc.output_columns(),
        vec!["offer_id_1", "offer_id_2", "offer_id_10"]
    );
}

#[test]
fn test_multi_hot_splits_token_sets() {
    let t = LogicalTable::from_columns(vec![(
        "channels".into(),
        Arc::new(StringArray::from(vec![
            Some("sms,push"),
            Some("push"),
            None,
        ])) as ArrayRef,
    )])
    .unwrap();
    let (t, enc) = multi_hot_encode(&t, &["channels".into()], None, true, true).unwrap();
    assert_eq!(enc.output_columns(), vec!["channels_push", "channels_sms"]);
    assert_eq!(
        floats(&t, "channels_push"),
        vec![Some(1.0), Some(1.0), Some(0.0)]
    );
    assert_eq!(
        floats(&t, "channels_sms"),
        vec![Some(1.0), Some(0.0), Some(0.0)]
    );
}

#[test]
fn test_label_encode_unseen_maps_to_sentinel() {
    let train = events();
    let (_, enc) = label_encode(&train, &["event_type".into()], None).unwrap();
    let apply = LogicalTable::from_columns(vec![(
        "event_type".into(),
        Arc::new(StringArray::from(vec!["click", "refund"])) as ArrayRef,
    )])
    .unwrap();
    let (coded, _) = label_encode(&apply, &["event_type".into()], Some(enc)).unwrap();
    let codes = floats(&coded, "event_type");
    assert_eq!(codes[0], Some(0.0));
    assert_eq!(codes[1], Some(encode::UNSEEN_LABEL as f64));
}

//==================================================================================
// Scaling
//==================================================================================

#[test]
fn test_scale_centers_and_reduces() {
    let t = LogicalTable::from_columns(vec![(
        "x".into(),
        Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])) as ArrayRef,
    )])
    .unwrap();
    let (scaled, fitted) = scale(&t, &["x".into()], &[], None).unwrap();
    let values = floats(&scaled, "x");
    assert!((values[1].unwrap()).abs() < 1e-12);
    assert!((values[0].unwrap() + values[2].unwrap()).abs() < 1e-12);
    assert!((fitted.stats[0].1 - 2.0).abs() < 1e-12);
}

#[test]
fn test_scale_zero_variance_yields_zeros() {
    let t = LogicalTable::from_columns(vec![(
        "x".into(),
        Arc::new(Float64Array::from(vec![5.0, 5.0, 5.0])) as ArrayRef,
    )])
    .unwrap();
    let (scaled, fitted) = scale(&t, &["x".into()], &[], None).unwrap();
    assert_eq!(fitted.stats[0].2, 1.0);
    assert_eq!(
        floats(&scaled, "x"),
        vec![Some(0.0), Some(0.0), Some(0.0)]
    );
}

//==================================================================================
// Group-By
//==================================================================================

#[test]
fn test_group_by_one_row_per_key_sorted() {
    let t = events();
    let out = group_by_aggregate(
        &t,
        "uid",
        &[Aggregation::new(AggFunc::Sum, "amount", "amount_sum")],
        None,
    )
    .unwrap();
    assert_eq!(out.num_rows().unwrap(), 3);
    assert_eq!(
        strings(&out, "uid"),
        vec![
            Some("u1".to_string()),
            Some("u2".to_string()),
            Some("u3".to_string()),
        ]
    );
    assert_eq!(
        floats(&out, "amount_sum"),
        vec![Some(1.0), Some(5.0), Some(4.0)]
    );
}

#[test]
fn test_group_by_filtered_count() {
    let t = events();
    let out = group_by_aggregate(
        &t,
        "uid",
        &[Aggregation::filtered(
            AggFunc::Count,
            "",
            "purchases",
            Predicate::Cmp {
                column: "event_type".into(),
                op: CmpOp::Eq,
                value: Cell::Str("purchase".into()),
            },
        )],
        None,
    )
    .unwrap();
    let counts = out.evaluate("purchases").unwrap();
    let counts = counts.as_any().downcast_ref::<Int64Array>().unwrap();
    assert_eq!(counts.values(), &[1, 1, 0]);
}

#[test]
fn test_group_by_std_is_population() {
    let t = LogicalTable::from_columns(vec![
        (
            "k".into(),
            Arc::new(StringArray::from(vec!["a", "a", "a"])) as ArrayRef,
        ),
        (
            "v".into(),
            Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])) as ArrayRef,
        ),
    ])
    .unwrap();
    let out = group_by_aggregate(
        &t,
        "k",
        &[Aggregation::new(AggFunc::Std, "v", "v_std")],
        None,
    )
    .unwrap();
    let std = floats(&out, "v_std")[0].unwrap();
    assert!((std - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
}

#[test]
fn test_group_by_first_preserves_dtype() {
    let t = events();
    let out = group_by_aggregate(
        &t,
        "uid",
        &[Aggregation::new(AggFunc::First, "event_type", "first_event")],
        None,
    )
    .unwrap();
    assert_eq!(
        strings(&out, "first_event"),
        vec![
            Some("click".to_string()),
            Some("click".to_string()),
            Some("view".to_string()),
        ]
    );
}

#[test]
fn test_group_by_empty_group_takes_fill_value() {
    let t = events();
    // u3 has no purchase rows, so its filtered sum is empty.
    let out = group_by_aggregate(
        &t,
        "uid",
        &[Aggregation::filtered(
            AggFunc::Sum,
            "amount",
            "purchase_amount",
            Predicate::eq("event_type", Cell::Str("purchase".into())),
        )],
        Some(&Cell::Float(0.0)),
    )
    .unwrap();
    assert_eq!(
        floats(&out, "purchase_amount"),
        vec![Some(0.0), Some(2.0), Some(0.0)]
    );
}

#[test]
fn test_scale_exclude_skips_columns() {
    let t = LogicalTable::from_columns(vec![
        (
            "x".into(),
            Arc::new(Float64Array::from(vec![1.0, 3.0])) as ArrayRef,
        ),
        (
            "y".into(),
            Arc::new(Float64Array::from(vec![10.0, 30.0])) as ArrayRef,
        ),
    ])
    .unwrap();
    let (scaled, fitted) = scale(
        &t,
        &["x".into(), "y".into()],
        &["y".into()],
        None,
    )
    .unwrap();
    assert_eq!(fitted.stats.len(), 1);
    assert_eq!(floats(&scaled, "y"), vec![Some(10.0), Some(30.0)]);
}

#[test]
fn test_unknown_aggregate_name() {
    let err = AggFunc::parse("median").unwrap_err();
    assert!(matches!(err, CarouselError::UnknownAggregate(_)));
}
