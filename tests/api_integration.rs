//! Integration tests for the operation API
//!
//! Drives the merge engine the way a synchronous caller does: through a MergeContext,
//! parameter objects, and configurations loaded from disk.

mod common;

use common::{doc, keys, scored_doc, MemoryIndex, QueryScript, ScriptedExecutor, TestSetupBuilder};
use serde_json::json;
use shardmerge::api::{
    ApiOperation, CoordinatedMerge, CoordinatedMergeParams, DeriveSortValues, DeriveSortValuesParams, MergeContext,
    MergeParams, MergeResponses, PlanResolution, ResolutionReply, ValidateConfig, ValidateConfigParams,
};
use shardmerge::{
    FieldType, MergeConfig, MergeError, MergeStrategy, MergeValues, ResultWindow, ShardAddress,
    ShardPayload, ShardResponse, SortDirection, SortSpec, SortValue,
};
use std::sync::Arc;

fn rating_spec() -> SortSpec {
    SortSpec::new(vec![]).then_field("rating", FieldType::Double, SortDirection::Descending)
}

#[test]
fn test_config_saved_by_setup_loads_back_identically() {
    let (temp_dir, config) = TestSetupBuilder::new("roundtrip")
        .with_shards_info(true)
        .with_resolution_timeout_ms(2_500)
        .with_shard_timeout_ms(750)
        .build();

    let loaded = MergeConfig::load(&temp_dir.path().join("roundtrip.json")).unwrap();
    assert_eq!(loaded, config);

    let mut context = MergeContext::with_config(loaded);
    assert!(ValidateConfig::execute(&mut context, &ValidateConfigParams::new(config)).unwrap());
}

#[test]
fn test_config_file_with_only_some_fields_uses_defaults() {
    let (temp_dir, _) = TestSetupBuilder::new("partial").build();
    let path = temp_dir.path().join("sparse.json");
    std::fs::write(&path, r#"{"version": 1, "config": {"unique_key_field": "doc_id"}}"#).unwrap();

    let loaded = MergeConfig::load(&path).unwrap();
    assert_eq!(loaded.unique_key_field, "doc_id");
    assert_eq!(loaded.score_field, "score");
    assert_eq!(loaded.max_window_end, 10_000);
}

#[test]
fn test_invalid_config_on_disk_is_rejected_at_load() {
    let (temp_dir, _) = TestSetupBuilder::new("invalid").build();
    let path = temp_dir.path().join("invalid.json");
    std::fs::write(&path, r#"{"version": 1, "config": {"shard_timeout_ms": 0}}"#).unwrap();

    match MergeConfig::load(&path) {
        Err(MergeError::Config(message)) => assert!(message.starts_with("shard_timeout_ms - must be greater than 0")),
        other => panic!("Expected Config error, got {:?}", other),
    }
}

#[test]
fn test_validate_config_reports_invalid_without_failing() {
    let mut context = MergeContext::new();
    let params = ValidateConfigParams::new(MergeConfig::default().unique_key_field("score"));
    assert!(!ValidateConfig::execute(&mut context, &params).unwrap());
    assert_eq!(context.history().merges_completed, 0);
}

#[test]
fn test_custom_key_and_score_fields_from_context_config() {
    let config = MergeConfig::default().unique_key_field("sku").score_field("relevance");
    let mut context = MergeContext::with_config(config);
    let doc = |sku: i64, relevance: f64| json!({"sku": sku, "relevance": relevance}).as_object().unwrap().clone();

    let params = MergeParams::builder()
        .response(ShardResponse::success("s1", ShardPayload::new(vec![doc(10, 0.5), doc(11, 0.9)])))
        .response(ShardResponse::success("s2", ShardPayload::new(vec![doc(10, 0.5)])))
        .build()
        .unwrap();

    let result = MergeResponses::execute(&mut context, &params).unwrap();
    assert_eq!(keys(&result), vec!["11", "10"]);
    assert_eq!(result.num_found, 2);
}

#[test]
fn test_sync_field_merge_via_plan_derive_merge() {
    let mut context = MergeContext::new();
    let responses = vec![
        ShardResponse::success("s1", ShardPayload::new(vec![doc("a"), doc("b")])),
        ShardResponse::success("s2", ShardPayload::new(vec![doc("c")])),
        ShardResponse::failure("s3", "unreachable"),
    ];
    let indexes = [
        (
            "s1",
            MemoryIndex::new(&[4])
                .with_value("a", 0, "rating", SortValue::Double(4.5))
                .with_value("b", 3, "rating", SortValue::Double(1.0)),
        ),
        ("s2", MemoryIndex::new(&[1, 1]).with_value("c", 1, "rating", SortValue::Double(3.0))),
    ];

    let plan_params = MergeParams::builder()
        .responses(responses.clone())
        .sort_spec(rating_spec())
        .build()
        .unwrap();
    let requests = PlanResolution::execute(&mut context, &plan_params).unwrap();
    assert_eq!(requests.len(), 2);

    let replies = requests
        .into_iter()
        .map(|request| {
            let (_, index) = indexes.iter().find(|(name, _)| *name == request.shard.as_str()).unwrap();
            let params = DeriveSortValuesParams::new(index, request).unwrap();
            ResolutionReply::Resolved(DeriveSortValues::execute(&mut context, &params).unwrap())
        })
        .collect();

    let merge_params = MergeParams::builder()
        .responses(responses)
        .sort_spec(rating_spec())
        .resolutions(replies)
        .build()
        .unwrap();
    let result = MergeResponses::execute(&mut context, &merge_params).unwrap();

    assert_eq!(keys(&result), vec!["a", "c", "b"]);
    assert!(result.partial_results);
    assert_eq!(context.history().merges_completed, 1);
    assert_eq!(context.history().partial_merges, 1);
}

#[test]
fn test_failed_resolution_reply_flags_partial() {
    let mut context = MergeContext::new();
    let params = MergeParams::builder()
        .response(ShardResponse::success("s1", ShardPayload::new(vec![doc("a")])))
        .sort_spec(rating_spec())
        .resolutions(vec![ResolutionReply::Failed {
            shard: ShardAddress::new("s1"),
            error: "broken pipe".to_string(),
        }])
        .build()
        .unwrap();

    let result = MergeResponses::execute(&mut context, &params).unwrap();
    assert_eq!(keys(&result), vec!["a"]);
    assert!(result.partial_results);
    assert_eq!(result.partial_report.failed_shards[0].cause, "broken pipe");
}

#[test]
fn test_plan_is_empty_when_values_are_in_band() {
    let mut context = MergeContext::new();
    let params = MergeParams::builder()
        .response(ShardResponse::success(
            "s1",
            ShardPayload::new(vec![doc("a")]).with_merge_values(MergeValues::new().with_field("rating", vec![json!(2.5)])),
        ))
        .sort_spec(rating_spec())
        .build()
        .unwrap();

    assert!(PlanResolution::execute(&mut context, &params).unwrap().is_empty());
}

#[test]
fn test_explicit_strategy_must_be_eligible() {
    let err = MergeParams::builder()
        .response(ShardResponse::success("s1", ShardPayload::new(vec![scored_doc("a", 1.0)])))
        .sort_spec(rating_spec())
        .strategy(MergeStrategy::ScoreMerge)
        .build()
        .unwrap_err();
    assert!(matches!(err, MergeError::Config(_)));

    // a field value merge can always order a relevance sort
    let params = MergeParams::builder()
        .response(ShardResponse::success("s1", ShardPayload::new(vec![scored_doc("a", 1.0), scored_doc("b", 3.0)])))
        .strategy(MergeStrategy::FieldValueMerge)
        .build()
        .unwrap();
    let result = MergeResponses::execute(&mut MergeContext::new(), &params).unwrap();
    assert_eq!(keys(&result), vec!["b", "a"]);
}

#[test]
fn test_coordinated_merge_from_sync_code() {
    let executor = ScriptedExecutor::new()
        .shard("s1", QueryScript::Answer(ShardPayload::new(vec![scored_doc("a", 1.0), scored_doc("b", 4.0)])))
        .shard("s2", QueryScript::Fail("refused"));
    let params = CoordinatedMergeParams::new(
        Arc::new(executor),
        vec![ShardAddress::new("s1"), ShardAddress::new("s2")],
        SortSpec::relevance(),
        ResultWindow::new(0, 1),
    )
    .unwrap();

    let mut context = MergeContext::new();
    let result = CoordinatedMerge::execute(&mut context, &params).unwrap();
    assert_eq!(keys(&result), vec!["b"]);
    assert_eq!(result.num_found, 2);
    assert!(result.partial_results);
    assert_eq!(context.history().partial_merges, 1);
}
