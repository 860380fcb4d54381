//! Integration tests for the ember learned-cardinality subsystem.
//!
//! These exercise the full per-query loop — extract, predict, attach,
//! execute, collect, train — and the concurrency discipline of the shared
//! model. Tests that need a cold or isolated model build their own instance;
//! the process-wide singletons are only used where sharing is the point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ember::config::ModelConfig;
use ember::execution::{
    collect_actual_cardinalities_with_model, ExecutionTracker, PhysicalPlanner,
};
use ember::features::{extract_features, features_to_vector, JoinFeatures};
use ember::model::{BoostingModel, ModelInterface, TrainingBuffer, TrainingSample};
use ember::optimizer::{CardinalityRewriter, FeatureCollector, MAP_CAPACITY};
use ember::planner::{
    ComparisonKind, FilterExpressionKind, JoinCondition, JoinType, LogicalOperator,
    LogicalOperatorKind, PhysicalOperator,
};
use ember::FEATURE_VECTOR_SIZE;

fn leaked_model(config: ModelConfig) -> &'static BoostingModel {
    Box::leak(Box::new(BoostingModel::new(config)))
}

fn scan(table: &str, rows: u64) -> LogicalOperator {
    LogicalOperator::new(
        LogicalOperatorKind::TableScan {
            table: table.into(),
            base_cardinality: Some(rows),
            filter_count: 0,
        },
        rows,
    )
}

fn filter_over(child: LogicalOperator, estimate: u64) -> LogicalOperator {
    LogicalOperator::new(
        LogicalOperatorKind::Filter {
            predicates: vec![FilterExpressionKind::Comparison(ComparisonKind::Equal)],
        },
        estimate,
    )
    .with_children(vec![child])
}

fn join_plan() -> LogicalOperator {
    LogicalOperator::new(
        LogicalOperatorKind::ComparisonJoin {
            join_type: JoinType::Inner,
            conditions: vec![JoinCondition::equality()],
        },
        40_000,
    )
    .with_children(vec![
        filter_over(scan("orders", 150_000), 15_000),
        scan("customer", 15_000),
    ])
}

/// Simulate execution: every tracked operator produces a known row count.
fn execute(plan: &PhysicalOperator, rows_per_operator: u64) {
    plan.walk(&mut |op| {
        if let Some(tracker) = &op.tracker {
            tracker.add_rows(rows_per_operator);
        }
    });
}

fn training_samples(n: usize) -> Vec<TrainingSample> {
    (0..n)
        .map(|i| {
            let mut features = vec![0.0; FEATURE_VECTOR_SIZE];
            features[0] = 1.0;
            features[11] = ((i % 17) as f64 + 1.0).ln();
            features[67] = ((i as f64) + 1.0).ln();
            TrainingSample {
                features,
                actual_cardinality: (i as u64 + 1) * 10,
                predicted_cardinality: 0,
                q_error: 1.0,
            }
        })
        .collect()
}

// Scenario 1: a cold model attaches engine estimates as fallback and stays
// cold while the query produces fewer than 10 samples.
#[test]
fn test_cold_model_single_query() {
    let model = leaked_model(ModelConfig::default());
    let collector = FeatureCollector::new();
    let buffer = TrainingBuffer::new(1000);

    let logical = filter_over(scan("part", 20_000), 2_000);
    let planner = PhysicalPlanner::new(&collector, ModelInterface::with_model(model, 1));
    let physical = planner.create_plan(&logical);

    // Cold model: raw predictions are 0, so trackers fall back to the
    // engine estimate.
    let root_tracker = physical.tracker.as_ref().unwrap();
    assert_eq!(root_tracker.predicted_cardinality(), 2_000);
    assert_eq!(root_tracker.engine_cardinality(), 2_000);

    execute(&physical, 1_800);
    collect_actual_cardinalities_with_model(&physical, &buffer, model);

    // Two operators yielded two samples — below the 10-sample minimum, so
    // the ensemble still only has its bootstrap tree.
    assert_eq!(buffer.len(), 2);
    assert_eq!(model.num_trees(), 1);
    assert!(!model.is_ready());
}

// Scenario 2: fifty repeated identical queries warm the model up and later
// queries get non-zero predictions for the same operators.
#[test]
fn test_warmup_repeated_queries() {
    let model = leaked_model(ModelConfig {
        trees_per_update: 2,
        swap_every_n_updates: 1,
        max_depth: 3,
        ..ModelConfig::default()
    });
    let collector = FeatureCollector::new();
    let buffer = TrainingBuffer::new(10_000);

    for query_id in 0..50_u64 {
        let logical = join_plan();
        let planner = PhysicalPlanner::new(&collector, ModelInterface::with_model(model, query_id));
        let physical = planner.create_plan(&logical);
        execute(&physical, 12_000);
        collect_actual_cardinalities_with_model(&physical, &buffer, model);
    }

    assert!(model.total_updates() >= 1);
    assert!(model.is_ready());

    // The 51st identical query sees real predictions for every operator.
    let logical = join_plan();
    let interface = ModelInterface::with_model(model, 50);
    let mut non_zero = 0;
    fn check(op: &LogicalOperator, collector: &FeatureCollector, interface: &ModelInterface, non_zero: &mut usize) {
        for child in &op.children {
            check(child, collector, interface, non_zero);
        }
        let features = extract_features(op, collector);
        let first = interface.predict_cardinality(&features);
        if first > 0 {
            *non_zero += 1;
        }
        // Same query, same fingerprint: the per-thread cache answers with
        // the identical value.
        assert_eq!(interface.predict_cardinality(&features), first);
    }
    check(&logical, &collector, &interface, &mut non_zero);
    assert_eq!(non_zero, 4);
}

// Scenario 3: wrong-width vectors are rejected without touching the model.
#[test]
fn test_width_drift_guard() {
    let model = leaked_model(ModelConfig {
        trees_per_update: 1,
        swap_every_n_updates: 1,
        ..ModelConfig::default()
    });
    model.update_incremental(&training_samples(20));
    let trees_before = model.num_trees();
    assert!(model.is_ready());

    assert_eq!(model.predict(&vec![0.0; FEATURE_VECTOR_SIZE - 1]), 0.0);
    assert_eq!(model.num_trees(), trees_before);
}

// Scenario 4: concurrent prediction under a training storm — readers never
// observe a decreasing tree count and the final count matches the update
// arithmetic.
#[test]
fn test_swap_under_load() {
    const UPDATES: usize = 100;
    const READERS: usize = 8;
    let config = ModelConfig {
        trees_per_update: 2,
        swap_every_n_updates: 5,
        max_depth: 2,
        max_total_trees: 2000,
        ..ModelConfig::default()
    };
    let trees_per_update = config.trees_per_update as u64;
    let model = leaked_model(config);
    let done = Arc::new(AtomicBool::new(false));

    std::thread::scope(|scope| {
        for _ in 0..READERS {
            let done = Arc::clone(&done);
            scope.spawn(move || {
                let features = vec![0.5; FEATURE_VECTOR_SIZE];
                let mut last_seen = 0;
                while !done.load(Ordering::Acquire) {
                    let trees = model.num_trees();
                    assert!(trees >= last_seen, "num_trees went backwards");
                    last_seen = trees;
                    let prediction = model.predict(&features);
                    assert!(prediction == 0.0 || prediction >= 1.0);
                }
            });
        }

        let samples = training_samples(200);
        for _ in 0..UPDATES {
            model.update_incremental(&samples);
        }
        done.store(true, Ordering::Release);
    });

    assert_eq!(
        model.num_trees(),
        (1 + UPDATES as u64 * trees_per_update).min(2000)
    );
    assert_eq!(model.total_updates(), UPDATES as u64);
}

// Scenario 5: pushing 600 distinct join fingerprints clears the map
// wholesale exactly once.
#[test]
fn test_collector_overflow_single_clear() {
    let collector = FeatureCollector::new();
    let mut clears = 0;
    let mut previous = 0;
    for i in 0..600_u64 {
        let features = JoinFeatures {
            join_type: JoinType::Inner,
            relation_set: format!("[{i}]"),
            estimated_cardinality: i + 1,
            ..Default::default()
        };
        collector.add_join_features_by_relation_set(&format!("[{i}]"), features);
        let size = collector.relation_set_entries();
        if size < previous {
            clears += 1;
        }
        previous = size;
    }
    assert_eq!(clears, 1);
    assert!(collector.relation_set_entries() <= MAP_CAPACITY);
    // The newest fingerprint survived the clear.
    assert!(collector.join_features_by_relation_set("[599]").is_some());
}

// Scenario 6: the tree cap turns further updates into silent no-ops.
#[test]
fn test_tree_cap_makes_updates_noops() {
    let model = leaked_model(ModelConfig {
        trees_per_update: 3,
        max_total_trees: 20,
        swap_every_n_updates: 5,
        max_depth: 2,
        ..ModelConfig::default()
    });
    for _ in 0..10 {
        model.update_incremental(&training_samples(15));
    }
    // The shadow reaches the 20-tree cap on the 7th call; calls 8-10 train
    // nothing, so no later publication lands and the public counters stay at
    // the call-5 swap: 16 trees, 5 updates. The cap is never exceeded.
    assert_eq!(model.num_trees(), 16);
    assert_eq!(model.total_updates(), 5);
    model.update_incremental(&training_samples(15));
    assert_eq!(model.num_trees(), 16);
    assert_eq!(model.total_updates(), 5);
}

// The per-query prediction cap falls back to the engine estimate; resetting
// the thread's caches restores real predictions.
#[test]
fn test_prediction_cap_and_cache_reset() {
    let model = leaked_model(ModelConfig {
        trees_per_update: 2,
        swap_every_n_updates: 1,
        max_depth: 2,
        ..ModelConfig::default()
    });
    model.update_incremental(&training_samples(50));
    assert!(model.is_ready());

    let collector = FeatureCollector::new();
    let interface = ModelInterface::with_model(model, 77);
    // Predictions never exceed exp(15) ≈ 3.3M, so a huge engine estimate is
    // distinguishable from any model output.
    const HUGE_ESTIMATE: u64 = 1_000_000_000;

    let features_for = |i: usize| {
        let mut op = scan(&format!("table_{i}"), HUGE_ESTIMATE);
        op.estimated_cardinality = HUGE_ESTIMATE;
        extract_features(&op, &collector)
    };

    // Burn through the per-query budget with distinct fingerprints.
    for i in 0..300 {
        let prediction = interface.predict_cardinality(&features_for(i));
        assert!(prediction < HUGE_ESTIMATE);
    }
    // Past the cap: the engine estimate comes back.
    assert_eq!(
        interface.predict_cardinality(&features_for(300)),
        HUGE_ESTIMATE
    );

    ModelInterface::reset_prediction_caches_for_thread();
    // A fresh prediction is computed again on this thread.
    let fresh = interface.predict_cardinality(&features_for(300));
    assert!(fresh > 0);
    assert!(fresh < HUGE_ESTIMATE);
}

// Optimizer hook end-to-end: with a warm model, estimates are rewritten and
// baselines preserved; the physical plan then keeps using the rewritten
// engine estimates while trackers remember the original baseline.
#[test]
fn test_optimizer_hook_rewrites_and_physical_plan_observes() {
    let model = leaked_model(ModelConfig {
        trees_per_update: 2,
        swap_every_n_updates: 1,
        max_depth: 3,
        ..ModelConfig::default()
    });
    model.update_incremental(&training_samples(60));
    assert!(model.is_ready());

    let collector = FeatureCollector::new();
    let mut logical = join_plan();
    let original_estimate = logical.estimated_cardinality;

    let rewriter = CardinalityRewriter::new(&collector, ModelInterface::with_model(model, 300));
    rewriter.rewrite(&mut logical);

    assert_eq!(logical.baseline_cardinality, Some(original_estimate));
    assert!(logical.estimated_cardinality >= 1);

    let planner = PhysicalPlanner::new(&collector, ModelInterface::with_model(model, 300));
    let physical = planner.create_plan(&logical);
    // The tracker's engine estimate is the preserved baseline, not the
    // rewritten value.
    assert_eq!(
        physical.tracker.as_ref().unwrap().engine_cardinality(),
        original_estimate
    );
}

// Feature extraction stays within the frozen width for every operator kind
// and is deterministic.
#[test]
fn test_feature_width_stability_across_kinds() {
    let collector = FeatureCollector::new();
    let operators = vec![
        scan("region", 5),
        filter_over(scan("nation", 25), 5),
        join_plan(),
        LogicalOperator::new(
            LogicalOperatorKind::Aggregate {
                group_count: 1,
                aggregate_count: 2,
                grouping_set_count: 0,
            },
            100,
        ),
        LogicalOperator::new(LogicalOperatorKind::TopN { limit: 10 }, 10),
        LogicalOperator::new(LogicalOperatorKind::Window, 1000),
    ];
    for op in &operators {
        let first = features_to_vector(&extract_features(op, &collector));
        let second = features_to_vector(&extract_features(op, &collector));
        assert_eq!(first.len(), FEATURE_VECTOR_SIZE);
        assert_eq!(first, second);
    }
}

// The execution tracker's generation bump invalidates per-thread caches
// across threads.
#[test]
fn test_execution_tracker_across_threads() {
    let tracker = Arc::new(ExecutionTracker::new());
    tracker.start_operator(7, 1000);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let tracker = Arc::clone(&tracker);
            scope.spawn(move || {
                for _ in 0..100 {
                    tracker.record_rows(7, 1);
                }
            });
        }
    });
    assert_eq!(tracker.actual_rows(7), 400);

    tracker.reset();
    assert_eq!(tracker.actual_rows(7), 0);
}

// The planner-side predictor callback reaches the model through the
// collector registration.
#[test]
fn test_collector_predictor_callback_path() {
    let collector = FeatureCollector::new();
    // An explicit stand-in for the model-backed callback: the registration
    // mechanism is what is under test.
    collector.register_predictor(Arc::new(|features: &JoinFeatures| {
        if features.numerator > 0.0 && features.denominator > 0.0 {
            features.numerator / features.denominator
        } else {
            0.0
        }
    }));
    let features = JoinFeatures {
        join_type: JoinType::Inner,
        relation_set: "[0, 1]".into(),
        numerator: 1_000_000.0,
        denominator: 100.0,
        ..Default::default()
    };
    assert_eq!(collector.predict_cardinality(&features), 10_000.0);
}
