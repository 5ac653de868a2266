//! End-to-end transfer runs against scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use cityflow::events::InterruptCause;
use cityflow::test_utils::codec::RecordingCodec;
use cityflow::test_utils::discovery::ScriptedDiscovery;
use cityflow::test_utils::resource::UnitResourceFactory;
use cityflow::test_utils::sink::MemorySink;
use cityflow::transfer::{
    CodecRegistry, ControllerState, OutgoingReference, TransferController, TransferOutcome,
};
use cityflow::types::{
    BoundingBox, FeatureKey, FeatureKind, FeatureRow, ReferencePatch, TransferQuery,
};
use cityflow_config::shared::{
    BoundingBoxFilterConfig, CacheBackend, CacheConfig, FilterConfig, PoolConfig, SizingMode,
    SpatialMode, StoreConnectionConfig, TlsConfig, TransferConfig,
};
use cityflow_telemetry::tracing::init_test_tracing;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

type TestController = TransferController<ScriptedDiscovery, UnitResourceFactory, MemorySink>;

fn test_config(pool: PoolConfig) -> TransferConfig {
    TransferConfig {
        id: 1,
        workspace: None,
        connection: StoreConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "citydb".to_string(),
            username: "cityflow".to_string(),
            password: None,
            tls: TlsConfig::disabled(),
        },
        pool,
        cache: CacheConfig::default(),
    }
}

fn fixed_pool(workers: u16) -> PoolConfig {
    PoolConfig {
        min_workers: workers,
        max_workers: workers,
        queue_capacity: 8,
        sizing: SizingMode::Fixed,
        sizing_interval_ms: 50,
    }
}

fn engine(
    config: TransferConfig,
    discovery: ScriptedDiscovery,
) -> (TestController, RecordingCodec, MemorySink) {
    let codec = RecordingCodec::default();
    let sink = MemorySink::default();
    let codecs: CodecRegistry<()> = CodecRegistry::new().with_fallback(Arc::new(codec.clone()));
    let controller = TransferController::new(
        config,
        Arc::new(discovery),
        Arc::new(UnitResourceFactory::default()),
        codecs,
        sink.clone(),
    );

    (controller, codec, sink)
}

fn building(key: i64) -> FeatureRow {
    FeatureRow::new(FeatureKey(key), FeatureKind::Building)
}

fn group(key: i64) -> FeatureRow {
    FeatureRow::new(FeatureKey(key), FeatureKind::CityObjectGroup)
}

fn transferred_keys(codec: &RecordingCodec) -> Vec<i64> {
    codec
        .transfers()
        .iter()
        .map(|item| item.key.as_i64())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn thousand_row_export_transfers_the_filtered_subset_exactly_once() {
    init_test_tracing();

    // 1000 rows in two kinds, envelopes laid out along the x axis so the
    // bounding box selects exactly the first 300 keys.
    let rows = (0..1000).map(|key| {
        let kind = if key % 2 == 0 {
            FeatureKind::Building
        } else {
            FeatureKind::CityFurniture
        };
        FeatureRow::new(FeatureKey(key), kind)
            .with_envelope(BoundingBox::new(key as f64, 0.0, key as f64 + 0.5, 0.5))
    });
    let discovery = ScriptedDiscovery::new().add_rows(rows);

    let config = test_config(PoolConfig {
        min_workers: 1,
        max_workers: 4,
        queue_capacity: 8,
        sizing: SizingMode::Aggressive,
        sizing_interval_ms: 20,
    });
    let (mut controller, codec, sink) = engine(config, discovery);

    let filters = FilterConfig {
        bounding_box: Some(BoundingBoxFilterConfig {
            bounds: BoundingBox::new(0.0, 0.0, 299.9, 10.0),
            mode: SpatialMode::Overlap,
        }),
        ..FilterConfig::default()
    };
    let report = controller
        .run_export(
            &TransferQuery::for_kinds([FeatureKind::Building, FeatureKind::CityFurniture]),
            &filters,
        )
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(report.discovery.scanned_rows, 1000);
    assert_eq!(report.discovery.submitted_items, 300);
    assert_eq!(
        report.counters.processed.get(&FeatureKind::Building),
        Some(&150)
    );
    assert_eq!(
        report.counters.processed.get(&FeatureKind::CityFurniture),
        Some(&150)
    );
    assert_eq!(report.counters.failed, 0);
    assert!(report.unresolved.is_empty());

    let mut keys = transferred_keys(&codec);
    keys.sort_unstable();
    assert_eq!(keys, (0..300).collect::<Vec<_>>());

    assert_eq!(sink.commits(), 1);
    assert_eq!(sink.rollbacks(), 0);
    assert_eq!(controller.state(), ControllerState::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn chained_references_resolve_under_shuffled_discovery() {
    init_test_tracing();

    // Every feature references the next one in the chain. Shuffling the
    // discovery order forces a mix of immediate patches and deferred
    // references replayed when their target lands.
    let mut rows: Vec<FeatureRow> = (0..100)
        .map(|key| building(key).with_identifier(format!("f-{key}")))
        .collect();
    rows.shuffle(&mut StdRng::seed_from_u64(7));

    let mut codec = RecordingCodec::default();
    for key in 0..99 {
        codec = codec.with_reference(
            FeatureKey(key),
            OutgoingReference::new(format!("f-{}", key + 1), ReferencePatch::new("successor")),
        );
    }

    let sink = MemorySink::default();
    let codecs: CodecRegistry<()> = CodecRegistry::new().with_fallback(Arc::new(codec.clone()));
    let mut controller = TransferController::new(
        test_config(fixed_pool(2)),
        Arc::new(ScriptedDiscovery::new().add_rows(rows)),
        Arc::new(UnitResourceFactory::default()),
        codecs,
        sink,
    );

    let report = controller
        .run_export(&TransferQuery::all(), &FilterConfig::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert!(report.unresolved.is_empty());
    assert_eq!(report.counters.total_processed(), 100);

    // Each of the 99 references is patched exactly once.
    let mut patched: Vec<String> = codec
        .patches()
        .iter()
        .map(|patch| patch.reference.target.clone())
        .collect();
    patched.sort();
    let mut expected: Vec<String> = (1..100).map(|key| format!("f-{key}")).collect();
    expected.sort();
    assert_eq!(patched, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn references_without_a_target_survive_to_the_report() {
    init_test_tracing();

    let discovery =
        ScriptedDiscovery::new().add_row(building(1).with_identifier("b-1"));
    let (mut controller, codec, sink) = {
        let codec = RecordingCodec::default().with_reference(
            FeatureKey(1),
            OutgoingReference::new("missing", ReferencePatch::new("address")),
        );
        let sink = MemorySink::default();
        let codecs: CodecRegistry<()> =
            CodecRegistry::new().with_fallback(Arc::new(codec.clone()));
        let controller = TransferController::new(
            test_config(fixed_pool(1)),
            Arc::new(discovery),
            Arc::new(UnitResourceFactory::default()),
            codecs,
            sink.clone(),
        );
        (controller, codec, sink)
    };

    let report = controller
        .run_export(&TransferQuery::all(), &FilterConfig::default())
        .await
        .unwrap();

    // An unresolvable reference is reported, not treated as a failure.
    assert!(report.is_completed());
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].target, "missing");
    assert!(codec.patches().is_empty());
    assert_eq!(sink.commits(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn user_interrupt_aborts_the_run_and_rolls_back() {
    init_test_tracing();

    let rows = (0..200).map(building);
    let discovery = ScriptedDiscovery::new()
        .add_rows(rows)
        .with_row_delay(Duration::from_millis(5));
    let (mut controller, _codec, sink) = engine(test_config(fixed_pool(1)), discovery);

    let handle = controller.interrupt_handle();
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.interrupt("operator requested stop");
    });

    let report = controller
        .run_export(&TransferQuery::for_kinds([FeatureKind::Building]), &FilterConfig::default())
        .await
        .unwrap();
    stopper.await.unwrap();

    match &report.outcome {
        TransferOutcome::Aborted { cause, message } => {
            assert_eq!(*cause, InterruptCause::UserRequested);
            assert_eq!(message, "operator requested stop");
        }
        TransferOutcome::Completed => panic!("run must abort on interrupt"),
    }
    assert!(report.discovery.submitted_items < 200);
    assert_eq!(sink.commits(), 0);
    assert_eq!(sink.rollbacks(), 1);
    assert_eq!(controller.state(), ControllerState::Aborted);
}

#[tokio::test(flavor = "multi_thread")]
async fn cyclic_groups_finalize_after_their_members() {
    init_test_tracing();

    let discovery = ScriptedDiscovery::new()
        .add_row(group(100))
        .add_row(group(200))
        .with_topology(
            FeatureKey(100),
            vec![group(200)],
            vec![building(1).with_identifier("b-1")],
        )
        .with_topology(
            FeatureKey(200),
            vec![group(100)],
            vec![building(2).with_identifier("b-2")],
        );
    let (mut controller, codec, _sink) = engine(test_config(fixed_pool(1)), discovery);

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        controller.run_export(&TransferQuery::all(), &FilterConfig::default()),
    )
    .await
    .expect("cyclic group graph must terminate")
    .unwrap();

    assert!(report.is_completed());
    assert_eq!(report.discovery.groups_finalized, 2);
    assert_eq!(
        report.counters.processed.get(&FeatureKind::CityObjectGroup),
        Some(&2)
    );
    assert_eq!(
        report.counters.processed.get(&FeatureKind::Building),
        Some(&2)
    );

    // Post-order on one worker: each member lands before its group, and the
    // nested group before the group containing it.
    assert_eq!(transferred_keys(&codec), vec![2, 200, 1, 100]);
}

#[tokio::test(flavor = "multi_thread")]
async fn members_shared_between_groups_transfer_once() {
    init_test_tracing();

    let shared_member = building(1).with_identifier("b-1");
    let discovery = ScriptedDiscovery::new()
        .add_row(group(100))
        .add_row(group(200))
        .with_topology(FeatureKey(100), vec![], vec![shared_member.clone()])
        .with_topology(FeatureKey(200), vec![], vec![shared_member]);
    let (mut controller, codec, _sink) = engine(test_config(fixed_pool(1)), discovery);

    let report = controller
        .run_export(&TransferQuery::all(), &FilterConfig::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(report.counters.skipped_duplicates, 1);
    assert_eq!(
        report.counters.processed.get(&FeatureKind::Building),
        Some(&1)
    );
    assert_eq!(
        report.counters.processed.get(&FeatureKind::CityObjectGroup),
        Some(&2)
    );
    assert_eq!(codec.transfers().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn spilling_cache_still_resolves_every_reference() {
    init_test_tracing();

    // A forward chain defers every reference, and the tiny in-memory budget
    // pushes most of the mapping onto disk before it is read back.
    let rows = (0..200).map(|key| building(key).with_identifier(format!("f-{key}")));
    let mut codec = RecordingCodec::default();
    for key in 0..199 {
        codec = codec.with_reference(
            FeatureKey(key),
            OutgoingReference::new(format!("f-{}", key + 1), ReferencePatch::new("successor")),
        );
    }

    let mut config = test_config(fixed_pool(2));
    config.cache = CacheConfig {
        backend: CacheBackend::Memory {
            spill_directory: None,
            max_entries_in_memory: 8,
        },
        ..CacheConfig::default()
    };

    let codecs: CodecRegistry<()> = CodecRegistry::new().with_fallback(Arc::new(codec.clone()));
    let mut controller = TransferController::new(
        config,
        Arc::new(ScriptedDiscovery::new().add_rows(rows)),
        Arc::new(UnitResourceFactory::default()),
        codecs,
        MemorySink::default(),
    );

    let report = controller
        .run_export(&TransferQuery::all(), &FilterConfig::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(report.counters.total_processed(), 200);
    assert!(report.unresolved.is_empty());
    assert_eq!(codec.patches().len(), 199);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_worker_resource_is_disposed() {
    init_test_tracing();

    let discovery = ScriptedDiscovery::new().add_rows((0..40).map(building));
    let resources = UnitResourceFactory::default();
    let codecs: CodecRegistry<()> =
        CodecRegistry::new().with_fallback(Arc::new(RecordingCodec::default()));
    let mut controller = TransferController::new(
        test_config(fixed_pool(3)),
        Arc::new(discovery),
        Arc::new(resources.clone()),
        codecs,
        MemorySink::default(),
    );

    let report = controller
        .run_export(&TransferQuery::all(), &FilterConfig::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(resources.created(), 3);
    assert_eq!(resources.disposed(), resources.created());
}
