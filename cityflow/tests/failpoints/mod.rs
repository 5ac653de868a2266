//! Fault injection through the engine's fail points.
//!
//! Fail points are process-global; [`FailScenario::setup`] serializes the
//! tests against each other, and every test runs on a current-thread
//! runtime because the scenario guard is held across the run.

use std::sync::Arc;

use fail::FailScenario;

use cityflow::events::InterruptCause;
use cityflow::failpoints::{DISCOVERY_BEFORE_SCAN, WORKER_BEFORE_PROCESS};
use cityflow::test_utils::codec::RecordingCodec;
use cityflow::test_utils::discovery::ScriptedDiscovery;
use cityflow::test_utils::resource::UnitResourceFactory;
use cityflow::test_utils::sink::MemorySink;
use cityflow::transfer::{CodecRegistry, TransferController, TransferOutcome};
use cityflow::types::{FeatureKey, FeatureKind, FeatureRow, TransferQuery};
use cityflow_config::shared::{
    CacheConfig, FilterConfig, PoolConfig, SizingMode, StoreConnectionConfig, TlsConfig,
    TransferConfig,
};
use cityflow_telemetry::tracing::init_test_tracing;

type TestController = TransferController<ScriptedDiscovery, UnitResourceFactory, MemorySink>;

fn test_config(workers: u16) -> TransferConfig {
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
        pool: PoolConfig {
            min_workers: workers,
            max_workers: workers,
            queue_capacity: 8,
            sizing: SizingMode::Fixed,
            sizing_interval_ms: 50,
        },
        cache: CacheConfig::default(),
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

#[tokio::test]
async fn discovery_failpoint_aborts_before_any_submission() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(DISCOVERY_BEFORE_SCAN, "return").unwrap();

    let discovery = ScriptedDiscovery::new().add_rows((0..10).map(building));
    let (mut controller, codec, sink) = engine(test_config(2), discovery);

    let report = controller
        .run_export(&TransferQuery::for_kinds([FeatureKind::Building]), &FilterConfig::default())
        .await
        .unwrap();
    scenario.teardown();

    assert!(matches!(
        report.outcome,
        TransferOutcome::Aborted {
            cause: InterruptCause::FatalError,
            ..
        }
    ));
    assert_eq!(report.discovery.submitted_items, 0);
    assert!(codec.transfers().is_empty());
    assert_eq!(sink.commits(), 0);
    assert_eq!(sink.rollbacks(), 1);
}

#[tokio::test]
async fn worker_failpoint_skips_every_item_but_completes_the_run() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(WORKER_BEFORE_PROCESS, "return(skip_item)").unwrap();

    let discovery = ScriptedDiscovery::new().add_rows((0..20).map(building));
    let (mut controller, codec, sink) = engine(test_config(2), discovery);

    let report = controller
        .run_export(&TransferQuery::for_kinds([FeatureKind::Building]), &FilterConfig::default())
        .await
        .unwrap();
    scenario.teardown();

    // Item failures never abort the transfer; they are counted and skipped.
    assert!(report.is_completed());
    assert_eq!(report.counters.failed, 20);
    assert_eq!(report.counters.total_processed(), 0);
    assert!(codec.transfers().is_empty());
    assert_eq!(sink.commits(), 1);
}

#[tokio::test]
async fn worker_failpoint_retires_one_worker_and_loses_one_item() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(WORKER_BEFORE_PROCESS, "1*return(retire_worker)").unwrap();

    let discovery = ScriptedDiscovery::new().add_rows((0..20).map(building));
    let (mut controller, _codec, sink) = engine(test_config(2), discovery);

    let report = controller
        .run_export(&TransferQuery::for_kinds([FeatureKind::Building]), &FilterConfig::default())
        .await
        .unwrap();
    scenario.teardown();

    // The item that hit the resource failure is lost with its worker; the
    // surviving worker finishes the backlog.
    assert!(report.is_completed());
    assert_eq!(report.counters.total_processed(), 19);
    assert_eq!(report.counters.failed, 0);
    assert_eq!(sink.commits(), 1);
}

#[tokio::test]
async fn worker_failpoint_abort_cancels_the_whole_run() {
    init_test_tracing();
    let scenario = FailScenario::setup();
    fail::cfg(WORKER_BEFORE_PROCESS, "return(abort)").unwrap();

    let discovery = ScriptedDiscovery::new().add_rows((0..50).map(building));
    let (mut controller, _codec, sink) = engine(test_config(2), discovery);

    let report = controller
        .run_export(&TransferQuery::for_kinds([FeatureKind::Building]), &FilterConfig::default())
        .await
        .unwrap();
    scenario.teardown();

    assert!(matches!(
        report.outcome,
        TransferOutcome::Aborted {
            cause: InterruptCause::FatalError,
            ..
        }
    ));
    assert_eq!(sink.commits(), 0);
    assert_eq!(sink.rollbacks(), 1);
}
