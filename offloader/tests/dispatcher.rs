mod common;

use std::sync::{Arc, atomic::Ordering};

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};
use offloader::{
    Dispatcher, ExecutionSite, OffloadErr,
    config::Placement,
    error::ExecutionErr,
    executor::{ExecResult, NetworkConditions, NetworkProbe},
    variant::ModelVariant,
};

use common::{BrokenLocal, Doubler, Remote, Unreachable};

fn dispatcher_with(
    placement: Placement,
    local: Arc<Doubler>,
    remote: Arc<dyn offloader::executor::RemoteExecutor<u32, u32>>,
) -> (Dispatcher<u32, u32>, Arc<offloader::SampleStore>) {
    let store = common::calibrated_store();
    let cost_model = common::cost_model(&store, placement);
    let dispatcher = Dispatcher::new(cost_model, store.clone(), common::extract, local, remote);
    (dispatcher, store)
}

#[tokio::test]
async fn failed_remote_falls_back_to_local_once() {
    for transient in [true, false] {
        let local = Arc::new(Doubler::default());
        let remote = Arc::new(Unreachable::new(transient));
        let (dispatcher, store) =
            dispatcher_with(Placement::PredictAndForceCloud, local.clone(), remote.clone());

        let result = dispatcher.execute(&21).await.unwrap();

        assert_eq!(result.output, 42);
        assert_eq!(result.site, ExecutionSite::LocalFallback);
        assert!(!result.decision.run_locally);
        assert!(result.decision.predicted);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);

        assert_eq!(store.size(ModelVariant::LocalTime).unwrap(), 1);
        assert_eq!(store.size(ModelVariant::CloudComputationTime).unwrap(), 0);
        assert_eq!(store.size(ModelVariant::CloudTransmissionTime).unwrap(), 0);

        let summary = dispatcher.summary();
        assert_eq!(summary.fallbacks, 1);
        assert_eq!(summary.local_runs, 1);
        assert_eq!(summary.cloud_runs, 0);
    }
}

#[tokio::test]
async fn remote_runs_feed_both_cloud_variants() {
    let local = Arc::new(Doubler::default());
    let remote = Arc::new(Remote::new(None));
    let (dispatcher, store) =
        dispatcher_with(Placement::ForceCloud, local.clone(), remote.clone());
    dispatcher.set_network_conditions(NetworkConditions {
        num_nodes: 2,
        rtt_ms: 30,
    });

    let result = dispatcher.execute(&4).await.unwrap();

    assert_eq!(result.output, 8);
    assert_eq!(result.site, ExecutionSite::Cloud);
    assert!(!result.decision.predicted);
    assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.size(ModelVariant::LocalTime).unwrap(), 0);
    assert_eq!(store.size(ModelVariant::CloudComputationTime).unwrap(), 1);
    assert_eq!(store.size(ModelVariant::CloudTransmissionTime).unwrap(), 1);

    let computation = store.get_samples(ModelVariant::CloudComputationTime).unwrap();
    assert_eq!(computation.targets, vec![1.]);
    let transmission = store.get_samples(ModelVariant::CloudTransmissionTime).unwrap();
    assert!(transmission.targets[0] >= 1.);
}

#[tokio::test]
async fn remote_node_count_updates_the_network_conditions() {
    let local = Arc::new(Doubler::default());
    let remote = Arc::new(Remote::new(Some(5)));
    let (dispatcher, store) = dispatcher_with(Placement::ForceCloud, local, remote);
    dispatcher.set_network_conditions(NetworkConditions {
        num_nodes: 1,
        rtt_ms: 12,
    });

    dispatcher.execute(&1).await.unwrap();

    assert_eq!(
        dispatcher.network_conditions(),
        NetworkConditions {
            num_nodes: 5,
            rtt_ms: 12
        }
    );
    let dataset = store.get_samples(ModelVariant::CloudComputationTime).unwrap();
    // baseline, task, nodes, time of day
    assert_eq!(dataset.inputs[0][2], 5. / 10.);
}

#[tokio::test]
async fn local_failures_are_surfaced() {
    let store = common::calibrated_store();
    let cost_model = common::cost_model(&store, Placement::ForceLocal);
    let dispatcher: Dispatcher<u32, u32> = Dispatcher::new(
        cost_model,
        store.clone(),
        common::extract,
        Arc::new(BrokenLocal),
        Arc::new(Remote::new(None)),
    );

    let err = assert_err!(dispatcher.execute(&1).await);

    assert!(matches!(err, OffloadErr::LocalExecution(ExecutionErr::Fatal(_))));
    assert_eq!(store.size(ModelVariant::LocalTime).unwrap(), 0);
}

#[tokio::test]
async fn fallback_failures_are_local_execution_errors() {
    let store = common::calibrated_store();
    let cost_model = common::cost_model(&store, Placement::ForceCloud);
    let dispatcher: Dispatcher<u32, u32> = Dispatcher::new(
        cost_model,
        store,
        common::extract,
        Arc::new(BrokenLocal),
        Arc::new(Unreachable::new(true)),
    );

    assert!(matches!(
        dispatcher.execute(&1).await,
        Err(OffloadErr::LocalExecution(_))
    ));
}

#[tokio::test]
async fn recording_can_be_turned_off() {
    let local = Arc::new(Doubler::default());
    let (dispatcher, store) =
        dispatcher_with(Placement::ForceLocal, local, Arc::new(Remote::new(None)));

    dispatcher.set_record_samples(false);
    assert_ok!(dispatcher.execute(&1).await);
    assert_eq!(store.size(ModelVariant::LocalTime).unwrap(), 0);

    dispatcher.set_record_samples(true);
    assert_ok!(dispatcher.execute(&1).await);
    assert_eq!(store.size(ModelVariant::LocalTime).unwrap(), 1);
    assert_eq!(dispatcher.summary().local_runs, 2);
}

#[tokio::test]
async fn uncalibrated_devices_run_without_recording() {
    let store = Arc::new(offloader::SampleStore::in_memory(common::layout()));
    let cost_model = common::cost_model(&store, Placement::Predict);
    let remote = Arc::new(Remote::new(None));
    let dispatcher: Dispatcher<u32, u32> = Dispatcher::new(
        cost_model,
        store.clone(),
        common::extract,
        Arc::new(Doubler::default()),
        remote.clone(),
    );

    let result = dispatcher.execute(&3).await.unwrap();

    assert_eq!(result.site, ExecutionSite::Cloud);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.size(ModelVariant::CloudComputationTime).unwrap(), 0);
}

struct FixedProbe(Option<NetworkConditions>);

#[async_trait]
impl NetworkProbe for FixedProbe {
    async fn probe(&self) -> ExecResult<NetworkConditions> {
        self.0.ok_or_else(|| ExecutionErr::transient("timed out"))
    }
}

#[tokio::test]
async fn failed_probes_keep_the_previous_conditions() {
    let (dispatcher, _) = dispatcher_with(
        Placement::ForceLocal,
        Arc::new(Doubler::default()),
        Arc::new(Remote::new(None)),
    );
    let good = NetworkConditions {
        num_nodes: 3,
        rtt_ms: 40,
    };

    assert_eq!(dispatcher.refresh_network(&FixedProbe(Some(good))).await, good);
    assert_eq!(dispatcher.refresh_network(&FixedProbe(None)).await, good);
    assert_eq!(dispatcher.network_conditions(), good);
}
