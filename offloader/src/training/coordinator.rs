use std::{collections::HashMap, sync::Arc};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc,
    task::{Id, JoinSet},
};
use tokio_util::sync::CancellationToken;

use super::{FederatedSession, SessionConnector, SessionEnd, Trainer, TrainerOptions};
use crate::{
    config::{RejoinPolicy, TrainingConfig},
    error::{OffloadErr, Result},
    models::PredictorFactory,
    store::{self, SampleStore},
    variant::ModelVariant,
};

/// The training lifecycle of one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not enough samples yet, no trainer.
    Dormant,
    /// A trainer exists, no session is running.
    Ready,
    InSession,
}

struct Slot {
    phase: Phase,
    trainer: Option<Arc<Trainer>>,
    /// The population size the trainer was built from.
    snapshot: usize,
    /// A ready event for this variant is waiting in the queue.
    queued: bool,
    refresh_pending: bool,
}

impl Slot {
    fn dormant() -> Self {
        Self {
            phase: Phase::Dormant,
            trainer: None,
            snapshot: 0,
            queued: false,
            refresh_pending: false,
        }
    }

    fn install(&mut self, trainer: Arc<Trainer>) {
        self.snapshot = trainer.population();
        self.trainer = Some(trainer);
        self.refresh_pending = false;
        if self.phase == Phase::Dormant {
            self.phase = Phase::Ready;
        }
    }
}

type SessionOutcome = (ModelVariant, Result<SessionEnd>);

/// Creates trainers as variants gather enough samples and drives them through federated
/// sessions.
pub struct TrainingCoordinator {
    store: Arc<SampleStore>,
    config: TrainingConfig,
    predictors: PredictorFactory,
    connector: Arc<dyn SessionConnector>,
    slots: Mutex<[Slot; 3]>,
    events_tx: mpsc::UnboundedSender<ModelVariant>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ModelVariant>>>,
}

impl TrainingCoordinator {
    /// Creates a new `TrainingCoordinator` and subscribes it to the store's updates.
    ///
    /// Variants that already have enough samples become ready right away.
    ///
    /// # Arguments
    /// * `store` - The sample store to observe.
    /// * `config` - Thresholds, endpoints and persistence options.
    /// * `predictors` - Builds the predictor each new trainer owns.
    /// * `connector` - Opens the streams to the remote coordinators.
    pub fn new(
        store: Arc<SampleStore>,
        config: TrainingConfig,
        predictors: PredictorFactory,
        connector: Arc<dyn SessionConnector>,
    ) -> Result<Arc<Self>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let coordinator = Arc::new(Self {
            store: store.clone(),
            config,
            predictors,
            connector,
            slots: Mutex::new([Slot::dormant(), Slot::dormant(), Slot::dormant()]),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        });

        let weak = Arc::downgrade(&coordinator);
        store.on_updated(move |variant| match weak.upgrade() {
            Some(coordinator) => coordinator.check_ready(variant),
            None => Ok(()),
        });

        for variant in ModelVariant::ALL {
            coordinator.check_ready(variant)?;
        }

        Ok(coordinator)
    }

    pub fn phase(&self, variant: ModelVariant) -> Phase {
        self.slots.lock()[variant.index()].phase
    }

    pub fn trainer(&self, variant: ModelVariant) -> Option<Arc<Trainer>> {
        self.slots.lock()[variant.index()].trainer.clone()
    }

    /// Runs the coordination loop until `cancel` fires: every ready variant gets a session of
    /// its own, running concurrently with the others.
    ///
    /// On cancellation every session is cancelled too and awaited before returning.
    ///
    /// # Errors
    /// Returns `OffloadErr::AlreadyJoined` if called more than once. Session failures are
    /// logged, not returned.
    pub async fn join_federated_training(&self, cancel: CancellationToken) -> Result<()> {
        let mut events = self
            .events_rx
            .lock()
            .take()
            .ok_or(OffloadErr::AlreadyJoined)?;

        let mut sessions = JoinSet::new();
        let mut running = HashMap::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(variant) = events.recv() => {
                    self.start_session(variant, &mut sessions, &mut running, &cancel);
                }
                Some(joined) = sessions.join_next_with_id() => {
                    self.reap(joined, &mut running);
                }
            }
        }

        info!("leaving federated training");
        while let Some(joined) = sessions.join_next_with_id().await {
            self.reap(joined, &mut running);
        }

        Ok(())
    }

    fn start_session(
        &self,
        variant: ModelVariant,
        sessions: &mut JoinSet<SessionOutcome>,
        running: &mut HashMap<Id, ModelVariant>,
        cancel: &CancellationToken,
    ) {
        let trainer = {
            let mut slots = self.slots.lock();
            let slot = &mut slots[variant.index()];
            slot.queued = false;

            match (slot.phase, &slot.trainer) {
                (Phase::Ready, Some(trainer)) => {
                    slot.phase = Phase::InSession;
                    trainer.clone()
                }
                (phase, _) => {
                    warn!(variant = variant.name(); "ignoring ready event in phase {phase:?}");
                    return;
                }
            }
        };

        let connector = self.connector.clone();
        let cancel = cancel.child_token();
        let handle = sessions.spawn(async move {
            let ret = async {
                let (rx, tx) = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(variant = variant.name(); "cancelled while connecting");
                        return Ok(SessionEnd::Cancelled);
                    }
                    stream = connector.connect(variant) => stream?,
                };
                let (rx, tx) = comms::channel(rx, tx);
                FederatedSession::new(trainer).run(rx, tx, cancel).await
            }
            .await;

            (variant, ret)
        });

        running.insert(handle.id(), variant);
        info!(variant = variant.name(); "session started");
    }

    fn reap(
        &self,
        joined: std::result::Result<(Id, SessionOutcome), tokio::task::JoinError>,
        running: &mut HashMap<Id, ModelVariant>,
    ) {
        let (variant, ret) = match joined {
            Ok((id, outcome)) => {
                running.remove(&id);
                outcome
            }
            Err(e) => match running.remove(&e.id()) {
                Some(variant) => (variant, Err(OffloadErr::Join(e))),
                None => {
                    error!("unknown session task failed: {e}");
                    return;
                }
            },
        };

        self.session_ended(variant, ret);
    }

    fn session_ended(&self, variant: ModelVariant, ret: Result<SessionEnd>) {
        match ret {
            Ok(end) => info!(variant = variant.name(); "session finished: {end:?}"),
            Err(e) => error!(variant = variant.name(); "session failed: {e}"),
        }

        let mut slots = self.slots.lock();
        let slot = &mut slots[variant.index()];
        slot.phase = Phase::Ready;

        if slot.refresh_pending {
            self.refresh(variant, slot);
        }
    }

    /// Moves a variant to `Ready` once it has enough samples, and applies the rejoin policy
    /// to variants that already have a trainer.
    fn check_ready(&self, variant: ModelVariant) -> Result<()> {
        let size = self.store.size(variant)?;
        let mut slots = self.slots.lock();
        let slot = &mut slots[variant.index()];

        if slot.phase == Phase::Dormant {
            if size < self.config.min_samples_to_start {
                return Ok(());
            }

            let trainer = self.build_trainer(variant)?;
            slot.install(trainer);
            info!(variant = variant.name(), samples = slot.snapshot; "trainer ready");
            self.emit(variant, slot);
            return Ok(());
        }

        if slot.refresh_pending
            || size.saturating_sub(slot.snapshot) < self.config.min_new_samples_to_rejoin
        {
            return Ok(());
        }

        match self.config.rejoin_policy {
            RejoinPolicy::TrackOnly => {
                debug!(
                    variant = variant.name(),
                    samples = size,
                    snapshot = slot.snapshot;
                    "population grew past the trainer's snapshot"
                );
            }
            RejoinPolicy::Refresh if slot.phase == Phase::InSession => {
                info!(variant = variant.name(); "trainer will be refreshed after this session");
                slot.refresh_pending = true;
            }
            RejoinPolicy::Refresh => self.refresh(variant, slot),
        }

        Ok(())
    }

    /// Rebuilds a variant's trainer from the current population and queues a session for it.
    fn refresh(&self, variant: ModelVariant, slot: &mut Slot) {
        match self.build_trainer(variant) {
            Ok(trainer) => {
                slot.install(trainer);
                info!(variant = variant.name(), samples = slot.snapshot; "trainer refreshed");
                if !slot.queued {
                    self.emit(variant, slot);
                }
            }
            Err(e) => {
                slot.refresh_pending = false;
                error!(variant = variant.name(); "failed to refresh the trainer: {e}");
            }
        }
    }

    fn emit(&self, variant: ModelVariant, slot: &mut Slot) {
        slot.queued = true;
        // The receiver lives as long as `self`.
        let _ = self.events_tx.send(variant);
    }

    fn build_trainer(&self, variant: ModelVariant) -> Result<Arc<Trainer>> {
        let dataset = self.store.get_samples(variant)?;
        let stats = store::stats_of(&dataset, variant, self.store.layout());
        let mut predictor = (self.predictors)(variant)?;

        let model_path = self.config.model_path(variant);
        let restorable = model_path.as_ref().filter(|p| p.exists());
        if let Some(path) = restorable.filter(|_| self.config.restore_models) {
            match predictor.restore(path) {
                Ok(()) => {
                    info!(variant = variant.name(); "restored model from {}", path.display())
                }
                Err(e) => warn!(variant = variant.name(); "starting from a fresh model: {e}"),
            }
        }

        let options = TrainerOptions {
            eval_fraction: self.config.eval_fraction,
            eval_batch_size: self.config.eval_batch_size,
            model_path,
            max_epochs: self.config.max_epochs,
            seed: self.config.seed.wrapping_add(variant.index() as u64),
        };

        let trainer = Trainer::new(variant, predictor, &dataset, stats, options);
        Ok(Arc::new(trainer))
    }
}
