//! Peer side of the sync protocol.
//!
//! A [`PeerPortal`] sits between the peer's generation loop and the
//! coordinator. The loop exports improved tops and imports coordinator tops
//! through bounded queues that never block; a background task drains the
//! export queue into a local [`PatchCache`] and, every sync tick, pushes
//! local progress and pulls the coordinator's.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;

use crate::compute::evolution::{FocusMap, Incubator, IncubatorHandle, Organism, PatchCache};
use crate::schema::{EvolverConfig, SyncConfig};

use super::{SyncClient, SyncError};

/// Loop-facing end of the peer's sync task.
pub struct PeerPortal {
    exports: mpsc::Sender<Arc<Organism>>,
    imports: mpsc::Receiver<Organism>,
}

impl PeerPortal {
    /// Start syncing with the coordinator behind `client`. `seed` is the
    /// organism the peer starts from, as last fetched from the coordinator.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(client: SyncClient, seed: Arc<Organism>, config: &SyncConfig) -> Self {
        let (exports, export_rx) = mpsc::channel(config.queue_capacity);
        let (import_tx, imports) = mpsc::channel(config.queue_capacity);
        let sync = PeerSync::new(client, seed, config, import_tx);
        tokio::spawn(sync.run(export_rx, config.frequency()));
        Self { exports, imports }
    }

    /// Hand an improved local top to the sync task. Dropped when the queue
    /// is full.
    pub fn export(&self, organism: Arc<Organism>) {
        match self.exports.try_send(organism) {
            Ok(()) => {}
            Err(TrySendError::Full(organism)) => {
                debug!("export queue full, dropping {}", organism.hash());
            }
            Err(TrySendError::Closed(_)) => warn!("sync task has stopped"),
        }
    }

    /// Next organism pulled from the coordinator, if any.
    pub fn import(&mut self) -> Option<Organism> {
        self.imports.try_recv().ok()
    }
}

struct PeerSync {
    client: SyncClient,
    /// Last coordinator top this peer adopted.
    last_imported: Arc<Organism>,
    /// Last organism whose lineage the coordinator has been sent.
    last_pushed: Arc<Organism>,
    /// Newest local top not yet pushed.
    latest: Option<Arc<Organism>>,
    cache: PatchCache,
    imports: mpsc::Sender<Organism>,
}

impl PeerSync {
    fn new(
        client: SyncClient,
        seed: Arc<Organism>,
        config: &SyncConfig,
        imports: mpsc::Sender<Organism>,
    ) -> Self {
        Self {
            client,
            last_imported: Arc::clone(&seed),
            last_pushed: seed,
            latest: None,
            cache: PatchCache::new(config.patch_retention(), config.max_patch_hops),
            imports,
        }
    }

    async fn run(mut self, mut exports: mpsc::Receiver<Arc<Organism>>, frequency: std::time::Duration) {
        let mut ticker = tokio::time::interval(frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                exported = exports.recv() => match exported {
                    Some(organism) => self.record(organism),
                    None => break,
                },
                _ = ticker.tick() => self.sync().await,
            }
        }
        debug!("peer sync task stopped");
    }

    /// Remember a local improvement and the patch that produced it.
    fn record(&mut self, organism: Arc<Organism>) {
        if let Some(patch) = organism.patch() {
            self.cache.put(patch.clone());
        }
        self.latest = Some(organism);
    }

    /// One push/pull round. Failures are retried on the next tick.
    async fn sync(&mut self) {
        if let Err(e) = self.push().await {
            warn!("push to {} failed: {e}", self.client.endpoint());
        }
        if let Err(e) = self.pull().await {
            warn!("pull from {} failed: {e}", self.client.endpoint());
        }
    }

    /// Send everything found locally since the last push as one patch.
    async fn push(&mut self) -> Result<(), SyncError> {
        let Some(local) = self.latest.clone() else {
            return Ok(());
        };
        if local.hash() == self.last_pushed.hash() {
            self.latest = None;
            return Ok(());
        }

        match self
            .cache
            .get_patch(self.last_pushed.hash(), local.hash(), Some(self.last_pushed.as_ref()))
        {
            Some(patch) => {
                self.client.submit_patch(&patch).await?;
                info!(
                    "pushed {} operations ({} -> {})",
                    patch.operations.len(),
                    patch.baseline,
                    patch.target
                );
            }
            None => warn!(
                "no patch from {} to {}, rebasing without pushing",
                self.last_pushed.hash(),
                local.hash()
            ),
        }
        self.last_pushed = local;
        self.latest = None;
        Ok(())
    }

    /// Fetch the coordinator's top as a delta when possible, in full
    /// otherwise, and queue it for import.
    async fn pull(&mut self) -> Result<(), SyncError> {
        let previous = self.last_imported.hash().to_string();
        let organism = match self.client.delta(&previous).await? {
            Some(patch) if patch.target == previous => return Ok(()),
            Some(patch) => match patch.replay_verified(&self.last_imported) {
                Ok(organism) => organism,
                Err(e) => {
                    warn!("delta from {previous} rejected ({e}), fetching full organism");
                    self.client.top_organism().await?
                }
            },
            None => {
                debug!("no delta from {previous}, fetching full organism");
                self.client.top_organism().await?
            }
        };
        if organism.hash() == previous {
            return Ok(());
        }

        let organism = Arc::new(organism);
        match self.imports.try_send(organism.clone_genome()) {
            Ok(()) => {
                info!("imported {} ({} instructions)", organism.hash(), organism.len());
                self.last_imported = Arc::clone(&organism);
                self.last_pushed = organism;
                self.latest = None;
            }
            // Left as-is so the next pull tries again.
            Err(TrySendError::Full(_)) => debug!("import queue full, skipping {}", organism.hash()),
            Err(TrySendError::Closed(_)) => warn!("peer loop has stopped"),
        }
        Ok(())
    }
}

/// Evolve locally against a coordinator's target, syncing every
/// `config.sync.frequency_secs`.
pub async fn run_peer(config: EvolverConfig, endpoint: &str) -> Result<(), SyncError> {
    let client = SyncClient::new(endpoint, config.sync.http_timeout())?;
    let target = client.target_image().await?;
    let focus = client.focus_image().await?;
    let seed = Arc::new(client.top_organism().await?);
    info!(
        "joined {} ({}x{} target, {} instructions)",
        client.endpoint(),
        target.width(),
        target.height(),
        seed.len()
    );

    let incubator = Incubator::new(config.clone(), target, focus.as_ref().map(FocusMap::from_image))?;
    let handle = IncubatorHandle::spawn(incubator)?;
    let portal = PeerPortal::start(client, Arc::clone(&seed), &config.sync);
    tokio::task::spawn_blocking(move || peer_loop(&handle, portal, &seed)).await?
}

fn peer_loop(handle: &IncubatorHandle, mut portal: PeerPortal, seed: &Organism) -> Result<(), SyncError> {
    handle.set_top_organism(seed.clone_genome())?;
    loop {
        if let Some(organism) = portal.import() {
            handle.set_top_organism(organism)?;
        }
        let report = handle.iterate()?;
        if report.improved {
            debug!(
                "generation {}: {:.6} ({} instructions)",
                report.iteration, report.top_score, report.instructions
            );
            if let Some(top) = handle.top_organism()? {
                portal.export(top);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::PatchOperation;
    use crate::compute::{Circle, Instruction, Rgba};
    use crate::sync::{CoordinatorState, testing};

    fn circle(x: f32, color: Rgba) -> Instruction {
        Instruction::Circle(Circle {
            x,
            y: 4.0,
            radius: 20.0,
            color,
        })
    }

    struct Fixture {
        coordinator: IncubatorHandle,
        state: CoordinatorState,
        sync: PeerSync,
        imports: mpsc::Receiver<Organism>,
    }

    async fn fixture(seed: u64) -> Fixture {
        let coordinator = testing::handle(seed);
        coordinator.iterate().unwrap();
        let config = SyncConfig::default();
        let state = CoordinatorState::new(coordinator.clone(), None, &config);
        state.update().unwrap();
        let client = testing::serve_local(state.clone()).await;
        let top = Arc::new(client.top_organism().await.unwrap());
        let (import_tx, imports) = mpsc::channel(config.queue_capacity);
        Fixture {
            coordinator,
            state,
            sync: PeerSync::new(client, top, &config, import_tx),
            imports,
        }
    }

    fn advance(fixture: &Fixture) -> String {
        let from = fixture.sync.last_imported.hash().to_string();
        for _ in 0..200 {
            fixture.coordinator.iterate().unwrap();
            fixture.state.update().unwrap();
            let top = fixture.coordinator.top_organism().unwrap().unwrap();
            if top.hash() != from {
                return top.hash().to_string();
            }
        }
        panic!("coordinator top never changed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pull_without_changes_imports_nothing() {
        let mut fixture = fixture(11).await;
        fixture.sync.pull().await.unwrap();
        assert!(fixture.imports.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pull_applies_delta() {
        let mut fixture = fixture(12).await;
        let next = advance(&fixture);

        fixture.sync.pull().await.unwrap();
        let imported = fixture.imports.try_recv().unwrap();
        assert_eq!(imported.hash(), next);
        assert_eq!(fixture.sync.last_imported.hash(), next);
        assert_eq!(fixture.sync.last_pushed.hash(), next);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pull_falls_back_to_full_organism() {
        let mut fixture = fixture(13).await;
        let stranger = Organism::new(vec![circle(1.0, Rgba::opaque(9, 9, 9))]);
        fixture.sync.last_imported = Arc::new(stranger);

        fixture.sync.pull().await.unwrap();
        let imported = fixture.imports.try_recv().unwrap();
        let top = fixture.coordinator.top_organism().unwrap().unwrap();
        assert_eq!(imported.hash(), top.hash());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_push_sends_concatenated_patch() {
        let mut fixture = fixture(14).await;
        let [r, g, b] = testing::TARGET_RGB;
        let base = Arc::clone(&fixture.sync.last_pushed);

        // Two local generations: a wrong-colored cover, then the right one.
        let mut first = base.spawn_child();
        let op1 = PatchOperation::Append(circle(4.0, Rgba::opaque(200, 10, 10)));
        first.apply_operations(std::slice::from_ref(&op1));
        first.record_patch(vec![op1], base.hash());
        let first = Arc::new(first);
        fixture.sync.record(Arc::clone(&first));

        let mut second = first.spawn_child();
        let op2 = PatchOperation::Append(circle(4.5, Rgba::opaque(r, g, b)));
        second.apply_operations(std::slice::from_ref(&op2));
        second.record_patch(vec![op2], first.hash());
        let second = Arc::new(second);
        fixture.sync.record(Arc::clone(&second));

        fixture.sync.push().await.unwrap();
        assert_eq!(fixture.sync.last_pushed.hash(), second.hash());
        assert!(fixture.sync.latest.is_none());

        fixture.coordinator.iterate().unwrap();
        let top = fixture.coordinator.top_organism().unwrap().unwrap();
        assert!(top.instructions().contains(&circle(4.5, Rgba::opaque(r, g, b))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_push_rebases_when_lineage_unknown() {
        let mut fixture = fixture(15).await;
        let orphan = Arc::new(Organism::new(vec![circle(2.0, Rgba::opaque(1, 2, 3))]));
        fixture.sync.record(Arc::clone(&orphan));

        fixture.sync.push().await.unwrap();
        assert_eq!(fixture.sync.last_pushed.hash(), orphan.hash());
    }

    #[tokio::test]
    async fn test_portal_queues_are_lossy() {
        let (exports, mut export_rx) = mpsc::channel(1);
        let (_import_tx, imports) = mpsc::channel(1);
        let portal = PeerPortal { exports, imports };
        let a = Arc::new(Organism::new(vec![circle(1.0, Rgba::BLACK)]));
        let b = Arc::new(Organism::new(vec![circle(2.0, Rgba::BLACK)]));

        portal.export(Arc::clone(&a));
        portal.export(b);
        assert_eq!(export_rx.try_recv().unwrap().hash(), a.hash());
        assert!(export_rx.try_recv().is_err());
    }
}
