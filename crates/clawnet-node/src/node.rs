//! Node composition: storage, engine, transport, sync service, timers.
//!
//! All writes funnel through the engine behind one async mutex, so the store
//! keeps its single-writer guarantee no matter how many tasks are running.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use clawnet_core::constants::{TOPIC_EVENTS, TOPIC_MARKETS};
use clawnet_core::envelope::Envelope;
use clawnet_core::error::ClawError;
use clawnet_core::types::{Address, Did, EventHash, Nonce};
use clawnet_crypto::{sign_envelope, Keypair, Keystore};
use clawnet_p2p::{Gossip, P2pConfig, P2pNetwork};
use clawnet_state::{EventEngine, SnapshotScheduler, SnapshotStore, WalletState};
use clawnet_store::{run_migrations, EventStore, SledKv};
use clawnet_sync::{NoStakeOracle, StakeOracle, SyncConfig, SyncService};

use crate::config::NodeConfig;

const NODE_KEY_ID: &str = "node";

pub struct Node {
    keypair: Arc<Keypair>,
    engine: Arc<Mutex<EventEngine>>,
    service: Arc<SyncService>,
    gossip: Arc<dyn Gossip>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    peer_id: String,
    listen_addr: String,
}

impl Node {
    /// Start a node with the default (non-attesting) stake oracle.
    pub async fn start(config: NodeConfig) -> anyhow::Result<Node> {
        Self::start_with_oracle(config, Arc::new(NoStakeOracle)).await
    }

    /// Open storage, run migrations, bring up the P2P stack, subscribe, and
    /// launch the periodic tasks. Resolves only once a listen address is
    /// ready.
    pub async fn start_with_oracle(
        config: NodeConfig,
        oracle: Arc<dyn StakeOracle>,
    ) -> anyhow::Result<Node> {
        // ── Directory layout ──────────────────────────────────────────────
        for sub in ["keys", "events", "snapshots", "logs"] {
            std::fs::create_dir_all(config.data_dir.join(sub))
                .with_context(|| format!("creating {sub} directory"))?;
        }

        // ── Node identity ─────────────────────────────────────────────────
        let keystore =
            Keystore::open(config.data_dir.join("keys")).context("opening keystore")?;
        let have_key = keystore
            .list()
            .context("listing keystore")?
            .iter()
            .any(|id| id == NODE_KEY_ID);
        let keypair = if have_key {
            keystore
                .load(NODE_KEY_ID, &config.key_passphrase)
                .context("unlocking node key")?
        } else {
            let fresh = Keypair::generate();
            keystore
                .save(NODE_KEY_ID, &fresh, &config.key_passphrase)
                .context("persisting node key")?;
            fresh
        };
        let keypair = Arc::new(keypair);
        info!(did = %keypair.did, "node identity");

        // ── Storage + engine ──────────────────────────────────────────────
        let kv = Arc::new(
            SledKv::open(config.data_dir.join("events")).context("opening events database")?,
        );
        run_migrations(kv.as_ref()).context("running schema migrations")?;
        let store = Arc::new(EventStore::new(kv));
        let engine = Arc::new(Mutex::new(
            EventEngine::open(Arc::clone(&store)).context("rebuilding state from log")?,
        ));
        let snapshots = Arc::new(
            SnapshotStore::open(config.data_dir.join("snapshots"))
                .context("opening snapshot store")?,
        );

        // ── Transport ─────────────────────────────────────────────────────
        let p2p_config = P2pConfig {
            listen_addrs: config.listen_addrs.clone(),
            bootstrap_peers: config.bootstrap_peers.clone(),
            protocol_version: "/clawnet/1.0.0".into(),
        };
        let (network, handle) = P2pNetwork::new(&p2p_config)
            .map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
        let peer_id = handle.local_peer_id.to_string();
        info!(peer_id = %peer_id, "P2P identity");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(network.run(shutdown_rx.clone())));

        // Startup is complete only once the transport is reachable.
        let listen_addr = tokio::time::timeout(Duration::from_secs(10), handle.ready_rx)
            .await
            .context("waiting for a listen address")?
            .context("transport closed before listening")?;
        info!(addr = %listen_addr, "node listening");

        let gossip: Arc<dyn Gossip> = handle.gossip;

        // ── Sync service + inbound pump ───────────────────────────────────
        let sync_config = SyncConfig {
            policy: config.sybil.clone(),
            min_snapshot_signatures: config.min_snapshot_signatures,
            ..SyncConfig::default()
        };
        let service = Arc::new(SyncService::new(
            Arc::clone(&gossip),
            Arc::clone(&engine),
            Arc::clone(&snapshots),
            Arc::clone(&keypair),
            oracle,
            sync_config,
        ));

        let mut inbound_rx = handle.inbound_rx;
        let pump_service = Arc::clone(&service);
        let mut pump_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = inbound_rx.recv() => match message {
                        Some(message) => pump_service.handle_message(message).await,
                        None => return,
                    },
                    _ = pump_shutdown.changed() => {
                        if *pump_shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }));

        // ── Snapshot scheduler ────────────────────────────────────────────
        let scheduler = SnapshotScheduler::new(
            Arc::clone(&store),
            Arc::clone(&snapshots),
            config.snapshot_policy.clone(),
            chrono::Utc::now().timestamp_millis(),
        );
        tasks.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

        // ── Periodic sync timers ──────────────────────────────────────────
        tasks.push(spawn_interval(
            Arc::clone(&service),
            config.range_interval_ms,
            config.range_on_start,
            shutdown_rx.clone(),
            |service| async move { service.periodic_range_pull().await },
        ));
        tasks.push(spawn_interval(
            Arc::clone(&service),
            config.snapshot_interval_ms,
            config.snapshot_on_start,
            shutdown_rx,
            |service| async move { service.periodic_snapshot_pull().await },
        ));

        info!("node ready");
        Ok(Node {
            keypair,
            engine,
            service,
            gossip,
            shutdown_tx,
            tasks,
            peer_id,
            listen_addr,
        })
    }

    /// Validate, append locally, then gossip. Errors propagate without any
    /// gossip; a duplicate publish is a silent no-op.
    pub async fn publish_event(&self, envelope: Envelope) -> Result<EventHash, ClawError> {
        let hash = envelope.require_hash()?;
        let bytes = envelope.encode()?;
        let topic = if envelope.event_type.starts_with("market.") {
            TOPIC_MARKETS
        } else {
            TOPIC_EVENTS
        };

        let fresh = self.engine.lock().await.append_event(envelope)?;
        if fresh {
            self.gossip.publish(topic, bytes).await?;
        }
        Ok(hash)
    }

    /// Build, sign (with the node key), and publish an event, continuing
    /// the node's own issuer chain.
    pub async fn submit(
        &self,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<EventHash, ClawError> {
        let (nonce, prev) = {
            let engine = self.engine.lock().await;
            match engine.store().issuer_head(&self.keypair.did)? {
                Some(head) => (head.nonce + 1, Some(head.hash)),
                None => (1, None),
            }
        };
        let ts = chrono::Utc::now().timestamp_millis();
        let mut envelope =
            Envelope::build(self.keypair.did.clone(), event_type, payload, nonce, ts, prev)?;
        sign_envelope(&mut envelope, &self.keypair)?;
        self.publish_event(envelope).await
    }

    /// Cancel timers, close the transport, and flush the store.
    pub async fn stop(self) -> Result<(), ClawError> {
        info!("node stopping");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if task.await.is_err() {
                warn!("background task ended abnormally");
            }
        }
        let engine = self.engine.lock().await;
        engine.store().flush()?;
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn did(&self) -> &Did {
        &self.keypair.did
    }

    pub fn address(&self) -> &Address {
        &self.keypair.address
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    pub fn sync(&self) -> &Arc<SyncService> {
        &self.service
    }

    pub async fn wallet_state(&self) -> WalletState {
        self.engine.lock().await.state().clone()
    }

    pub async fn log_length(&self) -> Result<u64, ClawError> {
        self.engine.lock().await.store().log_length()
    }

    pub async fn issuer_nonce(&self, issuer: &Did) -> Result<Option<Nonce>, ClawError> {
        Ok(self
            .engine
            .lock()
            .await
            .store()
            .issuer_head(issuer)?
            .map(|h| h.nonce))
    }
}

fn spawn_interval<F, Fut>(
    service: Arc<SyncService>,
    interval_ms: u64,
    run_on_start: bool,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<SyncService>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        if run_on_start {
            tick(Arc::clone(&service)).await;
        }
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                _ = ticker.tick() => tick(Arc::clone(&service)).await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}
