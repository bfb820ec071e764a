//! The sync service: routes gossip traffic into the engine and answers
//! ticketed range/snapshot requests.
//!
//! One instance per node. Inbound messages from all subscribed topics are
//! fed through `handle_message`; periodic pulls are driven by the node's
//! timers calling `periodic_range_pull` / `periodic_snapshot_pull`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use clawnet_core::constants::{
    SYNC_REQUEST_TIMEOUT_MS, TOPIC_EVENTS, TOPIC_MARKETS, TOPIC_REQUESTS, TOPIC_RESPONSES,
};
use clawnet_core::envelope::Envelope;
use clawnet_core::error::ClawError;
use clawnet_core::types::{Amount, Did, Nonce, Timestamp};
use clawnet_crypto::Keypair;
use clawnet_p2p::{Gossip, GossipMessage};
use clawnet_state::{EventEngine, Snapshot, SnapshotStore};

use crate::message::{request_id, SyncRequest, SyncResponse};
use crate::range::{apply_range, serve_range};
use crate::snapshot_sync::adopt_snapshot;
use crate::ticket::{verify_ticket, StakeOracle, SybilPolicy, Ticket};

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub policy: SybilPolicy,
    pub min_snapshot_signatures: usize,
    pub range_chunk: usize,
    /// Stake advertised in our own tickets under the `stake` policy.
    pub stake_amount: Amount,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            policy: SybilPolicy::None,
            min_snapshot_signatures: clawnet_core::constants::DEFAULT_MIN_SNAPSHOT_SIGNATURES,
            range_chunk: clawnet_core::constants::RANGE_CHUNK_SIZE,
            stake_amount: Amount::zero(),
        }
    }
}

pub struct SyncService {
    gossip: Arc<dyn Gossip>,
    engine: Arc<Mutex<EventEngine>>,
    snapshots: Arc<SnapshotStore>,
    keypair: Arc<Keypair>,
    oracle: Arc<dyn StakeOracle>,
    config: SyncConfig,
    /// Correlation ids of requests we have in flight, with issue time.
    pending: StdMutex<HashMap<String, Timestamp>>,
    /// A fetched snapshot waiting for its `at` event to arrive.
    pending_snapshot: StdMutex<Option<Snapshot>>,
}

impl SyncService {
    pub fn new(
        gossip: Arc<dyn Gossip>,
        engine: Arc<Mutex<EventEngine>>,
        snapshots: Arc<SnapshotStore>,
        keypair: Arc<Keypair>,
        oracle: Arc<dyn StakeOracle>,
        config: SyncConfig,
    ) -> Self {
        Self {
            gossip,
            engine,
            snapshots,
            keypair,
            oracle,
            config,
            pending: StdMutex::new(HashMap::new()),
            pending_snapshot: StdMutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<EventEngine>> {
        &self.engine
    }

    /// Route one inbound gossip message.
    pub async fn handle_message(&self, message: GossipMessage) {
        match message.topic.as_str() {
            TOPIC_EVENTS | TOPIC_MARKETS => {
                self.ingest_envelope(&message.data).await;
            }
            TOPIC_REQUESTS => self.handle_request(&message.data).await,
            TOPIC_RESPONSES => self.handle_response(&message.data).await,
            other => debug!(topic = other, "message on unknown topic ignored"),
        }
    }

    // ── Gossip ingest ────────────────────────────────────────────────────────

    async fn ingest_envelope(&self, data: &[u8]) {
        let result = {
            let mut engine = self.engine.lock().await;
            engine.append_bytes(data)
        };
        match result {
            // Re-gossip happens through the pub/sub layer's message-id
            // dedup; accepted events need no explicit rebroadcast.
            Ok(true) => {}
            Ok(false) => {}
            Err(e) if e.wants_range_sync() => {
                if let Ok(envelope) = Envelope::decode(data) {
                    warn!(error = %e, issuer = %envelope.issuer, "causal gap; scheduling range sync");
                    let from = {
                        let engine = self.engine.lock().await;
                        match engine.store().issuer_head(&envelope.issuer) {
                            Ok(Some(head)) => head.nonce + 1,
                            _ => 1,
                        }
                    };
                    if let Err(e) = self.request_range(envelope.issuer, from, None).await {
                        warn!(error = %e, "range sync request failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "gossiped event rejected"),
        }
        self.try_adopt_pending().await;
    }

    // ── Responder side ───────────────────────────────────────────────────────

    async fn handle_request(&self, data: &[u8]) {
        let Ok(request) = SyncRequest::decode(data) else {
            debug!("undecodable sync request dropped");
            return;
        };
        if request.requester() == self.gossip.local_peer_id() {
            return;
        }

        // Expired or invalid tickets are dropped without a reply so a forged
        // request cannot amplify.
        let now = now_ms();
        if let Err(e) = verify_ticket(
            &self.config.policy,
            request.requester(),
            request.ticket(),
            now,
            &*self.oracle,
        )
        .await
        {
            debug!(error = %e, requester = request.requester(), "sync request dropped");
            return;
        }

        match request {
            SyncRequest::Range { id, requester, issuer, from_nonce, to_nonce, .. } => {
                let events = {
                    let engine = self.engine.lock().await;
                    match serve_range(
                        engine.store(),
                        &issuer,
                        from_nonce,
                        to_nonce,
                        self.config.range_chunk,
                    ) {
                        Ok(events) => events,
                        Err(e) => {
                            warn!(error = %e, "range scan failed");
                            return;
                        }
                    }
                };
                if events.is_empty() {
                    return;
                }
                let count = events.len();
                let response = SyncResponse::Events { id, requester, events };
                self.publish_response(response).await;
                debug!(issuer = %issuer, count, "served range request");
            }
            SyncRequest::Snapshot { id, requester, .. } => {
                let snapshot = match self.snapshots.latest() {
                    Ok(Some(snapshot)) => snapshot,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, "snapshot lookup failed");
                        return;
                    }
                };
                self.publish_response(SyncResponse::Snapshot { id, requester, snapshot })
                    .await;
                debug!("served snapshot request");
            }
        }
    }

    async fn publish_response(&self, response: SyncResponse) {
        match response.encode() {
            Ok(bytes) => {
                if let Err(e) = self.gossip.publish(TOPIC_RESPONSES, bytes).await {
                    warn!(error = %e, "response publish failed");
                }
            }
            Err(e) => warn!(error = %e, "response encoding failed"),
        }
    }

    // ── Requester side ───────────────────────────────────────────────────────

    async fn handle_response(&self, data: &[u8]) {
        let Ok(response) = SyncResponse::decode(data) else {
            return;
        };
        if response.requester() != self.gossip.local_peer_id() {
            return;
        }
        // First responder wins; late or unsolicited responses are ignored.
        if self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(response.id())
            .is_none()
        {
            return;
        }

        match response {
            SyncResponse::Events { events, .. } => {
                let mut engine = self.engine.lock().await;
                let outcome = apply_range(&mut engine, events);
                drop(engine);
                info!(
                    applied = outcome.applied,
                    duplicates = outcome.duplicates,
                    "range response applied"
                );
                self.try_adopt_pending().await;
            }
            SyncResponse::Snapshot { snapshot, .. } => {
                self.receive_snapshot(snapshot).await;
            }
        }
    }

    async fn receive_snapshot(&self, snapshot: Snapshot) {
        if let Err(e) = snapshot.check_eligible(self.config.min_snapshot_signatures) {
            warn!(error = %e, "snapshot response rejected");
            return;
        }
        let store = Arc::clone(self.engine.lock().await.store());
        match adopt_snapshot(store, &snapshot, self.config.min_snapshot_signatures) {
            Ok(Some(new_engine)) => {
                *self.engine.lock().await = new_engine;
                if let Err(e) = self.snapshots.save(&snapshot) {
                    warn!(error = %e, "adopted snapshot not persisted");
                }
            }
            Ok(None) => {
                // Tail not here yet; park it and pull the issuers' chains.
                debug!(at = %snapshot.at, "snapshot parked until tail arrives");
                *self
                    .pending_snapshot
                    .lock()
                    .expect("pending snapshot lock poisoned") = Some(snapshot);
            }
            Err(e) => warn!(error = %e, "snapshot adoption failed"),
        }
    }

    /// Retry a parked snapshot once new events have landed.
    async fn try_adopt_pending(&self) {
        let parked = self
            .pending_snapshot
            .lock()
            .expect("pending snapshot lock poisoned")
            .take();
        let Some(snapshot) = parked else { return };

        let store = Arc::clone(self.engine.lock().await.store());
        match adopt_snapshot(store, &snapshot, self.config.min_snapshot_signatures) {
            Ok(Some(new_engine)) => {
                info!(at = %snapshot.at, "parked snapshot adopted");
                *self.engine.lock().await = new_engine;
                if let Err(e) = self.snapshots.save(&snapshot) {
                    warn!(error = %e, "adopted snapshot not persisted");
                }
            }
            Ok(None) => {
                *self
                    .pending_snapshot
                    .lock()
                    .expect("pending snapshot lock poisoned") = Some(snapshot);
            }
            Err(e) => warn!(error = %e, "parked snapshot dropped"),
        }
    }

    /// Publish a range request for one issuer's chain.
    pub async fn request_range(
        &self,
        issuer: Did,
        from_nonce: Nonce,
        to_nonce: Option<Nonce>,
    ) -> Result<(), ClawError> {
        let id = self.track_request()?;
        let request = SyncRequest::Range {
            id,
            requester: self.gossip.local_peer_id(),
            issuer,
            from_nonce,
            to_nonce,
            ticket: self.make_ticket()?,
        };
        self.gossip.publish(TOPIC_REQUESTS, request.encode()?).await
    }

    /// Publish a snapshot request.
    pub async fn request_snapshot(&self) -> Result<(), ClawError> {
        let id = self.track_request()?;
        let request = SyncRequest::Snapshot {
            id,
            requester: self.gossip.local_peer_id(),
            ticket: self.make_ticket()?,
        };
        self.gossip.publish(TOPIC_REQUESTS, request.encode()?).await
    }

    /// Periodic pull: continue every known issuer chain past its head.
    pub async fn periodic_range_pull(&self) {
        let issuers = {
            let engine = self.engine.lock().await;
            match engine.store().issuers() {
                Ok(issuers) => issuers,
                Err(e) => {
                    warn!(error = %e, "issuer scan failed");
                    return;
                }
            }
        };
        for (issuer, head) in issuers {
            if let Err(e) = self.request_range(issuer, head.nonce + 1, None).await {
                warn!(error = %e, "periodic range request failed");
            }
        }
    }

    /// Periodic pull: fetch a fresh snapshot and retry any parked one.
    pub async fn periodic_snapshot_pull(&self) {
        self.try_adopt_pending().await;
        if let Err(e) = self.request_snapshot().await {
            warn!(error = %e, "periodic snapshot request failed");
        }
    }

    fn track_request(&self) -> Result<String, ClawError> {
        let id = request_id();
        let now = now_ms();
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        // Requests nobody answered within the timeout are forgotten.
        pending.retain(|_, issued| now - *issued < SYNC_REQUEST_TIMEOUT_MS as i64);
        pending.insert(id.clone(), now);
        Ok(id)
    }

    fn make_ticket(&self) -> Result<Ticket, ClawError> {
        let now = now_ms();
        Ok(match &self.config.policy {
            SybilPolicy::None | SybilPolicy::Allowlist(_) => Ticket::None,
            SybilPolicy::Pow { min_difficulty, ttl_ms } => {
                Ticket::mine_pow(&self.gossip.local_peer_id(), *min_difficulty, now, *ttl_ms)
            }
            SybilPolicy::Stake { ttl_ms } => Ticket::sign_stake(
                &self.keypair,
                self.config.stake_amount.clone(),
                now,
                *ttl_ms,
            )?,
        })
    }
}

fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::NoStakeOracle;
    use clawnet_crypto::sign_envelope;
    use clawnet_p2p::MemoryHub;
    use clawnet_state::create_snapshot;
    use clawnet_store::{EventStore, MemoryKv};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn service_on(
        hub: &Arc<MemoryHub>,
        peer: &str,
        config: SyncConfig,
    ) -> (Arc<SyncService>, mpsc::Receiver<GossipMessage>) {
        let (gossip, rx) = hub.join(peer);
        let engine =
            EventEngine::open(Arc::new(EventStore::new(Arc::new(MemoryKv::new())))).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(SyncService::new(
            gossip,
            Arc::new(Mutex::new(engine)),
            Arc::new(SnapshotStore::open(dir.keep()).unwrap()),
            Arc::new(Keypair::generate()),
            Arc::new(NoStakeOracle),
            config,
        ));
        (service, rx)
    }

    async fn pump(service: &SyncService, rx: &mut mpsc::Receiver<GossipMessage>) {
        while let Ok(message) = rx.try_recv() {
            service.handle_message(message).await;
        }
    }

    fn mint(kp: &Keypair, nonce: u64) -> Envelope {
        let mut env = Envelope::build(
            kp.did.clone(),
            "wallet.mint",
            json!({"to": kp.address, "amount": "10"}),
            nonce,
            1_700_000_000_000,
            None,
        )
        .unwrap();
        sign_envelope(&mut env, kp).unwrap();
        env
    }

    #[tokio::test]
    async fn gossiped_events_are_ingested() {
        let hub = MemoryHub::new();
        let (publisher, _prx) = hub.join("publisher");
        let (service, mut rx) = service_on(&hub, "listener", SyncConfig::default());

        let kp = Keypair::generate();
        let env = mint(&kp, 1);
        publisher
            .publish(TOPIC_EVENTS, env.encode().unwrap())
            .await
            .unwrap();
        pump(&service, &mut rx).await;

        let engine = service.engine().lock().await;
        assert_eq!(engine.store().log_length().unwrap(), 1);
    }

    #[tokio::test]
    async fn range_sync_between_two_nodes() {
        let hub = MemoryHub::new();
        let (server, mut server_rx) = service_on(&hub, "server", SyncConfig::default());
        let (client, mut client_rx) = service_on(&hub, "client", SyncConfig::default());

        // Server holds a 4-event chain.
        let kp = Keypair::generate();
        {
            let mut engine = server.engine().lock().await;
            let mut prev = None;
            for nonce in 1..=4 {
                let mut env = Envelope::build(
                    kp.did.clone(),
                    "wallet.mint",
                    json!({"to": kp.address, "amount": "10"}),
                    nonce,
                    1_700_000_000_000,
                    prev,
                )
                .unwrap();
                sign_envelope(&mut env, &kp).unwrap();
                prev = Some(env.require_hash().unwrap());
                engine.append_event(env).unwrap();
            }
        }

        client.request_range(kp.did.clone(), 1, None).await.unwrap();
        pump(&server, &mut server_rx).await; // serve the request
        pump(&client, &mut client_rx).await; // apply the response

        let engine = client.engine().lock().await;
        assert_eq!(engine.store().log_length().unwrap(), 4);
        assert_eq!(
            engine.store().issuer_head(&kp.did).unwrap().unwrap().nonce,
            4
        );
    }

    #[tokio::test]
    async fn gap_triggers_range_sync_and_catches_up() {
        let hub = MemoryHub::new();
        let (server, mut server_rx) = service_on(&hub, "server", SyncConfig::default());
        let (client, mut client_rx) = service_on(&hub, "client", SyncConfig::default());

        let kp = Keypair::generate();
        let mut events = Vec::new();
        {
            let mut engine = server.engine().lock().await;
            let mut prev = None;
            for nonce in 1..=3 {
                let mut env = Envelope::build(
                    kp.did.clone(),
                    "wallet.mint",
                    json!({"to": kp.address, "amount": "10"}),
                    nonce,
                    1_700_000_000_000,
                    prev,
                )
                .unwrap();
                sign_envelope(&mut env, &kp).unwrap();
                prev = Some(env.require_hash().unwrap());
                engine.append_event(env.clone()).unwrap();
                events.push(env);
            }
        }

        // The client sees only event 3 from gossip: a nonce gap.
        client
            .handle_message(GossipMessage {
                topic: TOPIC_EVENTS.into(),
                data: events[2].encode().unwrap(),
                source: Some("server".into()),
            })
            .await;

        // The gap published a range request; serve and apply it.
        pump(&server, &mut server_rx).await;
        pump(&client, &mut client_rx).await;

        let engine = client.engine().lock().await;
        assert_eq!(engine.store().log_length().unwrap(), 3);
    }

    #[tokio::test]
    async fn invalid_ticket_gets_no_reply() {
        let hub = MemoryHub::new();
        let config = SyncConfig {
            policy: SybilPolicy::Allowlist(vec!["friend".into()]),
            ..SyncConfig::default()
        };
        let (server, mut server_rx) = service_on(&hub, "server", config);
        let (client, mut client_rx) = service_on(&hub, "client", SyncConfig::default());

        // Server has data the client wants.
        let kp = Keypair::generate();
        server
            .engine()
            .lock()
            .await
            .append_event(mint(&kp, 1))
            .unwrap();

        // "client" is not in the server's allowlist: silence.
        client.request_range(kp.did.clone(), 1, None).await.unwrap();
        pump(&server, &mut server_rx).await;
        pump(&client, &mut client_rx).await;

        let engine = client.engine().lock().await;
        assert_eq!(engine.store().log_length().unwrap(), 0);
    }

    #[tokio::test]
    async fn pow_ticketed_range_sync_succeeds() {
        let hub = MemoryHub::new();
        let config = SyncConfig {
            policy: SybilPolicy::Pow { min_difficulty: 8, ttl_ms: 60_000 },
            ..SyncConfig::default()
        };
        let (server, mut server_rx) = service_on(&hub, "server", config.clone());
        let (client, mut client_rx) = service_on(&hub, "client", config);

        let kp = Keypair::generate();
        server
            .engine()
            .lock()
            .await
            .append_event(mint(&kp, 1))
            .unwrap();

        client.request_range(kp.did.clone(), 1, None).await.unwrap();
        pump(&server, &mut server_rx).await;
        pump(&client, &mut client_rx).await;

        let engine = client.engine().lock().await;
        assert_eq!(engine.store().log_length().unwrap(), 1);
    }

    #[tokio::test]
    async fn snapshot_bootstrap_over_the_wire() {
        let hub = MemoryHub::new();
        let config = SyncConfig { min_snapshot_signatures: 3, ..SyncConfig::default() };
        let (server, mut server_rx) = service_on(&hub, "server", config.clone());
        let (client, mut client_rx) = service_on(&hub, "client", config);

        // Server: 5-event chain with a 3-signature snapshot at event 5.
        let kp = Keypair::generate();
        {
            let mut engine = server.engine().lock().await;
            let mut prev = None;
            for nonce in 1..=5 {
                let mut env = Envelope::build(
                    kp.did.clone(),
                    "wallet.mint",
                    json!({"to": kp.address, "amount": "10"}),
                    nonce,
                    1_700_000_000_000,
                    prev,
                )
                .unwrap();
                sign_envelope(&mut env, &kp).unwrap();
                prev = Some(env.require_hash().unwrap());
                engine.append_event(env).unwrap();
            }
            let mut snapshot =
                create_snapshot(engine.store(), 1_700_000_600_000).unwrap().unwrap();
            for _ in 0..3 {
                snapshot.sign(&Keypair::generate()).unwrap();
            }
            server.snapshots.save(&snapshot).unwrap();
        }

        // Client: fetch the snapshot (parked: tail missing), then the chain.
        client.request_snapshot().await.unwrap();
        pump(&server, &mut server_rx).await;
        pump(&client, &mut client_rx).await;

        client.request_range(kp.did.clone(), 1, None).await.unwrap();
        pump(&server, &mut server_rx).await;
        pump(&client, &mut client_rx).await;

        let client_engine = client.engine().lock().await;
        let server_engine = server.engine().lock().await;
        assert_eq!(client_engine.state(), server_engine.state());
        // Byte-equal canonical serialization of the two wallet states.
        let a = clawnet_core::canonical_bytes(
            &serde_json::to_value(client_engine.state()).unwrap(),
        )
        .unwrap();
        let b = clawnet_core::canonical_bytes(
            &serde_json::to_value(server_engine.state()).unwrap(),
        )
        .unwrap();
        assert_eq!(a, b);
    }
}
