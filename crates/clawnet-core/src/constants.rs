//! ─── ClawNet Protocol Constants ─────────────────────────────────────────────
//!
//! Event substrate for an autonomous-agent economy. Every constant here is a
//! protocol value: changing one changes what peers accept.

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Current envelope schema version (`v` field).
pub const ENVELOPE_VERSION: u32 = 1;

/// Domain prefix for event signing bytes. Prepended to the canonical
/// envelope bytes before hashing so event signatures can never be replayed
/// as credential signatures (or vice versa).
pub const EVENT_SIGNING_DOMAIN: &[u8] = b"clawtoken:event:v1:";

/// Domain prefix for verifiable-credential proofs.
pub const VC_SIGNING_DOMAIN: &[u8] = b"clawtoken:vc:v1:";

/// Domain prefix for snapshot counter-signatures.
pub const SNAPSHOT_SIGNING_DOMAIN: &[u8] = b"clawtoken:snapshot:v1:";

/// Domain prefix for stake-proof sync tickets.
pub const TICKET_SIGNING_DOMAIN: &[u8] = b"clawtoken:ticket:v1:";

// ── Identity ─────────────────────────────────────────────────────────────────

/// DID method prefix: `did:claw:<multibase(pk)>`.
pub const DID_PREFIX: &str = "did:claw:";

/// Human-readable address prefix: `claw` + base58(version ‖ pk ‖ checksum).
pub const ADDRESS_PREFIX: &str = "claw";

/// Version byte prepended to the public key in address derivation.
pub const ADDRESS_VERSION: u8 = 0x00;

/// Checksum length appended in address derivation (`SHA256(pk)[0..4]`).
pub const ADDRESS_CHECKSUM_LEN: usize = 4;

// ── Gossip topics ────────────────────────────────────────────────────────────

pub const TOPIC_EVENTS: &str = "/clawnet/1.0.0/events";
pub const TOPIC_MARKETS: &str = "/clawnet/1.0.0/markets";
pub const TOPIC_REQUESTS: &str = "/clawnet/1.0.0/requests";
pub const TOPIC_RESPONSES: &str = "/clawnet/1.0.0/responses";

// ── Transport ────────────────────────────────────────────────────────────────

/// Default P2P listen multiaddress.
pub const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/9527";

/// Dial timeout (milliseconds).
pub const DIAL_TIMEOUT_MS: u64 = 1_000;

/// Sync request timeout (milliseconds).
pub const SYNC_REQUEST_TIMEOUT_MS: u64 = 10_000;

// ── Sync cadence ─────────────────────────────────────────────────────────────

/// Periodic range-sync interval (milliseconds).
pub const DEFAULT_RANGE_INTERVAL_MS: u64 = 30_000;

/// Periodic snapshot-sync interval (milliseconds).
pub const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 300_000;

/// Maximum events returned in one range-sync response.
pub const RANGE_CHUNK_SIZE: usize = 256;

// ── Sybil tickets ────────────────────────────────────────────────────────────

/// Proof-of-work ticket time-to-live (milliseconds).
pub const DEFAULT_POW_TICKET_TTL_MS: u64 = 60_000;

/// Stake-proof ticket time-to-live (milliseconds).
pub const DEFAULT_STAKE_PROOF_TTL_MS: u64 = 300_000;

/// Minimum accepted PoW ticket difficulty (leading zero bits).
pub const DEFAULT_MIN_POW_DIFFICULTY: u8 = 16;

// ── Snapshots ────────────────────────────────────────────────────────────────

/// Snapshot creation threshold: events appended since the last snapshot.
pub const SNAPSHOT_MAX_EVENTS: u64 = 10_000;

/// Snapshot creation threshold: age of the latest snapshot (milliseconds).
pub const SNAPSHOT_MAX_AGE_MS: u64 = 3_600_000;

/// Signatures from distinct signers required before a foreign snapshot may
/// seed a bootstrapping node.
pub const DEFAULT_MIN_SNAPSHOT_SIGNATURES: usize = 3;

// ── Finality ─────────────────────────────────────────────────────────────────

/// Confirmation tiers: amounts up to the bound need the paired count;
/// anything larger needs [`FINALITY_MAX_CONFIRMATIONS`].
pub const FINALITY_TIERS: [(u64, u32); 2] = [(100, 3), (1_000, 5)];

/// Confirmations required above the last tier bound.
pub const FINALITY_MAX_CONFIRMATIONS: u32 = 7;
