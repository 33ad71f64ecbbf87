// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Device Trust State Machine
//!
//! The accepting side of the protocol meets unauthenticated strangers.
//! This module decides who gets to talk:
//!
//! ```text
//!   Unauthenticated ──challenge──► ChallengeSent ──valid response──► Authenticated
//!          │                            │  failed × MAX_AUTH_ATTEMPTS
//!          └────────────◄───────────────┴──────────► Blocked (cool-down)
//!                                                       │ repeated blocks
//!                                                       ▼
//!                                                   Blocked (extended blacklist)
//! ```
//!
//! `Blocked` is reachable from any state and sticky: a valid response is
//! still rejected with `DEVICE_BLOCKED` until the cool-down elapses.
//! Unblocking earlier is an explicit administrative action.
//!
//! A separate sliding-window rate limiter caps payment traffic from
//! authenticated peers; tripping it yields `RATE_LIMITED` without
//! touching authentication state. Repeated decrypt failures count
//! toward the same window — a peer spraying garbage ciphertext burns
//! its own budget.
//!
//! Every transition is logged with peer, event, and resulting state for
//! audit. Challenges themselves are never logged.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;

use crate::config;
use crate::error::{BeamError, BeamResult};
use crate::identity::{self, PeerId};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Authentication state of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// Never authenticated, or lapsed back after a block expired.
    Unauthenticated,
    /// A challenge is outstanding.
    ChallengeSent,
    /// Proved control of its identity.
    Authenticated,
    /// In cool-down or blacklisted.
    Blocked,
}

/// Per-peer trust record. One per peer identity, owned by the store.
struct DeviceAuthRecord {
    status: AuthStatus,
    challenge: Option<Vec<u8>>,
    challenge_issued_at: Option<Instant>,
    attempts: u32,
    blocked_until: Option<Instant>,
    /// When past blocks started, for blacklist escalation.
    block_history: VecDeque<Instant>,
    /// Sliding window of accepted payments and decrypt failures.
    traffic_window: VecDeque<Instant>,
    last_seen: Instant,
}

impl DeviceAuthRecord {
    fn new() -> Self {
        Self {
            status: AuthStatus::Unauthenticated,
            challenge: None,
            challenge_issued_at: None,
            attempts: 0,
            blocked_until: None,
            block_history: VecDeque::new(),
            traffic_window: VecDeque::new(),
            last_seen: Instant::now(),
        }
    }

    /// Remaining block time, if any. A lapsed block resets the record to
    /// `Unauthenticated` — lapsing is not an unblock, the peer still has
    /// to re-authenticate.
    fn block_remaining(&mut self, peer: &PeerId) -> Option<Duration> {
        let until = self.blocked_until?;
        let now = Instant::now();
        if now < until {
            return Some(until - now);
        }
        self.blocked_until = None;
        self.status = AuthStatus::Unauthenticated;
        self.attempts = 0;
        tracing::info!(peer = %peer, event = "block_lapsed", state = "unauthenticated", "trust transition");
        None
    }
}

/// Tunables for the trust store. Defaults come from [`config`].
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Failed attempts before a block.
    pub max_attempts: u32,
    /// Cool-down for a regular block.
    pub cooldown: Duration,
    /// Challenge responses later than this fail.
    pub response_deadline: Duration,
    /// Window over which blocks are counted for escalation.
    pub blacklist_window: Duration,
    /// Blocks within the window that trigger the blacklist.
    pub blacklist_threshold: u32,
    /// Extended blacklist duration.
    pub blacklist_duration: Duration,
    /// Payments (plus decrypt failures) allowed per rate window.
    pub rate_limit_max: u32,
    /// The rate window.
    pub rate_limit_window: Duration,
    /// Idle records older than this are reclaimed (unless blocked).
    pub record_idle: Duration,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            max_attempts: config::MAX_AUTH_ATTEMPTS,
            cooldown: config::BLOCK_COOLDOWN,
            response_deadline: config::CHALLENGE_RESPONSE_DEADLINE,
            blacklist_window: config::BLACKLIST_WINDOW,
            blacklist_threshold: config::BLACKLIST_THRESHOLD,
            blacklist_duration: config::BLACKLIST_DURATION,
            rate_limit_max: config::TX_RATE_LIMIT_MAX,
            rate_limit_window: config::TX_RATE_LIMIT_WINDOW,
            record_idle: config::TRUST_RECORD_IDLE,
        }
    }
}

/// One row of the status snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustInfo {
    /// The peer.
    pub peer_id: PeerId,
    /// Current state.
    pub status: AuthStatus,
    /// Failed attempts on the current challenge cycle.
    pub attempts: u32,
    /// Seconds of block remaining, when blocked.
    pub blocked_remaining_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// TrustStore
// ---------------------------------------------------------------------------

/// All trust records, keyed per peer. Injected wherever admission
/// decisions happen; constructible in tests with tight configs.
pub struct TrustStore {
    records: DashMap<PeerId, DeviceAuthRecord>,
    config: TrustConfig,
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new(TrustConfig::default())
    }
}

impl TrustStore {
    /// Store with explicit tunables.
    pub fn new(config: TrustConfig) -> Self {
        Self {
            records: DashMap::new(),
            config,
        }
    }

    /// Issue a fresh random challenge for `peer`, moving it to
    /// `ChallengeSent`. Rejected outright while the peer is blocked.
    pub fn issue_challenge(&self, peer: &PeerId) -> BeamResult<Vec<u8>> {
        let mut entry = self.records.entry(peer.clone()).or_insert_with(DeviceAuthRecord::new);
        let record = entry.value_mut();
        record.last_seen = Instant::now();

        if let Some(remaining) = record.block_remaining(peer) {
            return Err(BeamError::DeviceBlocked {
                remaining_secs: remaining.as_secs(),
            });
        }

        let mut challenge = vec![0u8; config::CHALLENGE_LENGTH];
        OsRng.fill_bytes(&mut challenge);
        record.challenge = Some(challenge.clone());
        record.challenge_issued_at = Some(Instant::now());
        record.status = AuthStatus::ChallengeSent;
        tracing::info!(peer = %peer, event = "challenge_issued", state = "challenge_sent", "trust transition");
        Ok(challenge)
    }

    /// Verify a challenge response: the presented key must derive the
    /// claimed peer id and the signature must cover the outstanding
    /// challenge, within the response deadline.
    ///
    /// Failures count toward the attempt limit; hitting it blocks the
    /// peer for the cool-down (or the extended blacklist after repeated
    /// blocks).
    pub fn verify_response(
        &self,
        peer: &PeerId,
        identity_key: &[u8],
        signature: &[u8],
    ) -> BeamResult<()> {
        let mut entry = self.records.entry(peer.clone()).or_insert_with(DeviceAuthRecord::new);
        let record = entry.value_mut();
        record.last_seen = Instant::now();

        if let Some(remaining) = record.block_remaining(peer) {
            // Even a valid response is rejected while blocked.
            return Err(BeamError::DeviceBlocked {
                remaining_secs: remaining.as_secs(),
            });
        }
        if record.status != AuthStatus::ChallengeSent {
            return Err(BeamError::AuthRequired);
        }

        let verified = self.check_response(record, peer, identity_key, signature);
        match verified {
            Ok(()) => {
                record.status = AuthStatus::Authenticated;
                record.challenge = None;
                record.challenge_issued_at = None;
                record.attempts = 0;
                tracing::info!(peer = %peer, event = "auth_succeeded", state = "authenticated", "trust transition");
                Ok(())
            }
            Err(_) => {
                record.attempts += 1;
                record.challenge = None;
                record.status = AuthStatus::Unauthenticated;
                tracing::warn!(
                    peer = %peer,
                    event = "auth_failed",
                    attempts = record.attempts,
                    state = "unauthenticated",
                    "trust transition"
                );
                if record.attempts >= self.config.max_attempts {
                    return Err(self.block(record, peer));
                }
                Err(BeamError::AuthFailed)
            }
        }
    }

    fn check_response(
        &self,
        record: &DeviceAuthRecord,
        peer: &PeerId,
        identity_key: &[u8],
        signature: &[u8],
    ) -> BeamResult<()> {
        let challenge = record.challenge.as_ref().ok_or(BeamError::AuthRequired)?;
        let issued_at = record.challenge_issued_at.ok_or(BeamError::AuthRequired)?;
        if issued_at.elapsed() > self.config.response_deadline {
            return Err(BeamError::AuthFailed);
        }
        let key: &[u8; 32] = identity_key.try_into().map_err(|_| BeamError::AuthFailed)?;
        let sig: &[u8; 64] = signature.try_into().map_err(|_| BeamError::AuthFailed)?;
        identity::verify_challenge_response(peer, key, challenge, sig)
    }

    /// Block `record`, escalating to the blacklist when the peer keeps
    /// earning blocks. Returns the error the caller should surface.
    fn block(&self, record: &mut DeviceAuthRecord, peer: &PeerId) -> BeamError {
        let now = Instant::now();
        record
            .block_history
            .retain(|t| now.duration_since(*t) < self.config.blacklist_window);
        record.block_history.push_back(now);

        let escalated = record.block_history.len() as u32 >= self.config.blacklist_threshold;
        let duration = if escalated {
            self.config.blacklist_duration
        } else {
            self.config.cooldown
        };
        record.status = AuthStatus::Blocked;
        record.blocked_until = Some(now + duration);
        tracing::warn!(
            peer = %peer,
            event = if escalated { "blacklisted" } else { "blocked" },
            cooldown_secs = duration.as_secs(),
            state = "blocked",
            "trust transition"
        );
        BeamError::DeviceBlocked {
            remaining_secs: duration.as_secs(),
        }
    }

    /// Gate for payment traffic: peer must currently be `Authenticated`.
    pub fn check_authenticated(&self, peer: &PeerId) -> BeamResult<()> {
        let mut entry = self.records.entry(peer.clone()).or_insert_with(DeviceAuthRecord::new);
        let record = entry.value_mut();
        if let Some(remaining) = record.block_remaining(peer) {
            return Err(BeamError::DeviceBlocked {
                remaining_secs: remaining.as_secs(),
            });
        }
        match record.status {
            AuthStatus::Authenticated => Ok(()),
            _ => Err(BeamError::AuthRequired),
        }
    }

    /// Charge one payment envelope against the peer's rate window.
    /// Tripping the limiter rejects the payment but leaves the peer
    /// `Authenticated`.
    pub fn note_payment(&self, peer: &PeerId) -> BeamResult<()> {
        let mut entry = self.records.entry(peer.clone()).or_insert_with(DeviceAuthRecord::new);
        let record = entry.value_mut();
        record.last_seen = Instant::now();

        let now = Instant::now();
        let window = self.config.rate_limit_window;
        record
            .traffic_window
            .retain(|t| now.duration_since(*t) < window);
        if record.traffic_window.len() as u32 >= self.config.rate_limit_max {
            let oldest = record.traffic_window.front().copied().unwrap_or(now);
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            tracing::warn!(peer = %peer, event = "rate_limited", "trust transition");
            return Err(BeamError::RateLimited {
                retry_after_secs: retry_after.as_secs(),
            });
        }
        record.traffic_window.push_back(now);
        Ok(())
    }

    /// Decrypt failures spend rate budget too, so a peer cannot probe
    /// ciphertexts for free.
    pub fn note_decrypt_failure(&self, peer: &PeerId) {
        let mut entry = self.records.entry(peer.clone()).or_insert_with(DeviceAuthRecord::new);
        let record = entry.value_mut();
        record.traffic_window.push_back(Instant::now());
        tracing::warn!(peer = %peer, event = "decrypt_failure_counted", "trust transition");
    }

    /// Explicit administrative unblock. The only way out of a block
    /// before its cool-down expires.
    pub fn unblock(&self, peer: &PeerId) -> bool {
        match self.records.get_mut(peer) {
            Some(mut record) if record.status == AuthStatus::Blocked => {
                record.status = AuthStatus::Unauthenticated;
                record.blocked_until = None;
                record.attempts = 0;
                tracing::info!(peer = %peer, event = "admin_unblock", state = "unauthenticated", "trust transition");
                true
            }
            _ => false,
        }
    }

    /// Current state of one peer.
    pub fn status(&self, peer: &PeerId) -> AuthStatus {
        self.records
            .get(peer)
            .map(|r| r.status)
            .unwrap_or(AuthStatus::Unauthenticated)
    }

    /// Reclaim idle records. Blocked peers are kept — forgetting a block
    /// would be an accidental unblock.
    pub fn sweep_idle(&self) -> usize {
        let idle = self.config.record_idle;
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.status == AuthStatus::Blocked || record.last_seen.elapsed() < idle
        });
        before - self.records.len()
    }

    /// Snapshot for the status endpoint.
    pub fn snapshot(&self) -> Vec<TrustInfo> {
        let now = Instant::now();
        self.records
            .iter()
            .map(|entry| TrustInfo {
                peer_id: entry.key().clone(),
                status: entry.status,
                attempts: entry.attempts,
                blocked_remaining_secs: entry
                    .blocked_until
                    .filter(|until| *until > now)
                    .map(|until| (until - now).as_secs()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DeviceKeypair;

    fn tight_config() -> TrustConfig {
        TrustConfig {
            max_attempts: 3,
            cooldown: Duration::from_secs(60),
            response_deadline: Duration::from_secs(5),
            blacklist_window: Duration::from_secs(600),
            blacklist_threshold: 3,
            blacklist_duration: Duration::from_secs(3600),
            rate_limit_max: 3,
            rate_limit_window: Duration::from_secs(60),
            record_idle: Duration::from_secs(600),
        }
    }

    fn authenticate(store: &TrustStore, kp: &DeviceKeypair) {
        let peer = kp.peer_id();
        let challenge = store.issue_challenge(&peer).unwrap();
        let sig = kp.sign_challenge(&challenge);
        store
            .verify_response(&peer, kp.verifying_key().as_bytes(), &sig.to_bytes())
            .unwrap();
    }

    #[test]
    fn happy_path_reaches_authenticated() {
        let store = TrustStore::new(tight_config());
        let kp = DeviceKeypair::generate();
        authenticate(&store, &kp);
        assert_eq!(store.status(&kp.peer_id()), AuthStatus::Authenticated);
        assert!(store.check_authenticated(&kp.peer_id()).is_ok());
    }

    #[test]
    fn wrong_signature_fails_and_counts() {
        let store = TrustStore::new(tight_config());
        let kp = DeviceKeypair::generate();
        let peer = kp.peer_id();

        let _challenge = store.issue_challenge(&peer).unwrap();
        let bad_sig = [0u8; 64];
        let err = store
            .verify_response(&peer, kp.verifying_key().as_bytes(), &bad_sig)
            .unwrap_err();
        assert!(matches!(err, BeamError::AuthFailed));
        assert_eq!(store.status(&peer), AuthStatus::Unauthenticated);
    }

    #[test]
    fn n_failures_block_and_valid_response_still_rejected() {
        let store = TrustStore::new(tight_config());
        let kp = DeviceKeypair::generate();
        let peer = kp.peer_id();

        // Two failures, then the third trips the block.
        for attempt in 1..=3 {
            let _challenge = store.issue_challenge(&peer).unwrap();
            let err = store
                .verify_response(&peer, kp.verifying_key().as_bytes(), &[0u8; 64])
                .unwrap_err();
            if attempt < 3 {
                assert!(matches!(err, BeamError::AuthFailed));
            } else {
                assert!(matches!(err, BeamError::DeviceBlocked { .. }));
            }
        }
        assert_eq!(store.status(&peer), AuthStatus::Blocked);

        // Even a perfectly valid response is rejected while blocked.
        assert!(matches!(
            store.issue_challenge(&peer),
            Err(BeamError::DeviceBlocked { .. })
        ));
        let sig = kp.sign_challenge(b"whatever");
        assert!(matches!(
            store.verify_response(&peer, kp.verifying_key().as_bytes(), &sig.to_bytes()),
            Err(BeamError::DeviceBlocked { .. })
        ));
    }

    #[test]
    fn repeated_blocks_escalate_to_blacklist() {
        let mut cfg = tight_config();
        cfg.max_attempts = 1;
        cfg.blacklist_threshold = 2;
        cfg.cooldown = Duration::from_millis(0);
        let store = TrustStore::new(cfg.clone());
        let kp = DeviceKeypair::generate();
        let peer = kp.peer_id();

        // First block: cool-down of zero lapses immediately.
        store.issue_challenge(&peer).unwrap();
        let err = store
            .verify_response(&peer, kp.verifying_key().as_bytes(), &[0u8; 64])
            .unwrap_err();
        assert!(matches!(err, BeamError::DeviceBlocked { .. }));

        // Second block within the window escalates to the long duration.
        store.issue_challenge(&peer).unwrap();
        let err = store
            .verify_response(&peer, kp.verifying_key().as_bytes(), &[0u8; 64])
            .unwrap_err();
        match err {
            BeamError::DeviceBlocked { remaining_secs } => {
                assert!(remaining_secs >= cfg.blacklist_duration.as_secs() - 1);
            }
            other => panic!("expected DeviceBlocked, got {other:?}"),
        }
    }

    #[test]
    fn admin_unblock_restores_access() {
        let mut cfg = tight_config();
        cfg.max_attempts = 1;
        let store = TrustStore::new(cfg);
        let kp = DeviceKeypair::generate();
        let peer = kp.peer_id();

        store.issue_challenge(&peer).unwrap();
        let _ = store.verify_response(&peer, kp.verifying_key().as_bytes(), &[0u8; 64]);
        assert_eq!(store.status(&peer), AuthStatus::Blocked);

        assert!(store.unblock(&peer));
        authenticate(&store, &kp);
        assert_eq!(store.status(&peer), AuthStatus::Authenticated);
    }

    #[test]
    fn rate_limiter_caps_payments_without_touching_auth() {
        let store = TrustStore::new(tight_config());
        let kp = DeviceKeypair::generate();
        let peer = kp.peer_id();
        authenticate(&store, &kp);

        for _ in 0..3 {
            store.note_payment(&peer).unwrap();
        }
        let err = store.note_payment(&peer).unwrap_err();
        assert!(matches!(err, BeamError::RateLimited { .. }));
        // Authentication state untouched.
        assert_eq!(store.status(&peer), AuthStatus::Authenticated);
    }

    #[test]
    fn decrypt_failures_spend_rate_budget() {
        let store = TrustStore::new(tight_config());
        let kp = DeviceKeypair::generate();
        let peer = kp.peer_id();
        authenticate(&store, &kp);

        store.note_decrypt_failure(&peer);
        store.note_decrypt_failure(&peer);
        store.note_payment(&peer).unwrap();
        assert!(matches!(
            store.note_payment(&peer),
            Err(BeamError::RateLimited { .. })
        ));
    }

    #[test]
    fn payment_requires_authentication() {
        let store = TrustStore::new(tight_config());
        let peer = PeerId::from_string("stranger");
        assert!(matches!(
            store.check_authenticated(&peer),
            Err(BeamError::AuthRequired)
        ));
    }

    #[test]
    fn sweep_keeps_blocked_peers() {
        let mut cfg = tight_config();
        cfg.max_attempts = 1;
        cfg.record_idle = Duration::from_millis(0);
        let store = TrustStore::new(cfg);
        let blocked_kp = DeviceKeypair::generate();
        let idle_kp = DeviceKeypair::generate();

        store.issue_challenge(&blocked_kp.peer_id()).unwrap();
        let _ = store.verify_response(
            &blocked_kp.peer_id(),
            blocked_kp.verifying_key().as_bytes(),
            &[0u8; 64],
        );
        store.issue_challenge(&idle_kp.peer_id()).unwrap();

        let removed = store.sweep_idle();
        assert_eq!(removed, 1);
        assert_eq!(store.status(&blocked_kp.peer_id()), AuthStatus::Blocked);
    }
}
