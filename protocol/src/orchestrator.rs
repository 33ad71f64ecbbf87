// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Payment Orchestrator
//!
//! Drives the sending side end to end: connectivity check, session
//! establishment (with the challenge signature folded into the confirm),
//! the encrypted `payment_request`, the `transaction_confirmation`, and
//! finally the best-effort `receiver_ready` signal.
//!
//! Every stage has its own timeout and fails with a typed error; nothing
//! retries indefinitely. When the chain is unreachable at send time the
//! whole radio exchange is skipped and the payment goes to the offline
//! queue instead.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::ChainBroadcaster;
use crate::config;
use crate::error::{BeamError, BeamResult};
use crate::identity::KeyStore;
use crate::queue::OfflineQueue;
use crate::session::{KeyExchangeConfirm, KeyExchangeResponse, SessionEngine};
use crate::transport::ChunkTransport;
use crate::wire::envelope::{Envelope, EnvelopeType, ErrorPayload};
use crate::wire::payment::{ConfirmationPayload, PaymentPayload};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Final disposition of one submitted payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Delivered; the receiver accepted it without an on-chain hash yet
    /// (it queued the payment on its side).
    Sent,
    /// Chain unreachable locally; signed and parked in the offline
    /// queue.
    Queued,
    /// The receiver broadcast it and returned a transaction hash.
    Confirmed,
    /// The receiver reported a failure.
    Failed,
}

/// What `submit_payment` hands back to the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub status: PaymentStatus,
    /// Present when the receiver broadcast the transaction.
    pub transaction_hash: Option<String>,
    /// Human-readable detail.
    pub message: Option<String>,
    /// Whether the receiver signalled it is ready for the next payer.
    pub receiver_ready: bool,
}

/// Per-stage timeouts. Defaults come from [`config`]; tests shrink them.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub handshake_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub receiver_ready_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: config::HANDSHAKE_TIMEOUT,
            confirmation_timeout: config::CONFIRMATION_TIMEOUT,
            receiver_ready_timeout: config::RECEIVER_READY_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Sending-side driver. One instance per device; the transport for the
/// specific peer is passed per call since links come and go.
pub struct PaymentOrchestrator {
    engine: Arc<SessionEngine>,
    keys: Arc<dyn KeyStore>,
    queue: Arc<OfflineQueue>,
    chain: Arc<dyn ChainBroadcaster>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        engine: Arc<SessionEngine>,
        keys: Arc<dyn KeyStore>,
        queue: Arc<OfflineQueue>,
        chain: Arc<dyn ChainBroadcaster>,
    ) -> Self {
        Self::with_config(engine, keys, queue, chain, OrchestratorConfig::default())
    }

    pub fn with_config(
        engine: Arc<SessionEngine>,
        keys: Arc<dyn KeyStore>,
        queue: Arc<OfflineQueue>,
        chain: Arc<dyn ChainBroadcaster>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            engine,
            keys,
            queue,
            chain,
            config,
        }
    }

    /// Submit one payment to the peer behind `transport`.
    ///
    /// Offline: validates, signs, and queues locally, returning
    /// `Queued`. Online: establishes (or reuses) a session, sends the
    /// sealed request, and resolves on the receiver's confirmation.
    /// The receiver-ready wait is soft — its absence degrades the
    /// result, never fails it.
    pub async fn submit_payment(
        &self,
        transport: &ChunkTransport,
        payment: &PaymentPayload,
    ) -> BeamResult<PaymentResult> {
        if !self.chain.is_online().await {
            let queued = self.queue.enqueue(payment).await?;
            return Ok(PaymentResult {
                status: PaymentStatus::Queued,
                transaction_hash: None,
                message: Some(format!("queued offline as {}", queued.id)),
                receiver_ready: false,
            });
        }

        if !transport.is_connected() {
            return Err(BeamError::TransportUnavailable("link is down".into()));
        }

        let peer = transport.peer_id();
        if !self.engine.has_session(&peer) {
            self.establish_session(transport).await?;
        }

        // An expired session surfaces as AUTH_REQUIRED on seal; re-key
        // once, transparently.
        let payload = payment.to_compact_bytes()?;
        let request = match self.engine.seal(&peer, EnvelopeType::PaymentRequest, &payload) {
            Ok(envelope) => envelope,
            Err(BeamError::AuthRequired) => {
                self.establish_session(transport).await?;
                self.engine.seal(&peer, EnvelopeType::PaymentRequest, &payload)?
            }
            Err(err) => return Err(err),
        };
        transport.send(&request.encode()?).await?;
        tracing::debug!(peer = %peer, amount = %payment.amount, "payment request sent");

        let confirmation = self.await_confirmation(transport, &peer).await?;
        let receiver_ready = self.await_receiver_ready(transport, &peer).await;

        let result = match (&confirmation.transaction_hash, confirmation.confirmed) {
            (Some(hash), true) => PaymentResult {
                status: PaymentStatus::Confirmed,
                transaction_hash: Some(hash.clone()),
                message: confirmation.message,
                receiver_ready,
            },
            (None, true) if confirmation.queued => PaymentResult {
                status: PaymentStatus::Sent,
                transaction_hash: None,
                message: confirmation
                    .message
                    .or_else(|| Some("receiver queued the payment".into())),
                receiver_ready,
            },
            _ => PaymentResult {
                status: PaymentStatus::Failed,
                transaction_hash: None,
                message: confirmation.message,
                receiver_ready,
            },
        };
        tracing::info!(peer = %peer, status = ?result.status, "payment resolved");
        Ok(result)
    }

    /// Run the three-message handshake as initiator, bounded by the
    /// handshake timeout.
    async fn establish_session(&self, transport: &ChunkTransport) -> BeamResult<()> {
        tokio::time::timeout(self.config.handshake_timeout, self.handshake(transport))
            .await
            .map_err(|_| BeamError::TransportTimeout { stage: "handshake" })?
    }

    async fn handshake(&self, transport: &ChunkTransport) -> BeamResult<()> {
        let peer = transport.peer_id();

        let init = self.engine.begin_handshake(&peer);
        let init_bytes = serde_json::to_vec(&init)
            .map_err(|e| BeamError::Serialization(e.to_string()))?;
        transport
            .send(&Envelope::plaintext(EnvelopeType::KeyExchangeInit, init_bytes).encode()?)
            .await?;

        let envelope = Envelope::decode(&transport.recv().await?)?;
        let response: KeyExchangeResponse = match envelope.envelope_type {
            EnvelopeType::KeyExchangeResponse => serde_json::from_slice(&envelope.payload)
                .map_err(|e| BeamError::MalformedEnvelope(e.to_string()))?,
            EnvelopeType::Error => return Err(Self::unwrap_error(&envelope)),
            other => {
                return Err(BeamError::KeyExchangeFailed(format!(
                    "expected key_exchange_response, got {other}"
                )))
            }
        };

        let session_id = response.session_id.clone();
        let challenge = self.engine.handle_response(&peer, &response)?;
        let signature = self.keys.identity_keypair().sign_challenge(&challenge);
        let confirm = KeyExchangeConfirm {
            session_id,
            identity_key: self
                .keys
                .identity_keypair()
                .verifying_key()
                .as_bytes()
                .to_vec(),
            challenge_signature: signature.to_bytes().to_vec(),
        };
        let confirm_bytes = serde_json::to_vec(&confirm)
            .map_err(|e| BeamError::Serialization(e.to_string()))?;
        transport
            .send(&Envelope::plaintext(EnvelopeType::KeyExchangeConfirm, confirm_bytes).encode()?)
            .await?;
        self.engine.confirm_sent(&peer)
    }

    async fn await_confirmation(
        &self,
        transport: &ChunkTransport,
        peer: &crate::identity::PeerId,
    ) -> BeamResult<ConfirmationPayload> {
        let bytes = transport
            .recv_timeout(self.config.confirmation_timeout, "confirmation")
            .await?;
        let envelope = Envelope::decode(&bytes)?;
        match envelope.envelope_type {
            EnvelopeType::TransactionConfirmation => {
                let plaintext = self.engine.open(peer, &envelope)?;
                serde_json::from_slice(&plaintext)
                    .map_err(|e| BeamError::MalformedEnvelope(e.to_string()))
            }
            EnvelopeType::Error => Err(Self::unwrap_error(&envelope)),
            other => Err(BeamError::MalformedEnvelope(format!(
                "expected transaction_confirmation, got {other}"
            ))),
        }
    }

    /// Soft wait for the receiver to re-enter its advertising state.
    /// Timeouts and malformed signals only degrade the result.
    async fn await_receiver_ready(
        &self,
        transport: &ChunkTransport,
        peer: &crate::identity::PeerId,
    ) -> bool {
        let bytes = match transport
            .recv_timeout(self.config.receiver_ready_timeout, "receiver_ready")
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(peer = %peer, error = %err, "no receiver_ready signal");
                return false;
            }
        };
        match Envelope::decode(&bytes) {
            Ok(envelope) if envelope.envelope_type == EnvelopeType::ReceiverReady => {
                self.engine.open(peer, &envelope).is_ok()
            }
            Ok(envelope) => {
                tracing::debug!(peer = %peer, envelope_type = %envelope.envelope_type, "unexpected envelope while awaiting receiver_ready");
                false
            }
            Err(err) => {
                tracing::debug!(peer = %peer, error = %err, "undecodable receiver_ready");
                false
            }
        }
    }

    fn unwrap_error(envelope: &Envelope) -> BeamError {
        match serde_json::from_slice::<ErrorPayload>(&envelope.payload) {
            Ok(payload) => payload.into_error(),
            Err(e) => BeamError::MalformedEnvelope(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::InMemoryChain;
    use crate::identity::{DeviceKeypair, MemoryKeyStore};
    use crate::queue::MemoryQueueStore;
    use crate::transport::{memory_pair, FrameLink};
    use crate::wire::payment::{parse_decimal, payment_now, TokenInfo};

    fn orchestrator_with_chain(
        chain: Arc<InMemoryChain>,
    ) -> (PaymentOrchestrator, Arc<SessionEngine>) {
        let keys = Arc::new(MemoryKeyStore::ephemeral());
        let engine = Arc::new(SessionEngine::new(keys.identity_keypair().peer_id()));
        let queue = Arc::new(OfflineQueue::new(
            Arc::new(MemoryQueueStore::new()),
            chain.clone(),
        ));
        (
            PaymentOrchestrator::new(engine.clone(), keys, queue, chain),
            engine,
        )
    }

    #[tokio::test]
    async fn offline_submission_is_queued_without_touching_the_link() {
        let chain = Arc::new(InMemoryChain::new(parse_decimal("100", 2).unwrap()));
        chain.set_confirmed_nonce(5);
        chain.set_online(false);
        let (orchestrator, _) = orchestrator_with_chain(chain);

        let sender = DeviceKeypair::generate().peer_id();
        let receiver = DeviceKeypair::generate().peer_id();
        let (link, _other) = memory_pair(sender, receiver);
        let transport = ChunkTransport::new(link);

        let result = orchestrator
            .submit_payment(
                &transport,
                &payment_now("0xshop", "5.0", 1, TokenInfo::native("ETH", 2)),
            )
            .await
            .unwrap();
        assert_eq!(result.status, PaymentStatus::Queued);
        assert!(result.transaction_hash.is_none());
    }

    #[tokio::test]
    async fn disconnected_link_fails_fast_when_online() {
        let chain = Arc::new(InMemoryChain::new(parse_decimal("100", 2).unwrap()));
        let (orchestrator, _) = orchestrator_with_chain(chain);

        let sender = DeviceKeypair::generate().peer_id();
        let receiver = DeviceKeypair::generate().peer_id();
        let (link, _other) = memory_pair(sender, receiver);
        link.disconnect();
        let transport = ChunkTransport::new(link);

        let err = orchestrator
            .submit_payment(
                &transport,
                &payment_now("0xshop", "5.0", 1, TokenInfo::native("ETH", 2)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BeamError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn silent_peer_times_out_in_the_handshake_stage() {
        let chain = Arc::new(InMemoryChain::new(parse_decimal("100", 2).unwrap()));
        let (mut orchestrator, _) = {
            let (o, e) = orchestrator_with_chain(chain);
            (o, e)
        };
        orchestrator.config.handshake_timeout = Duration::from_millis(50);

        let sender = DeviceKeypair::generate().peer_id();
        let receiver = DeviceKeypair::generate().peer_id();
        let (link, _other) = memory_pair(sender, receiver);
        let transport = ChunkTransport::new(link);

        let err = orchestrator
            .submit_payment(
                &transport,
                &payment_now("0xshop", "5.0", 1, TokenInfo::native("ETH", 2)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BeamError::TransportTimeout { stage: "handshake" }
        ));
    }
}
