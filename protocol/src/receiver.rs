// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Payment Receiver
//!
//! The advertiser side: accepts connections, runs the responder half of
//! the key exchange, admits peers through the trust state machine, and
//! executes (or queues) decrypted payments.
//!
//! One [`serve`](PaymentReceiver::serve) loop per peer link; loops for
//! different peers are independent tasks and share no locks beyond the
//! per-peer entries inside the engine, trust store, and queue lanes.
//!
//! Replay and tag failures are both answered with a generic
//! `DECRYPT_FAILED` on the wire — the sender learns that decryption
//! failed, never which check tripped. The precise cause stays in the
//! local logs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chain::ChainBroadcaster;
use crate::error::{BeamError, BeamResult};
use crate::identity::PeerId;
use crate::queue::OfflineQueue;
use crate::session::{KeyExchangeConfirm, KeyExchangeInit, SessionEngine};
use crate::transport::ChunkTransport;
use crate::trust::TrustStore;
use crate::wire::envelope::{Envelope, EnvelopeType, ErrorPayload};
use crate::wire::payment::{ConfirmationPayload, PaymentPayload};

/// Advertiser-side driver. Shared across peer-serving tasks.
pub struct PaymentReceiver {
    engine: Arc<SessionEngine>,
    trust: Arc<TrustStore>,
    queue: Arc<OfflineQueue>,
    chain: Arc<dyn ChainBroadcaster>,
    accepting: AtomicBool,
}

impl PaymentReceiver {
    pub fn new(
        engine: Arc<SessionEngine>,
        trust: Arc<TrustStore>,
        queue: Arc<OfflineQueue>,
        chain: Arc<dyn ChainBroadcaster>,
    ) -> Self {
        Self {
            engine,
            trust,
            queue,
            chain,
            accepting: AtomicBool::new(true),
        }
    }

    /// Start accepting payment traffic.
    pub fn start_receiving(&self) {
        self.accepting.store(true, Ordering::SeqCst);
        tracing::info!("receiver accepting payments");
    }

    /// Stop accepting. Serving loops finish their current exchange and
    /// refuse new ones; disconnecting the links unblocks idle loops.
    pub fn stop_receiving(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        tracing::info!("receiver stopped accepting payments");
    }

    pub fn is_receiving(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Serve one peer link until it disconnects or receiving stops.
    ///
    /// Every inbound envelope is answered: handshake messages with their
    /// successor, payments with a sealed confirmation (and a
    /// `receiver_ready` once the receiver is back to advertising),
    /// rejections with a typed error envelope.
    pub async fn serve(&self, transport: &ChunkTransport) -> BeamResult<()> {
        let mut peer = transport.peer_id();
        loop {
            let bytes = match transport.recv().await {
                Ok(bytes) => bytes,
                Err(BeamError::TransportDisconnected) => {
                    tracing::debug!(peer = %peer, "peer link closed");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
            if !self.is_receiving() {
                self.send_error(transport, &BeamError::TransportUnavailable("receiver stopped".into()))
                    .await;
                continue;
            }

            let envelope = match Envelope::decode(&bytes) {
                Ok(envelope) => envelope,
                Err(err) => {
                    tracing::warn!(peer = %peer, error = %err, "rejecting inbound envelope");
                    self.send_error(transport, &err).await;
                    continue;
                }
            };

            let outcome = match envelope.envelope_type {
                EnvelopeType::KeyExchangeInit => {
                    self.on_key_exchange_init(transport, &envelope, &mut peer).await
                }
                EnvelopeType::KeyExchangeConfirm => {
                    self.on_key_exchange_confirm(&envelope, &peer)
                }
                EnvelopeType::PaymentRequest => {
                    self.on_payment_request(transport, &envelope, &peer).await
                }
                EnvelopeType::Error => {
                    if let Ok(payload) = serde_json::from_slice::<ErrorPayload>(&envelope.payload) {
                        tracing::warn!(peer = %peer, code = %payload.code, "peer reported an error");
                    }
                    Ok(())
                }
                other => Err(BeamError::MalformedEnvelope(format!(
                    "unexpected {other} on the receiving side"
                ))),
            };

            if let Err(err) = outcome {
                tracing::warn!(peer = %peer, error = %err, "exchange step failed");
                self.send_error(transport, &err).await;
            }
        }
    }

    /// Periodic maintenance shared by all serving loops: expire idle
    /// sessions, reclaim idle trust records, drop timed-out partial
    /// reassemblies.
    pub async fn maintain(&self, transport: &ChunkTransport) {
        let expired = self.engine.expire_idle();
        let reclaimed = self.trust.sweep_idle();
        let dropped = transport.sweep_reassembly().await.len();
        if expired + reclaimed + dropped > 0 {
            tracing::debug!(expired, reclaimed, dropped, "maintenance sweep");
        }
    }

    // --- Handshake --------------------------------------------------------

    async fn on_key_exchange_init(
        &self,
        transport: &ChunkTransport,
        envelope: &Envelope,
        peer: &mut PeerId,
    ) -> BeamResult<()> {
        let init: KeyExchangeInit = serde_json::from_slice(&envelope.payload)
            .map_err(|e| BeamError::MalformedEnvelope(e.to_string()))?;
        *peer = init.peer_id.clone();

        // Blocked peers are refused before any key material is derived.
        let challenge = self.trust.issue_challenge(peer)?;
        let response = self.engine.respond_handshake(&init, challenge)?;
        let bytes = serde_json::to_vec(&response)
            .map_err(|e| BeamError::Serialization(e.to_string()))?;
        transport
            .send(&Envelope::plaintext(EnvelopeType::KeyExchangeResponse, bytes).encode()?)
            .await
    }

    fn on_key_exchange_confirm(&self, envelope: &Envelope, peer: &PeerId) -> BeamResult<()> {
        let confirm: KeyExchangeConfirm = serde_json::from_slice(&envelope.payload)
            .map_err(|e| BeamError::MalformedEnvelope(e.to_string()))?;
        // Identity proof first; the parked session key is only installed
        // for a peer the trust layer has admitted.
        self.trust
            .verify_response(peer, &confirm.identity_key, &confirm.challenge_signature)?;
        self.engine.handle_confirm(peer, &confirm)
    }

    // --- Payments ---------------------------------------------------------

    async fn on_payment_request(
        &self,
        transport: &ChunkTransport,
        envelope: &Envelope,
        peer: &PeerId,
    ) -> BeamResult<()> {
        self.trust.check_authenticated(peer)?;
        self.trust.note_payment(peer)?;

        let plaintext = match self.engine.open(peer, envelope) {
            Ok(plaintext) => plaintext,
            Err(err @ (BeamError::DecryptFailed | BeamError::ReplayDetected { .. })) => {
                tracing::warn!(peer = %peer, error = %err, "payment envelope rejected");
                self.trust.note_decrypt_failure(peer);
                self.engine.discard(peer);
                // One generic code on the wire for both causes.
                return Err(BeamError::DecryptFailed);
            }
            Err(err) => return Err(err),
        };
        let payment = PaymentPayload::from_bytes(&plaintext)?;
        tracing::info!(peer = %peer, amount = %payment.amount, to = %payment.to, "payment request received");

        let confirmation = self.execute(&payment).await?;
        let bytes = serde_json::to_vec(&confirmation)
            .map_err(|e| BeamError::Serialization(e.to_string()))?;
        let sealed = self
            .engine
            .seal(peer, EnvelopeType::TransactionConfirmation, &bytes)?;
        transport.send(&sealed.encode()?).await?;

        // Back to advertising: tell the payer the slot is free. Best
        // effort; the payer treats its absence as soft.
        if let Ok(ready) = self.engine.seal(peer, EnvelopeType::ReceiverReady, b"{}") {
            if let Ok(encoded) = ready.encode() {
                if let Err(err) = transport.send(&encoded).await {
                    tracing::debug!(peer = %peer, error = %err, "receiver_ready not delivered");
                }
            }
        }
        Ok(())
    }

    /// Execute immediately when the chain is reachable, queue otherwise.
    async fn execute(&self, payment: &PaymentPayload) -> BeamResult<ConfirmationPayload> {
        if self.chain.is_online().await {
            let signed = self.chain.sign_transaction(payment).await?;
            match self.chain.broadcast(&signed).await {
                Ok(hash) => {
                    tracing::info!(tx_hash = %hash, "payment broadcast");
                    Ok(ConfirmationPayload {
                        transaction_hash: Some(hash),
                        confirmed: true,
                        queued: false,
                        message: None,
                    })
                }
                Err(err) => Ok(ConfirmationPayload {
                    transaction_hash: None,
                    confirmed: false,
                    queued: false,
                    message: Some(err.to_string()),
                }),
            }
        } else {
            let queued = self.queue.enqueue(payment).await?;
            Ok(ConfirmationPayload {
                transaction_hash: None,
                confirmed: true,
                queued: true,
                message: Some(format!("queued offline as {}", queued.id)),
            })
        }
    }

    async fn send_error(&self, transport: &ChunkTransport, err: &BeamError) {
        let payload = match serde_json::to_vec(&ErrorPayload::from_error(err)) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        let envelope = Envelope::plaintext(EnvelopeType::Error, payload);
        match envelope.encode() {
            Ok(bytes) => {
                if let Err(send_err) = transport.send(&bytes).await {
                    tracing::debug!(error = %send_err, "error envelope not delivered");
                }
            }
            Err(_) => {}
        }
    }
}
