use std::sync::Arc;

use mirror_storage::ClientId;
use tracing::debug;

/// Fixed carriage key for the client identifier, shared by the address and
/// durable tiers.
pub const CLIENT_TOKEN_KEY: &str = "client";

/// Fixed carriage key for the session identifier.
pub const SESSION_TOKEN_KEY: &str = "session";

/// Continuity side channels provided by the presentation environment.
///
/// The address tier is whatever the environment uses as its navigational
/// address (URL query parameters in a browser, invocation arguments in a
/// terminal); the token tier is its durable client-side key/value store.
/// Writes on both tiers are fire-and-forget: implementations must swallow
/// storage failures rather than surface them, so that a missing tier only
/// degrades continuity, never turn processing.
pub trait ContinuitySignals: Send + Sync {
    /// Reads a token carried in the navigational address, if any.
    fn address_param(&self, key: &str) -> Option<String>;

    /// Mirrors a token into the navigational address.
    fn set_address_param(&self, key: &str, value: &str);

    /// Reads a token from the durable client-side store, if available.
    fn read_token(&self, key: &str) -> Option<String>;

    /// Persists a token to the durable client-side store.
    fn write_token(&self, key: &str, value: &str);
}

/// Derives the durable client identifier from available continuity signals.
pub struct IdentityResolver {
    signals: Arc<dyn ContinuitySignals>,
    cached: Option<ClientId>,
    confirmed: Option<ClientId>,
}

impl IdentityResolver {
    pub fn new(signals: Arc<dyn ContinuitySignals>) -> Self {
        Self {
            signals,
            cached: None,
            confirmed: None,
        }
    }

    /// Resolves the client identifier, idempotently within a process
    /// lifetime.
    ///
    /// Priority order: address-carried token (authoritative, overwrites any
    /// cached value), cached process state, durable client-side token,
    /// freshly minted identifier. Malformed tokens are treated as absent.
    pub fn resolve(&mut self) -> ClientId {
        if let Some(raw) = self.signals.address_param(CLIENT_TOKEN_KEY) {
            match ClientId::parse(&raw) {
                Ok(id) => {
                    self.cached = Some(id.clone());
                    // The address already carries the token; only the durable
                    // tier needs the mirror.
                    self.confirm(&id, false, true);
                    return id;
                }
                Err(error) => {
                    debug!(%error, "ignoring malformed client token in address");
                }
            }
        }

        if let Some(id) = self.cached.clone() {
            self.confirm(&id, true, true);
            return id;
        }

        if let Some(raw) = self.signals.read_token(CLIENT_TOKEN_KEY) {
            match ClientId::parse(&raw) {
                Ok(id) => {
                    self.cached = Some(id.clone());
                    self.confirm(&id, true, false);
                    return id;
                }
                Err(error) => {
                    debug!(%error, "ignoring malformed durable client token");
                }
            }
        }

        // First visit with no recoverable signal.
        let id = ClientId::mint();
        debug!(client_id = %id, "minted fresh client identifier");
        self.cached = Some(id.clone());
        self.confirm(&id, true, true);
        id
    }

    // Propagation is a one-shot transition per identifier: once a token has
    // been pushed to (or observed in) both tiers, re-resolving must not write
    // again; a reload observing its own write would otherwise loop forever.
    fn confirm(&mut self, id: &ClientId, write_address: bool, write_durable: bool) {
        if self.confirmed.as_ref() == Some(id) {
            return;
        }

        if write_durable {
            self.signals.write_token(CLIENT_TOKEN_KEY, id.as_str());
        }
        if write_address {
            self.signals.set_address_param(CLIENT_TOKEN_KEY, id.as_str());
        }

        self.confirmed = Some(id.clone());
    }
}
