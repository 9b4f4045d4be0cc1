//! Observable session state, the wallet cache, and the credential store seam.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::auth::ExternalWalletInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Inactive,
    Active,
    ActiveLoggedIn,
}

impl SessionState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::ActiveLoggedIn => "activeLoggedIn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, rename = "type")]
    pub wallet_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(
        default,
        alias = "externalWalletInfo",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_wallet: Option<ExternalWalletInfo>,
}

/// Single writer for [`SessionState`]. Observers subscribe; only the auth
/// orchestrator writes.
#[derive(Debug)]
pub struct SessionController {
    state: watch::Sender<SessionState>,
    wallets: Mutex<Vec<Wallet>>,
    keyshares: Mutex<KeyshareStatus>,
}

/// `epoch` advances on every reset, so work started in an earlier session
/// cannot mark the current one as primed.
#[derive(Debug, Default)]
struct KeyshareStatus {
    epoch: u64,
    loaded: bool,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            state,
            wallets: Mutex::new(Vec::new()),
            keyshares: Mutex::new(KeyshareStatus::default()),
        }
    }

    pub fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Returns `true` when the state changed.
    pub(crate) fn set(&self, next: SessionState) -> bool {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = previous.label(), to = next.label(), "Session state changed");
        }
        previous != next
    }

    pub fn wallets(&self) -> Vec<Wallet> {
        self.wallets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn replace_wallets(&self, wallets: Vec<Wallet>) {
        *self.wallets.lock().unwrap_or_else(PoisonError::into_inner) = wallets;
    }

    pub(crate) fn push_wallet(&self, wallet: Wallet) {
        let mut wallets = self.wallets.lock().unwrap_or_else(PoisonError::into_inner);
        wallets.retain(|existing| existing.id != wallet.id);
        wallets.push(wallet);
    }

    pub fn extra_keyshares_loaded(&self) -> bool {
        self.keyshare_status().loaded
    }

    pub(crate) fn session_epoch(&self) -> u64 {
        self.keyshare_status().epoch
    }

    /// Records the keyshares as loaded unless the session was reset since
    /// `epoch` was read. Returns whether the flag was set.
    pub(crate) fn mark_extra_keyshares_loaded(&self, epoch: u64) -> bool {
        let mut status = self.keyshare_status();
        if status.epoch != epoch {
            return false;
        }
        status.loaded = true;
        true
    }

    /// Back to `Inactive` with every derived cache cleared.
    pub(crate) fn reset(&self) {
        self.replace_wallets(Vec::new());
        {
            let mut status = self.keyshare_status();
            status.epoch = status.epoch.wrapping_add(1);
            status.loaded = false;
        }
        self.set(SessionState::Inactive);
    }

    fn keyshare_status(&self) -> std::sync::MutexGuard<'_, KeyshareStatus> {
        self.keyshares.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session store failed: {0}")]
pub struct SessionStoreError(pub String);

/// Keychain-style persistence for the last completed login.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<SessionDetails>, SessionStoreError>;
    fn persist(&self, details: &SessionDetails) -> Result<(), SessionStoreError>;
    fn clear(&self) -> Result<(), SessionStoreError>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    details: Mutex<Option<SessionDetails>>,
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<SessionDetails>, SessionStoreError> {
        Ok(self
            .details
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn persist(&self, details: &SessionDetails) -> Result<(), SessionStoreError> {
        *self.details.lock().unwrap_or_else(PoisonError::into_inner) = Some(details.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        self.details
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(id: &str) -> Wallet {
        Wallet {
            id: id.to_string(),
            address: format!("0x{id}"),
            wallet_type: "EVM".to_string(),
        }
    }

    #[test]
    fn starts_unknown_and_notifies_subscribers() {
        let session = SessionController::new();
        let mut observer = session.subscribe();
        assert_eq!(session.current(), SessionState::Unknown);

        assert!(session.set(SessionState::Active));
        assert!(!session.set(SessionState::Active));
        assert!(observer.has_changed().unwrap_or(false));
        assert_eq!(*observer.borrow_and_update(), SessionState::Active);
    }

    #[test]
    fn reset_clears_wallets_and_keyshare_flag() {
        let session = SessionController::new();
        session.set(SessionState::ActiveLoggedIn);
        session.replace_wallets(vec![wallet("w1")]);
        assert!(session.mark_extra_keyshares_loaded(session.session_epoch()));
        assert!(session.extra_keyshares_loaded());

        session.reset();
        assert_eq!(session.current(), SessionState::Inactive);
        assert!(session.wallets().is_empty());
        assert!(!session.extra_keyshares_loaded());
    }

    #[test]
    fn keyshare_mark_from_before_a_reset_is_ignored() {
        let session = SessionController::new();
        let stale = session.session_epoch();
        session.reset();

        assert!(!session.mark_extra_keyshares_loaded(stale));
        assert!(!session.extra_keyshares_loaded());
        assert!(session.mark_extra_keyshares_loaded(session.session_epoch()));
    }

    #[test]
    fn push_wallet_replaces_same_id() {
        let session = SessionController::new();
        session.push_wallet(wallet("w1"));
        session.push_wallet(wallet("w2"));
        session.push_wallet(wallet("w1"));
        let ids = session
            .wallets()
            .into_iter()
            .map(|wallet| wallet.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["w2".to_string(), "w1".to_string()]);
    }

    #[test]
    fn memory_store_round_trips_and_clears() {
        let store = MemorySessionStore::default();
        assert_eq!(store.load(), Ok(None));

        let details = SessionDetails {
            user_id: "u1".to_string(),
            email: Some("a@b.com".to_string()),
            phone: None,
            auth_type: Some("email".to_string()),
            external_wallet: None,
        };
        assert_eq!(store.persist(&details), Ok(()));
        assert_eq!(store.load(), Ok(Some(details)));
        assert_eq!(store.clear(), Ok(()));
        assert_eq!(store.load(), Ok(None));
    }

    #[test]
    fn session_details_accept_legacy_wallet_field() {
        let details: SessionDetails = serde_json::from_value(serde_json::json!({
            "userId": "u9",
            "authType": "externalWallet",
            "externalWalletInfo": {"address": "0xdef", "type": "SOLANA"}
        }))
        .unwrap_or_else(|err| panic!("decode failed: {err}"));
        assert_eq!(details.user_id, "u9");
        assert_eq!(
            details.external_wallet.map(|wallet| wallet.address),
            Some("0xdef".to_string())
        );
    }
}
