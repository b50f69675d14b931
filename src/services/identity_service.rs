//! Wallet-style identity session: obtain an account from an injected provider,
//! ask it to switch network, and follow its account and chain notifications.
//!
//! This is library API for embedding clients. The HTTP server does not drive a
//! session: it trusts the `X-Wallet-Address` header and only shares
//! [`normalize_address`] with this module. `AppConfig::chain` configures the
//! network a session switches to.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::error::ServiceError;

/// Error code a provider returns when asked to switch to a chain it does not know.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

/// Failure reported by an identity provider request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider error {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code == UNRECOGNIZED_CHAIN_CODE
    }
}

/// Notification pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// New account list; empty means the user disconnected every account.
    AccountsChanged(Vec<String>),
    ChainChanged(String),
}

/// Native currency of a network, as announced to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Network the session wants the provider on, with what is needed to register it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChainParams {
    /// Hex chain id, e.g. `0x5`.
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            chain_id: "0x5".into(),
            chain_name: "Goerli Test Network".into(),
            native_currency: NativeCurrency {
                name: "Goerli ETH".into(),
                symbol: "GoerliETH".into(),
                decimals: 18,
            },
            rpc_urls: vec!["https://goerli.infura.io/v3/".into()],
            block_explorer_urls: vec!["https://goerli.etherscan.io/".into()],
        }
    }
}

/// Injected account provider (a browser wallet in the classroom setup).
pub trait IdentityProvider: Send + Sync {
    fn request_accounts(&self) -> BoxFuture<'static, Result<Vec<String>, ProviderError>>;
    fn switch_chain(&self, chain_id: &str) -> BoxFuture<'static, Result<(), ProviderError>>;
    fn add_chain(&self, params: &ChainParams) -> BoxFuture<'static, Result<(), ProviderError>>;
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Effect of a provider notification on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Connected(String),
    Disconnected,
    /// The network changed under us; everything derived from the old account must be dropped.
    Reset,
}

/// Trim and lower-case an address; `None` when nothing is left.
pub fn normalize_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_ascii_lowercase())
}

/// Short display form: `0x1234...abcd`.
pub fn format_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Connected identity, if any, tracked against one provider.
pub struct WalletSession {
    provider: Option<Arc<dyn IdentityProvider>>,
    chain: ChainParams,
    account: watch::Sender<Option<String>>,
}

impl WalletSession {
    pub fn new(provider: Option<Arc<dyn IdentityProvider>>, chain: ChainParams) -> Self {
        let (account, _rx) = watch::channel(None);
        Self {
            provider,
            chain,
            account,
        }
    }

    /// Currently connected address.
    pub fn account(&self) -> Option<String> {
        self.account.borrow().clone()
    }

    /// Subscribe to account changes.
    pub fn watch_account(&self) -> watch::Receiver<Option<String>> {
        self.account.subscribe()
    }

    /// Request accounts, keep the first one and move the provider to the configured chain.
    ///
    /// Chain switching is best effort: an unknown chain is registered through
    /// [`IdentityProvider::add_chain`], any other failure is only logged.
    pub async fn connect(&self) -> Result<String, ServiceError> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            ServiceError::IdentityUnavailable("no identity provider installed".into())
        })?;

        let accounts = provider
            .request_accounts()
            .await
            .map_err(|err| ServiceError::IdentityUnavailable(err.message))?;
        let address = accounts
            .first()
            .and_then(|first| normalize_address(first))
            .ok_or_else(|| {
                ServiceError::IdentityUnavailable("provider returned no accounts".into())
            })?;

        self.account.send_replace(Some(address.clone()));
        info!(account = %format_address(&address), "identity connected");

        match provider.switch_chain(&self.chain.chain_id).await {
            Ok(()) => {}
            Err(err) if err.is_unrecognized_chain() => {
                debug!(chain_id = %self.chain.chain_id, "chain unknown to provider; adding it");
                if let Err(err) = provider.add_chain(&self.chain).await {
                    warn!(chain_id = %self.chain.chain_id, error = %err, "failed to add chain");
                }
            }
            Err(err) => {
                warn!(chain_id = %self.chain.chain_id, error = %err, "failed to switch chain");
            }
        }

        Ok(address)
    }

    /// Forget the connected account locally.
    pub fn disconnect(&self) {
        self.account.send_replace(None);
    }

    /// Fold one provider notification into the session.
    pub fn apply_event(&self, event: ProviderEvent) -> SessionChange {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                match accounts.first().and_then(|first| normalize_address(first)) {
                    Some(address) => {
                        self.account.send_replace(Some(address.clone()));
                        SessionChange::Connected(address)
                    }
                    None => {
                        self.disconnect();
                        SessionChange::Disconnected
                    }
                }
            }
            ProviderEvent::ChainChanged(chain_id) => {
                info!(%chain_id, "provider chain changed; resetting session");
                self.disconnect();
                SessionChange::Reset
            }
        }
    }

    /// Apply provider notifications in the background until the provider goes away.
    pub fn follow_provider_events(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.provider.as_ref()?.subscribe();
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.apply_event(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "identity events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }
}
