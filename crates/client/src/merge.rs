//! Guest-to-authenticated cart merge.
//!
//! Runs at most once per (user, installation). The merge-completion record is
//! what makes this hold across restarts: a login usually reloads the client,
//! and merging again on the next start would double every guest quantity.
//!
//! Per-item failures are logged and skipped. The record is still written so a
//! partial merge never re-runs and re-inflates the lines that did succeed.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use storefront_sync_core::{Product, UserId};

use crate::cart::SessionCartStore;
use crate::persistence::{self, DurableStore, keys};
use crate::remote::CartService;

/// What a merge attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Guest lines were reconciled into the remote cart.
    Merged {
        /// Lines written successfully.
        merged: usize,
        /// Lines skipped after a remote failure.
        failed: usize,
    },
    /// The record for this user already exists. The guest snapshot is
    /// discarded without touching the remote cart.
    AlreadyMerged,
    /// There was no guest cart to merge.
    NothingToMerge,
    /// The remote cart could not be read; the guest cart is kept for a later
    /// attempt and no record was written.
    Deferred,
}

/// The one-shot guest cart merge.
pub struct GuestMerge {
    remote: Arc<dyn CartService>,
    durable: Arc<dyn DurableStore>,
}

impl GuestMerge {
    /// Create the merge over the remote cart and durable store.
    #[must_use]
    pub fn new(remote: Arc<dyn CartService>, durable: Arc<dyn DurableStore>) -> Self {
        Self { remote, durable }
    }

    /// Merge the guest cart into `user_id`'s remote cart if it has not been
    /// merged on this installation yet, then reload `cart` from the remote.
    ///
    /// The cart is only reloaded after an actual merge; other outcomes leave
    /// reloading to the caller.
    #[instrument(skip(self, cart))]
    pub async fn run(&self, user_id: UserId, cart: &SessionCartStore) -> MergeOutcome {
        let durable = self.durable.as_ref();

        match persistence::has_merged(durable, user_id) {
            Ok(true) => {
                debug!("Guest cart already merged for this user");
                // a later guest or user must not pick these lines up
                if let Err(e) = durable.delete(keys::GUEST_CART) {
                    warn!(error = %e, "Failed to clear guest cart snapshot");
                }
                return MergeOutcome::AlreadyMerged;
            }
            Ok(false) => {}
            Err(e) => {
                // Unknown record state: merging could double-count
                warn!(error = %e, "Cannot read merge record; deferring merge");
                return MergeOutcome::Deferred;
            }
        }

        let guest = match persistence::load_guest_cart(durable) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Cannot read guest cart; deferring merge");
                return MergeOutcome::Deferred;
            }
        };
        if guest.is_empty() {
            if let Err(e) = durable.delete(keys::GUEST_CART) {
                warn!(error = %e, "Failed to clear guest cart snapshot");
            }
            return MergeOutcome::NothingToMerge;
        }

        let remote_items = match self.remote.fetch_cart().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Cannot fetch remote cart; deferring merge");
                return MergeOutcome::Deferred;
            }
        };

        let mut merged = 0;
        let mut failed = 0;
        for item in &guest {
            let existing = remote_items
                .iter()
                .find(|remote| remote.product_id == item.product_id);
            let result = match existing {
                Some(remote) => {
                    let target = remote.quantity.saturating_add(item.quantity);
                    self.remote.set_quantity(item.product_id, target).await
                }
                None => {
                    self.remote
                        .add_item(&Product::from(item), item.quantity)
                        .await
                }
            };
            match result {
                Ok(_) => merged += 1,
                Err(e) => {
                    warn!(product_id = %item.product_id, error = %e, "Skipping guest line that failed to merge");
                    failed += 1;
                }
            }
        }

        // The record must exist before the merge counts as complete
        if let Err(e) = persistence::mark_merged(durable, user_id) {
            error!(error = %e, "Failed to write merge record");
        }
        // Without a snapshot a repeated run finds nothing to merge
        if let Err(e) = durable.delete(keys::GUEST_CART) {
            error!(error = %e, "Failed to clear guest cart snapshot");
        }

        if let Err(e) = cart.reload().await {
            warn!(error = %e, "Failed to reload cart after merge");
        }

        info!(merged, failed, "Guest cart merged");
        MergeOutcome::Merged { merged, failed }
    }
}
