//! Refresh/push reconciliation with staleness guards.
//!
//! Two sources write the realtime snapshot: full fetches and push
//! changes. Both guards here keep them ordered:
//!
//! - **Refresh tokens.** Every `begin_refresh` bumps that collection's
//!   monotonic token; `complete_refresh` discards results carrying a
//!   stale token. A refresh superseded by a newer refresh of the same
//!   collection (or a scope switch) can finish late without clobbering
//!   newer state, while in-flight fetches of different collections
//!   stay independent.
//! - **Per-entity push staleness.** A fetch snapshot is as old as the
//!   moment it started. Any entity a push touched at-or-after that
//!   moment keeps its pushed state; the fetched copy of it is dropped.
//!
//! Refreshes also rate-limit through a cooldown window unless forced,
//! so event-driven callers (reconnect, foregrounding, channel
//! recovery) can all request refreshes without stampeding the backend.

use std::collections::HashMap;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::{Item, ScopeId, Transaction};
use crate::remote::{
    ChannelStatus, Collection, PushChange, PushMessage, RemoteStore, Subscription,
};

use super::snapshot::{CollectionPhase, RealtimeSnapshot};

/// Claim on an in-flight refresh. Completion must present it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    token: u64,
    collection: Collection,
    started_at_us: u64,
}

impl RefreshTicket {
    /// When the refresh began; the staleness cutoff for push data.
    #[must_use]
    pub const fn started_at_us(&self) -> u64 {
        self.started_at_us
    }
}

/// Keeps the realtime snapshot consistent across fetches, pushes, and
/// scope switches.
pub struct Reconciler {
    scope: ScopeId,
    cooldown_us: u64,
    refresh_tokens: HashMap<Collection, u64>,
    last_started_us: HashMap<Collection, u64>,
    push_seen_at: HashMap<(Collection, String), u64>,
    subscriptions: HashMap<Collection, Subscription>,
    snapshot: RealtimeSnapshot,
}

impl Reconciler {
    #[must_use]
    pub fn new(scope: ScopeId, config: &SyncConfig) -> Self {
        Self {
            scope,
            cooldown_us: config.refresh_cooldown_us(),
            refresh_tokens: HashMap::new(),
            last_started_us: HashMap::new(),
            push_seen_at: HashMap::new(),
            subscriptions: HashMap::new(),
            snapshot: RealtimeSnapshot::default(),
        }
    }

    /// Current realtime state.
    #[must_use]
    pub const fn snapshot(&self) -> &RealtimeSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub const fn scope(&self) -> &ScopeId {
        &self.scope
    }

    // -----------------------------------------------------------------
    // Two-phase refresh
    // -----------------------------------------------------------------

    /// Start a refresh. Returns `None` when the cooldown window since
    /// the previous start has not elapsed and `force` is off.
    ///
    /// Starting a refresh invalidates any ticket from an earlier
    /// `begin_refresh` of the same collection: the newest refresh
    /// wins. Refreshes of the other collection are untouched.
    pub fn begin_refresh(
        &mut self,
        collection: Collection,
        force: bool,
        now_us: u64,
    ) -> Option<RefreshTicket> {
        if !force {
            if let Some(last) = self.last_started_us.get(&collection) {
                if now_us.saturating_sub(*last) < self.cooldown_us {
                    tracing::debug!(%collection, "refresh suppressed by cooldown");
                    return None;
                }
            }
        }

        let token = self.refresh_tokens.entry(collection).or_insert(0);
        *token += 1;
        let token = *token;
        self.last_started_us.insert(collection, now_us);
        if self.snapshot.phase(collection) == CollectionPhase::Uninitialized {
            self.snapshot.set_phase(collection, CollectionPhase::Loading);
        }
        Some(RefreshTicket {
            token,
            collection,
            started_at_us: now_us,
        })
    }

    /// Complete an items refresh. Returns `false` when the ticket went
    /// stale (a newer refresh began, or the scope changed) and the
    /// fetched data was discarded.
    pub fn complete_items_refresh(
        &mut self,
        ticket: &RefreshTicket,
        fetched: Vec<Item>,
        now_us: u64,
    ) -> bool {
        if !self.ticket_is_current(ticket, Collection::Items) {
            return false;
        }

        let mut next = self.push_survivors(Collection::Items, ticket.started_at_us, |snapshot, id| {
            snapshot.items.get(id).cloned()
        });
        for item in fetched {
            let id = item.id.to_string();
            if self.push_is_newer(Collection::Items, &id, ticket.started_at_us) {
                continue;
            }
            next.insert(id, item);
        }
        self.snapshot.items = next;
        self.finish_refresh(Collection::Items, now_us);
        true
    }

    /// Complete a transactions refresh; same contract as items.
    pub fn complete_transactions_refresh(
        &mut self,
        ticket: &RefreshTicket,
        fetched: Vec<Transaction>,
        now_us: u64,
    ) -> bool {
        if !self.ticket_is_current(ticket, Collection::Transactions) {
            return false;
        }

        let mut next = self.push_survivors(
            Collection::Transactions,
            ticket.started_at_us,
            |snapshot, id| snapshot.transactions.get(id).cloned(),
        );
        for tx in fetched {
            let id = tx.id.to_string();
            if self.push_is_newer(Collection::Transactions, &id, ticket.started_at_us) {
                continue;
            }
            next.insert(id, tx);
        }
        self.snapshot.transactions = next;
        self.finish_refresh(Collection::Transactions, now_us);
        true
    }

    /// Record a failed refresh. A stale ticket changes nothing.
    pub fn fail_refresh(&mut self, ticket: &RefreshTicket, error: &SyncError) {
        if self.ticket_is_current(ticket, ticket.collection) {
            tracing::warn!(collection = %ticket.collection, %error, "refresh failed");
            self.snapshot.set_phase(ticket.collection, CollectionPhase::Error);
        }
    }

    /// Convenience single-call refresh against a remote.
    ///
    /// Returns `Ok(true)` when a refresh ran and applied, `Ok(false)`
    /// when the cooldown suppressed it.
    pub fn refresh<R: RemoteStore>(
        &mut self,
        remote: &R,
        collection: Collection,
        force: bool,
        now_us: u64,
    ) -> Result<bool, SyncError> {
        let Some(ticket) = self.begin_refresh(collection, force, now_us) else {
            return Ok(false);
        };

        match collection {
            Collection::Items => match remote.fetch_items(&self.scope) {
                Ok(fetched) => Ok(self.complete_items_refresh(&ticket, fetched, now_us)),
                Err(err) => {
                    let err = SyncError::from(err);
                    self.fail_refresh(&ticket, &err);
                    Err(err)
                }
            },
            Collection::Transactions => match remote.fetch_transactions(&self.scope) {
                Ok(fetched) => Ok(self.complete_transactions_refresh(&ticket, fetched, now_us)),
                Err(err) => {
                    let err = SyncError::from(err);
                    self.fail_refresh(&ticket, &err);
                    Err(err)
                }
            },
        }
    }

    // -----------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------

    /// Ensure a live push channel exists for `collection`. A live one
    /// is left untouched; a closed or missing one is (re)opened.
    pub fn ensure_subscribed<R: RemoteStore>(
        &mut self,
        remote: &mut R,
        collection: Collection,
    ) -> Result<(), SyncError> {
        let live = self
            .subscriptions
            .get(&collection)
            .is_some_and(|sub| !sub.is_closed());
        if live {
            return Ok(());
        }

        let subscription = remote.subscribe(collection, &self.scope)?;
        tracing::debug!(%collection, id = subscription.id(), "push channel opened");
        if self.subscriptions.insert(collection, subscription).is_none() {
            self.snapshot.telemetry.active_channels += 1;
        }
        Ok(())
    }

    /// Drain queued push messages from every open channel and apply
    /// them. Returns the number of messages applied.
    ///
    /// Each message is routed by the channel it arrived on, so a bare
    /// error status tears down that channel only; the other
    /// collection's subscription stays live.
    pub fn pump(&mut self, now_us: u64) -> usize {
        let mut messages: Vec<(Collection, PushMessage)> = Vec::new();
        for (&collection, sub) in &mut self.subscriptions {
            while let Some(message) = sub.try_recv() {
                messages.push((collection, message));
            }
        }
        let applied = messages.len();
        for (collection, message) in messages {
            match message.status {
                ChannelStatus::Subscribed => self.apply_push(&message, now_us),
                ChannelStatus::ChannelError | ChannelStatus::TimedOut | ChannelStatus::Closed => {
                    self.handle_channel_status(collection, message.status, now_us);
                }
            }
        }
        applied
    }

    /// Apply one push message of unknown channel origin: entity
    /// changes update the snapshot and the staleness index; error
    /// statuses tear the channel down. `pump` routes bare error
    /// statuses by their originating channel instead of through here.
    pub fn apply_push(&mut self, message: &PushMessage, now_us: u64) {
        match message.status {
            ChannelStatus::Subscribed => {}
            ChannelStatus::ChannelError | ChannelStatus::TimedOut | ChannelStatus::Closed => {
                if let Some(change) = &message.change {
                    self.handle_channel_status(change.collection(), message.status, now_us);
                } else {
                    // Without a change payload the status applies to
                    // every open channel.
                    for collection in [Collection::Items, Collection::Transactions] {
                        self.handle_channel_status(collection, message.status, now_us);
                    }
                }
                return;
            }
        }

        let Some(change) = &message.change else {
            return;
        };
        let key = (change.collection(), change.entity_id());
        self.push_seen_at.insert(key, message.at_us);

        match change {
            PushChange::UpsertItem(item) => {
                self.snapshot.items.insert(item.id.to_string(), item.clone());
            }
            PushChange::RemoveItem(id) => {
                self.snapshot.items.remove(id.as_str());
            }
            PushChange::UpsertTransaction(tx) => {
                self.snapshot
                    .transactions
                    .insert(tx.id.to_string(), tx.clone());
            }
            PushChange::RemoveTransaction(id) => {
                self.snapshot.transactions.remove(id.as_str());
            }
        }
    }

    /// React to a channel lifecycle status: drops close the channel
    /// and record the disconnect. Resubscription happens on the next
    /// `ensure_subscribed`, typically right before a recovery refresh.
    pub fn handle_channel_status(
        &mut self,
        collection: Collection,
        status: ChannelStatus,
        now_us: u64,
    ) {
        match status {
            ChannelStatus::Subscribed => {}
            ChannelStatus::ChannelError | ChannelStatus::TimedOut | ChannelStatus::Closed => {
                if let Some(mut sub) = self.subscriptions.remove(&collection) {
                    sub.close();
                    self.snapshot.telemetry.active_channels =
                        self.snapshot.telemetry.active_channels.saturating_sub(1);
                }
                self.snapshot.telemetry.last_disconnect_us = Some(now_us);
                self.snapshot.telemetry.last_disconnect_status = Some(status);
                tracing::warn!(%collection, ?status, "push channel dropped");
            }
        }
    }

    /// Close every channel. Used on sign-out and teardown.
    pub fn teardown_all(&mut self) {
        for (_, mut sub) in self.subscriptions.drain() {
            sub.close();
        }
        self.snapshot.telemetry.active_channels = 0;
    }

    /// Switch the active scope: tear down channels, drop all entity
    /// state and staleness history, and invalidate in-flight refreshes.
    pub fn set_scope(&mut self, scope: ScopeId) {
        if scope == self.scope {
            return;
        }
        tracing::info!(from = %self.scope, to = %scope, "scope switch");
        self.teardown_all();
        self.scope = scope;
        for collection in [Collection::Items, Collection::Transactions] {
            *self.refresh_tokens.entry(collection).or_insert(0) += 1;
        }
        self.last_started_us.clear();
        self.push_seen_at.clear();
        self.snapshot.clear();
    }

    // -----------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------

    fn ticket_is_current(&self, ticket: &RefreshTicket, collection: Collection) -> bool {
        let current = self.refresh_tokens.get(&collection).copied().unwrap_or(0);
        if ticket.token != current || ticket.collection != collection {
            tracing::debug!(%collection, "stale refresh result discarded");
            return false;
        }
        true
    }

    fn push_is_newer(&self, collection: Collection, entity_id: &str, cutoff_us: u64) -> bool {
        self.push_seen_at
            .get(&(collection, entity_id.to_string()))
            .is_some_and(|&seen| seen >= cutoff_us)
    }

    /// Entities a push touched at-or-after the cutoff, with their
    /// current (pushed) state. Pushed removals stay removed.
    fn push_survivors<T>(
        &self,
        collection: Collection,
        cutoff_us: u64,
        get: impl Fn(&RealtimeSnapshot, &str) -> Option<T>,
    ) -> std::collections::BTreeMap<String, T> {
        let mut survivors = std::collections::BTreeMap::new();
        for ((coll, entity_id), &seen) in &self.push_seen_at {
            if *coll == collection && seen >= cutoff_us {
                if let Some(current) = get(&self.snapshot, entity_id) {
                    survivors.insert(entity_id.clone(), current);
                }
            }
        }
        survivors
    }

    fn finish_refresh(&mut self, collection: Collection, now_us: u64) {
        self.snapshot.set_phase(collection, CollectionPhase::Ready);
        self.snapshot
            .telemetry
            .last_refreshed_us
            .insert(collection, now_us);
    }
}
