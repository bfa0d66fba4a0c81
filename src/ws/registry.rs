//! The subscription registry: the authoritative map of which instrument
//! tokens are live and which order plans hold them.
//!
//! Single-writer discipline: only the feed manager's control loop mutates
//! the registry; the dispatcher takes snapshot reads. All operations are
//! short and non-blocking under one mutex, and subscription side-effects
//! are returned as values rather than performed in-lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::types::enums::ExchangeSegment;

/// A change the caller must translate into an outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// The token gained its first holder; subscribe it upstream.
    Subscribe {
        token: u32,
        exchange: ExchangeSegment,
    },
    /// The token lost its last holder; unsubscribe it upstream.
    Unsubscribe {
        token: u32,
        exchange: ExchangeSegment,
    },
}

#[derive(Debug)]
struct Entry {
    plans: HashSet<String>,
    exchange: ExchangeSegment,
    symbol: String,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<u32, Entry>,
    symbol_to_token: HashMap<String, u32>,
    plan_to_token: HashMap<String, u32>,
}

/// Authoritative mapping `token → {plan-ids, exchange, symbol}` with
/// bidirectional symbol/token indexes.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `plan_id` to `token`. Returns `Some(Subscribe)` when the token
    /// was previously absent. A plan holds at most one token at a time: if
    /// the plan was bound elsewhere, that binding is dropped first and may
    /// yield an `Unsubscribe` alongside the `Subscribe`.
    pub fn add(
        &self,
        plan_id: &str,
        token: u32,
        symbol: &str,
        exchange: ExchangeSegment,
    ) -> Vec<SubscriptionChange> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let mut changes = Vec::new();

        if let Some(&prev) = inner.plan_to_token.get(plan_id) {
            if prev == token {
                return changes;
            }
            if let Some(change) = Self::unbind(&mut inner, plan_id, prev) {
                changes.push(change);
            }
        }

        let entry = inner.entries.entry(token).or_insert_with(|| Entry {
            plans: HashSet::new(),
            exchange,
            symbol: symbol.to_owned(),
        });
        let was_new = entry.plans.is_empty();
        entry.plans.insert(plan_id.to_owned());
        inner.symbol_to_token.insert(symbol.to_owned(), token);
        inner.plan_to_token.insert(plan_id.to_owned(), token);

        if was_new {
            changes.push(SubscriptionChange::Subscribe { token, exchange });
        }
        changes
    }

    /// Remove `plan_id` from the registry. Yields an `Unsubscribe` for the
    /// token it held iff the plan was its last holder.
    pub fn remove(&self, plan_id: &str) -> Vec<SubscriptionChange> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let Some(token) = inner.plan_to_token.remove(plan_id) else {
            return Vec::new();
        };
        Self::unbind(&mut inner, plan_id, token).into_iter().collect()
    }

    fn unbind(inner: &mut Inner, plan_id: &str, token: u32) -> Option<SubscriptionChange> {
        let entry = inner.entries.get_mut(&token)?;
        entry.plans.remove(plan_id);
        if !entry.plans.is_empty() {
            return None;
        }
        let entry = inner.entries.remove(&token)?;
        inner.symbol_to_token.remove(&entry.symbol);
        Some(SubscriptionChange::Unsubscribe {
            token,
            exchange: entry.exchange,
        })
    }

    /// Grouped view `{exchange → [tokens]}` for composing subscribe frames.
    /// Deterministically ordered so identical registry states produce
    /// identical frames.
    pub fn snapshot(&self) -> BTreeMap<ExchangeSegment, Vec<u32>> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        let mut grouped: BTreeMap<ExchangeSegment, Vec<u32>> = BTreeMap::new();
        for (&token, entry) in &inner.entries {
            grouped.entry(entry.exchange).or_default().push(token);
        }
        for tokens in grouped.values_mut() {
            tokens.sort_unstable();
        }
        grouped
    }

    /// Plan ids currently bound to `token`.
    pub fn plans_for(&self, token: u32) -> Vec<String> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner
            .entries
            .get(&token)
            .map(|e| e.plans.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Trading symbol for `token`, if subscribed.
    pub fn symbol_for(&self, token: u32) -> Option<String> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.entries.get(&token).map(|e| e.symbol.clone())
    }

    /// Token for `symbol`, if subscribed.
    pub fn token_for(&self, symbol: &str) -> Option<u32> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.symbol_to_token.get(symbol).copied()
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NSE: ExchangeSegment = ExchangeSegment::NSE_CM;
    const NFO: ExchangeSegment = ExchangeSegment::NSE_FO;

    #[test]
    fn first_holder_subscribes_last_holder_unsubscribes() {
        let reg = SubscriptionRegistry::new();
        assert_eq!(
            reg.add("p1", 101, "X", NSE),
            vec![SubscriptionChange::Subscribe {
                token: 101,
                exchange: NSE
            }]
        );
        // Second holder on the same token: no new subscription.
        assert!(reg.add("p2", 101, "X", NSE).is_empty());

        assert!(reg.remove("p1").is_empty());
        assert_eq!(
            reg.remove("p2"),
            vec![SubscriptionChange::Unsubscribe {
                token: 101,
                exchange: NSE
            }]
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn add_then_remove_is_a_noop() {
        let reg = SubscriptionRegistry::new();
        reg.add("p1", 101, "X", NSE);
        reg.remove("p1");
        assert!(reg.is_empty());
        assert!(reg.symbol_for(101).is_none());
        assert!(reg.token_for("X").is_none());
        assert!(reg.plans_for(101).is_empty());
    }

    #[test]
    fn removing_unknown_plan_is_a_noop() {
        let reg = SubscriptionRegistry::new();
        assert!(reg.remove("ghost").is_empty());
    }

    #[test]
    fn plan_holds_at_most_one_token() {
        let reg = SubscriptionRegistry::new();
        reg.add("p1", 101, "X", NSE);
        let changes = reg.add("p1", 202, "Y", NFO);
        assert_eq!(
            changes,
            vec![
                SubscriptionChange::Unsubscribe {
                    token: 101,
                    exchange: NSE
                },
                SubscriptionChange::Subscribe {
                    token: 202,
                    exchange: NFO
                },
            ]
        );
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.plans_for(202), vec!["p1".to_owned()]);
    }

    #[test]
    fn rebinding_same_token_is_idempotent() {
        let reg = SubscriptionRegistry::new();
        reg.add("p1", 101, "X", NSE);
        assert!(reg.add("p1", 101, "X", NSE).is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn snapshot_groups_by_exchange() {
        let reg = SubscriptionRegistry::new();
        reg.add("p1", 101, "X", NSE);
        reg.add("p2", 202, "Y", NFO);
        reg.add("p3", 303, "Z", NSE);

        let snap = reg.snapshot();
        assert_eq!(snap[&NSE], vec![101, 303]);
        assert_eq!(snap[&NFO], vec![202]);
    }

    #[test]
    fn indexes_stay_consistent() {
        let reg = SubscriptionRegistry::new();
        reg.add("p1", 101, "X", NSE);
        assert_eq!(reg.symbol_for(101).as_deref(), Some("X"));
        assert_eq!(reg.token_for("X"), Some(101));
    }
}
