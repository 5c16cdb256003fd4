//! Property: a sequence of operations submitted offline and drained on
//! reconnect leaves the local and remote stores in exactly the state
//! the same sequence produces when submitted online.

use proptest::prelude::*;
use std::collections::HashMap;
use std::rc::Rc;

use tally_core::config::SyncConfig;
use tally_core::model::{Item, ItemId, ScopeId, Transaction, TransactionId};
use tally_core::orchestrator::Orchestrator;
use tally_core::queue::entry::Operation;
use tally_core::remote::memory::{MemoryRemote, TogglePresence};
use tally_core::store::LocalStore;

const NOW_US: u64 = 1_000;

#[derive(Debug, Clone, Copy)]
enum Step {
    Create(u8),
    Update(u8),
    Reassign(u8, u8),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..4).prop_map(Step::Create),
        (0u8..4).prop_map(Step::Update),
        ((0u8..4), (0u8..3)).prop_map(|(i, t)| Step::Reassign(i, t)),
    ]
}

fn item_id(index: u8) -> ItemId {
    ItemId::new_unchecked(format!("it-0000000{index}"))
}

fn tx_id(index: u8) -> TransactionId {
    TransactionId::new_unchecked(format!("tx-0000000{index}"))
}

/// Resolve abstract steps into concrete valid operations, tracking
/// each item's current transaction so reassign bases are accurate.
fn concretize(steps: &[Step]) -> Vec<Operation> {
    let mut current_tx: HashMap<u8, Option<u8>> = HashMap::new();
    let mut ops = Vec::new();

    for step in steps {
        match step {
            Step::Create(i) => {
                if current_tx.contains_key(i) {
                    continue;
                }
                current_tx.insert(*i, None);
                ops.push(Operation::CreateItem {
                    item: Item {
                        id: item_id(*i),
                        description: format!("item {i}"),
                        date_created_us: NOW_US,
                        last_updated_us: NOW_US,
                        ..Item::default()
                    },
                });
            }
            Step::Update(i) => {
                let Some(tx) = current_tx.get(i) else { continue };
                ops.push(Operation::UpdateItem {
                    item: Item {
                        id: item_id(*i),
                        description: format!("item {i} touched"),
                        transaction_id: tx.map(tx_id),
                        date_created_us: NOW_US,
                        last_updated_us: NOW_US,
                        ..Item::default()
                    },
                });
            }
            Step::Reassign(i, t) => {
                let Some(previous) = current_tx.get(i).copied() else {
                    continue;
                };
                if previous == Some(*t) {
                    continue;
                }
                ops.push(Operation::ReassignItem {
                    item_id: item_id(*i),
                    previous_transaction_id: previous.map(tx_id),
                    to_transaction_id: tx_id(*t),
                });
                current_tx.insert(*i, Some(*t));
            }
        }
    }
    ops
}

struct RunResult {
    items: Vec<Item>,
    transactions: Vec<Transaction>,
    edge_counts: Vec<(String, usize)>,
    remote_items: Vec<Item>,
}

fn run(ops: &[Operation], online: bool) -> RunResult {
    let scope = ScopeId::new("acct-prop");
    let presence = TogglePresence::shared(online);
    let store = LocalStore::open_in_memory().expect("open store");
    let mut remote = MemoryRemote::new();

    // Transactions exist up front on both sides.
    for t in 0u8..3 {
        let tx = Transaction {
            id: tx_id(t),
            source: format!("vendor {t}"),
            ..Transaction::default()
        };
        store.put_transaction(&scope, &tx).expect("put tx");
        remote.seed_transaction(tx);
    }

    let mut orch = Orchestrator::new(
        store,
        remote,
        Rc::clone(&presence),
        scope.clone(),
        SyncConfig::default(),
    );
    orch.sign_in("prop@test");

    for op in ops {
        orch.submit(op.clone(), NOW_US).expect("submit");
    }
    if !online {
        presence.set_online(true);
        let report = orch.handle_connectivity_regained(NOW_US).expect("drain");
        assert_eq!(report.remaining, 0, "drain must fully catch up");
    }

    let store = orch.store();
    let mut items = store.items_for_scope(&scope).expect("items");
    items.sort_by(|a, b| a.id.cmp(&b.id));
    let mut transactions = store.transactions_for_scope(&scope).expect("txs");
    transactions.sort_by(|a, b| a.id.cmp(&b.id));

    let edge_counts = items
        .iter()
        .map(|item| {
            let edges = store.edges_for_item(&item.id).expect("edges");
            (item.id.to_string(), edges.len())
        })
        .collect();

    let remote_items = {
        // fetch via snapshot refresh path would need a reconciler;
        // the raw fetch is what drain parity is about.
        use tally_core::remote::RemoteStore;
        orch.remote_handle().fetch_items(&scope).expect("fetch")
    };

    RunResult {
        items,
        transactions,
        edge_counts,
        remote_items,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn offline_drain_matches_online_submission(steps in prop::collection::vec(step_strategy(), 1..16)) {
        let ops = concretize(&steps);
        let online = run(&ops, true);
        let offline = run(&ops, false);

        prop_assert_eq!(online.items, offline.items);
        prop_assert_eq!(online.edge_counts, offline.edge_counts);
        prop_assert_eq!(online.remote_items, offline.remote_items);

        // Transaction caches agree too.
        let online_caches: Vec<_> = online
            .transactions
            .iter()
            .map(|tx| (tx.id.clone(), {
                let mut ids = tx.item_ids.clone();
                ids.sort();
                ids
            }))
            .collect();
        let offline_caches: Vec<_> = offline
            .transactions
            .iter()
            .map(|tx| (tx.id.clone(), {
                let mut ids = tx.item_ids.clone();
                ids.sort();
                ids
            }))
            .collect();
        prop_assert_eq!(online_caches, offline_caches);
    }
}
