//! Ledger behavior tests
//!
//! These tests exercise the ledger as callers see it:
//!
//! 1. **Rollback** - A failed transaction leaves every registry untouched
//!    and delivers no events
//! 2. **Concurrency** - Overlapping transactions serialize without lost
//!    updates; disjoint ones run side by side
//! 3. **Timeouts** - Logic that overruns its budget is rolled back
//! 4. **Events** - Delivery follows emission order and commit order; a
//!    failing handler does not affect others; a handler may submit
//!    transactions of its own
//! 5. **Queries** - Ordering stays total with NaN readings
//! 6. **Configuration** - `tally.toml` drives the ledger's limits
//! 7. **Typed resources** - Rust structs mapped through `ResourceType`

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tally_engine::{
    init_tracing, BusinessNetwork, FieldDef, FqName, Ledger, LedgerConfig, ModelRegistry,
    Resource, ResourceKind, ResourceType, TallyError, TallyResult, Transaction, TypeDefinition,
    Value, CONFIG_FILE_NAME,
};

// ============================================================================
// Test Helpers
// ============================================================================

const NS: &str = "org.example.bank";

fn account_type() -> FqName {
    FqName::new(NS, "Account")
}

fn model() -> ModelRegistry {
    let model = ModelRegistry::new();
    model
        .define_all([
            TypeDefinition::participant(NS, "Customer", "customerId")
                .field(FieldDef::string("name")),
            TypeDefinition::asset(NS, "Account", "accountId")
                .field(FieldDef::integer("balance"))
                .field(FieldDef::relationship("holder", NS, "Customer")),
            TypeDefinition::asset(NS, "Ledgerline", "lineId").field(FieldDef::integer("amount")),
            TypeDefinition::transaction(NS, "Transfer")
                .field(FieldDef::relationship("from", NS, "Account"))
                .field(FieldDef::relationship("to", NS, "Account"))
                .field(FieldDef::integer("amount")),
            TypeDefinition::transaction(NS, "Deposit")
                .field(FieldDef::relationship("account", NS, "Account"))
                .field(FieldDef::integer("amount")),
            TypeDefinition::transaction(NS, "Record").field(FieldDef::integer("amount")),
            TypeDefinition::transaction(NS, "Slow"),
            TypeDefinition::event(NS, "Moved")
                .field(FieldDef::relationship("account", NS, "Account"))
                .field(FieldDef::integer("delta")),
        ])
        .unwrap();
    model
}

fn adjust(
    ctx: &mut tally_engine::TransactionContext,
    account: &tally_engine::Relationship,
    delta: i64,
) -> TallyResult<()> {
    let mut resource = ctx.resolve(account)?;
    let balance = resource.require_integer("balance")? + delta;
    if balance < 0 {
        return Err(TallyError::domain(format!(
            "insufficient funds in {}",
            account.identifier()
        )));
    }
    resource.set("balance", balance);
    ctx.update(resource)?;
    let moved = ctx
        .factory()
        .new_event(NS, "Moved")?
        .with("account", account.clone())
        .with("delta", delta);
    ctx.emit(moved)
}

fn network() -> BusinessNetwork {
    BusinessNetwork::new("bank", model())
        .with_logic(FqName::new(NS, "Transfer"), |tx, ctx| {
            let amount = tx.require_integer("amount")?;
            // Credit first so a failed debit has something to discard
            adjust(ctx, tx.require_relationship("to")?, amount)?;
            adjust(ctx, tx.require_relationship("from")?, -amount)
        })
        .with_logic(FqName::new(NS, "Deposit"), |tx, ctx| {
            adjust(ctx, tx.require_relationship("account")?, tx.require_integer("amount")?)
        })
        .with_logic(FqName::new(NS, "Record"), |tx, ctx| {
            let line = ctx
                .factory()
                .new_resource(NS, "Ledgerline", tx.transaction_id())?
                .with("amount", tx.require_integer("amount")?);
            ctx.add(line)
        })
        .with_logic(FqName::new(NS, "Slow"), |_, ctx| {
            ctx.get_all(&account_type())?;
            thread::sleep(Duration::from_millis(200));
            Ok(())
        })
}

fn deploy(config: LedgerConfig) -> Ledger {
    init_tracing();
    let ledger = Ledger::deploy(network(), config).unwrap();
    let factory = ledger.factory();
    let alice = factory.new_resource(NS, "Customer", "alice").unwrap().with("name", "Alice");
    let holder = alice.to_relationship();
    ledger.participant_registry(NS, "Customer").unwrap().add(alice).unwrap();
    let accounts = ["A", "B", "C"]
        .iter()
        .map(|id| {
            factory
                .new_resource(NS, "Account", id)
                .unwrap()
                .with("balance", 100)
                .with("holder", holder.clone())
        })
        .collect();
    ledger.asset_registry(NS, "Account").unwrap().add_all(accounts).unwrap();
    ledger
}

fn account(ledger: &Ledger, id: &str) -> tally_engine::Relationship {
    ledger.factory().new_relationship(NS, "Account", id).unwrap()
}

fn transfer(ledger: &Ledger, from: &str, to: &str, amount: i64) -> Transaction {
    ledger
        .factory()
        .new_transaction(NS, "Transfer")
        .unwrap()
        .with("from", account(ledger, from))
        .with("to", account(ledger, to))
        .with("amount", amount)
}

fn deposit(ledger: &Ledger, to: &str, amount: i64) -> Transaction {
    ledger
        .factory()
        .new_transaction(NS, "Deposit")
        .unwrap()
        .with("account", account(ledger, to))
        .with("amount", amount)
}

fn balance(ledger: &Ledger, id: &str) -> i64 {
    ledger
        .asset_registry(NS, "Account")
        .unwrap()
        .get(id)
        .unwrap()
        .require_integer("balance")
        .unwrap()
}

// ============================================================================
// Rollback
// ============================================================================

mod rollback {
    use super::*;

    #[test]
    fn test_failed_transaction_leaves_state_and_delivers_nothing() {
        let ledger = deploy(LedgerConfig::default());
        let delivered = Arc::new(AtomicU64::new(0));
        let d = Arc::clone(&delivered);
        ledger.on_any(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let registry = ledger.asset_registry(NS, "Account").unwrap();
        let before = registry.get_all();
        let version_before = registry.version();

        // The credit to B is buffered, then the debit from A fails
        let err = ledger
            .submit_transaction(&transfer(&ledger, "A", "B", 500), "alice")
            .unwrap_err();
        assert!(matches!(err, TallyError::DomainLogic { .. }));

        ledger.flush_events();
        assert_eq!(registry.get_all(), before);
        assert_eq!(registry.version(), version_before);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.metrics().total_rolled_back, 1);
    }

    #[test]
    fn test_routine_errors_keep_their_type() {
        let ledger = deploy(LedgerConfig::default());

        // Lookup failure inside the routine
        let err = ledger
            .submit_transaction(&transfer(&ledger, "A", "Z", 10), "alice")
            .unwrap_err();
        assert!(err.is_not_found());

        // Duplicate add inside the routine
        let record = ledger
            .factory()
            .new_transaction(NS, "Record")
            .unwrap()
            .with("amount", 1);
        ledger.submit_transaction(&record, "alice").unwrap();
        assert!(matches!(
            ledger.submit_transaction(&record, "alice").unwrap_err(),
            TallyError::DuplicateIdentifier { .. }
        ));

        // The routine's own failure
        assert!(matches!(
            ledger
                .submit_transaction(&deposit(&ledger, "A", -1000), "alice")
                .unwrap_err(),
            TallyError::DomainLogic { .. }
        ));

        assert_eq!(balance(&ledger, "A"), 100);
        assert_eq!(ledger.metrics().total_rolled_back, 3);
    }

    #[test]
    fn test_successful_transfer_commits_both_sides() {
        let ledger = deploy(LedgerConfig::default());
        let receipt = ledger
            .submit_transaction(&transfer(&ledger, "A", "B", 30), "alice")
            .unwrap();
        assert_eq!(balance(&ledger, "A"), 70);
        assert_eq!(balance(&ledger, "B"), 130);

        let event_ids: Vec<&str> = receipt.events.iter().map(|e| e.event_id()).collect();
        let txn = receipt.transaction_id.as_str();
        assert_eq!(event_ids, vec![format!("{}#0", txn), format!("{}#1", txn)]);
        assert_eq!(receipt.registries, vec![tally_engine::RegistryKey::asset(NS, "Account")]);
    }

    #[test]
    fn test_unknown_transaction_type_rejected() {
        let ledger = deploy(LedgerConfig::default());
        ledger
            .define_type(TypeDefinition::transaction(NS, "Close"))
            .unwrap();
        let close = ledger.factory().new_transaction(NS, "Close").unwrap();
        assert!(matches!(
            ledger.submit_transaction(&close, "alice").unwrap_err(),
            TallyError::NoLogicBound { .. }
        ));

        // Binding logic later makes it executable
        ledger
            .bind(FqName::new(NS, "Close"), |_, _| Ok(()))
            .unwrap();
        ledger.submit_transaction(&close, "alice").unwrap();
    }
}

// ============================================================================
// Concurrency
// ============================================================================

mod concurrency {
    use super::*;

    #[test]
    fn test_concurrent_deposits_lose_no_updates() {
        let ledger = Arc::new(deploy(
            LedgerConfig::default().with_lock_wait_ms(5000).with_max_retries(10),
        ));
        let threads = 8;
        let per_thread = 25;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..per_thread {
                        ledger
                            .submit_transaction(&deposit(&ledger, "C", 1), "teller")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(balance(&ledger, "C"), 100 + (threads * per_thread) as i64);
        let metrics = ledger.metrics();
        assert_eq!(metrics.total_committed, (threads * per_thread) as u64);
        assert_eq!(metrics.active_count, 0);
    }

    #[test]
    fn test_disjoint_transactions_run_in_parallel() {
        let ledger = Arc::new(deploy(LedgerConfig::default()));
        let barrier = Arc::new(Barrier::new(2));

        // Slow holds the Account registry; Record only touches Ledgerline
        let slow_ledger = Arc::clone(&ledger);
        let slow_barrier = Arc::clone(&barrier);
        let slow = thread::spawn(move || {
            let tx = slow_ledger.factory().new_transaction(NS, "Slow").unwrap();
            slow_barrier.wait();
            slow_ledger.submit_transaction(&tx, "a").unwrap();
        });

        barrier.wait();
        thread::sleep(Duration::from_millis(5));
        let start = Instant::now();
        let record = ledger
            .factory()
            .new_transaction(NS, "Record")
            .unwrap()
            .with("amount", 1);
        ledger.submit_transaction(&record, "b").unwrap();
        let elapsed = start.elapsed();
        slow.join().unwrap();

        assert!(
            elapsed < Duration::from_millis(150),
            "disjoint transaction waited {:?}",
            elapsed
        );
    }

    #[test]
    fn test_overlapping_transaction_conflicts_when_wait_exhausted() {
        let ledger = Arc::new(deploy(
            LedgerConfig::default().with_lock_wait_ms(5).with_max_retries(1),
        ));
        let barrier = Arc::new(Barrier::new(2));

        let slow_ledger = Arc::clone(&ledger);
        let slow_barrier = Arc::clone(&barrier);
        let slow = thread::spawn(move || {
            let tx = slow_ledger.factory().new_transaction(NS, "Slow").unwrap();
            slow_barrier.wait();
            slow_ledger.submit_transaction(&tx, "a").unwrap();
        });

        barrier.wait();
        thread::sleep(Duration::from_millis(10));
        let err = ledger
            .submit_transaction(&deposit(&ledger, "A", 1), "b")
            .unwrap_err();
        slow.join().unwrap();

        assert!(err.is_conflict());
        assert_eq!(balance(&ledger, "A"), 100);
        assert_eq!(ledger.metrics().total_retries, 1);
    }

    #[test]
    fn test_queries_never_see_half_a_transfer() {
        let ledger = Arc::new(deploy(LedgerConfig::default().with_max_retries(50)));
        ledger
            .define_query(tally_engine::QueryDefinition::new("accounts", "all accounts", account_type()))
            .unwrap();

        let writer_ledger = Arc::clone(&ledger);
        let writer = thread::spawn(move || {
            for i in 0..100 {
                let (from, to) = if i % 2 == 0 { ("A", "B") } else { ("B", "A") };
                writer_ledger
                    .submit_transaction(&transfer(&writer_ledger, from, to, 7), "w")
                    .unwrap();
            }
        });

        for _ in 0..200 {
            let accounts = ledger.query("accounts", &Default::default()).unwrap();
            let total: i64 = accounts
                .iter()
                .map(|a| a.require_integer("balance").unwrap())
                .sum();
            assert_eq!(total, 300);
        }
        writer.join().unwrap();
    }
}

// ============================================================================
// Timeouts
// ============================================================================

mod timeouts {
    use super::*;

    #[test]
    fn test_overrunning_logic_is_rolled_back() {
        let ledger = deploy(LedgerConfig::default().with_execution_timeout_ms(10));
        ledger
            .bind(FqName::new(NS, "Deposit"), |tx, ctx| {
                let target = tx.require_relationship("account")?.clone();
                adjust(ctx, &target, 1)?;
                thread::sleep(Duration::from_millis(30));
                Ok(())
            })
            .unwrap();

        let err = ledger
            .submit_transaction(&deposit(&ledger, "A", 1), "alice")
            .unwrap_err();
        assert!(matches!(err, TallyError::ExecutionTimeout { timeout_ms: 10, .. }));
        assert_eq!(balance(&ledger, "A"), 100);
    }

    #[test]
    fn test_fast_logic_within_budget_commits() {
        let ledger = deploy(LedgerConfig::default().with_execution_timeout_ms(5000));
        ledger
            .submit_transaction(&deposit(&ledger, "A", 5), "alice")
            .unwrap();
        assert_eq!(balance(&ledger, "A"), 105);
    }
}

// ============================================================================
// Events
// ============================================================================

mod events {
    use super::*;

    #[test]
    fn test_delivery_follows_emission_and_commit_order() {
        let ledger = deploy(LedgerConfig::default().with_max_retries(50));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        ledger.on(FqName::new(NS, "Moved"), move |event| {
            let delta = event.require_integer("delta")?;
            s.lock().push((event.event_id().to_string(), delta));
            Ok(())
        });

        let mut expected = Vec::new();
        for i in 0..10 {
            let receipt = ledger
                .submit_transaction(&transfer(&ledger, "A", "B", i), "alice")
                .unwrap();
            expected.push((format!("{}#0", receipt.transaction_id), i));
            expected.push((format!("{}#1", receipt.transaction_id), -i));
        }

        ledger.flush_events();
        assert_eq!(*seen.lock(), expected);
    }

    #[test]
    fn test_failing_handler_does_not_affect_state_or_other_handlers() {
        let ledger = deploy(LedgerConfig::default());
        ledger.on_any(|_| Err(TallyError::domain("listener offline")));
        ledger.on_any(|_| panic!("listener crashed"));
        let reached = Arc::new(AtomicU64::new(0));
        let r = Arc::clone(&reached);
        let subscription = ledger.on_any(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        ledger
            .submit_transaction(&deposit(&ledger, "A", 10), "alice")
            .unwrap();
        ledger.flush_events();
        assert_eq!(balance(&ledger, "A"), 110);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.event_stats().handler_failures, 2);

        assert!(ledger.off(subscription));
        ledger
            .submit_transaction(&deposit(&ledger, "A", 10), "alice")
            .unwrap();
        ledger.flush_events();
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_delivers_pending_events() {
        let ledger = deploy(LedgerConfig::default());
        let delivered = Arc::new(AtomicU64::new(0));
        let d = Arc::clone(&delivered);
        ledger.on_any(move |_| {
            thread::sleep(Duration::from_millis(1));
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        for _ in 0..5 {
            ledger
                .submit_transaction(&deposit(&ledger, "B", 1), "alice")
                .unwrap();
        }
        ledger.shutdown();
        assert_eq!(delivered.load(Ordering::SeqCst), 5);
    }
}

mod reentrant_events {
    use super::*;

    #[test]
    fn test_handler_submitting_transaction_keeps_delivery_going() {
        let ledger = Arc::new(deploy(LedgerConfig::default().with_event_channel_capacity(1)));
        ledger
            .define_type(TypeDefinition::event(NS, "Noted").field(FieldDef::integer("amount")))
            .unwrap();
        ledger
            .define_type(
                TypeDefinition::transaction(NS, "Audit").field(FieldDef::integer("amount")),
            )
            .unwrap();
        ledger
            .bind(FqName::new(NS, "Audit"), |tx, ctx| {
                let amount = tx.require_integer("amount")?;
                let line = ctx
                    .factory()
                    .new_resource(NS, "Ledgerline", tx.transaction_id())?
                    .with("amount", amount);
                ctx.add(line)?;
                for _ in 0..2 {
                    let noted = ctx.factory().new_event(NS, "Noted")?.with("amount", amount);
                    ctx.emit(noted)?;
                }
                Ok(())
            })
            .unwrap();

        // Each Moved event triggers an Audit on the unrelated Ledgerline registry
        let weak = Arc::downgrade(&ledger);
        ledger.on(FqName::new(NS, "Moved"), move |event| {
            let Some(ledger) = weak.upgrade() else {
                return Ok(());
            };
            let audit = ledger
                .factory()
                .new_transaction(NS, "Audit")?
                .with("amount", event.require_integer("delta")?);
            ledger.submit_transaction(&audit, "auditor").map(|_| ())
        });
        let noted = Arc::new(AtomicU64::new(0));
        let n = Arc::clone(&noted);
        ledger.on(FqName::new(NS, "Noted"), move |_| {
            n.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        ledger
            .submit_transaction(&transfer(&ledger, "A", "B", 5), "alice")
            .unwrap();
        ledger.flush_events();

        assert_eq!(noted.load(Ordering::SeqCst), 4);
        assert_eq!(ledger.asset_registry(NS, "Ledgerline").unwrap().len(), 2);
        assert_eq!(ledger.event_stats().handler_failures, 0);
        assert_eq!(ledger.event_stats().queued, 0);
        ledger.shutdown();
    }
}

// ============================================================================
// Queries
// ============================================================================

mod queries {
    use super::*;
    use tally_engine::{QueryDefinition, SortOrder};

    #[test]
    fn test_ordering_by_double_with_nan_rows() {
        let ledger = deploy(LedgerConfig::default());
        ledger
            .define_type(
                TypeDefinition::asset(NS, "Gauge", "gaugeId").field(FieldDef::double("reading")),
            )
            .unwrap();
        ledger
            .define_query(
                QueryDefinition::new("byReading", "gauges by reading", FqName::new(NS, "Gauge"))
                    .order_by("reading", SortOrder::Ascending),
            )
            .unwrap();

        let factory = ledger.factory();
        let gauges = (0..40)
            .map(|i| {
                let reading = if i % 3 == 0 { f64::NAN } else { (40 - i) as f64 };
                factory
                    .new_resource(NS, "Gauge", &format!("G{:02}", i))
                    .unwrap()
                    .with("reading", reading)
            })
            .collect();
        ledger.asset_registry(NS, "Gauge").unwrap().add_all(gauges).unwrap();

        let result = ledger.query("byReading", &Default::default()).unwrap();
        assert_eq!(result.len(), 40);
        let readings: Vec<f64> = result
            .iter()
            .map(|g| g.require_double("reading").unwrap())
            .collect();
        let (numbers, nans) = readings.split_at(26);
        assert!(numbers.windows(2).all(|w| w[0] < w[1]));
        assert!(nans.iter().all(|r| r.is_nan()));

        // NaN rows tie, so identifier order decides among them
        let nan_ids: Vec<&str> = result[26..].iter().map(|g| g.identifier()).collect();
        let mut sorted = nan_ids.clone();
        sorted.sort();
        assert_eq!(nan_ids, sorted);
    }
}

// ============================================================================
// Configuration
// ============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_ledger_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "execution_timeout_ms = 250\nlock_wait_ms = 50\nmax_retries = 0\nevent_channel_capacity = 8\n",
        )
        .unwrap();

        let config = LedgerConfig::from_file(&path).unwrap();
        assert_eq!(config.execution_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.retry().max_retries, 0);

        let ledger = deploy(config);
        assert_eq!(ledger.config().event_channel_capacity, 8);
        ledger
            .submit_transaction(&deposit(&ledger, "A", 1), "alice")
            .unwrap();
    }

    #[test]
    fn test_invalid_config_refuses_deploy() {
        let config = LedgerConfig {
            event_channel_capacity: 0,
            ..LedgerConfig::default()
        };
        assert!(matches!(
            Ledger::deploy(network(), config).unwrap_err(),
            TallyError::Config { .. }
        ));
    }
}

// ============================================================================
// Typed resources
// ============================================================================

mod typed {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Account {
        account_id: String,
        balance: i64,
        holder: String,
    }

    impl ResourceType for Account {
        const NAMESPACE: &'static str = NS;
        const NAME: &'static str = "Account";
        const KIND: ResourceKind = ResourceKind::Asset;
        const IDENTIFIER_FIELD: &'static str = "accountId";

        fn identifier(&self) -> &str {
            &self.account_id
        }

        fn write_fields(&self, resource: &mut Resource) {
            resource.set("balance", self.balance);
            resource.set(
                "holder",
                tally_engine::Relationship::new(FqName::new(NS, "Customer"), self.holder.clone()),
            );
        }

        fn read_fields(resource: &Resource) -> TallyResult<Self> {
            Ok(Account {
                account_id: resource.identifier().to_string(),
                balance: resource.require_integer("balance")?,
                holder: resource.require_relationship("holder")?.identifier().to_string(),
            })
        }
    }

    #[test]
    fn test_typed_round_trip_through_transaction() {
        let ledger = deploy(LedgerConfig::default());
        let typed = Account {
            account_id: "T".to_string(),
            balance: 42,
            holder: "alice".to_string(),
        };
        ledger
            .asset_registry(NS, "Account")
            .unwrap()
            .add(typed.to_resource())
            .unwrap();

        let loaded = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&loaded);
        ledger
            .bind(FqName::new(NS, "Slow"), move |_, ctx| {
                *sink.lock() = Some(ctx.load::<Account>("T")?);
                Ok(())
            })
            .unwrap();
        let slow = ledger.factory().new_transaction(NS, "Slow").unwrap();
        ledger.submit_transaction(&slow, "alice").unwrap();

        assert_eq!(loaded.lock().clone(), Some(typed));
        assert_eq!(
            ledger.asset_registry(NS, "Account").unwrap().get("T").unwrap().get("balance"),
            Some(&Value::Integer(42))
        );
    }
}
