//! Transaction Service Demo
//!
//! A toy transaction store guarded by txguard:
//! 1. Per-account rate limiting on creation
//! 2. A circuit breaker around a flaky ledger write
//! 3. Cached lookups with null protection and versioned updates
//!
//! Run with `cargo run --example transaction_service`; set `RUST_LOG=txguard=debug`
//! to see every admission decision.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use txguard::cache::CacheConfig;
use txguard::{
    BreakerRule, CallContext, CircuitBreakerConfig, CircuitBreakers, Guard, GuardPolicy,
    RateLimitRule, RateLimiter, ResilientCache, SignalsSnapshot,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Transaction {
    id: String,
    account: String,
    amount_cents: i64,
    version: u64,
}

#[derive(Debug, thiserror::Error)]
enum ServiceError {
    #[error(transparent)]
    Guard(#[from] txguard::Error),
    #[error("ledger unavailable")]
    LedgerDown,
}

struct TransactionService {
    store: DashMap<String, Transaction>,
    cache: ResilientCache<Transaction>,
    guard: Guard,
    create_policy: GuardPolicy,
    ledger_calls: AtomicU32,
}

impl TransactionService {
    fn new(guard: Guard) -> Self {
        Self {
            store: DashMap::new(),
            cache: ResilientCache::new(CacheConfig::default()),
            guard,
            create_policy: GuardPolicy::new()
                .with_rate_limit(RateLimitRule::new(3, 60).per_subject())
                .with_breaker(BreakerRule::new("createTransaction")),
            ledger_calls: AtomicU32::new(0),
        }
    }

    async fn create(&self, account: &str, amount_cents: i64) -> Result<Transaction, ServiceError> {
        let ctx = CallContext::new("createTransaction").with_subject(account);
        self.guard
            .call_async(&ctx, &self.create_policy, || async move {
                // Every fourth ledger write fails.
                if self.ledger_calls.fetch_add(1, Ordering::Relaxed) % 4 == 3 {
                    return Err(ServiceError::LedgerDown);
                }
                let txn = Transaction {
                    id: Uuid::new_v4().to_string(),
                    account: account.to_string(),
                    amount_cents,
                    version: 1,
                };
                self.store.insert(txn.id.clone(), txn.clone());
                self.cache
                    .atomic_update_with_version("transactions", &txn.id, txn.clone(), txn.version)?;
                Ok(txn)
            })
            .await
    }

    fn find(&self, id: &str) -> Result<Option<Transaction>, ServiceError> {
        self.cache.get_or_load("transactions", id, || {
            Ok(self.store.get(id).map(|t| t.value().clone()))
        })
    }

    fn adjust(&self, id: &str, delta_cents: i64) -> Result<bool, ServiceError> {
        let Some(mut txn) = self.store.get(id).map(|t| t.value().clone()) else {
            return Ok(false);
        };
        txn.amount_cents += delta_cents;
        txn.version += 1;
        self.store.insert(id.to_string(), txn.clone());
        let version = txn.version;
        Ok(self
            .cache
            .atomic_update_with_version("transactions", id, txn, version)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let limiter = Arc::new(RateLimiter::new());
    let breakers = Arc::new(CircuitBreakers::new(
        CircuitBreakerConfig::new().with_minimum_calls(4),
    ));
    let service = TransactionService::new(Guard::new(limiter.clone(), breakers.clone()));

    println!("== creating transactions ==");
    let mut created = Vec::new();
    for account in ["acct-1", "acct-2"] {
        for i in 0..5 {
            match service.create(account, 1_000 * (i + 1)).await {
                Ok(txn) => {
                    println!("{account}: created {} ({} cents)", txn.id, txn.amount_cents);
                    created.push(txn);
                }
                Err(e) => println!("{account}: {e}"),
            }
        }
    }

    println!("\n== lookups ==");
    if let Some(first) = created.first() {
        let found = service.find(&first.id)?;
        println!("found {:?}", found.map(|t| (t.account, t.amount_cents)));
        println!("adjusted: {}", service.adjust(&first.id, 250)?);
    }
    let missing = Uuid::new_v4().to_string();
    for _ in 0..3 {
        println!("missing lookup -> {:?}", service.find(&missing)?.map(|t| t.id));
    }
    println!("{}", service.cache.cache_stats("transactions"));

    println!("\n== signals ==");
    let snapshot = SignalsSnapshot::collect(&limiter, &breakers, &service.cache);
    println!("{}", snapshot.to_json()?);
    Ok(())
}
