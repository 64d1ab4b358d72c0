use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::keys::SignedTransaction;
use crate::ledger::Address;

use super::{Chain, Receipt, Transaction, TxError};

pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    seconds: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(seconds: u64) -> Self {
        Self {
            seconds: Arc::new(AtomicU64::new(seconds)),
        }
    }

    pub fn set(&self, seconds: u64) {
        self.seconds.store(seconds, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) -> u64 {
        self.seconds.fetch_add(seconds, Ordering::SeqCst) + seconds
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.seconds.load(Ordering::SeqCst)
    }
}

pub struct SharedChain<C: Clock = SystemClock> {
    inner: Arc<Mutex<Chain>>,
    clock: Arc<C>,
}

impl<C: Clock> Clone for SharedChain<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> SharedChain<C> {
    pub fn new(chain: Chain, clock: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(chain)),
            clock: Arc::new(clock),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Timestamps the transaction with the clock reading taken under the lock.
    pub fn submit(&self, signed: &SignedTransaction) -> Result<Receipt, TxError> {
        let mut chain = self.lock();
        let now = self.clock.now();
        chain.submit(signed, now)
    }

    pub fn execute(&self, sender: Address, tx: Transaction) -> Result<Receipt, TxError> {
        let mut chain = self.lock();
        let now = self.clock.now();
        chain.execute(sender, tx, now)
    }

    pub fn read<T>(&self, f: impl FnOnce(&Chain) -> T) -> T {
        f(&self.lock())
    }

    /// Poisoned locks are reused: state is only written after every check passed.
    pub fn lock(&self) -> MutexGuard<'_, Chain> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Chain {
        self.lock().clone()
    }
}
