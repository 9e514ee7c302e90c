//! A bounded, per-origin set of agents: queues acquirers in FIFO order,
//! evicts agents idle past the configured timeout, and forwards
//! cancellation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Instant;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::agent::Agent;
use crate::config::{IdleTimeout, PoolConfig};
use crate::connect::Connector;
use crate::error::{Error, Kind, Result};
use crate::origin::Origin;

enum WaitOutcome {
    Agent(Arc<Agent>),
    Closed,
}

struct IdleEntry {
    agent: Arc<Agent>,
    since: Instant,
}

struct Inner {
    idle: VecDeque<IdleEntry>,
    waiters: VecDeque<oneshot::Sender<WaitOutcome>>,
    all: Vec<Weak<Agent>>,
    live: usize,
    closed: bool,
}

/// Per-origin bounded agent pool. The pool binds each agent's `when_idle`
/// signal to `release`, so it observes an agent's return-to-idle without
/// the agent knowing about the pool.
pub struct Pool {
    origin: Origin,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    inner: StdMutex<Inner>,
    evictor: CancellationToken,
}

impl Pool {
    pub fn new(origin: Origin, connector: Arc<dyn Connector>, config: PoolConfig) -> Arc<Pool> {
        let pool = Arc::new(Pool {
            origin,
            connector,
            config,
            inner: StdMutex::new(Inner {
                idle: VecDeque::new(),
                waiters: VecDeque::new(),
                all: Vec::new(),
                live: 0,
                closed: false,
            }),
            evictor: CancellationToken::new(),
        });

        if let Some(period) = pool.config.eviction_interval() {
            let weak = Arc::downgrade(&pool);
            let cancel = pool.evictor.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await; // first tick fires immediately
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match weak.upgrade() {
                                Some(pool) => pool.evict_idle(),
                                None => break,
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            });
        }

        pool
    }

    fn max_per_host(&self) -> usize {
        self.config.max_per_host().unwrap_or(usize::MAX)
    }

    fn evict_idle(&self) {
        let timeout = match self.config.idle_timeout() {
            IdleTimeout::Disabled => return,
            IdleTimeout::Enabled(d) => d,
        };
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.idle.len();
        inner.idle.retain(|entry| entry.since.elapsed() < timeout);
        let evicted = before - inner.idle.len();
        if evicted > 0 {
            debug!(origin = %self.origin, evicted, "evicted idle agents");
        }
        inner.live = inner.live.saturating_sub(evicted);
    }

    /// Returns an idle agent, creates one if under the concurrency limit, or
    /// waits in FIFO order for a release. `cancel`, if present, aborts the
    /// wait (not any already-acquired agent).
    pub async fn acquire(&self, cancel: Option<&CancellationToken>) -> Result<Arc<Agent>> {
        let (tx, rx) = oneshot::channel();
        let immediate = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed {
                return Err(Error::new(Kind::PoolClosed));
            }
            if let Some(entry) = inner.idle.pop_front() {
                Some(entry.agent)
            } else if inner.live < self.max_per_host() {
                let agent = Agent::new(self.origin.clone(), self.connector.clone());
                inner.live += 1;
                inner.all.push(Arc::downgrade(&agent));
                debug!(origin = %self.origin, live = inner.live, "created agent");
                Some(agent)
            } else {
                trace!(origin = %self.origin, waiters = inner.waiters.len() + 1, "queueing acquire");
                inner.waiters.push_back(tx);
                None
            }
        };
        if let Some(agent) = immediate {
            return Ok(agent);
        }

        let outcome = match cancel {
            Some(token) => tokio::select! {
                r = rx => r.unwrap_or(WaitOutcome::Closed),
                _ = token.cancelled() => WaitOutcome::Closed,
            },
            None => rx.await.unwrap_or(WaitOutcome::Closed),
        };
        match outcome {
            WaitOutcome::Agent(agent) => Ok(agent),
            WaitOutcome::Closed => Err(Error::new(Kind::Aborted)),
        }
    }

    /// Returns an agent to the pool. If a waiter is queued, the agent is
    /// handed to it directly without ever touching the idle set.
    pub fn release(&self, agent: Arc<Agent>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !agent.is_alive() {
            inner.live = inner.live.saturating_sub(1);
            return;
        }
        if inner.closed {
            inner.live = inner.live.saturating_sub(1);
            return;
        }

        let mut handoff = agent;
        while let Some(tx) = inner.waiters.pop_front() {
            match tx.send(WaitOutcome::Agent(handoff)) {
                Ok(()) => return,
                Err(WaitOutcome::Agent(returned)) => handoff = returned,
                Err(WaitOutcome::Closed) => unreachable!("pool never hands out Closed directly"),
            }
        }

        if inner.idle.len() >= self.config.max_idle_per_host() {
            inner.live = inner.live.saturating_sub(1);
            return;
        }
        inner.idle.push_back(IdleEntry {
            agent: handoff,
            since: Instant::now(),
        });
    }

    /// Force-closes every agent (aborting in-flight requests), drains
    /// queued waiters with [`Kind::PoolClosed`], and rejects further
    /// acquisitions. Idempotent.
    pub fn close(&self) {
        self.evictor.cancel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return;
        }
        debug!(origin = %self.origin, "closing pool");
        inner.closed = true;
        inner.idle.clear();
        for weak in inner.all.drain(..) {
            if let Some(agent) = weak.upgrade() {
                agent.abort();
            }
        }
        for tx in inner.waiters.drain(..) {
            let _ = tx.send(WaitOutcome::Closed);
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.evictor.cancel();
    }
}
