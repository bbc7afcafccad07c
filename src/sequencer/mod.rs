//! Per-instrument command sequencing.
//!
//! Every instrument gets one worker task that owns its [`OrderBookState`]
//! outright. Commands enter through an unbounded mpsc queue and are applied
//! strictly in arrival order, so matching for one instrument is serialized
//! without any locking inside the book, while different instruments run
//! fully in parallel.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{
    BookSnapshot, InstrumentId, MarketEvent, MatchResult, Order, OrderId, OrderStatus, Quantity,
};
use crate::engine::{BookSnapshotter, MatchingEngine, OrderBookState, DEFAULT_SNAPSHOT_DEPTH};
use crate::metrics::EngineMetrics;

/// Outcome of a cancel request. A cancel of an already-finished order is a
/// no-op, not an error; only ids this worker has never seen are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The order was resting and has been removed from the book.
    Cancelled { order: Order, released: Quantity },
    /// The order already reached FILLED or CANCELLED earlier.
    AlreadyTerminal {
        order_id: OrderId,
        status: OrderStatus,
    },
}

enum Command {
    Submit {
        order: Order,
        reply: oneshot::Sender<EngineResult<MatchResult>>,
    },
    Cancel {
        order_id: OrderId,
        reply: oneshot::Sender<EngineResult<CancelOutcome>>,
    },
    Snapshot {
        depth: usize,
        reply: oneshot::Sender<EngineResult<BookSnapshot>>,
    },
    RestingOrders {
        reply: oneshot::Sender<EngineResult<Vec<Order>>>,
    },
    Restore {
        orders: Vec<Order>,
        reply: oneshot::Sender<EngineResult<usize>>,
    },
}

const EVENT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Clone)]
struct WorkerHandle {
    tx: mpsc::UnboundedSender<Command>,
    latest_snapshot: Arc<RwLock<Option<BookSnapshot>>>,
    events: broadcast::Sender<MarketEvent>,
}

/// Routes commands to per-instrument workers, spawning them lazily on
/// first use.
pub struct InstrumentSequencer {
    workers: DashMap<InstrumentId, WorkerHandle>,
    snapshot_depth: usize,
    metrics: Arc<EngineMetrics>,
}

impl InstrumentSequencer {
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        Self::with_snapshot_depth(metrics, DEFAULT_SNAPSHOT_DEPTH)
    }

    pub fn with_snapshot_depth(metrics: Arc<EngineMetrics>, snapshot_depth: usize) -> Self {
        Self {
            workers: DashMap::new(),
            snapshot_depth,
            metrics,
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Instruments that have a running worker.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        self.workers.iter().map(|e| e.key().clone()).collect()
    }

    /// Submit an order for matching. Resolves once the instrument's worker
    /// has fully processed it.
    pub async fn submit(&self, order: Order) -> EngineResult<MatchResult> {
        let instrument_id = order.instrument_id.clone();
        let handle = self.worker_for(&instrument_id);
        let (reply, rx) = oneshot::channel();
        handle
            .tx
            .send(Command::Submit { order, reply })
            .map_err(|_| EngineError::WorkerGone(instrument_id.clone()))?;
        rx.await
            .map_err(|_| EngineError::WorkerGone(instrument_id))?
    }

    pub async fn cancel(
        &self,
        instrument_id: &InstrumentId,
        order_id: OrderId,
    ) -> EngineResult<CancelOutcome> {
        let handle = self.worker_for(instrument_id);
        let (reply, rx) = oneshot::channel();
        handle
            .tx
            .send(Command::Cancel { order_id, reply })
            .map_err(|_| EngineError::WorkerGone(instrument_id.clone()))?;
        rx.await
            .map_err(|_| EngineError::WorkerGone(instrument_id.clone()))?
    }

    /// Consistent snapshot, sequenced behind any in-flight commands.
    pub async fn snapshot(
        &self,
        instrument_id: &InstrumentId,
        depth: usize,
    ) -> EngineResult<BookSnapshot> {
        let handle = self.worker_for(instrument_id);
        let (reply, rx) = oneshot::channel();
        handle
            .tx
            .send(Command::Snapshot { depth, reply })
            .map_err(|_| EngineError::WorkerGone(instrument_id.clone()))?;
        rx.await
            .map_err(|_| EngineError::WorkerGone(instrument_id.clone()))?
    }

    /// Market-data feed for one instrument: one `TradeExecuted` per trade,
    /// `OrderCancelled` for cancellations, `BookUpdated` after every book
    /// mutation. At-least-once; slow consumers see `Lagged` and must
    /// resynchronize from a snapshot.
    pub fn subscribe(&self, instrument_id: &InstrumentId) -> broadcast::Receiver<MarketEvent> {
        self.worker_for(instrument_id).events.subscribe()
    }

    /// Last snapshot published by the worker, without queueing. May lag the
    /// book by in-flight commands; `None` until the first mutation.
    pub fn peek_snapshot(&self, instrument_id: &InstrumentId) -> Option<BookSnapshot> {
        self.workers
            .get(instrument_id)
            .and_then(|handle| handle.latest_snapshot.read().clone())
    }

    /// Every resting order on the instrument's book, in priority order.
    pub async fn resting_orders(&self, instrument_id: &InstrumentId) -> EngineResult<Vec<Order>> {
        let handle = self.worker_for(instrument_id);
        let (reply, rx) = oneshot::channel();
        handle
            .tx
            .send(Command::RestingOrders { reply })
            .map_err(|_| EngineError::WorkerGone(instrument_id.clone()))?;
        rx.await
            .map_err(|_| EngineError::WorkerGone(instrument_id.clone()))?
    }

    /// Replay previously-resting orders into a fresh book (startup
    /// recovery). Rejected once the book has any state.
    pub async fn restore(
        &self,
        instrument_id: &InstrumentId,
        orders: Vec<Order>,
    ) -> EngineResult<usize> {
        let handle = self.worker_for(instrument_id);
        let (reply, rx) = oneshot::channel();
        handle
            .tx
            .send(Command::Restore { orders, reply })
            .map_err(|_| EngineError::WorkerGone(instrument_id.clone()))?;
        rx.await
            .map_err(|_| EngineError::WorkerGone(instrument_id.clone()))?
    }

    fn worker_for(&self, instrument_id: &InstrumentId) -> WorkerHandle {
        self.workers
            .entry(instrument_id.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
                let latest_snapshot = Arc::new(RwLock::new(None));
                let worker = Worker {
                    book: OrderBookState::new(instrument_id.clone()),
                    finished: HashMap::new(),
                    halted: false,
                    snapshot_depth: self.snapshot_depth,
                    latest_snapshot: Arc::clone(&latest_snapshot),
                    events: events.clone(),
                    metrics: Arc::clone(&self.metrics),
                };
                info!(instrument = %instrument_id, "spawning instrument worker");
                tokio::spawn(worker.run(rx));
                WorkerHandle {
                    tx,
                    latest_snapshot,
                    events,
                }
            })
            .clone()
    }
}

struct Worker {
    book: OrderBookState,
    /// Terminal status of every order this worker has finished with, so a
    /// late cancel can be told apart from a cancel for an unknown id.
    finished: HashMap<OrderId, OrderStatus>,
    halted: bool,
    snapshot_depth: usize,
    latest_snapshot: Arc<RwLock<Option<BookSnapshot>>>,
    events: broadcast::Sender<MarketEvent>,
    metrics: Arc<EngineMetrics>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Submit { order, reply } => {
                    let _ = reply.send(self.handle_submit(order));
                }
                Command::Cancel { order_id, reply } => {
                    let _ = reply.send(self.handle_cancel(order_id));
                }
                Command::Snapshot { depth, reply } => {
                    let result = if self.halted {
                        Err(EngineError::Halted(self.book.instrument_id().to_string()))
                    } else {
                        Ok(BookSnapshotter::snapshot(&self.book, depth))
                    };
                    let _ = reply.send(result);
                }
                Command::RestingOrders { reply } => {
                    let result = if self.halted {
                        Err(EngineError::Halted(self.book.instrument_id().to_string()))
                    } else {
                        Ok(self.book.resting_orders())
                    };
                    let _ = reply.send(result);
                }
                Command::Restore { orders, reply } => {
                    let _ = reply.send(self.handle_restore(orders));
                }
            }
        }
        debug!(instrument = %self.book.instrument_id(), "instrument worker stopped");
    }

    fn handle_submit(&mut self, order: Order) -> EngineResult<MatchResult> {
        if self.halted {
            return Err(EngineError::Halted(self.book.instrument_id().to_string()));
        }

        let started = Instant::now();
        let result = MatchingEngine::execute(&mut self.book, order);
        match result {
            Ok(result) => {
                self.metrics.record_submit(started.elapsed());
                self.metrics.record_trades(&result.trades);

                if result.taker.is_terminal() {
                    self.finished
                        .insert(result.taker.id, result.taker.status);
                }
                for maker in &result.updated_makers {
                    if maker.is_terminal() {
                        self.finished.insert(maker.id, maker.status);
                    }
                }
                let snapshot = self.publish_snapshot();
                for event in MarketEvent::from_match(&result, snapshot) {
                    let _ = self.events.send(event);
                }
                Ok(result)
            }
            Err(EngineError::InvariantViolation(msg)) => {
                self.halt(&msg);
                Err(EngineError::InvariantViolation(msg))
            }
            Err(other) => Err(other),
        }
    }

    fn handle_cancel(&mut self, order_id: OrderId) -> EngineResult<CancelOutcome> {
        if self.halted {
            return Err(EngineError::Halted(self.book.instrument_id().to_string()));
        }

        if let Some(mut order) = self.book.remove_resting(&order_id) {
            let released = match order.cancel_remaining() {
                Ok(released) => released,
                Err(_) => {
                    // A terminal order was resting on the book.
                    self.halt("terminal order found resting during cancel");
                    return Err(EngineError::InvariantViolation(
                        "terminal order found resting during cancel".into(),
                    ));
                }
            };
            self.finished.insert(order.id, order.status);
            self.metrics.record_cancel();
            let snapshot = self.publish_snapshot();
            let _ = self.events.send(MarketEvent::OrderCancelled {
                order_id: order.id,
                investor_id: order.investor_id.clone(),
                instrument_id: order.instrument_id.clone(),
                remaining_quantity: released,
            });
            let _ = self.events.send(MarketEvent::BookUpdated { snapshot });
            debug!(
                instrument = %self.book.instrument_id(),
                order_id = %order_id,
                released,
                "order cancelled"
            );
            return Ok(CancelOutcome::Cancelled { order, released });
        }

        match self.finished.get(&order_id) {
            Some(&status) => Ok(CancelOutcome::AlreadyTerminal { order_id, status }),
            None => Err(EngineError::UnknownOrder(order_id)),
        }
    }

    fn handle_restore(&mut self, orders: Vec<Order>) -> EngineResult<usize> {
        if self.halted {
            return Err(EngineError::Halted(self.book.instrument_id().to_string()));
        }
        if !self.book.is_empty() || !self.finished.is_empty() {
            return Err(EngineError::InvariantViolation(
                "restore into non-empty book".into(),
            ));
        }

        let count = orders.len();
        if let Err(err) = self.book.restore(orders) {
            // Partial replay leaves the book in an undefined state.
            self.halt("restore replay failed");
            return Err(err);
        }
        let snapshot = self.publish_snapshot();
        let _ = self.events.send(MarketEvent::BookUpdated { snapshot });
        info!(
            instrument = %self.book.instrument_id(),
            orders = count,
            "book restored"
        );
        Ok(count)
    }

    fn publish_snapshot(&self) -> BookSnapshot {
        let snapshot = BookSnapshotter::snapshot(&self.book, self.snapshot_depth);
        self.metrics.record_book(&snapshot);
        *self.latest_snapshot.write() = Some(snapshot.clone());
        snapshot
    }

    fn halt(&mut self, reason: &str) {
        self.halted = true;
        error!(
            instrument = %self.book.instrument_id(),
            reason,
            "invariant violation, halting instrument"
        );
        warn!(
            instrument = %self.book.instrument_id(),
            "all further commands for this instrument will be rejected"
        );
    }
}
