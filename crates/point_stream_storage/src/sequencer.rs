//! A FIFO barrier for side effects of asynchronous work.
//!
//! Every call to `OrderingSequencer::get_sequencer` reserves the next slot. Running a unit of work through a slot lets the
//! work itself proceed concurrently with other slots, but the effect applied to its output waits until the effect of the
//! previous slot has been applied. Effects are therefore observed in the order the slots were reserved, no matter which
//! work finishes first.
//!
//! A slot that is dropped without running is skipped: its successor still waits for every earlier slot.

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;

/// Completes once a slot and all slots before it have applied their effects (or were dropped).
type Released = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
pub struct OrderingSequencer {
    next_slot: u64,
    tail: Option<Released>,
}

impl fmt::Debug for OrderingSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderingSequencer")
            .field("next_slot", &self.next_slot)
            .finish()
    }
}

impl OrderingSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next slot in the order.
    pub fn get_sequencer(&mut self) -> SequencerSlot {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = self.tail.take();

        let chain = previous.clone();
        let released = async move {
            if let Some(chain) = chain {
                chain.await;
            }
            // Cancellation means this slot was dropped, which releases its successor all the same.
            let _ = done_rx.await;
        }
        .boxed()
        .shared();
        self.tail = Some(released);

        let index = self.next_slot;
        self.next_slot += 1;

        SequencerSlot {
            index,
            previous,
            done: done_tx,
        }
    }

    /// The number of slots reserved so far.
    pub fn num_reserved(&self) -> u64 {
        self.next_slot
    }
}

/// One reserved position in an `OrderingSequencer`.
pub struct SequencerSlot {
    index: u64,
    previous: Option<Released>,
    done: oneshot::Sender<()>,
}

impl fmt::Debug for SequencerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequencerSlot")
            .field("index", &self.index)
            .finish()
    }
}

impl SequencerSlot {
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Awaits `work`, then waits until every earlier slot is released, then applies `effect` to the output of `work`.
    pub async fn run<W, T, R>(self, work: W, effect: impl FnOnce(T) -> R) -> R
    where
        W: Future<Output = T>,
    {
        let Self {
            previous, done, ..
        } = self;

        let output = work.await;
        if let Some(previous) = previous {
            previous.await;
        }
        let result = effect(output);
        let _ = done.send(());

        result
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod test {
    use super::*;

    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn effects_follow_reservation_order_not_completion_order() {
        let mut sequencer = OrderingSequencer::new();
        let mut pool = LocalPool::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut gates = Vec::new();
        for i in 0..4u32 {
            let slot = sequencer.get_sequencer();
            let (gate_tx, gate_rx) = oneshot::channel::<u32>();
            gates.push(gate_tx);
            let log = log.clone();
            pool.spawner()
                .spawn_local(async move {
                    slot.run(gate_rx, move |value| log.lock().push((i, value.unwrap())))
                        .await;
                })
                .unwrap();
        }

        // Finish the work in reverse order.
        let mut gates: Vec<_> = gates.into_iter().enumerate().collect();
        gates.reverse();
        for (i, gate) in gates {
            gate.send(10 * i as u32).unwrap();
            pool.run_until_stalled();
            if i > 0 {
                assert!(log.lock().is_empty(), "slot {} applied out of order", i);
            }
        }

        assert_eq!(*log.lock(), vec![(0, 0), (1, 10), (2, 20), (3, 30)]);
    }

    #[test]
    fn b_is_never_observed_before_a() {
        let mut sequencer = OrderingSequencer::new();
        let mut pool = LocalPool::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = sequencer.get_sequencer();
        let b = sequencer.get_sequencer();
        let (a_tx, a_rx) = oneshot::channel::<()>();

        let log_b = log.clone();
        pool.spawner()
            .spawn_local(async move {
                b.run(async {}, move |_| log_b.lock().push("B")).await;
            })
            .unwrap();
        pool.run_until_stalled();
        assert!(log.lock().is_empty());

        let log_a = log.clone();
        pool.spawner()
            .spawn_local(async move {
                a.run(a_rx, move |_| log_a.lock().push("A")).await;
            })
            .unwrap();
        a_tx.send(()).unwrap();
        pool.run_until_stalled();

        assert_eq!(*log.lock(), vec!["A", "B"]);
    }

    #[test]
    fn dropped_middle_slot_keeps_order() {
        let mut sequencer = OrderingSequencer::new();
        let mut pool = LocalPool::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = sequencer.get_sequencer();
        let b = sequencer.get_sequencer();
        let c = sequencer.get_sequencer();
        let (a_tx, a_rx) = oneshot::channel::<()>();

        let log_a = log.clone();
        pool.spawner()
            .spawn_local(async move {
                a.run(a_rx, move |_| log_a.lock().push("A")).await;
            })
            .unwrap();
        let log_c = log.clone();
        pool.spawner()
            .spawn_local(async move {
                c.run(async {}, move |_| log_c.lock().push("C")).await;
            })
            .unwrap();

        drop(b);
        pool.run_until_stalled();
        assert!(log.lock().is_empty());

        a_tx.send(()).unwrap();
        pool.run_until_stalled();

        assert_eq!(*log.lock(), vec!["A", "C"]);
    }

    #[test]
    fn dropped_slot_releases_successor() {
        let mut sequencer = OrderingSequencer::new();
        let mut pool = LocalPool::new();
        let applied = Arc::new(Mutex::new(false));

        let dropped = sequencer.get_sequencer();
        let next = sequencer.get_sequencer();
        assert_eq!((dropped.index(), next.index()), (0, 1));
        assert_eq!(sequencer.num_reserved(), 2);

        let applied_clone = applied.clone();
        pool.spawner()
            .spawn_local(async move {
                next.run(async {}, move |_| *applied_clone.lock() = true)
                    .await;
            })
            .unwrap();
        pool.run_until_stalled();
        assert!(!*applied.lock());

        drop(dropped);
        pool.run_until_stalled();
        assert!(*applied.lock());
    }
}
