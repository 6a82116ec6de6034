//! A settle-once container for the result of an asynchronous operation.
//!
//! A `DeferredResult` can be cloned freely, polled for its status without blocking, awaited as a `Future`, or given
//! continuations that run when it settles. The matching `Settler` moves it from pending to fulfilled or rejected exactly
//! once; a second settlement is a programming error, which is reported rather than silently ignored.
//!
//! ```
//! use point_stream_storage::deferred::{deferred, DeferredStatus};
//!
//! let (settler, result) = deferred::<u32, String>();
//! assert_eq!(result.status(), DeferredStatus::Pending);
//!
//! settler.resolve(7).unwrap();
//! assert_eq!(result.status(), DeferredStatus::Fulfilled);
//! assert!(settler.resolve(8).is_err());
//!
//! assert_eq!(futures::executor::block_on(result), Ok(7));
//! ```

use crate::SettleError;

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use parking_lot::Mutex;
use std::sync::Arc;

/// The full state of a deferred result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeferredState<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

/// The state of a deferred result, without its value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeferredStatus {
    Pending,
    Fulfilled,
    Rejected,
}

type Continuation<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

struct Shared<T, E> {
    state: DeferredState<T, E>,
    wakers: Vec<Waker>,
    continuations: Vec<Continuation<T, E>>,
}

/// Creates a pending deferred result and the only means of settling it.
pub fn deferred<T, E>() -> (Settler<T, E>, DeferredResult<T, E>) {
    let shared = Arc::new(Mutex::new(Shared {
        state: DeferredState::Pending,
        wakers: Vec::new(),
        continuations: Vec::new(),
    }));

    (
        Settler {
            shared: shared.clone(),
        },
        DeferredResult { shared },
    )
}

/// The consumer side. See the module docs.
pub struct DeferredResult<T, E> {
    shared: Arc<Mutex<Shared<T, E>>>,
}

impl<T, E> Clone for DeferredResult<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for DeferredResult<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredResult")
            .field("status", &self.status())
            .finish()
    }
}

impl<T, E> PartialEq for DeferredResult<T, E> {
    /// Two handles are equal iff they observe the same operation.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T, E> Eq for DeferredResult<T, E> {}

impl<T, E> DeferredResult<T, E> {
    pub fn status(&self) -> DeferredStatus {
        match self.shared.lock().state {
            DeferredState::Pending => DeferredStatus::Pending,
            DeferredState::Fulfilled(_) => DeferredStatus::Fulfilled,
            DeferredState::Rejected(_) => DeferredStatus::Rejected,
        }
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status() == DeferredStatus::Pending
    }
}

impl<T, E> DeferredResult<T, E>
where
    T: Clone,
    E: Clone,
{
    /// A copy of the current state.
    pub fn state(&self) -> DeferredState<T, E> {
        self.shared.lock().state.clone()
    }

    /// The settled value, or `None` while pending.
    pub fn try_result(&self) -> Option<Result<T, E>> {
        match &self.shared.lock().state {
            DeferredState::Pending => None,
            DeferredState::Fulfilled(value) => Some(Ok(value.clone())),
            DeferredState::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Attaches a continuation. It runs on whichever thread settles the result, or immediately if already settled.
    pub fn on_settled(&self, continuation: impl FnOnce(Result<T, E>) + Send + 'static) {
        let settled = {
            let mut shared = self.shared.lock();
            match &shared.state {
                DeferredState::Pending => {
                    shared.continuations.push(Box::new(continuation));
                    return;
                }
                DeferredState::Fulfilled(value) => Ok(value.clone()),
                DeferredState::Rejected(reason) => Err(reason.clone()),
            }
        };

        continuation(settled);
    }
}

impl<T, E> Future for DeferredResult<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut shared = self.shared.lock();
        match &shared.state {
            DeferredState::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            DeferredState::Rejected(reason) => Poll::Ready(Err(reason.clone())),
            DeferredState::Pending => {
                if !shared.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    shared.wakers.push(cx.waker().clone());
                }

                Poll::Pending
            }
        }
    }
}

/// The producer side. Cloneable so that competing producers (e.g. a completion racing an abandonment) can both try to
/// settle, with the loser being told so.
pub struct Settler<T, E> {
    shared: Arc<Mutex<Shared<T, E>>>,
}

impl<T, E> Clone for Settler<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> Settler<T, E> {
    pub fn is_settled(&self) -> bool {
        !matches!(self.shared.lock().state, DeferredState::Pending)
    }
}

impl<T, E> Settler<T, E>
where
    T: Clone,
    E: Clone,
{
    pub fn resolve(&self, value: T) -> Result<(), SettleError> {
        self.settle(DeferredState::Fulfilled(value))
    }

    pub fn reject(&self, reason: E) -> Result<(), SettleError> {
        self.settle(DeferredState::Rejected(reason))
    }

    fn settle(&self, new_state: DeferredState<T, E>) -> Result<(), SettleError> {
        let (wakers, continuations, settled) = {
            let mut shared = self.shared.lock();
            if !matches!(shared.state, DeferredState::Pending) {
                tracing::error!("attempted to settle a deferred result twice");
                return Err(SettleError::AlreadySettled);
            }
            let settled = match &new_state {
                DeferredState::Fulfilled(value) => Ok(value.clone()),
                DeferredState::Rejected(reason) => Err(reason.clone()),
                DeferredState::Pending => unreachable!("settling to pending"),
            };
            shared.state = new_state;

            (
                std::mem::take(&mut shared.wakers),
                std::mem::take(&mut shared.continuations),
                settled,
            )
        };

        // Wake and notify outside of the lock so that continuations may inspect this result.
        for waker in wakers {
            waker.wake();
        }
        for continuation in continuations {
            continuation(settled.clone());
        }

        Ok(())
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
