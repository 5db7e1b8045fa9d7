//! Ordered composition of primitives around a single operation.
//!
//! Each registered adapter wraps the operation it's given; the adapter
//! registered first ends up outermost. A typical chain looks like:
//!
//! ```ignore
//! let chain = MiddlewareChain::new()
//!     .wrap(move |op| { let cb = circuit_breaker.clone(); /* ... */ })
//!     .wrap(move |op| { let bh = bulkhead.clone(); /* ... */ })
//!     .wrap(move |op| { let to = timeout.clone(); /* ... */ });
//! chain.execute(operation, token).await
//! ```

use crate::error::ResilienceError;
use crate::token::CancellationToken;
use std::future::Future;
use std::pin::Pin;

/// A type-erased async operation accepting a cancellation token.
pub type BoxOp<T, E> =
    Box<dyn FnMut(CancellationToken) -> Pin<Box<dyn Future<Output = Result<T, ResilienceError<E>>> + Send>> + Send>;

type Adapter<T, E> = Box<dyn Fn(BoxOp<T, E>) -> BoxOp<T, E> + Send + Sync>;

/// Builds a nested stack of primitives around one operation.
pub struct MiddlewareChain<T, E> {
    adapters: Vec<Adapter<T, E>>,
}

impl<T, E> Default for MiddlewareChain<T, E> {
    fn default() -> Self {
        Self { adapters: Vec::new() }
    }
}

impl<T, E> MiddlewareChain<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter. Adapters registered earlier end up outermost:
    /// the first adapter's wrapped operation is invoked first and decides
    /// whether/when to call through to the rest of the chain.
    pub fn wrap(mut self, adapter: impl Fn(BoxOp<T, E>) -> BoxOp<T, E> + Send + Sync + 'static) -> Self {
        self.adapters.push(Box::new(adapter));
        self
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Folds the registered adapters around `operation` and runs the result.
    pub async fn execute<Op, Fut>(
        &self,
        mut operation: Op,
        token: CancellationToken,
    ) -> Result<T, ResilienceError<E>>
    where
        Op: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
    {
        let base: BoxOp<T, E> = Box::new(move |tok| Box::pin(operation(tok)));
        let mut wrapped = base;
        for adapter in self.adapters.iter().rev() {
            wrapped = adapter(wrapped);
        }
        wrapped(token).await
    }
}
