//! Running an operation over many items without stopping at the first error.

use crate::cancellation::CancellationToken;
use crate::errors::AggregateError;
use std::future::Future;

/// Runs `f` on every item in order, even after some of them fail.
///
/// Cancellation is checked before each item. Returns `Ok` when every call
/// succeeded, otherwise every error in item order.
pub async fn for_each_aggregating_errors<I, T, E, F, Fut>(
    items: I,
    mut f: F,
    cancellation: Option<&CancellationToken>,
) -> Result<(), AggregateError<E>>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut errors = Vec::new();
    for item in items {
        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(AggregateError::Cancelled);
        }
        if let Err(error) = f(item).await {
            errors.push(error);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AggregateError::Failed(errors))
    }
}
