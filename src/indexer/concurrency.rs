//! Bounded fan-out of independent capability calls.

use crate::error::{PageIndexError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run `task` for every input with at most `limit` calls in flight.
///
/// Results come back in input order. The first failure aborts every task
/// still pending or running and is returned.
pub async fn bounded_map<I, T, F, Fut>(inputs: Vec<I>, limit: usize, task: F) -> Result<Vec<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();
    let count = inputs.len();

    for (position, input) in inputs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let call = task(input);
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| PageIndexError::TaskFailed(e.to_string()))?;
            call.await.map(|value| (position, value))
        });
    }

    let mut slots: Vec<Option<T>> = (0..count).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok((position, value))) => slots[position] = Some(value),
            Ok(Err(err)) => {
                set.abort_all();
                return Err(err);
            }
            Err(join_err) => {
                set.abort_all();
                return Err(PageIndexError::TaskFailed(join_err.to_string()));
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| PageIndexError::TaskFailed("missing result".into())))
        .collect()
}
