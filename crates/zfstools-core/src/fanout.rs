//! Bounded per-dataset fan-out.
//!
//! Runs one task per dataset with at most `max_concurrency` in flight and
//! collects the results keyed by dataset name. The first failure aborts every
//! task still running, so callers either get a result for every dataset or an
//! error.

use crate::error::{Result, ToolsError};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run `work` for every `(dataset, input)` pair.
pub async fn per_dataset<T, R, F, Fut>(
    inputs: Vec<(String, T)>,
    max_concurrency: usize,
    work: F,
) -> Result<BTreeMap<String, R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(String, T) -> Fut,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let total = inputs.len();
    let limit = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (dataset, input) in inputs {
        let limit = Arc::clone(&limit);
        let job = work(dataset.clone(), input);
        tasks.spawn(async move {
            let _permit = limit
                .acquire_owned()
                .await
                .map_err(|e| ToolsError::TaskJoin { msg: e.to_string() })?;
            let output = job.await?;
            Ok::<_, ToolsError>((dataset, output))
        });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .map_err(|e| ToolsError::TaskJoin { msg: e.to_string() })
            .and_then(|inner| inner);
        match outcome {
            Ok((dataset, output)) => {
                results.insert(dataset, output);
            }
            Err(e) => {
                tasks.abort_all();
                tracing::error!(error = %e, "dataset task failed, aborting remaining tasks");
                return Err(e);
            }
        }
    }

    tracing::debug!(datasets = total, "fan-out complete");
    Ok(results)
}
