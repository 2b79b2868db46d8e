use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::types::{ErrorKind, Outcome, WorkItem, sanitize_concurrency};

/// Shared cooperative-cancellation flag. Once set, in-flight items finish but
/// no further items start.
pub type CancelFlag = Arc<AtomicBool>;

pub fn cancel_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

/// Runs one execution per work item against the shared executor, bounded by a
/// counting semaphore of size `concurrency`.
///
/// Guarantees, regardless of what the executor does:
/// - exactly one [`Outcome`] per submitted item, in `sequence_index` order;
/// - a panicking execution is converted into a failed outcome and never
///   aborts sibling tasks;
/// - once `cancel` is set, items that have not yet started short-circuit to a
///   `cancelled` outcome.
///
/// All tasks are spawned up front; excess items wait on the semaphore rather
/// than in an external queue.
pub async fn run_batch<E, Fut>(
    items: Vec<WorkItem>,
    concurrency: usize,
    cancel: CancelFlag,
    execute: E,
) -> Vec<Outcome>
where
    E: Fn(WorkItem) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(sanitize_concurrency(concurrency)));
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let execute = execute.clone();
        let fallback = item.clone();
        let handle = tokio::spawn(async move {
            if cancel.load(Ordering::Relaxed) {
                return Outcome::cancelled(&item);
            }
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return Outcome::cancelled(&item);
            };
            if cancel.load(Ordering::Relaxed) {
                return Outcome::cancelled(&item);
            }
            debug!(seq = item.sequence_index, "item slot acquired");
            execute(item).await
        });
        handles.push((fallback, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (item, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(seq = item.sequence_index, error = %err, "item task died");
                Outcome::failed(
                    &item,
                    &item.target_url_fragment,
                    None,
                    ErrorKind::NavigationError,
                    format!("execution task failed: {err}"),
                )
            }
        };
        outcomes.push(outcome);
    }

    // Handles are awaited in submission order, but keep the invariant
    // explicit in case the collection strategy ever changes.
    outcomes.sort_by_key(|outcome| outcome.sequence_index);
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::OutcomeStatus;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn items(count: usize) -> Vec<WorkItem> {
        (1..=count)
            .map(|idx| WorkItem {
                sequence_index: idx,
                identifier: format!("id-{idx}"),
                target_url_fragment: format!("/p/{idx}"),
                display_name: format!("item-{idx}"),
            })
            .collect()
    }

    fn ok_outcome(item: &WorkItem) -> Outcome {
        Outcome::success(item, &item.target_url_fragment, 200, Vec::new())
    }

    #[tokio::test]
    async fn one_outcome_per_item_in_submission_order() {
        let outcomes = run_batch(items(10), 4, cancel_flag(), |item| async move {
            // Later items finish earlier; the output order must not care.
            let delay = 50u64.saturating_sub(item.sequence_index as u64 * 5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            ok_outcome(&item)
        })
        .await;

        assert_eq!(outcomes.len(), 10);
        for (idx, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.sequence_index, idx + 1);
        }
    }

    #[tokio::test]
    async fn panicking_items_become_failed_outcomes() {
        let outcomes = run_batch(items(5), 2, cancel_flag(), |item| async move {
            if item.sequence_index % 2 == 0 {
                panic!("boom on {}", item.sequence_index);
            }
            ok_outcome(&item)
        })
        .await;

        assert_eq!(outcomes.len(), 5);
        for outcome in &outcomes {
            if outcome.sequence_index % 2 == 0 {
                assert_eq!(outcome.status, OutcomeStatus::Failed);
                assert_eq!(outcome.error_kind, Some(ErrorKind::NavigationError));
            } else {
                assert_eq!(outcome.status, OutcomeStatus::Success);
            }
        }
    }

    #[tokio::test]
    async fn failed_items_do_not_abort_siblings() {
        let outcomes = run_batch(items(6), 3, cancel_flag(), |item| async move {
            if item.sequence_index == 1 {
                Outcome::failed(
                    &item,
                    &item.target_url_fragment,
                    Some(503),
                    ErrorKind::ServerError,
                    "HTTP 503",
                )
            } else {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ok_outcome(&item)
            }
        })
        .await;

        let failed = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .count();
        assert_eq!(failed, 1);
        assert_eq!(outcomes.len(), 6);
    }

    #[tokio::test]
    async fn concurrency_bound_is_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let active_gauge = active.clone();
        let peak_gauge = peak.clone();

        let outcomes = run_batch(items(10), 3, cancel_flag(), move |item| {
            let active = active_gauge.clone();
            let peak = peak_gauge.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                ok_outcome(&item)
            }
        })
        .await;

        assert_eq!(outcomes.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3, "peak exceeded bound");
        assert!(peak.load(Ordering::SeqCst) >= 2, "batch never overlapped");
    }

    #[tokio::test]
    async fn pre_set_cancellation_stops_everything() {
        let cancel = cancel_flag();
        cancel.store(true, Ordering::Relaxed);

        let outcomes = run_batch(items(4), 2, cancel, |item| async move { ok_outcome(&item) }).await;

        assert_eq!(outcomes.len(), 4);
        for outcome in &outcomes {
            assert_eq!(outcome.error_kind, Some(ErrorKind::Cancelled));
        }
    }

    #[tokio::test]
    async fn cancellation_lets_in_flight_items_finish() {
        let cancel = cancel_flag();
        let trip = cancel.clone();

        // Concurrency 1 serializes the batch; the first item trips the flag,
        // so every later item must come back cancelled while the first is
        // still recorded as a success.
        let outcomes = run_batch(items(5), 1, cancel, move |item| {
            let trip = trip.clone();
            async move {
                if item.sequence_index == 1 {
                    trip.store(true, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                ok_outcome(&item)
            }
        })
        .await;

        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes[0].status, OutcomeStatus::Success);
        for outcome in &outcomes[1..] {
            assert_eq!(outcome.error_kind, Some(ErrorKind::Cancelled));
        }
    }
}
