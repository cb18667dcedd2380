//! Snapshot selectors
//!
//! A selector derives one value from the snapshot and only reports it
//! again when the derived value itself changes, compared by value. An
//! unrelated patch elsewhere in the snapshot does not wake the reader.

use serde_json::Value;
use tokio::sync::watch;

use super::client::Snapshot;
use crate::error::{StreamError, StreamResult};

/// Derived, change-filtered view of a stream's snapshot
pub struct Selector<T, F> {
    rx: watch::Receiver<Option<Snapshot>>,
    select: F,
    last: Option<T>,
}

impl<T, F> Selector<T, F>
where
    T: PartialEq + Clone,
    F: Fn(&Value) -> T,
{
    pub(crate) fn new(rx: watch::Receiver<Option<Snapshot>>, select: F) -> Self {
        Self {
            rx,
            select,
            last: None,
        }
    }

    /// Selected value from the current snapshot
    ///
    /// Fails with [`StreamError::Inactive`] when no stream is running.
    pub fn get(&mut self) -> StreamResult<T> {
        let snapshot = self.rx.borrow_and_update().clone();
        let snapshot = snapshot.ok_or(StreamError::Inactive)?;

        let value = (self.select)(&snapshot);
        self.last = Some(value.clone());
        Ok(value)
    }

    /// Wait for the next value that differs from the last one returned
    ///
    /// Periods without an active stream are skipped; the first value after
    /// a restart is always reported. Fails with [`StreamError::Closed`]
    /// once the owning stream is gone.
    pub async fn changed(&mut self) -> StreamResult<T> {
        loop {
            self.rx.changed().await.map_err(|_| StreamError::Closed)?;

            let snapshot = self.rx.borrow_and_update().clone();
            let Some(snapshot) = snapshot else {
                self.last = None;
                continue;
            };

            let value = (self.select)(&snapshot);
            if self.last.as_ref() != Some(&value) {
                self.last = Some(value.clone());
                return Ok(value);
            }
        }
    }

    /// Last value returned, without touching the snapshot
    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn running_count(snapshot: &Value) -> usize {
        snapshot["execution_processes"]
            .as_object()
            .map(|map| {
                map.values()
                    .filter(|process| process["status"] == "running")
                    .count()
            })
            .unwrap_or(0)
    }

    #[test]
    fn test_get_requires_active_stream() {
        let (_tx, rx) = watch::channel::<Option<Snapshot>>(None);
        let mut selector = Selector::new(rx, running_count);
        assert!(matches!(selector.get(), Err(StreamError::Inactive)));
    }

    #[tokio::test]
    async fn test_changed_skips_equal_values() {
        let (tx, rx) = watch::channel(Some(Arc::new(json!({ "execution_processes": {} }))));
        let mut selector = Selector::new(rx, running_count);
        assert_eq!(selector.get().unwrap(), 0);

        // Unrelated change: selected value stays 0
        tx.send_replace(Some(Arc::new(json!({
            "execution_processes": { "p1": { "status": "completed" } }
        }))));
        // Relevant change
        tx.send_replace(Some(Arc::new(json!({
            "execution_processes": { "p1": { "status": "running" } }
        }))));

        let value = tokio::time::timeout(Duration::from_secs(1), selector.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 1);

        // Same count again: no wake-up
        tx.send_replace(Some(Arc::new(json!({
            "execution_processes": { "p1": { "status": "running", "exit_code": null } }
        }))));
        let pending = tokio::time::timeout(Duration::from_millis(50), selector.changed()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_changed_reports_value_after_restart() {
        let (tx, rx) = watch::channel(Some(Arc::new(json!({ "execution_processes": {} }))));
        let mut selector = Selector::new(rx, running_count);
        selector.get().unwrap();

        // Stream stopped: nothing to report
        tx.send_replace(None);
        let idle = tokio::time::timeout(Duration::from_millis(50), selector.changed()).await;
        assert!(idle.is_err());

        tx.send_replace(Some(Arc::new(json!({ "execution_processes": {} }))));

        let value = tokio::time::timeout(Duration::from_secs(1), selector.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, 0);
    }

    #[tokio::test]
    async fn test_changed_fails_when_stream_dropped() {
        let (tx, rx) = watch::channel::<Option<Snapshot>>(None);
        let mut selector = Selector::new(rx, running_count);
        drop(tx);
        assert!(matches!(selector.changed().await, Err(StreamError::Closed)));
    }
}
