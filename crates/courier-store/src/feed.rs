use std::future::Future;
use std::sync::Arc;

use courier_core::{LedgerResult, LiveStream};
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Drivers,
    Customers,
    Neighborhoods,
    Orders,
    Payments,
}

const TABLE_COUNT: usize = 5;

impl Table {
    fn index(self) -> usize {
        match self {
            Self::Drivers => 0,
            Self::Customers => 1,
            Self::Neighborhoods => 2,
            Self::Orders => 3,
            Self::Payments => 4,
        }
    }
}

/// Per-table write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revisions([u64; TABLE_COUNT]);

impl Revisions {
    pub fn get(&self, table: Table) -> u64 {
        self.0[table.index()]
    }

    /// Counters of the given tables only, so unrelated writes compare equal.
    fn stamp(&self, tables: &[Table]) -> [u64; TABLE_COUNT] {
        let mut stamp = [0; TABLE_COUNT];
        for table in tables {
            stamp[table.index()] = self.0[table.index()];
        }
        stamp
    }
}

/// Publishes table revisions after each committed write.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: Arc<watch::Sender<Revisions>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        let (sender, _) = watch::channel(Revisions::default());
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl ChangeFeed {
    pub fn publish(&self, tables: &[Table]) {
        self.sender.send_modify(|revisions| {
            for table in tables {
                revisions.0[table.index()] += 1;
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Revisions> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> Revisions {
        *self.sender.borrow()
    }
}

struct LiveState<F> {
    changes: watch::Receiver<Revisions>,
    query: F,
    seen: Option<[u64; TABLE_COUNT]>,
}

/// Runs `query` now and again after every revision of `tables`.
///
/// Several writes landing before the stream is polled again produce one re-run.
pub(crate) fn live_query<T, F, Fut>(
    feed: &ChangeFeed,
    tables: &'static [Table],
    query: F,
) -> LiveStream<T>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = LedgerResult<T>> + Send + 'static,
{
    let state = LiveState {
        changes: feed.subscribe(),
        query,
        seen: None,
    };

    stream::unfold(state, move |mut state| async move {
        let stamp = match state.seen {
            None => {
                let stamp = state.changes.borrow_and_update().stamp(tables);
                stamp
            }
            Some(seen) => loop {
                state.changes.changed().await.ok()?;
                let stamp = state.changes.borrow_and_update().stamp(tables);
                if stamp != seen {
                    break stamp;
                }
            },
        };
        state.seen = Some(stamp);
        let item = (state.query)().await;
        Some((item, state))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use futures_util::FutureExt;

    use super::*;

    fn counting_stream(feed: &ChangeFeed, tables: &'static [Table]) -> LiveStream<u64> {
        let runs = Arc::new(AtomicU64::new(0));
        live_query(feed, tables, move || {
            let runs = runs.clone();
            async move { Ok(runs.fetch_add(1, Ordering::SeqCst) + 1) }
        })
    }

    #[tokio::test]
    async fn emits_immediately_then_on_relevant_change() {
        let feed = ChangeFeed::default();
        let mut live = counting_stream(&feed, &[Table::Orders]);

        assert_eq!(live.next().await.unwrap().unwrap(), 1);

        feed.publish(&[Table::Payments]);
        assert!(live.next().now_or_never().is_none());

        feed.publish(&[Table::Orders]);
        assert_eq!(live.next().await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn bursts_collapse_into_one_rerun() {
        let feed = ChangeFeed::default();
        let mut live = counting_stream(&feed, &[Table::Orders, Table::Payments]);
        live.next().await.unwrap().unwrap();

        feed.publish(&[Table::Orders]);
        feed.publish(&[Table::Payments]);
        feed.publish(&[Table::Orders]);

        assert_eq!(live.next().await.unwrap().unwrap(), 2);
        assert!(live.next().now_or_never().is_none());
        assert_eq!(feed.current().get(Table::Orders), 2);
    }

    #[tokio::test]
    async fn ends_when_feed_is_dropped() {
        let feed = ChangeFeed::default();
        let mut live = counting_stream(&feed, &[Table::Drivers]);
        live.next().await.unwrap().unwrap();

        drop(feed);
        assert!(live.next().await.is_none());
    }
}
