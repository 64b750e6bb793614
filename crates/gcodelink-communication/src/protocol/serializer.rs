//! Task serializer
//!
//! Admits one operation at a time onto the shared session, first come first
//! served. Admission uses the fair (FIFO) tokio mutex. An admitted operation
//! runs on its own task: if the caller stops waiting, the command already on
//! the wire still runs to its terminal marker or deadline before the channel
//! is released.

use super::session::ProtocolSession;
use futures::future::BoxFuture;
use gcodelink_core::{Error, Result};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mutual-exclusion admission queue in front of a [`ProtocolSession`]
#[derive(Clone)]
pub struct TaskSerializer {
    session: Arc<Mutex<ProtocolSession>>,
    next_ticket: Arc<AtomicU64>,
    outstanding: Arc<AtomicUsize>,
}

impl TaskSerializer {
    /// Take ownership of a session
    pub fn new(session: ProtocolSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            next_ticket: Arc::new(AtomicU64::new(0)),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `operation` with exclusive use of the session
    ///
    /// Everything the operation does, including several sequential
    /// exchanges, happens without interleaving with other callers.
    pub async fn execute<F, T>(&self, operation: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut ProtocolSession) -> BoxFuture<'s, Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let _outstanding = Outstanding::enter(&self.outstanding);

        tracing::trace!(ticket, "waiting for channel");
        let mut session = self.session.clone().lock_owned().await;
        tracing::trace!(ticket, "admitted");

        let task = tokio::spawn(async move {
            let result = operation(&mut *session).await;
            drop(session);
            result
        });

        let result = task
            .await
            .map_err(|e| Error::other(format!("Channel operation {} aborted: {}", ticket, e)))?;
        tracing::trace!(ticket, "released");
        result
    }

    /// Number of operations waiting for or holding the channel
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Check if an operation currently holds the channel
    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }
}

/// Counts a caller as outstanding for as long as it is alive
struct Outstanding<'a>(&'a AtomicUsize);

impl<'a> Outstanding<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::StreamChannel;
    use parking_lot::Mutex as SyncMutex;
    use std::time::Duration;

    fn serializer() -> TaskSerializer {
        // none of these operations touch the channel
        let (client, _device) = tokio::io::duplex(64);
        TaskSerializer::new(ProtocolSession::new(Box::new(StreamChannel::new(
            "pipe", client,
        ))))
    }

    #[tokio::test]
    async fn test_operations_do_not_overlap() {
        let serializer = serializer();
        let log = Arc::new(SyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let serializer = serializer.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                serializer
                    .execute(move |_session| {
                        Box::pin(async move {
                            log.lock().push(format!("start {}", i));
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            log.lock().push(format!("end {}", i));
                            Ok(())
                        })
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let log = log.lock();
        assert_eq!(log.len(), 16);
        for pair in log.chunks(2) {
            let start = pair[0].strip_prefix("start ").unwrap();
            let end = pair[1].strip_prefix("end ").unwrap();
            assert_eq!(start, end);
        }
        assert_eq!(serializer.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_admission_is_first_come_first_served() {
        let serializer = serializer();
        let order = Arc::new(SyncMutex::new(Vec::new()));

        // Hold the channel so that later callers queue up
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let blocker = {
            let serializer = serializer.clone();
            tokio::spawn(async move {
                serializer
                    .execute(move |_session| {
                        Box::pin(async move {
                            let _ = release_rx.await;
                            Ok(())
                        })
                    })
                    .await
            })
        };
        while !serializer.is_busy() {
            tokio::task::yield_now().await;
        }

        let mut handles = Vec::new();
        for i in 0..5 {
            let worker = serializer.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                worker
                    .execute(move |_session| {
                        Box::pin(async move {
                            order.lock().push(i);
                            Ok(())
                        })
                    })
                    .await
            }));
            // let each caller join the queue before the next one
            while serializer.outstanding() < i + 2 {
                tokio::task::yield_now().await;
            }
        }

        release_tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failure_releases_channel() {
        let serializer = serializer();

        let err = serializer
            .execute(|_session| Box::pin(async { Err::<(), _>(Error::other("boom")) }))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(!serializer.is_busy());

        let value = serializer
            .execute(|_session| Box::pin(async { Ok(7) }))
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cut_operation_short() {
        let serializer = serializer();
        let finished = Arc::new(SyncMutex::new(false));

        let flag = finished.clone();
        let slow = serializer.execute(move |_session| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                *flag.lock() = true;
                Ok(())
            })
        });
        // caller gives up after 10ms
        assert!(tokio::time::timeout(Duration::from_millis(10), slow)
            .await
            .is_err());

        // the next caller is admitted only after the first operation finished
        let observed = finished.clone();
        let was_finished = serializer
            .execute(move |_session| Box::pin(async move { Ok(*observed.lock()) }))
            .await
            .unwrap();
        assert!(was_finished);
    }
}
