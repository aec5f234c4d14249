//! The control loop: one task multiplexing the ingestion timer, console
//! query lines and the termination signal.

use std::{future::Future, io::Write, time::Duration};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, error, info, warn};

use super::{
    config::IngestConfig,
    error::{RankError, Result},
    ingest::Ingestor,
    query::QueryRouter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct IngestSchedule {
    pub metric: String,
    pub interval: Duration,
    pub on_start: bool,
}

impl IngestSchedule {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            metric: config.metric.clone(),
            interval: config.interval(),
            on_start: config.on_start,
        }
    }
}

pub struct Dispatcher {
    ingestor: Ingestor,
    router: QueryRouter,
    schedule: IngestSchedule,
    state: Mutex<DispatcherState>,
}

impl Dispatcher {
    pub fn new(ingestor: Ingestor, router: QueryRouter, schedule: IngestSchedule) -> Self {
        Self {
            ingestor,
            router,
            schedule,
            state: Mutex::new(DispatcherState::Stopped),
        }
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.lock()
    }

    /// Runs until `shutdown` resolves, then returns `Err(Terminated)` carrying
    /// the signal name.
    ///
    /// Ingestion failures and rejected query lines are logged and the loop
    /// keeps going. When `lines` closes the loop keeps serving the timer.
    pub async fn run<W, F>(
        &self,
        mut lines: mpsc::Receiver<String>,
        out: &mut W,
        shutdown: F,
    ) -> Result<()>
    where
        W: Write,
        F: Future<Output = String>,
    {
        let first_tick = if self.schedule.on_start {
            Instant::now()
        } else {
            Instant::now() + self.schedule.interval
        };
        let mut ticker = interval_at(first_tick, self.schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        let mut lines_open = true;
        *self.state.lock() = DispatcherState::Running;
        info!(
            interval_secs = self.schedule.interval.as_secs(),
            metric = %self.schedule.metric,
            "dispatcher running"
        );

        let signal = loop {
            tokio::select! {
                biased;

                signal = &mut shutdown => break signal,
                _ = ticker.tick() => self.ingest_tick().await,
                line = lines.recv(), if lines_open => match line {
                    Some(line) => self.handle_line(&line, out).await,
                    None => {
                        debug!("query line source closed");
                        lines_open = false;
                    }
                },
            }
        };

        *self.state.lock() = DispatcherState::Stopped;
        info!(%signal, "dispatcher stopping");
        Err(RankError::Terminated(signal))
    }

    async fn ingest_tick(&self) {
        if let Err(err) = self.ingestor.ingest(&self.schedule.metric).await {
            error!(metric = %self.schedule.metric, "ingestion cycle failed: {err}");
        }
    }

    async fn handle_line<W: Write>(&self, line: &str, out: &mut W) {
        let router = self.router.clone();
        let input = line.to_string();
        let now = Utc::now();
        let answer = tokio::task::spawn_blocking(move || router.answer(&input, now)).await;

        let lines = match answer {
            Ok(Ok(lines)) => lines,
            Ok(Err(err)) => {
                error!(input = %line, "query rejected: {err}");
                return;
            }
            Err(err) => {
                error!(input = %line, "query task failed: {err}");
                return;
            }
        };

        for text in &lines {
            if let Err(err) = writeln!(out, "{text}") {
                warn!("failed to write query output: {err}");
                return;
            }
        }
        if let Err(err) = out.flush() {
            warn!("failed to flush query output: {err}");
        }
    }
}

/// Resolves with the name of the first termination signal received.
pub async fn shutdown_signal() -> String {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT".to_string(),
            Err(err) => {
                error!("failed to install Ctrl+C handler: {err}");
                std::future::pending::<String>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        let listen = |kind: SignalKind, name: &'static str| async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    name.to_string()
                }
                Err(err) => {
                    error!("failed to install {name} handler: {err}");
                    std::future::pending::<String>().await
                }
            }
        };

        tokio::select! {
            name = listen(SignalKind::terminate(), "SIGTERM") => name,
            name = listen(SignalKind::hangup(), "SIGHUP") => name,
            name = listen(SignalKind::quit(), "SIGQUIT") => name,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<String>();

    tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use async_trait::async_trait;
    use chrono::Offset;
    use tokio::sync::oneshot;

    use super::*;
    use crate::{
        query::{NO_DATA, QueryOptions},
        ranking::{Ranker, RankingSource},
        store::{KeyValueStore, RocksStore},
    };

    struct FixedSource;

    #[async_trait]
    impl RankingSource for FixedSource {
        async fn fetch(&self, _metric: &str) -> Result<Vec<Ranker>> {
            Ok(vec![Ranker {
                nickname: "alice".into(),
                volume: 100.0,
                number_of_trades: 1,
            }])
        }
    }

    #[derive(Default)]
    struct FailingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RankingSource for FailingSource {
        async fn fetch(&self, metric: &str) -> Result<Vec<Ranker>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RankError::Fetch(format!("{metric} unavailable")))
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    async fn wait_for(buf: &SharedBuf, needle: &str) {
        for _ in 0..200 {
            if buf.text().contains(needle) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("timed out waiting for {needle:?}, got:\n{}", buf.text());
    }

    #[tokio::test]
    async fn serves_ingestion_and_queries_until_signalled() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> =
            Arc::new(RocksStore::open(dir.path().join("ldb")).unwrap());
        let options = QueryOptions {
            exchange_offset: Utc.fix(),
            ..QueryOptions::default()
        };
        let dispatcher = Dispatcher::new(
            Ingestor::new(Arc::new(FixedSource), Arc::clone(&store)),
            QueryRouter::new(Arc::clone(&store), options),
            IngestSchedule {
                metric: "VOLUME".into(),
                interval: Duration::from_secs(3600),
                on_start: true,
            },
        );
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);

        let (line_tx, line_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel::<String>();
        let shutdown = async move { stop_rx.await.unwrap_or_else(|_| "closed".into()) };
        let output = SharedBuf::default();
        let mut sink = output.clone();
        let yesterday = (Utc::now() - chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();

        let driver = async {
            let probe = format!("alice {yesterday}");
            for _ in 0..200 {
                line_tx.send(probe.clone()).await.unwrap();
                if output.text().contains("alice - 100.0") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            assert_eq!(dispatcher.state(), DispatcherState::Running);

            line_tx.send("alice".into()).await.unwrap();
            line_tx.send(format!("carol {yesterday}")).await.unwrap();
            wait_for(&output, NO_DATA).await;
            stop_tx.send("SIGTERM".into()).unwrap();
        };

        let (result, ()) = tokio::join!(dispatcher.run(line_rx, &mut sink, shutdown), driver);

        let err = result.unwrap_err();
        assert!(err.is_termination());
        assert!(err.to_string().contains("SIGTERM"));
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);

        let text = output.text();
        assert!(text.contains("alice - 100.0 - 100.00/1"), "{text}");
        assert!(!text.contains("invalid query"));
    }

    #[tokio::test]
    async fn failed_ingestion_keeps_answering_queries() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> =
            Arc::new(RocksStore::open(dir.path().join("ldb")).unwrap());
        let source = Arc::new(FailingSource::default());
        let dispatcher = Dispatcher::new(
            Ingestor::new(source.clone(), Arc::clone(&store)),
            QueryRouter::new(Arc::clone(&store), QueryOptions::default()),
            IngestSchedule {
                metric: "VOLUME".into(),
                interval: Duration::from_secs(3600),
                on_start: true,
            },
        );

        let (line_tx, line_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel::<String>();
        let shutdown = async move { stop_rx.await.unwrap_or_else(|_| "closed".into()) };
        let output = SharedBuf::default();
        let mut sink = output.clone();

        let driver = async {
            for _ in 0..200 {
                if source.calls.load(Ordering::SeqCst) > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            assert_eq!(source.calls.load(Ordering::SeqCst), 1);

            line_tx
                .send("alice 20200101 20200102".into())
                .await
                .unwrap();
            wait_for(&output, NO_DATA).await;
            assert_eq!(dispatcher.state(), DispatcherState::Running);
            stop_tx.send("SIGTERM".into()).unwrap();
        };

        let (result, ()) = tokio::join!(dispatcher.run(line_rx, &mut sink, shutdown), driver);

        assert!(result.unwrap_err().is_termination());
        assert_eq!(output.text().trim(), NO_DATA);
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn closed_line_source_keeps_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> =
            Arc::new(RocksStore::open(dir.path().join("ldb")).unwrap());
        let dispatcher = Dispatcher::new(
            Ingestor::new(Arc::new(FixedSource), Arc::clone(&store)),
            QueryRouter::new(Arc::clone(&store), QueryOptions::default()),
            IngestSchedule {
                metric: "VOLUME".into(),
                interval: Duration::from_secs(3600),
                on_start: false,
            },
        );

        let (line_tx, line_rx) = mpsc::channel::<String>(1);
        drop(line_tx);
        let shutdown = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            "SIGINT".to_string()
        };
        let mut sink = Vec::new();

        let err = dispatcher
            .run(line_rx, &mut sink, shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, RankError::Terminated(ref name) if name == "SIGINT"));
        assert!(sink.is_empty());
    }
}
