//! Dump, convert and execute as three concurrent stages.
//!
//! ```text
//! producer --(byte pipe)--> converter --(bounded queue + window)--> executor
//! ```
//!
//! The producer writes a dump stream into one end of an in-memory pipe. The
//! converter decodes the other end and hands frozen [`FlushUnit`]s to the
//! executor. Each hand-off reserves a slot in an [`InFlightWindow`] that the
//! executor frees once the unit has run, so the converter stops producing
//! SQL while the destination is behind.
//!
//! A failing stage cancels the shared token and closes the window, which
//! unblocks the other two. The caller gets the first error that is not just
//! a consequence of that cancellation.

mod executor;
mod window;

pub use executor::{SqlWriter, StatementExecutor};
pub use window::InFlightWindow;

use crate::convert::{ConvertOptions, ConvertSummary, FlushSink, FlushUnit, SqlConverter};
use crate::error::{DumpError, Result};
use crate::producer::{DumpOptions, DumpSummary, Dumper};
use crate::source::DumpSource;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_HIGH_WATERMARK: usize = 50;
const DEFAULT_PIPE_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub dump: DumpOptions,
    pub convert: ConvertOptions,
    /// Pending units between converter and executor.
    pub queue_capacity: usize,
    /// Units in flight at which the converter is held until the executor drains.
    pub high_watermark: usize,
    pub pipe_buffer: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dump: DumpOptions::default(),
            convert: ConvertOptions::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            pipe_buffer: DEFAULT_PIPE_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub dump: DumpSummary,
    pub convert: ConvertSummary,
    pub units_executed: u64,
    pub peak_in_flight: usize,
    pub holds: u64,
}

/// Hands units to the executor. Returns once the unit is queued, blocking
/// first while the window is held.
struct Handoff {
    tx: mpsc::Sender<FlushUnit>,
    window: Arc<InFlightWindow>,
    cancel: CancellationToken,
}

impl FlushSink for Handoff {
    fn flush(&mut self, unit: FlushUnit) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DumpError::Cancelled);
        }
        self.window.acquire()?;
        self.tx
            .blocking_send(unit)
            .map_err(|_| DumpError::Cancelled)
    }
}

/// Closes the window when the executor stage ends, even by panic.
struct CloseOnDrop(Arc<InFlightWindow>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Record a stage failure and wake the other stages.
fn settle<T>(
    stage: &'static str,
    result: Result<T>,
    cancel: &CancellationToken,
    window: &InFlightWindow,
) -> Result<T> {
    match result {
        Ok(v) => Ok(v),
        Err(e) => {
            let e = if cancel.is_cancelled() {
                DumpError::Cancelled
            } else {
                e
            };
            if !e.is_cancellation() {
                warn!(stage, error = %e, "Pipeline stage failed");
            }
            cancel.cancel();
            window.close();
            Err(e)
        }
    }
}

fn join_failed(stage: &'static str, e: JoinError) -> DumpError {
    DumpError::Stage {
        stage,
        message: e.to_string(),
    }
}

fn drain<E: StatementExecutor>(
    rx: &mut mpsc::Receiver<FlushUnit>,
    executor: &mut E,
    window: &InFlightWindow,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut executed = 0u64;
    while let Some(unit) = rx.blocking_recv() {
        if cancel.is_cancelled() {
            return Err(DumpError::Cancelled);
        }
        executor.execute(&unit)?;
        window.release();
        executed += 1;
        if executed % 1000 == 0 {
            debug!(executed, table = ?unit.table, "Executor progress");
        }
    }
    executor.finish()?;
    Ok(executed)
}

/// Run producer, converter and executor until the dump is fully applied.
///
/// `cancel` aborts the run from outside; failures inside the pipeline only
/// cancel a child of it. The executor is handed back so the caller can
/// finish whatever it wraps.
pub async fn run_pipeline<S, E>(
    source: S,
    executor: E,
    options: PipelineOptions,
    cancel: CancellationToken,
) -> Result<(PipelineReport, E)>
where
    S: DumpSource + 'static,
    E: StatementExecutor + 'static,
{
    let cancel = cancel.child_token();
    let window = Arc::new(InFlightWindow::new(options.high_watermark));
    let (tx, mut rx) = mpsc::channel::<FlushUnit>(options.queue_capacity.max(1));
    let (pipe_in, pipe_out) = tokio::io::duplex(options.pipe_buffer.max(1));
    let mut pipe_in = SyncIoBridge::new(pipe_in);
    let pipe_out = SyncIoBridge::new(pipe_out);

    info!(
        queue_capacity = options.queue_capacity,
        high_watermark = options.high_watermark,
        batch_size = options.convert.batch_size,
        "Starting dump pipeline"
    );

    let producer = {
        let cancel = cancel.clone();
        let window = window.clone();
        let dumper = Dumper::new(source, options.dump);
        tokio::task::spawn_blocking(move || {
            let result = dumper.dump(&mut pipe_in, &cancel);
            let result = settle("producer", result, &cancel, &window);
            // Closing the pipe after settling lets the converter tell a
            // failed producer from a truncated stream.
            drop(pipe_in);
            result
        })
    };

    let converter = {
        let cancel = cancel.clone();
        let window = window.clone();
        let converter = SqlConverter::new(options.convert);
        tokio::task::spawn_blocking(move || {
            let mut handoff = Handoff {
                tx,
                window: window.clone(),
                cancel: cancel.clone(),
            };
            let result = converter.convert(pipe_out, &mut handoff);
            settle("converter", result, &cancel, &window)
        })
    };

    let executor = {
        let cancel = cancel.clone();
        let window = window.clone();
        tokio::task::spawn_blocking(move || {
            let _close = CloseOnDrop(window.clone());
            let mut executor = executor;
            let result = drain(&mut rx, &mut executor, &window, &cancel);
            drop(rx);
            (settle("executor", result, &cancel, &window), executor)
        })
    };

    let (producer, converter, executor) = tokio::join!(producer, converter, executor);

    let producer = producer.map_err(|e| join_failed("producer", e)).and_then(|r| r);
    let converter = converter.map_err(|e| join_failed("converter", e)).and_then(|r| r);
    let (executed, executor) = match executor {
        Ok((result, executor)) => (result, Some(executor)),
        Err(e) => (Err(join_failed("executor", e)), None),
    };

    match (producer, converter, executed, executor) {
        (Ok(dump), Ok(convert), Ok(units_executed), Some(executor)) => {
            let report = PipelineReport {
                dump,
                convert,
                units_executed,
                peak_in_flight: window.peak(),
                holds: window.holds(),
            };
            info!(
                tables = report.convert.tables_converted,
                rows = report.convert.rows_converted,
                units = report.units_executed,
                peak_in_flight = report.peak_in_flight,
                "Dump pipeline finished"
            );
            Ok((report, executor))
        }
        (producer, converter, executed, _) => {
            let errors = [producer.err(), converter.err(), executed.err()];
            let root = errors
                .into_iter()
                .flatten()
                .find(|e| !e.is_cancellation())
                .unwrap_or(DumpError::Cancelled);
            Err(root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{TablePolicy, TableRule};
    use crate::source::SqliteSource;
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn source(rows: usize) -> SqliteSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER, name TEXT);
             CREATE TABLE cache (k TEXT);
             INSERT INTO cache VALUES ('x');",
        )
        .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO users VALUES (?, ?)",
                rusqlite::params![i as i64, format!("user-{i}")],
            )
            .unwrap();
        }
        SqliteSource::from_connection(conn, "shop")
    }

    struct SlowExecutor {
        delay: Duration,
        executed: Arc<AtomicUsize>,
        fail_at: Option<usize>,
    }

    impl StatementExecutor for SlowExecutor {
        fn execute(&mut self, _unit: &FlushUnit) -> Result<()> {
            let n = self.executed.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(n) == self.fail_at {
                return Err(DumpError::Database("destination rejected statement".to_string()));
            }
            std::thread::sleep(self.delay);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pipeline_writes_sql() {
        let mut options = PipelineOptions::default();
        options.dump.policy = TablePolicy::new().with_rule("cache", TableRule::Exclude);

        let (report, writer) = run_pipeline(
            source(3),
            SqlWriter::new(Vec::new()),
            options,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let sql = String::from_utf8(writer.into_inner()).unwrap();
        assert!(sql.contains(
            "REPLACE INTO users(`id`,`name`) VALUES ('0','user-0'),('1','user-1'),('2','user-2');"
        ));
        assert!(!sql.contains("cache"));
        assert_eq!(report.dump.tables_excluded, 1);
        assert_eq!(report.convert.rows_converted, 3);
        assert_eq!(report.units_executed, report.convert.flushes);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_executor_bounds_in_flight_units() {
        let mut options = PipelineOptions::default();
        // One statement per row.
        options.convert.batch_size = 1;
        let executed = Arc::new(AtomicUsize::new(0));

        let (report, _) = run_pipeline(
            source(400),
            SlowExecutor {
                delay: Duration::from_millis(1),
                executed: executed.clone(),
                fail_at: None,
            },
            options,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(report.peak_in_flight <= DEFAULT_HIGH_WATERMARK);
        assert!(report.convert.flushes > 400);
        assert_eq!(executed.load(Ordering::SeqCst) as u64, report.units_executed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_executor_failure_is_reported_not_deadlocked() {
        let mut options = PipelineOptions::default();
        options.convert.batch_size = 1;

        let result = tokio::time::timeout(
            Duration::from_secs(30),
            run_pipeline(
                source(2000),
                SlowExecutor {
                    delay: Duration::ZERO,
                    executed: Arc::new(AtomicUsize::new(0)),
                    fail_at: Some(3),
                },
                options,
                CancellationToken::new(),
            ),
        )
        .await
        .expect("pipeline must not hang");

        match result {
            Err(DumpError::Database(msg)) => assert!(msg.contains("rejected")),
            other => panic!("unexpected result: {:?}", other.map(|(r, _)| r)),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_outer_cancellation_aborts_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_pipeline(
            source(10),
            SqlWriter::new(Vec::new()),
            PipelineOptions::default(),
            cancel,
        )
        .await;
        assert!(matches!(result, Err(DumpError::Cancelled)));
    }
}
