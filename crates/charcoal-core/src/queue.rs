//! # Queue processing
//!
//! Queue items are ordinary models whose metadata declares `processed`
//! (boolean), `processing_date` (date-time, when the item becomes due),
//! `processed_date` and optionally `queue_id`. A `QueueProcessor` walks the
//! due items in key order and hands each one to a caller closure; a failing
//! item is tallied and the batch goes on.
//!
//! Runs are serialized across processes with a `ProcessLock`.

use crate::loader::CollectionLoader;
use crate::model::{Model, ModelFactory};
use crate::query::{Filter, Operator, Order, Pagination};
use crate::source::value::now_datetime;
use crate::types::CharcoalError;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// PROCESS LOCK
// =============================================================================

/// Advisory lock file, held until dropped.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    _file: File,
}

impl ProcessLock {
    /// Create the lock file. Fails with `Lock` while another holder exists.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, CharcoalError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    CharcoalError::Lock(format!("{} is held by another process", path.display()))
                }
                _ => CharcoalError::Io(e.to_string()),
            })?;
        writeln!(file, "{}", std::process::id()).map_err(|e| CharcoalError::Io(e.to_string()))?;
        tracing::debug!("Acquired process lock {}", path.display());
        Ok(Self { path, _file: file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Could not release lock {}: {}", self.path.display(), e);
        }
    }
}

// =============================================================================
// QUEUE PROCESSOR
// =============================================================================

/// What the handler did with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Done; the item is marked processed.
    Processed,
    /// Left for a later run.
    Skipped,
}

/// Keys of the items of one run, by outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueReport {
    pub success: Vec<Value>,
    pub failure: Vec<Value>,
    pub skipped: Vec<Value>,
}

impl QueueReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.success.len() + self.failure.len() + self.skipped.len()
    }
}

/// Runs a handler over the due items of one queue type.
#[derive(Debug, Clone)]
pub struct QueueProcessor {
    ident: String,
    factory: Arc<ModelFactory>,
    queue_id: Option<String>,
    limit: Option<u64>,
    lock_path: Option<PathBuf>,
}

impl QueueProcessor {
    pub fn new(ident: impl Into<String>, factory: Arc<ModelFactory>) -> Self {
        Self {
            ident: ident.into(),
            factory,
            queue_id: None,
            limit: None,
            lock_path: None,
        }
    }

    /// Only process items of this queue.
    #[must_use]
    pub fn with_queue_id(mut self, queue_id: impl Into<String>) -> Self {
        self.queue_id = Some(queue_id.into());
        self
    }

    /// Process at most `limit` items per run. A limit of zero processes
    /// nothing.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Hold a `ProcessLock` at `path` for the duration of each run.
    #[must_use]
    pub fn with_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    /// Loader selecting unprocessed items due now, capped at the limit.
    ///
    /// `processed = false AND processing_date IS NULL
    ///  OR processed = false AND processing_date <= now`
    #[must_use]
    pub fn loader(&self) -> CollectionLoader {
        let now = json!(now_datetime());
        let mut due = vec![
            Filter::eq("processed", json!(false)),
            Filter::new("processing_date", Operator::IsNull, Value::Null),
            Filter::eq("processed", json!(false)).or(),
            Filter::new("processing_date", Operator::Lte, now),
        ];
        if let Some(queue_id) = &self.queue_id {
            due.insert(2, Filter::eq("queue_id", json!(queue_id)));
            due.push(Filter::eq("queue_id", json!(queue_id)));
        }

        let mut loader = CollectionLoader::new(self.ident.clone(), self.factory.clone());
        for filter in due {
            loader = loader.filter(filter);
        }
        if let Some(window) = self.limit.and_then(|limit| Pagination::new(1, limit).ok()) {
            loader = loader.paginate(window);
        }
        let key = self.factory.create(&self.ident).map(|m| m.key());
        loader.order(Order::asc(key.unwrap_or_else(|_| "id".to_string())))
    }

    /// Run `handler` over every due item.
    ///
    /// A handler error or a failed status update counts the item as a
    /// failure; the remaining items are still processed.
    pub fn process<F>(&self, mut handler: F) -> Result<QueueReport, CharcoalError>
    where
        F: FnMut(&mut Model) -> Result<ItemOutcome, CharcoalError>,
    {
        let _lock = match &self.lock_path {
            Some(path) => Some(ProcessLock::acquire(path)?),
            None => None,
        };

        let mut report = QueueReport::default();
        if self.limit == Some(0) {
            return Ok(report);
        }
        let items = self.loader().load()?.into_vec();

        for mut item in items {
            let id = item.id().cloned().unwrap_or(Value::Null);
            let outcome = handler(&mut item).and_then(|outcome| {
                if outcome == ItemOutcome::Processed {
                    mark_processed(&mut item)?;
                }
                Ok(outcome)
            });
            match outcome {
                Ok(ItemOutcome::Processed) => report.success.push(id),
                Ok(ItemOutcome::Skipped) => report.skipped.push(id),
                Err(e) => {
                    tracing::warn!("Queue item {} of {} failed: {}", id, self.ident, e);
                    report.failure.push(id);
                }
            }
        }

        tracing::info!(
            "Processed queue {}: {} success, {} failure, {} skipped",
            self.ident,
            report.success.len(),
            report.failure.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}

fn mark_processed(item: &mut Model) -> Result<(), CharcoalError> {
    item.set("processed", json!(true))?;
    item.set("processed_date", json!(now_datetime()))?;
    item.update(Some(&["processed".to_string(), "processed_date".to_string()]))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::metadata::MetadataLoader;
    use crate::model::{model_factory, ModelDependencies, MODEL_CLASS};
    use crate::source::MemoryConnection;
    use crate::translation::Locales;
    use tempfile::TempDir;

    fn queue_factory(items: &[Value]) -> Arc<ModelFactory> {
        let mut loader = MetadataLoader::new("/nonexistent", Vec::new());
        loader.register(
            "mail/queue-item",
            json!({"properties": {
                "id": {"type": "id"},
                "queue_id": {"type": "string"},
                "recipient": {"type": "string"},
                "processed": {"type": "boolean", "default": false},
                "processing_date": {"type": "date-time", "allow_null": true},
                "processed_date": {"type": "date-time", "allow_null": true}
            }}),
        );
        let deps = ModelDependencies::new(
            Arc::new(loader),
            Arc::new(MemoryConnection::new()),
            Locales::default(),
        );
        let mut factory = model_factory(deps);
        factory.add_class_to_map("mail/queue-item", MODEL_CLASS);

        let source = factory.arguments().source("mail/queue-item").unwrap();
        source.create_table().unwrap();
        for item in items {
            let mut model = factory.create("mail/queue-item").unwrap();
            model.set_data(item.as_object().unwrap()).unwrap();
            model.save().unwrap();
        }
        Arc::new(factory)
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.lock");

        let first = ProcessLock::acquire(&path).unwrap();
        assert!(matches!(ProcessLock::acquire(&path), Err(CharcoalError::Lock(_))));
        drop(first);
        assert!(!path.exists());
        assert!(ProcessLock::acquire(&path).is_ok());
    }

    #[test]
    fn failures_are_tallied_and_batch_continues() {
        let factory = queue_factory(&[
            json!({"recipient": "a@example.com"}),
            json!({"recipient": "bad"}),
            json!({"recipient": "c@example.com"}),
            json!({"recipient": "later@example.com"}),
        ]);
        let processor = QueueProcessor::new("mail/queue-item", factory.clone());

        let report = processor
            .process(|item| match item.get("recipient").and_then(Value::as_str) {
                Some("bad") => Err(CharcoalError::Persistence("bounced".into())),
                Some("later@example.com") => Ok(ItemOutcome::Skipped),
                _ => Ok(ItemOutcome::Processed),
            })
            .unwrap();

        assert_eq!(report.success, vec![json!(1), json!(3)]);
        assert_eq!(report.failure, vec![json!(2)]);
        assert_eq!(report.skipped, vec![json!(4)]);

        let again = processor.process(|_| Ok(ItemOutcome::Processed)).unwrap();
        assert_eq!(again.success, vec![json!(2), json!(4)]);
        assert_eq!(processor.process(|_| Ok(ItemOutcome::Processed)).unwrap().total(), 0);
    }

    #[test]
    fn future_items_wait_and_queue_id_filters() {
        let factory = queue_factory(&[
            json!({"queue_id": "news", "processing_date": "2000-01-01 00:00:00"}),
            json!({"queue_id": "news", "processing_date": "2999-01-01 00:00:00"}),
            json!({"queue_id": "alerts"}),
        ]);
        let report = QueueProcessor::new("mail/queue-item", factory)
            .with_queue_id("news")
            .process(|_| Ok(ItemOutcome::Processed))
            .unwrap();
        assert_eq!(report.success, vec![json!(1)]);
    }

    #[test]
    fn limit_bounds_the_selection() {
        let items: Vec<Value> = (0..5).map(|i| json!({"recipient": format!("{}@example.com", i)})).collect();
        let factory = queue_factory(&items);
        let processor = QueueProcessor::new("mail/queue-item", factory.clone()).with_limit(2);
        assert_eq!(processor.loader().query().window(), (0, Some(2)));

        let first = processor.process(|_| Ok(ItemOutcome::Processed)).unwrap();
        assert_eq!(first.success, vec![json!(1), json!(2)]);
        let second = processor.process(|_| Ok(ItemOutcome::Processed)).unwrap();
        assert_eq!(second.success, vec![json!(3), json!(4)]);

        let idle = QueueProcessor::new("mail/queue-item", factory).with_limit(0);
        assert_eq!(idle.process(|_| Ok(ItemOutcome::Processed)).unwrap().total(), 0);
    }

    #[test]
    fn locked_run_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mail.lock");
        let factory = queue_factory(&[json!({"recipient": "a@example.com"})]);
        let processor = QueueProcessor::new("mail/queue-item", factory).with_lock(&path);

        let held = ProcessLock::acquire(&path).unwrap();
        assert!(matches!(
            processor.process(|_| Ok(ItemOutcome::Processed)),
            Err(CharcoalError::Lock(_))
        ));
        drop(held);
        assert_eq!(processor.process(|_| Ok(ItemOutcome::Processed)).unwrap().success.len(), 1);
        assert!(!path.exists());
    }
}
