//! Lazily hydrated collections.
//!
//! Rows are fetched one page at a time with `LIMIT`/`OFFSET`; at most one
//! page of raw rows is resident while iterating. Every call to
//! [`LazyCollection::iter`] restarts from the first row with a fresh query.

use super::CollectionLoader;
use crate::model::Model;
use crate::source::{Row, Source};
use crate::types::CharcoalError;
use std::collections::VecDeque;
use std::sync::Arc;

/// A restartable, lazily hydrated result set.
pub struct LazyCollection<'a> {
    loader: &'a mut CollectionLoader,
    chunk: u64,
}

impl<'a> LazyCollection<'a> {
    pub(super) fn new(loader: &'a mut CollectionLoader, chunk: u64) -> Self {
        Self {
            loader,
            chunk: chunk.max(1),
        }
    }

    /// Rows fetched per query.
    #[must_use]
    pub fn chunk(&self) -> u64 {
        self.chunk
    }

    /// Start a new pass over the result set.
    ///
    /// Fails before any row is read when the type can not be built.
    pub fn iter(&mut self) -> Result<LazyIter<'_>, CharcoalError> {
        let prototype = self.loader.prototype()?;
        let source = prototype.source()?.clone();
        let (offset, limit) = self.loader.query().window();
        Ok(LazyIter {
            loader: &mut *self.loader,
            prototype,
            source,
            chunk: self.chunk,
            offset,
            remaining: limit,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }
}

/// One pass over a `LazyCollection`.
pub struct LazyIter<'a> {
    loader: &'a mut CollectionLoader,
    prototype: Model,
    source: Arc<dyn Source>,
    chunk: u64,
    offset: u64,
    remaining: Option<u64>,
    buffer: VecDeque<Row>,
    exhausted: bool,
}

impl LazyIter<'_> {
    fn fetch(&mut self) -> Result<(), CharcoalError> {
        let limit = match self.remaining {
            Some(remaining) => remaining.min(self.chunk),
            None => self.chunk,
        };
        if limit == 0 {
            self.exhausted = true;
            return Ok(());
        }

        let rows = self
            .source
            .load_rows(self.loader.query(), self.offset, Some(limit))?;
        let fetched = rows.len() as u64;
        tracing::debug!(
            "Fetched {} rows of {} at offset {}",
            fetched,
            self.source.table(),
            self.offset
        );

        self.offset = self.offset.saturating_add(fetched);
        self.remaining = self.remaining.map(|r| r.saturating_sub(fetched));
        if fetched < limit {
            self.exhausted = true;
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

impl Iterator for LazyIter<'_> {
    type Item = Result<Model, CharcoalError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                match self.loader.hydrate_row(&self.prototype, self.source.as_ref(), row) {
                    Some(model) => return Some(Ok(model)),
                    None => continue,
                }
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}
