//! Page-at-a-time iteration over large result sets.
//!
//! Both forms fetch `page_size` rows per round trip, resuming each
//! fetch from the prior page's continuation cursor, and stop on the
//! first short page. A result set whose size is an exact multiple of
//! the page size therefore costs one extra, empty fetch to observe the
//! end.

use std::collections::VecDeque;

use crate::core::{Result, StoreError};
use crate::facade::QueryBuilder;
use crate::query::Row;

/// Drive `callback` over the result set one page at a time. The page
/// index passed to the callback starts at 1. Returns `Ok(false)` when
/// the callback stopped the iteration early.
pub fn chunk_pages<F>(builder: &QueryBuilder, page_size: usize, mut callback: F) -> Result<bool>
where
    F: FnMut(Vec<Row>, usize) -> bool,
{
    if page_size == 0 {
        return Err(StoreError::InvalidQuery("chunk size must be positive".into()));
    }
    let mut page = 1usize;
    let mut cursor: Option<String> = None;
    loop {
        let result = builder.fetch_chunk(page_size, cursor.as_deref())?;
        let fetched = result.len();
        if fetched == 0 {
            return Ok(true);
        }
        let end_cursor = result.end_cursor.clone();
        if !callback(result.rows, page) {
            return Ok(false);
        }
        if fetched < page_size {
            return Ok(true);
        }
        match end_cursor {
            Some(next) => cursor = Some(next),
            // a full page without a continuation position cannot be
            // resumed; treat the set as exhausted
            None => return Ok(true),
        }
        page += 1;
    }
}

/// Row iterator that fetches lazily, one cursor-advancing page per
/// round trip.
///
/// Yields `Err` once and stops if a fetch fails mid-iteration.
pub struct LazyRows {
    builder: QueryBuilder,
    chunk_size: usize,
    buffer: VecDeque<Row>,
    cursor: Option<String>,
    done: bool,
}

impl LazyRows {
    pub(crate) fn new(builder: QueryBuilder, chunk_size: usize) -> Self {
        Self {
            builder,
            chunk_size,
            buffer: VecDeque::new(),
            cursor: None,
            done: false,
        }
    }

    fn refill(&mut self) -> Result<()> {
        let result = self
            .builder
            .fetch_chunk(self.chunk_size, self.cursor.as_deref())?;
        if result.len() < self.chunk_size || result.end_cursor.is_none() {
            self.done = true;
        }
        self.cursor = result.end_cursor.clone();
        self.buffer.extend(result.rows);
        Ok(())
    }
}

impl Iterator for LazyRows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.done {
                return None;
            }
            if self.chunk_size == 0 {
                self.done = true;
                return Some(Err(StoreError::InvalidQuery(
                    "chunk size must be positive".into(),
                )));
            }
            if let Err(err) = self.refill() {
                self.done = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
