//! Scroll scans over every match of a query

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::ScanConfig;
use crate::domain::SearchEngine;
use crate::error::{Result, StoreError};

/// Scroll parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    /// Query clause; `match_all` when unset
    pub query: Option<Value>,
    /// `_source` field list
    pub fields: Option<Vec<String>>,
    pub page_size: usize,
    pub keep_alive: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

impl ScanOptions {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            query: None,
            fields: None,
            page_size: config.page_size,
            keep_alive: config.keep_alive.clone(),
        }
    }

    pub fn with_query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn body(&self, slice: Option<(usize, usize)>) -> Value {
        let mut body = Map::new();
        body.insert(
            "query".into(),
            self.query.clone().unwrap_or_else(|| json!({ "match_all": {} })),
        );
        if let Some(fields) = &self.fields {
            body.insert("_source".into(), json!(fields));
        }
        if let Some((id, max)) = slice {
            body.insert("slice".into(), json!({ "id": id, "max": max }));
        }
        Value::Object(body)
    }
}

/// Hit-by-hit scroll. The scroll context is cleared when the scan is
/// exhausted or dropped.
pub struct Scan {
    engine: Arc<dyn SearchEngine>,
    index: String,
    body: Value,
    options: ScanOptions,
    scroll_id: Option<String>,
    buffer: VecDeque<Value>,
    started: bool,
    finished: bool,
}

impl Scan {
    pub fn new(engine: Arc<dyn SearchEngine>, index: &str, options: ScanOptions) -> Self {
        let body = options.body(None);
        Self::with_body(engine, index, body, options)
    }

    fn with_body(engine: Arc<dyn SearchEngine>, index: &str, body: Value, options: ScanOptions) -> Self {
        Self {
            engine,
            index: index.to_string(),
            body,
            options,
            scroll_id: None,
            buffer: VecDeque::new(),
            started: false,
            finished: false,
        }
    }

    fn fetch(&mut self) -> Result<()> {
        let page = if self.started {
            let scroll_id = self
                .scroll_id
                .clone()
                .ok_or_else(|| StoreError::serialization("scroll page carried no scroll id"))?;
            self.engine.next_scroll(&scroll_id, &self.options.keep_alive)?
        } else {
            self.started = true;
            self.engine.open_scroll(
                &self.index,
                &self.body,
                self.options.page_size.max(1),
                &self.options.keep_alive,
            )?
        };
        if page.scroll_id.is_some() {
            self.scroll_id = page.scroll_id;
        }
        if page.hits.is_empty() {
            self.finish();
        }
        self.buffer.extend(page.hits);
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(scroll_id) = self.scroll_id.take() {
            if let Err(err) = self.engine.clear_scroll(&scroll_id) {
                debug!(error = %err, "Failed to clear scroll");
            }
        }
    }
}

impl Iterator for Scan {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hit) = self.buffer.pop_front() {
                return Some(Ok(hit));
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.fetch() {
                self.finish();
                return Some(Err(err));
            }
        }
    }
}

impl Drop for Scan {
    fn drop(&mut self) {
        if !self.finished {
            self.finish();
        }
    }
}

/// Pages of up to `page_size` hits; an empty trailing page is never
/// yielded. A scroll error part-way through a page yields the hits
/// gathered so far, then the error.
pub struct BatchScan {
    inner: Scan,
    page_size: usize,
    pending_error: Option<StoreError>,
}

impl BatchScan {
    pub fn new(inner: Scan) -> Self {
        let page_size = inner.options.page_size;
        Self::with_page_size(inner, page_size)
    }

    /// Pages sized independently of the scroll page size
    pub fn with_page_size(inner: Scan, page_size: usize) -> Self {
        Self {
            inner,
            page_size: page_size.max(1),
            pending_error: None,
        }
    }
}

impl Iterator for BatchScan {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            return Some(Err(err));
        }
        let mut page = Vec::with_capacity(self.page_size);
        while page.len() < self.page_size {
            match self.inner.next() {
                Some(Ok(hit)) => page.push(hit),
                Some(Err(err)) if page.is_empty() => return Some(Err(err)),
                Some(Err(err)) => {
                    self.pending_error = Some(err);
                    break;
                }
                None => break,
            }
        }
        if page.is_empty() {
            None
        } else {
            Some(Ok(page))
        }
    }
}

/// Scroll `slices` disjoint slices in parallel on `workers` threads
/// (default one per slice), calling `handler` for every hit. Returns the
/// number of hits handled.
pub fn sliced_scan<F>(
    engine: &Arc<dyn SearchEngine>,
    index: &str,
    options: &ScanOptions,
    slices: usize,
    workers: Option<usize>,
    handler: F,
) -> Result<usize>
where
    F: Fn(Value) + Send + Sync,
{
    let slices = slices.max(1);
    let workers = workers.unwrap_or(slices).max(1);
    let handled = AtomicUsize::new(0);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("searchstore-scan-{}", i))
        .build()
        .map_err(|e| StoreError::transport(format!("Failed to build scan worker pool: {}", e)))?;

    pool.install(|| {
        (0..slices).into_par_iter().try_for_each(|slice_id| {
            let slice = (slices > 1).then_some((slice_id, slices));
            let body = options.body(slice);
            let scan = Scan::with_body(Arc::clone(engine), index, body, options.clone());
            for hit in scan {
                handler(hit?);
                handled.fetch_add(1, Ordering::Relaxed);
            }
            Ok::<(), StoreError>(())
        })
    })?;

    let handled = handled.into_inner();
    info!(index, slices, workers, handled, "Sliced scan complete");
    Ok(handled)
}
