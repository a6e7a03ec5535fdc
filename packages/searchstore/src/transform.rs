//! Result transforms
//!
//! A transform maps a raw engine response to whatever the caller wants back
//! for its key. Query batches store one per key and apply it after
//! demultiplexing; immediate calls apply it inline.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::response;

/// Shared result transform
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Wrap a closure as a [`Transform`]
pub fn transform<F>(f: F) -> Transform
where
    F: Fn(Value) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which built-in steps to compose
#[derive(Clone, Default)]
pub struct TransformOptions {
    /// Replace the response with the list of hit sources
    pub hits: bool,
    /// Keep only the first element (or null) of the list
    pub just_one: bool,
    /// Copy `_id` into each source as `uid` before extraction
    pub include_id: bool,
    /// Applied last
    pub custom: Option<Transform>,
}

impl fmt::Debug for TransformOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformOptions")
            .field("hits", &self.hits)
            .field("just_one", &self.just_one)
            .field("include_id", &self.include_id)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl TransformOptions {
    pub fn hits() -> Self {
        Self {
            hits: true,
            ..Self::default()
        }
    }

    pub fn first_hit() -> Self {
        Self {
            hits: true,
            just_one: true,
            ..Self::default()
        }
    }

    pub fn with_ids(mut self) -> Self {
        self.include_id = true;
        self
    }

    pub fn with_custom(mut self, custom: Transform) -> Self {
        self.custom = Some(custom);
        self
    }

    fn is_identity(&self) -> bool {
        !self.hits && !self.just_one && !self.include_id && self.custom.is_none()
    }
}

/// Compose the selected steps: include ids, extract hit sources, take the
/// first, then the custom transform. `None` when nothing is selected.
pub fn build_transform(options: TransformOptions) -> Option<Transform> {
    if options.is_identity() {
        return None;
    }

    Some(Arc::new(move |mut value: Value| {
        if options.include_id {
            value = response::include_ids(value);
        }
        if options.hits {
            value = Value::Array(response::sources_from_response(&value));
        }
        if options.just_one {
            value = match value {
                Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
                other => other,
            };
        }
        if let Some(custom) = &options.custom {
            value = custom(value);
        }
        value
    }))
}

/// Apply an optional transform
pub fn apply(transform: Option<&Transform>, value: Value) -> Value {
    match transform {
        Some(f) => f(value),
        None => value,
    }
}
