//! Ordered, bidirectional transform pipeline.
//!
//! ```text
//!            outbound (declared order)
//!  state ──► T1 ──► T2 ──► … ──► Tn ──► serializer ──► storage
//!  state ◄── T1 ◄── T2 ◄── … ◄── Tn ◄── serializer ◄── storage
//!            inbound (reverse order)
//! ```
//!
//! A pipeline is either fully synchronous or fully asynchronous. Async stages
//! are awaited one after another, never concurrently, and a failing stage
//! aborts the chain for that key only.

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{PersistError, PersistResult, TransformError};

/// Synchronous transform stage.
pub trait Transform: Send + Sync {
    /// State → storage direction.
    fn outbound(&self, value: Value, key: &str) -> Result<Value, TransformError>;
    /// Storage → state direction.
    fn inbound(&self, value: Value, key: &str) -> Result<Value, TransformError>;
}

/// Asynchronous transform stage.
pub trait AsyncTransform: Send + Sync {
    fn outbound<'a>(
        &'a self,
        value: Value,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Value, TransformError>>;

    fn inbound<'a>(
        &'a self,
        value: Value,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Value, TransformError>>;
}

type MapFn = dyn Fn(Value, &str) -> Result<Value, TransformError> + Send + Sync;

/// Transform built from a pair of closures.
pub struct FnTransform {
    outbound: Box<MapFn>,
    inbound: Box<MapFn>,
}

impl FnTransform {
    pub fn new<O, I>(outbound: O, inbound: I) -> Self
    where
        O: Fn(Value, &str) -> Result<Value, TransformError> + Send + Sync + 'static,
        I: Fn(Value, &str) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        Self {
            outbound: Box::new(outbound),
            inbound: Box::new(inbound),
        }
    }
}

impl Transform for FnTransform {
    fn outbound(&self, value: Value, key: &str) -> Result<Value, TransformError> {
        (self.outbound)(value, key)
    }

    fn inbound(&self, value: Value, key: &str) -> Result<Value, TransformError> {
        (self.inbound)(value, key)
    }
}

/// Transform stages in the mode they were configured with.
#[derive(Clone)]
pub enum Transforms {
    Sync(Vec<Arc<dyn Transform>>),
    Async(Vec<Arc<dyn AsyncTransform>>),
}

impl Default for Transforms {
    fn default() -> Self {
        Transforms::Sync(Vec::new())
    }
}

impl std::fmt::Debug for Transforms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transforms::Sync(stages) => write!(f, "Transforms::Sync({} stages)", stages.len()),
            Transforms::Async(stages) => write!(f, "Transforms::Async({} stages)", stages.len()),
        }
    }
}

/// Runs values through the configured stages.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Transforms,
}

impl Pipeline {
    pub fn new(stages: Transforms) -> Self {
        Self { stages }
    }

    pub fn is_async(&self) -> bool {
        matches!(self.stages, Transforms::Async(_))
    }

    pub fn len(&self) -> usize {
        match &self.stages {
            Transforms::Sync(s) => s.len(),
            Transforms::Async(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply every stage outbound, in declared order.
    pub async fn outbound(&self, value: Value, key: &str) -> Result<Value, TransformError> {
        match &self.stages {
            Transforms::Sync(stages) => stages
                .iter()
                .try_fold(value, |acc, stage| stage.outbound(acc, key)),
            Transforms::Async(stages) => {
                let mut acc = value;
                for stage in stages {
                    acc = stage.outbound(acc, key).await?;
                }
                Ok(acc)
            }
        }
    }

    /// Apply every stage inbound, in reverse order.
    pub async fn inbound(&self, value: Value, key: &str) -> Result<Value, TransformError> {
        match &self.stages {
            Transforms::Sync(stages) => stages
                .iter()
                .rev()
                .try_fold(value, |acc, stage| stage.inbound(acc, key)),
            Transforms::Async(stages) => {
                let mut acc = value;
                for stage in stages.iter().rev() {
                    acc = stage.inbound(acc, key).await?;
                }
                Ok(acc)
            }
        }
    }

    /// Synchronous inbound pass, used by serial rehydrate.
    /// Async pipelines are rejected.
    pub fn inbound_sync(&self, value: Value, key: &str) -> PersistResult<Value> {
        match &self.stages {
            Transforms::Sync(stages) => Ok(stages
                .iter()
                .rev()
                .try_fold(value, |acc, stage| stage.inbound(acc, key))?),
            Transforms::Async(_) => Err(Self::async_unsupported()),
        }
    }

    fn async_unsupported() -> PersistError {
        PersistError::Configuration(
            "asynchronous transforms cannot run on the synchronous inbound path".into(),
        )
    }
}
