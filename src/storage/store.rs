use crate::control::semaphore::SemaphoreTransition;
use crate::grid::IntersectionId;
use crate::ingest::event::SensorReading;
use crate::storage::records::{DecisionRecord, PriorityActionRecord, StoreSummary, WriteRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store request timed out")]
    Timeout,
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store protocol error: {0}")]
    Protocol(String),
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Read-side operations every store answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum StoreQuery {
    CongestionHistory {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        #[serde(default)]
        intersection: Option<IntersectionId>,
    },
    RecentEvents {
        intersection: IntersectionId,
        limit: usize,
    },
    LatestSemaphore {
        intersection: IntersectionId,
    },
    PriorityActions {
        limit: usize,
    },
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "data", rename_all = "snake_case")]
pub enum StoreReply {
    History(Vec<DecisionRecord>),
    Events(Vec<SensorReading>),
    Semaphore(Option<SemaphoreTransition>),
    PriorityActions(Vec<PriorityActionRecord>),
    Summary(StoreSummary),
}

impl StoreReply {
    fn kind(&self) -> &'static str {
        match self {
            StoreReply::History(_) => "history",
            StoreReply::Events(_) => "events",
            StoreReply::Semaphore(_) => "semaphore",
            StoreReply::PriorityActions(_) => "priority_actions",
            StoreReply::Summary(_) => "summary",
        }
    }
}

fn unexpected(reply: &StoreReply) -> StoreError {
    StoreError::Protocol(format!("unexpected {} reply", reply.kind()))
}

/// Insert/query surface shared by the primary and the replica.
pub trait TrafficStore: Send + Sync {
    fn name(&self) -> &str;

    fn insert<'a>(&'a self, record: &'a WriteRecord) -> StoreFuture<'a, ()>;

    fn query<'a>(&'a self, query: StoreQuery) -> StoreFuture<'a, StoreReply>;

    /// Decision records in `[from, to]`, oldest first.
    fn congestion_history<'a>(
        &'a self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        intersection: Option<IntersectionId>,
    ) -> StoreFuture<'a, Vec<DecisionRecord>> {
        Box::pin(async move {
            let query = StoreQuery::CongestionHistory {
                from,
                to,
                intersection,
            };
            match self.query(query).await? {
                StoreReply::History(rows) => Ok(rows),
                other => Err(unexpected(&other)),
            }
        })
    }

    /// Latest sensor events for one intersection, newest first.
    fn recent_events<'a>(
        &'a self,
        intersection: IntersectionId,
        limit: usize,
    ) -> StoreFuture<'a, Vec<SensorReading>> {
        Box::pin(async move {
            match self
                .query(StoreQuery::RecentEvents {
                    intersection,
                    limit,
                })
                .await?
            {
                StoreReply::Events(rows) => Ok(rows),
                other => Err(unexpected(&other)),
            }
        })
    }

    fn latest_semaphore<'a>(
        &'a self,
        intersection: IntersectionId,
    ) -> StoreFuture<'a, Option<SemaphoreTransition>> {
        Box::pin(async move {
            match self.query(StoreQuery::LatestSemaphore { intersection }).await? {
                StoreReply::Semaphore(row) => Ok(row),
                other => Err(unexpected(&other)),
            }
        })
    }

    /// Latest operator overrides, newest first.
    fn priority_actions<'a>(&'a self, limit: usize) -> StoreFuture<'a, Vec<PriorityActionRecord>> {
        Box::pin(async move {
            match self.query(StoreQuery::PriorityActions { limit }).await? {
                StoreReply::PriorityActions(rows) => Ok(rows),
                other => Err(unexpected(&other)),
            }
        })
    }

    fn summary(&self) -> StoreFuture<'_, StoreSummary> {
        Box::pin(async move {
            match self.query(StoreQuery::Summary).await? {
                StoreReply::Summary(summary) => Ok(summary),
                other => Err(unexpected(&other)),
            }
        })
    }
}
