//! Request dispatch.
//!
//! Live values come from the controller's in-memory state. Persisted history
//! comes from the authoritative store: the primary while it is healthy, the
//! replica once failed over. A failing primary read falls back to the replica.

use crate::control::controller::Controller;
use crate::core::time::Clock;
use crate::gateway::api::{
    GatewayError, GatewayReply, GatewayRequest, GatewayResponse, HealthReply, HistoryReply,
    IntersectionStatusReply, SummaryReply,
};
use crate::ops::metrics::bump;
use crate::storage::store::{StoreFuture, TrafficStore};
use std::sync::Arc;

pub const DEFAULT_RECENT_EVENTS: usize = 10;
pub const DEFAULT_RECENT_OVERRIDES: usize = 10;
const DEFAULT_REQUESTER: &str = "gateway";

pub struct GatewayService<C: Clock> {
    controller: Arc<Controller<C>>,
    recent_events: usize,
}

impl<C: Clock> GatewayService<C> {
    pub fn new(controller: Arc<Controller<C>>) -> Self {
        Self {
            controller,
            recent_events: DEFAULT_RECENT_EVENTS,
        }
    }

    pub fn with_recent_events(mut self, limit: usize) -> Self {
        self.recent_events = limit;
        self
    }

    pub fn controller(&self) -> &Arc<Controller<C>> {
        &self.controller
    }

    /// Decode and serve one request line.
    pub async fn handle_line(&self, line: &str) -> GatewayResponse {
        match serde_json::from_str::<GatewayRequest>(line) {
            Ok(request) => self.handle(request).await,
            Err(err) => {
                bump(&self.controller.metrics().gateway_requests);
                self.reject(GatewayError::MalformedRequest(err.to_string()), "UNKNOWN")
            }
        }
    }

    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        bump(&self.controller.metrics().gateway_requests);
        let name = request.name();
        match self.dispatch(request).await {
            Ok(result) => GatewayResponse::Ok { result },
            Err(error) => self.reject(error, name),
        }
    }

    fn reject(&self, error: GatewayError, request: &str) -> GatewayResponse {
        bump(&self.controller.metrics().gateway_errors);
        tracing::warn!(request, "gateway request failed: {error}");
        GatewayResponse::Error { error }
    }

    async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayReply, GatewayError> {
        match request {
            GatewayRequest::IntersectionStatus { intersection } => {
                let view = self.controller.status(&intersection)?;
                let id = view.intersection.clone();
                let limit = self.recent_events;
                let reply = match self.read(|store| store.recent_events(id.clone(), limit)).await {
                    Ok((source, recent_events)) => {
                        let last_recorded_change = self
                            .read(|store| store.latest_semaphore(id.clone()))
                            .await
                            .ok()
                            .and_then(|(_, change)| change);
                        IntersectionStatusReply {
                            view,
                            recent_events,
                            last_recorded_change,
                            source: Some(source),
                            store_error: None,
                        }
                    }
                    Err(err) => IntersectionStatusReply {
                        view,
                        recent_events: Vec::new(),
                        last_recorded_change: None,
                        source: None,
                        store_error: Some(err.to_string()),
                    },
                };
                Ok(GatewayReply::IntersectionStatus(reply))
            }
            GatewayRequest::CongestionHistory {
                from,
                to,
                intersection,
            } => {
                if from > to {
                    return Err(GatewayError::MalformedRequest(format!(
                        "history window starts after it ends ({from} > {to})"
                    )));
                }
                let intersection = match intersection {
                    Some(name) => Some(self.controller.resolve(&name)?),
                    None => None,
                };
                let (source, records) = self
                    .read(|store| store.congestion_history(from, to, intersection.clone()))
                    .await?;
                Ok(GatewayReply::CongestionHistory(HistoryReply {
                    source,
                    from,
                    to,
                    records,
                }))
            }
            GatewayRequest::ForceGreenWave {
                route,
                reason,
                requested_by,
            } => {
                let reason = reason.unwrap_or_else(|| "priority override".to_string());
                let requested_by = requested_by.unwrap_or_else(|| DEFAULT_REQUESTER.to_string());
                let outcome = self
                    .controller
                    .force_green_wave(&route, &reason, &requested_by)
                    .await?;
                Ok(GatewayReply::GreenWave(outcome))
            }
            GatewayRequest::ManualSemaphoreChange {
                intersection,
                color,
                requested_by,
            } => {
                let requested_by = requested_by.unwrap_or_else(|| DEFAULT_REQUESTER.to_string());
                let outcome = self
                    .controller
                    .manual_change(&intersection, color, &requested_by)
                    .await?;
                Ok(GatewayReply::ManualChange(outcome))
            }
            GatewayRequest::SystemSummary => {
                let (totals, source, store_error) = match self.read(|store| store.summary()).await {
                    Ok((source, totals)) => (Some(totals), Some(source), None),
                    Err(err) => (None, None, Some(err.to_string())),
                };
                let recent_overrides = if store_error.is_none() {
                    self.read(|store| store.priority_actions(DEFAULT_RECENT_OVERRIDES))
                        .await
                        .map(|(_, actions)| actions)
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                Ok(GatewayReply::Summary(SummaryReply {
                    failover: self.controller.coordinator().failover().status(),
                    intersections: self.controller.grid().len(),
                    states: self.controller.state_counts(),
                    totals,
                    recent_overrides,
                    source,
                    store_error,
                    counters: self.controller.metrics().snapshot(),
                    alerts: self.controller.audit().len(),
                }))
            }
            GatewayRequest::HealthCheck => Ok(GatewayReply::Health(HealthReply {
                live: true,
                failover: self.controller.coordinator().failover().status(),
                as_of: self.controller.clock().now(),
            })),
        }
    }

    /// Run `op` against the authoritative store, falling back to the replica
    /// when the primary fails. Returns the name of the store that answered.
    async fn read<'a, T, F>(&'a self, op: F) -> Result<(String, T), GatewayError>
    where
        F: Fn(&'a dyn TrafficStore) -> StoreFuture<'a, T>,
    {
        let coordinator = self.controller.coordinator();
        let replica: &'a dyn TrafficStore = coordinator.replica().as_ref();
        if coordinator.failover().is_healthy() {
            let primary: &'a dyn TrafficStore = coordinator.primary().as_ref();
            match op(primary).await {
                Ok(value) => return Ok((primary.name().to_string(), value)),
                Err(err) => {
                    tracing::warn!(store = primary.name(), "primary read failed, using replica: {err}");
                }
            }
        }
        op(replica)
            .await
            .map(|value| (replica.name().to_string(), value))
            .map_err(|err| GatewayError::StoreUnavailable(err.to_string()))
    }
}
