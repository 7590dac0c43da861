use crate::config::RuleConfig;
use crate::ingest::event::CongestionLevel;
use crate::ingest::normalizer::IntersectionSnapshot;
use serde::Serialize;

/// Outcome of the Normal/Congestion tests against one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Congestion,
    Normal,
    /// Neither test holds on the known metrics, or a required metric is unknown.
    Inconclusive,
}

#[derive(Debug, Clone, Copy)]
pub struct RuleSet {
    thresholds: RuleConfig,
}

impl RuleSet {
    pub fn new(thresholds: RuleConfig) -> Self {
        Self { thresholds }
    }

    /// Congestion is checked first and wins on any single known metric.
    /// Normal needs every metric known and satisfied.
    pub fn evaluate(&self, snapshot: &IntersectionSnapshot) -> Verdict {
        let q = snapshot.queue_length();
        let vp = snapshot.avg_speed();
        let level = snapshot.congestion_level();
        let t = &self.thresholds;

        let congested = q.is_some_and(|q| q >= t.congestion_q_min)
            || vp.is_some_and(|vp| vp <= t.congestion_vp_max)
            || level == Some(CongestionLevel::Alta);
        if congested {
            return Verdict::Congestion;
        }

        match (q, vp, level) {
            (Some(q), Some(vp), Some(level))
                if q < t.normal_q_max && vp > t.normal_vp_min && level != CongestionLevel::Alta =>
            {
                Verdict::Normal
            }
            _ => Verdict::Inconclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::normalizer::Observed;
    use chrono::Utc;

    fn observed<T>(value: T) -> Option<Observed<T>> {
        Some(Observed {
            value,
            observed_at: Utc::now(),
            sensor_id: "test".into(),
        })
    }

    fn snapshot(q: Option<u32>, vp: Option<f64>, level: Option<CongestionLevel>) -> IntersectionSnapshot {
        IntersectionSnapshot {
            queue_length: q.and_then(observed),
            avg_speed: vp.and_then(observed),
            congestion_level: level.and_then(observed),
            vehicle_flow: None,
        }
    }

    fn rules() -> RuleSet {
        RuleSet::new(RuleConfig::default())
    }

    #[test]
    fn free_flowing_traffic_is_normal() {
        let verdict = rules().evaluate(&snapshot(Some(3), Some(40.0), Some(CongestionLevel::Baja)));
        assert_eq!(verdict, Verdict::Normal);
    }

    #[test]
    fn long_queue_is_congestion_regardless_of_other_metrics() {
        let verdict = rules().evaluate(&snapshot(Some(12), Some(45.0), Some(CongestionLevel::Baja)));
        assert_eq!(verdict, Verdict::Congestion);
        assert_eq!(rules().evaluate(&snapshot(Some(12), None, None)), Verdict::Congestion);
    }

    #[test]
    fn each_congestion_signal_triggers_on_its_own() {
        let r = rules();
        assert_eq!(r.evaluate(&snapshot(None, Some(20.0), None)), Verdict::Congestion);
        assert_eq!(
            r.evaluate(&snapshot(Some(0), Some(50.0), Some(CongestionLevel::Alta))),
            Verdict::Congestion
        );
        assert_eq!(r.evaluate(&snapshot(Some(10), None, None)), Verdict::Congestion);
    }

    #[test]
    fn threshold_gap_and_unknowns_are_inconclusive() {
        let r = rules();
        assert_eq!(
            r.evaluate(&snapshot(Some(3), Some(28.0), Some(CongestionLevel::Normal))),
            Verdict::Inconclusive
        );
        assert_eq!(
            r.evaluate(&snapshot(Some(7), Some(40.0), Some(CongestionLevel::Normal))),
            Verdict::Inconclusive
        );
        assert_eq!(r.evaluate(&snapshot(Some(3), Some(40.0), None)), Verdict::Inconclusive);
        assert_eq!(r.evaluate(&IntersectionSnapshot::default()), Verdict::Inconclusive);
    }
}
