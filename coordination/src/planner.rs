//! Escalation Planner: deterministic caregiver ranking
//!
//! Pure function: no I/O, no clock, no shared state.
//!
//! ```text
//! roster ──filter available──▶ candidates
//!            │
//!            ├─ fall location + every candidate located → (distance, latency)
//!            └─ otherwise                                → (latency)
//!            │
//!            ▼
//!     stable sort → roster indices
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

use crate::model::{Caregiver, FallSeverity, GeoPoint};

/// Planning errors. An empty roster is not an error; it yields an empty path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("invalid fall location {0}")]
    InvalidFallLocation(GeoPoint),

    #[error("caregiver '{id}' has an invalid location {location}")]
    InvalidCaregiverLocation { id: String, location: GeoPoint },

    #[error("caregiver '{id}' has an invalid response time {value}")]
    InvalidResponseTime { id: String, value: f64 },
}

/// Planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Rank by distance first when positions are known
    pub location_aware: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            location_aware: true,
        }
    }
}

/// One entry of a ranked path, with the figures that produced its rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCaregiver {
    /// Position in the input roster
    pub index: usize,
    pub caregiver_id: String,
    pub name: String,
    /// Distance to the fall, when location ranking was used
    pub distance_km: Option<f64>,
    pub response_time_secs: f64,
}

/// Escalation planner with configurable ranking.
#[derive(Debug, Clone, Default)]
pub struct EscalationPlanner {
    config: PlannerConfig,
}

impl EscalationPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Ordered roster indices to contact.
    pub fn plan(
        &self,
        caregivers: &[Caregiver],
        severity: FallSeverity,
        fall_location: Option<GeoPoint>,
    ) -> Result<Vec<usize>, PlanError> {
        Ok(self
            .rank(caregivers, severity, fall_location)?
            .into_iter()
            .map(|r| r.index)
            .collect())
    }

    /// Ranked path with per-entry distance and latency.
    ///
    /// Severity is accepted so policy can depend on it later; the ranking
    /// itself is severity-independent.
    pub fn rank(
        &self,
        caregivers: &[Caregiver],
        _severity: FallSeverity,
        fall_location: Option<GeoPoint>,
    ) -> Result<Vec<RankedCaregiver>, PlanError> {
        if let Some(loc) = fall_location {
            if !loc.is_valid() {
                return Err(PlanError::InvalidFallLocation(loc));
            }
        }

        let available: Vec<(usize, &Caregiver)> = caregivers
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_available)
            .collect();

        for (_, c) in &available {
            let rt = c.historical_response_time;
            if !rt.is_finite() || rt < 0.0 {
                return Err(PlanError::InvalidResponseTime {
                    id: c.id.clone(),
                    value: rt,
                });
            }
            if let Some(location) = c.location {
                if !location.is_valid() {
                    return Err(PlanError::InvalidCaregiverLocation {
                        id: c.id.clone(),
                        location,
                    });
                }
            }
        }

        // Distance ranking needs a position for the fall and for every candidate.
        let origin = fall_location
            .filter(|_| self.config.location_aware)
            .filter(|_| available.iter().all(|(_, c)| c.location.is_some()));

        let mut ranked: Vec<RankedCaregiver> = available
            .into_iter()
            .map(|(index, c)| RankedCaregiver {
                index,
                caregiver_id: c.id.clone(),
                name: c.name.clone(),
                distance_km: origin
                    .zip(c.location)
                    .map(|(fall, at)| at.distance_km(&fall)),
                response_time_secs: c.historical_response_time,
            })
            .collect();

        // Stable: full ties keep roster order.
        ranked.sort_by(compare_ranked);
        Ok(ranked)
    }
}

fn compare_ranked(a: &RankedCaregiver, b: &RankedCaregiver) -> Ordering {
    let by_distance = match (a.distance_km, b.distance_km) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => Ordering::Equal,
    };
    by_distance.then_with(|| a.response_time_secs.total_cmp(&b.response_time_secs))
}

/// Plan with the default planner configuration.
pub fn plan(
    caregivers: &[Caregiver],
    severity: FallSeverity,
    fall_location: Option<GeoPoint>,
) -> Result<Vec<usize>, PlanError> {
    EscalationPlanner::new().plan(caregivers, severity, fall_location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const FALL: GeoPoint = GeoPoint {
        lat: 12.98,
        lng: 80.03,
    };

    /// A point roughly `km` kilometres north of the fall.
    fn north_of_fall(km: f64) -> GeoPoint {
        GeoPoint::new(FALL.lat + km / 111.195, FALL.lng)
    }

    fn cg(id: &str, available: bool, response: f64) -> Caregiver {
        Caregiver::new(id)
            .with_id(id)
            .with_availability(available)
            .with_response_time(response)
    }

    #[test]
    fn test_empty_roster_gives_empty_plan() {
        assert!(plan(&[], FallSeverity::High, None).unwrap().is_empty());
    }

    #[test]
    fn test_all_unavailable_gives_empty_plan() {
        let roster = vec![cg("a", false, 10.0), cg("b", false, 5.0)];
        assert!(plan(&roster, FallSeverity::Medium, Some(FALL))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_distance_first_scenario() {
        let roster = vec![
            cg("A", true, 30.0).with_location(north_of_fall(5.0)),
            cg("B", true, 10.0).with_location(north_of_fall(2.0)),
            cg("C", false, 5.0).with_location(north_of_fall(0.5)),
        ];
        let path = plan(&roster, FallSeverity::Medium, Some(FALL)).unwrap();
        assert_eq!(path, vec![1, 0]);
    }

    #[test]
    fn test_equal_distance_falls_back_to_latency() {
        let here = north_of_fall(3.0);
        let roster = vec![
            cg("A", true, 30.0).with_location(here),
            cg("B", true, 10.0).with_location(here),
            cg("C", false, 5.0).with_location(here),
        ];
        let path = plan(&roster, FallSeverity::Medium, Some(FALL)).unwrap();
        assert_eq!(path, vec![1, 0]);
    }

    #[test]
    fn test_nearest_wins_even_if_slower() {
        let roster = vec![
            cg("fast-far", true, 5.0).with_location(north_of_fall(9.0)),
            cg("slow-near", true, 90.0).with_location(north_of_fall(1.0)),
        ];
        let path = plan(&roster, FallSeverity::Low, Some(FALL)).unwrap();
        assert_eq!(path, vec![1, 0]);
    }

    #[test]
    fn test_latency_only_without_fall_location() {
        let roster = vec![
            cg("a", true, 65.0).with_location(north_of_fall(0.1)),
            cg("b", true, 25.0).with_location(north_of_fall(8.0)),
            cg("c", true, 45.0),
        ];
        let path = plan(&roster, FallSeverity::High, None).unwrap();
        assert_eq!(path, vec![1, 2, 0]);
    }

    #[test]
    fn test_latency_only_when_any_candidate_unlocated() {
        let roster = vec![
            cg("a", true, 50.0).with_location(north_of_fall(0.1)),
            cg("b", true, 20.0),
        ];
        let path = plan(&roster, FallSeverity::High, Some(FALL)).unwrap();
        assert_eq!(path, vec![1, 0]);
    }

    #[test]
    fn test_unavailable_unlocated_caregiver_does_not_disable_distance() {
        let roster = vec![
            cg("a", true, 5.0).with_location(north_of_fall(7.0)),
            cg("b", true, 50.0).with_location(north_of_fall(1.0)),
            cg("c", false, 1.0),
        ];
        let path = plan(&roster, FallSeverity::High, Some(FALL)).unwrap();
        assert_eq!(path, vec![1, 0]);
    }

    #[test]
    fn test_location_aware_disabled() {
        let roster = vec![
            cg("a", true, 50.0).with_location(north_of_fall(1.0)),
            cg("b", true, 20.0).with_location(north_of_fall(9.0)),
        ];
        let planner = EscalationPlanner::with_config(PlannerConfig {
            location_aware: false,
        });
        let path = planner
            .plan(&roster, FallSeverity::Medium, Some(FALL))
            .unwrap();
        assert_eq!(path, vec![1, 0]);
    }

    #[test]
    fn test_full_ties_keep_roster_order() {
        let roster = vec![
            cg("a", true, 30.0),
            cg("b", true, 30.0),
            cg("c", true, 30.0),
        ];
        assert_eq!(
            plan(&roster, FallSeverity::Low, None).unwrap(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_plan_is_deterministic_without_duplicates() {
        let roster: Vec<Caregiver> = (0..12)
            .map(|i| {
                cg(&format!("c{i}"), i % 3 != 0, ((i * 7) % 5) as f64)
                    .with_location(north_of_fall((i % 4) as f64))
            })
            .collect();

        let first = plan(&roster, FallSeverity::Medium, Some(FALL)).unwrap();
        let second = plan(&roster, FallSeverity::Medium, Some(FALL)).unwrap();
        assert_eq!(first, second);

        let unique: HashSet<_> = first.iter().collect();
        assert_eq!(unique.len(), first.len());
        assert_eq!(first.len(), roster.iter().filter(|c| c.is_available).count());
        assert!(first.iter().all(|&i| roster[i].is_available));
    }

    #[test]
    fn test_rank_reports_distances() {
        let roster = vec![cg("a", true, 10.0).with_location(north_of_fall(2.0))];
        let ranked = EscalationPlanner::new()
            .rank(&roster, FallSeverity::Low, Some(FALL))
            .unwrap();
        let d = ranked[0].distance_km.unwrap();
        assert!((d - 2.0).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let bad_fall = GeoPoint::new(120.0, 0.0);
        assert!(matches!(
            plan(&[], FallSeverity::Low, Some(bad_fall)),
            Err(PlanError::InvalidFallLocation(_))
        ));

        let roster = vec![cg("neg", true, -1.0)];
        assert!(matches!(
            plan(&roster, FallSeverity::Low, None),
            Err(PlanError::InvalidResponseTime { .. })
        ));

        let roster = vec![cg("nan", true, 1.0).with_location(GeoPoint::new(f64::NAN, 1.0))];
        assert!(matches!(
            plan(&roster, FallSeverity::Low, None),
            Err(PlanError::InvalidCaregiverLocation { .. })
        ));
    }
}
