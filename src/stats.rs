use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::StatsSnapshot;
use crate::service::ApplicationService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageLabel {
    Applied,
    Interviewed,
    Offered,
}

impl fmt::Display for StageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageLabel::Applied => "Applied",
            StageLabel::Interviewed => "Interviewed",
            StageLabel::Offered => "Offered",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunnelStage {
    pub label: StageLabel,
    pub raw_count: u64,
    pub percentage_of_applied: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Funnel {
    pub stages: [FunnelStage; 3],
    pub overall_conversion_pct: f64,
}

/// `count / base` as a percentage rounded to one decimal place, halves away
/// from zero. Worked in integer tenths so exact ties such as 23/80 = 28.75%
/// round up instead of falling on whichever side float error puts them.
pub fn round1(count: u64, base: u64) -> f64 {
    if base == 0 {
        return 0.0;
    }
    let (count, base) = (count as u128, base as u128);
    let tenths = (2 * 1000 * count + base) / (2 * base);
    tenths as f64 / 10.0
}

/// Derive the Applied -> Interviewed -> Offered funnel.
///
/// Applied is the base and is always 100%. Percentages are not clamped, so
/// inconsistent upstream counts (more interviews than applications) show up
/// as values above 100 instead of being hidden.
pub fn compute_funnel(snapshot: &StatsSnapshot) -> Funnel {
    let applied = snapshot.applied;
    Funnel {
        stages: [
            FunnelStage {
                label: StageLabel::Applied,
                raw_count: applied,
                percentage_of_applied: 100.0,
            },
            FunnelStage {
                label: StageLabel::Interviewed,
                raw_count: snapshot.interviewed,
                percentage_of_applied: round1(snapshot.interviewed, applied),
            },
            FunnelStage {
                label: StageLabel::Offered,
                raw_count: snapshot.offered,
                percentage_of_applied: round1(snapshot.offered, applied),
            },
        ],
        overall_conversion_pct: round1(snapshot.offered, applied),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardState {
    Loading,
    Ready { snapshot: StatsSnapshot, funnel: Funnel },
    Failed(String),
}

/// Fetches the stats record and keeps the derived funnel.
pub struct StatsDeriver<S: ApplicationService> {
    service: Arc<S>,
    state: DashboardState,
}

impl<S: ApplicationService> StatsDeriver<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            state: DashboardState::Loading,
        }
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub async fn refresh(&mut self) -> &DashboardState
    where
        S: 'static,
    {
        self.state = DashboardState::Loading;
        self.state = self.fetch().await;
        &self.state
    }

    /// Fetch and derive without borrowing the deriver, so a UI can run it
    /// on a spawned task and hand the result back with [`Self::apply`].
    pub fn fetch(&self) -> impl Future<Output = DashboardState> + Send + 'static
    where
        S: 'static,
    {
        let service = self.service.clone();
        async move {
            debug!("fetching stats");
            match service.stats().await {
                Ok(snapshot) => {
                    let funnel = compute_funnel(&snapshot);
                    info!(
                        applied = snapshot.applied,
                        offered = snapshot.offered,
                        conversion = funnel.overall_conversion_pct,
                        "stats loaded"
                    );
                    DashboardState::Ready { snapshot, funnel }
                }
                Err(e) => {
                    warn!(error = %e, "failed to load stats");
                    DashboardState::Failed(e.to_string())
                }
            }
        }
    }

    pub fn apply(&mut self, state: DashboardState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::testing::FakeService;

    fn snapshot(applied: u64, interviewed: u64, offered: u64) -> StatsSnapshot {
        StatsSnapshot {
            total: applied,
            rejected: 0,
            interviewed,
            offered,
            applied,
        }
    }

    fn percentages(funnel: &Funnel) -> Vec<f64> {
        funnel.stages.iter().map(|s| s.percentage_of_applied).collect()
    }

    #[test]
    fn test_reference_funnel() {
        let funnel = compute_funnel(&snapshot(100, 50, 10));
        let labels: Vec<StageLabel> = funnel.stages.iter().map(|s| s.label).collect();
        assert_eq!(
            labels,
            vec![StageLabel::Applied, StageLabel::Interviewed, StageLabel::Offered]
        );
        let counts: Vec<u64> = funnel.stages.iter().map(|s| s.raw_count).collect();
        assert_eq!(counts, vec![100, 50, 10]);
        assert_eq!(percentages(&funnel), vec![100.0, 50.0, 10.0]);
        assert_eq!(funnel.overall_conversion_pct, 10.0);
    }

    #[test]
    fn test_zero_applied_yields_zeroes_but_base_is_100() {
        for (interviewed, offered) in [(0, 0), (3, 0), (5, 2)] {
            let funnel = compute_funnel(&snapshot(0, interviewed, offered));
            assert_eq!(funnel.stages[0].percentage_of_applied, 100.0);
            assert_eq!(funnel.stages[1].percentage_of_applied, 0.0);
            assert_eq!(funnel.stages[2].percentage_of_applied, 0.0);
            assert_eq!(funnel.overall_conversion_pct, 0.0);
        }
    }

    #[test]
    fn test_no_clamping_above_100() {
        for (applied, interviewed) in [(1, 2), (4, 5), (10, 37)] {
            let funnel = compute_funnel(&snapshot(applied, interviewed, 0));
            assert!(funnel.stages[1].percentage_of_applied > 100.0);
        }
        let funnel = compute_funnel(&snapshot(4, 5, 6));
        assert_eq!(funnel.stages[1].percentage_of_applied, 125.0);
        assert_eq!(funnel.overall_conversion_pct, 150.0);
    }

    #[test]
    fn test_rounding_one_decimal_half_away_from_zero() {
        assert_eq!(round1(1, 3), 33.3);
        assert_eq!(round1(2, 3), 66.7);
        assert_eq!(round1(1, 16), 6.3);
        assert_eq!(round1(0, 7), 0.0);
        assert_eq!(round1(5, 0), 0.0);

        // exact ties that are not representable in binary
        assert_eq!(round1(23, 80), 28.8);
        assert_eq!(round1(41, 80), 51.3);
        assert_eq!(round1(51, 80), 63.8);

        let funnel = compute_funnel(&snapshot(80, 41, 23));
        assert_eq!(percentages(&funnel), vec![100.0, 51.3, 28.8]);
        assert_eq!(funnel.overall_conversion_pct, 28.8);

        let funnel = compute_funnel(&snapshot(3, 2, 1));
        assert_eq!(percentages(&funnel), vec![100.0, 66.7, 33.3]);
    }

    #[test]
    fn test_rounding_matches_exact_fraction() {
        // tenths t must satisfy (2t - 1) * base <= 2000 * count < (2t + 1) * base
        for base in 1..=400u64 {
            for count in 0..=base {
                let t = (round1(count, base) * 10.0).round() as u64;
                let twice = 2000 * count;
                assert!(
                    (2 * t).saturating_sub(1) * base <= twice && twice < (2 * t + 1) * base,
                    "{}/{} rounded to {}",
                    count,
                    base,
                    round1(count, base)
                );
            }
        }
    }

    #[test]
    fn test_rounding_huge_counts() {
        assert_eq!(round1(u64::MAX, u64::MAX), 100.0);
        assert_eq!(round1(u64::MAX / 2, u64::MAX), 50.0);
    }

    #[tokio::test]
    async fn test_deriver_ready_after_fetch() {
        let service = FakeService::new();
        service.set_stats(StatsSnapshot {
            total: 20,
            rejected: 5,
            interviewed: 8,
            offered: 2,
            applied: 15,
        });
        let mut deriver = StatsDeriver::new(Arc::new(service));
        assert_eq!(deriver.state(), &DashboardState::Loading);

        match deriver.refresh().await {
            DashboardState::Ready { snapshot, funnel } => {
                assert_eq!(snapshot.rejected, 5);
                assert_eq!(funnel.overall_conversion_pct, 13.3);
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deriver_failure_is_not_zeroes() {
        let service = FakeService::new();
        service.fail("stats", TrackerError::NetworkFailure("connection refused".to_string()));
        let mut deriver = StatsDeriver::new(Arc::new(service.clone()));

        let state = deriver.refresh().await.clone();
        assert!(matches!(state, DashboardState::Failed(ref msg) if msg.contains("connection refused")));

        service.heal("stats");
        assert!(matches!(deriver.refresh().await, DashboardState::Ready { .. }));
    }

    #[tokio::test]
    async fn test_fetch_runs_on_spawned_task() {
        let (service, gate) = FakeService::new().gated();
        service.set_stats(snapshot(10, 4, 1));
        let mut deriver = StatsDeriver::new(Arc::new(service));

        let task = tokio::spawn(deriver.fetch());
        // the deriver is free while the request is in flight
        assert_eq!(deriver.state(), &DashboardState::Loading);
        gate.add_permits(1);
        deriver.apply(task.await.unwrap());

        match deriver.state() {
            DashboardState::Ready { funnel, .. } => assert_eq!(funnel.overall_conversion_pct, 10.0),
            other => panic!("expected Ready, got {:?}", other),
        }
    }
}
