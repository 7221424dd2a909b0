use std::collections::HashMap;

use tokio::sync::RwLock;

/// Decides whether a new query from `team` may be admitted given current
/// load. Grounded in `examples/original_source/overlay_core/strategies.py`'s
/// `StrictPerTeamFairness` / `WeightedFairness` / `HybridFairness`.
pub trait FairnessStrategy: Send + Sync {
    fn should_admit(&self, team_active: u32, other_teams_total: u32, per_team_limit: u32) -> bool;

    fn name(&self) -> &'static str;
}

/// Each team is capped at `per_team_limit` active queries, independent of
/// what other teams are doing.
pub struct StrictPerTeamFairness;

impl FairnessStrategy for StrictPerTeamFairness {
    fn should_admit(&self, team_active: u32, _other_teams_total: u32, per_team_limit: u32) -> bool {
        team_active < per_team_limit
    }

    fn name(&self) -> &'static str {
        "strict"
    }
}

/// A team at its own limit can still be admitted unless other teams are
/// collectively monopolizing more than 80% of `per_team_limit`.
pub struct WeightedFairness;

impl FairnessStrategy for WeightedFairness {
    fn should_admit(&self, team_active: u32, other_teams_total: u32, per_team_limit: u32) -> bool {
        if team_active < per_team_limit {
            return true;
        }
        (other_teams_total as f64) <= (per_team_limit as f64) * 0.8
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

/// Strict below an 80% overall load ratio, weighted above it.
pub struct HybridFairness;

impl FairnessStrategy for HybridFairness {
    fn should_admit(&self, team_active: u32, other_teams_total: u32, per_team_limit: u32) -> bool {
        let overall = team_active + other_teams_total;
        let capacity = per_team_limit as f64 * 2.0;
        let load_ratio = if capacity > 0.0 { overall as f64 / capacity } else { 0.0 };
        if load_ratio < 0.8 {
            StrictPerTeamFairness.should_admit(team_active, other_teams_total, per_team_limit)
        } else {
            WeightedFairness.should_admit(team_active, other_teams_total, per_team_limit)
        }
    }

    fn name(&self) -> &'static str {
        "hybrid"
    }
}

pub fn fairness_strategy(name: &str) -> Box<dyn FairnessStrategy> {
    match name {
        "weighted" => Box::new(WeightedFairness),
        "hybrid" => Box::new(HybridFairness),
        _ => Box::new(StrictPerTeamFairness),
    }
}

#[derive(Default)]
struct Inner {
    per_team_active: HashMap<String, u32>,
    /// uid -> team, so release is idempotent and doesn't need the caller to
    /// remember which team admitted the query.
    active_uids: HashMap<String, String>,
    rejections: u64,
    admissions: u64,
}

/// Tracks concurrently in-flight local queries per team and enforces a
/// pluggable [`FairnessStrategy`]. One instance per process.
pub struct AdmissionController {
    strategy: Box<dyn FairnessStrategy>,
    per_team_limit: u32,
    max_active: u32,
    inner: RwLock<Inner>,
}

pub struct AdmissionDecision {
    pub admitted: bool,
}

impl AdmissionController {
    pub fn new(strategy: Box<dyn FairnessStrategy>, per_team_limit: u32, max_active: u32) -> Self {
        Self {
            strategy,
            per_team_limit,
            max_active,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// If admitted, registers `uid` under `team` so a later [`Self::release`]
    /// can free the slot. Idempotent: calling with the same `uid` twice
    /// without a release in between has no additional effect on counts.
    ///
    /// Checks the process-wide `max_active` cap before consulting the
    /// per-team [`FairnessStrategy`] — mirrors every fairness class in
    /// `examples/original_source/overlay_core/strategies.py` checking
    /// `total_active >= max_active` first.
    pub async fn try_admit(&self, team: &str, uid: &str) -> AdmissionDecision {
        let mut inner = self.inner.write().await;
        if inner.active_uids.contains_key(uid) {
            return AdmissionDecision { admitted: true };
        }
        let total_active: u32 = inner.per_team_active.values().sum();
        if total_active >= self.max_active {
            inner.rejections += 1;
            return AdmissionDecision { admitted: false };
        }

        let team_active = *inner.per_team_active.get(team).unwrap_or(&0);
        let other_teams_total: u32 = inner
            .per_team_active
            .iter()
            .filter(|(t, _)| t.as_str() != team)
            .map(|(_, n)| *n)
            .sum();

        let admitted = self
            .strategy
            .should_admit(team_active, other_teams_total, self.per_team_limit);

        if admitted {
            *inner.per_team_active.entry(team.to_string()).or_insert(0) += 1;
            inner.active_uids.insert(uid.to_string(), team.to_string());
            inner.admissions += 1;
        } else {
            inner.rejections += 1;
        }

        AdmissionDecision { admitted }
    }

    pub async fn release(&self, uid: &str) {
        let mut inner = self.inner.write().await;
        if let Some(team) = inner.active_uids.remove(uid) {
            if let Some(count) = inner.per_team_active.get_mut(&team) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inner.per_team_active.remove(&team);
                }
            }
        }
    }

    pub async fn rejections(&self) -> u64 {
        self.inner.read().await.rejections
    }

    pub async fn admissions(&self) -> u64 {
        self.inner.read().await.admissions
    }

    pub async fn active_count(&self) -> u32 {
        self.inner.read().await.per_team_active.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strict_rejects_at_limit() {
        let controller = AdmissionController::new(Box::new(StrictPerTeamFairness), 2, 64);
        assert!(controller.try_admit("green", "u1").await.admitted);
        assert!(controller.try_admit("green", "u2").await.admitted);
        assert!(!controller.try_admit("green", "u3").await.admitted);
        assert_eq!(controller.rejections().await, 1);
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let controller = AdmissionController::new(Box::new(StrictPerTeamFairness), 1, 64);
        assert!(controller.try_admit("green", "u1").await.admitted);
        assert!(!controller.try_admit("green", "u2").await.admitted);
        controller.release("u1").await;
        assert!(controller.try_admit("green", "u2").await.admitted);
    }

    #[tokio::test]
    async fn weighted_admits_past_own_limit_when_others_quiet() {
        let controller = AdmissionController::new(Box::new(WeightedFairness), 2, 64);
        controller.try_admit("green", "u1").await;
        controller.try_admit("green", "u2").await;
        // green is at its limit but no other team has load, so it's still admitted.
        assert!(controller.try_admit("green", "u3").await.admitted);
    }

    #[tokio::test]
    async fn weighted_rejects_past_own_limit_when_others_busy() {
        let controller = AdmissionController::new(Box::new(WeightedFairness), 2, 64);
        controller.try_admit("pink", "p1").await;
        controller.try_admit("pink", "p2").await;
        controller.try_admit("green", "g1").await;
        controller.try_admit("green", "g2").await;
        // green at its own limit; pink (other team) load is 2, which is > 2*0.8.
        assert!(!controller.try_admit("green", "g3").await.admitted);
    }

    #[tokio::test]
    async fn admit_is_idempotent_for_same_uid() {
        let controller = AdmissionController::new(Box::new(StrictPerTeamFairness), 1, 64);
        assert!(controller.try_admit("green", "u1").await.admitted);
        assert!(controller.try_admit("green", "u1").await.admitted);
        assert_eq!(controller.active_count().await, 1);
    }

    #[tokio::test]
    async fn global_cap_rejects_even_when_team_has_room() {
        let controller = AdmissionController::new(Box::new(StrictPerTeamFairness), 10, 1);
        assert!(controller.try_admit("green", "u1").await.admitted);
        assert!(!controller.try_admit("pink", "u2").await.admitted);
        assert_eq!(controller.rejections().await, 1);
    }
}
