use std::collections::{BTreeMap, HashMap};

use routecodex_common::RouteTarget;
use tokio::sync::Mutex;

/// Per-route round-robin cursor state: one pool index over the
/// `provider.model` groups and one key index per group.
#[derive(Debug, Default)]
struct RouteState {
    pool_idx: usize,
    key_idx: HashMap<String, usize>,
}

/// Targets of one route grouped by `provider.model`, insertion-ordered.
#[derive(Debug, Clone)]
struct GroupedPool {
    groups: Vec<(String, Vec<RouteTarget>)>,
}

impl GroupedPool {
    fn build(targets: &[RouteTarget]) -> Self {
        let mut groups: Vec<(String, Vec<RouteTarget>)> = Vec::new();
        for target in targets {
            let group_key = format!("{}.{}", target.provider_id, target.model_id);
            match groups.iter_mut().find(|(key, _)| *key == group_key) {
                Some((_, members)) => members.push(target.clone()),
                None => groups.push((group_key, vec![target.clone()])),
            }
        }
        Self { groups }
    }

    fn total(&self) -> usize {
        self.groups.iter().map(|(_, members)| members.len()).sum()
    }
}

/// Two-layer round-robin balancer over route target pools.
///
/// Layer one rotates across `provider.model` groups, layer two across the
/// keys inside the selected group. The cursors are the only shared mutable
/// state on the hot path and sit behind one async mutex.
pub struct LoadBalancer {
    pools: BTreeMap<String, GroupedPool>,
    state: Mutex<HashMap<String, RouteState>>,
}

impl LoadBalancer {
    pub fn new(route_pools: &BTreeMap<String, Vec<RouteTarget>>) -> Self {
        let pools = route_pools
            .iter()
            .map(|(route, targets)| (route.clone(), GroupedPool::build(targets)))
            .collect();
        Self {
            pools,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_targets(&self, route: &str) -> bool {
        self.pools
            .get(route)
            .is_some_and(|pool| pool.total() > 0)
    }

    pub fn configured_routes(&self) -> std::collections::BTreeSet<String> {
        self.pools
            .iter()
            .filter(|(_, pool)| pool.total() > 0)
            .map(|(route, _)| route.clone())
            .collect()
    }

    /// Select the next target for `route`.
    ///
    /// When the request names a model that exists in the pool, that target
    /// is returned directly and the cursors advance past it. An empty or
    /// unknown pool yields `None`.
    pub async fn select(&self, route: &str, requested_model: Option<&str>) -> Option<RouteTarget> {
        let pool = self.pools.get(route)?;
        if pool.total() == 0 {
            return None;
        }
        if pool.total() == 1 {
            return Some(pool.groups[0].1[0].clone());
        }

        let mut state = self.state.lock().await;
        let state = state.entry(route.to_string()).or_default();

        if let Some(model) = requested_model
            && let Some(target) = direct_match(pool, state, model)
        {
            return Some(target);
        }

        let group_count = pool.groups.len();
        let (group_key, members) = &pool.groups[state.pool_idx % group_count];
        let key_idx = state.key_idx.entry(group_key.clone()).or_insert(0);
        let target = members[*key_idx % members.len()].clone();
        *key_idx = (*key_idx + 1) % members.len();
        state.pool_idx = (state.pool_idx + 1) % group_count;
        Some(target)
    }

    /// Drop a route's cursors (tests and admin reset).
    pub async fn reset(&self, route: &str) {
        self.state.lock().await.remove(route);
    }
}

fn direct_match(
    pool: &GroupedPool,
    state: &mut RouteState,
    model: &str,
) -> Option<RouteTarget> {
    for (group_pos, (group_key, members)) in pool.groups.iter().enumerate() {
        let Some(member_pos) = members
            .iter()
            .position(|target| target.model_id == model)
        else {
            continue;
        };
        let target = members[member_pos].clone();
        // Advance both cursors past the matched target so subsequent
        // round-robin picks do not immediately repeat it.
        state
            .key_idx
            .insert(group_key.clone(), (member_pos + 1) % members.len());
        state.pool_idx = (group_pos + 1) % pool.groups.len();
        return Some(target);
    }
    None
}
