//! Target selection within a route.
//!
//! Both strategies select from the route's weighted slot ring, so a
//! target with twice the weight is picked twice as often.

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::routing::table::{Route, Target};

/// Strategy for choosing one target of a matched route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickStrategy {
    /// Uniformly random slot.
    #[default]
    Random,
    /// Rotate through the slots with a per-route counter.
    RoundRobin,
}

impl PickStrategy {
    pub fn pick(&self, route: &Route) -> Option<Arc<Target>> {
        let slots = route.slots();
        if slots.is_empty() {
            return None;
        }
        let slot = match self {
            PickStrategy::Random => slots[fastrand::usize(..slots.len())],
            PickStrategy::RoundRobin => {
                let n = route.counter().fetch_add(1, Ordering::Relaxed);
                slots[n % slots.len()]
            }
        };
        route.targets().get(slot).cloned()
    }
}

impl FromStr for PickStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rnd" => Ok(PickStrategy::Random),
            "rr" => Ok(PickStrategy::RoundRobin),
            other => Err(format!("unknown strategy {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::table::Table;

    #[test]
    fn test_round_robin() {
        let table = Table::parse(
            "route add svc /foo http://127.0.0.1:8080/\n\
             route add svc /foo http://127.0.0.1:8081/",
        )
        .unwrap();
        let route = &table.routes_for("")[0];

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(PickStrategy::RoundRobin.pick(route).unwrap().addr.clone());
        }
        // 50 slots each, laid out contiguously
        assert!(seen.iter().all(|a| a == "127.0.0.1:8080"));

        let picks: Vec<_> = (0..100)
            .map(|_| PickStrategy::RoundRobin.pick(route).unwrap().addr.clone())
            .collect();
        assert_eq!(picks.iter().filter(|a| *a == "127.0.0.1:8081").count(), 50);
    }

    #[test]
    fn test_random_respects_zero_weight() {
        let table = Table::parse(
            "route add svc /foo http://127.0.0.1:8080/ weight 1\n\
             route add svc /foo http://127.0.0.1:8081/ weight 0",
        )
        .unwrap();
        let route = &table.routes_for("")[0];
        for _ in 0..50 {
            assert_eq!(PickStrategy::Random.pick(route).unwrap().addr, "127.0.0.1:8080");
        }
    }
}
