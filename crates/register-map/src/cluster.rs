use crate::loader::RegisterMap;
use crate::types::{Address, RegisterDescriptor, RegisterKey};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A contiguous span of registers fetched with one read request.
///
/// `items` cover `[start, start + length)` back to back in ascending address
/// order; dummy descriptors may appear to fill holes inside the span.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub start: Address,
    pub length: u16,
    pub items: Vec<RegisterDescriptor>,
}

impl Cluster {
    fn open(desc: &RegisterDescriptor) -> Self {
        Self {
            start: desc.address,
            length: desc.length,
            items: vec![desc.clone()],
        }
    }

    /// One past the last word covered.
    pub fn end(&self) -> u32 {
        self.start.end(self.length)
    }

    /// Addresses of the typed (non-dummy) registers in this span.
    pub fn registers(&self) -> impl Iterator<Item = Address> + '_ {
        self.items
            .iter()
            .filter(|d| !d.is_dummy())
            .map(|d| d.address)
    }
}

/// Greedily merges sorted, known addresses into the fewest contiguous spans.
///
/// `addresses` must be ascending and deduplicated; addresses missing from
/// `map` are ignored. A register starting inside the span already claimed by
/// the current cluster is dropped rather than allowed to overlap it.
pub fn build_clusters(map: &RegisterMap, addresses: &[Address]) -> Vec<Cluster> {
    let mut clusters = Vec::new();
    let mut current: Option<Cluster> = None;

    for &addr in addresses {
        let Some(desc) = map.get(addr) else {
            continue;
        };
        let at = u32::from(addr.raw());
        match current.as_mut() {
            Some(c) if at < c.end() => {
                tracing::warn!(
                    register = %addr,
                    cluster_start = %c.start,
                    cluster_length = c.length,
                    "register overlaps span already claimed - skipped"
                );
            }
            Some(c) if at == c.end() && c.length.checked_add(desc.length).is_some() => {
                c.length += desc.length;
                c.items.push(desc.clone());
            }
            _ => {
                clusters.extend(current.replace(Cluster::open(desc)));
            }
        }
    }
    clusters.extend(current);
    clusters
}

/// Plans read spans for sets of register keys and memoizes the result.
///
/// The cache key is the sorted set of valid wire addresses, so repeated polls
/// of the same group reuse one plan. The register map never changes, so plans
/// never go stale and are kept for the planner's lifetime.
#[derive(Debug)]
pub struct ClusterPlanner {
    map: Arc<RegisterMap>,
    cache: HashMap<Vec<Address>, Arc<[Cluster]>>,
}

impl ClusterPlanner {
    pub fn new(map: Arc<RegisterMap>) -> Self {
        Self {
            map,
            cache: HashMap::new(),
        }
    }

    pub fn plan(&mut self, keys: &[RegisterKey]) -> Arc<[Cluster]> {
        let addresses = self.wire_addresses(keys);
        if let Some(plan) = self.cache.get(&addresses) {
            return Arc::clone(plan);
        }
        let plan: Arc<[Cluster]> = build_clusters(&self.map, &addresses).into();
        tracing::debug!(
            registers = addresses.len(),
            clusters = plan.len(),
            "planned register clusters"
        );
        self.cache.insert(addresses, Arc::clone(&plan));
        plan
    }

    /// Number of distinct key sets planned so far.
    pub fn cached_plans(&self) -> usize {
        self.cache.len()
    }

    /// Known wire addresses among `keys`, sorted and deduplicated.
    fn wire_addresses(&self, keys: &[RegisterKey]) -> Vec<Address> {
        let mut out = BTreeSet::new();
        for key in keys {
            match key {
                RegisterKey::Pseudo(_) => {}
                RegisterKey::Wire(addr) => {
                    if self.map.get(*addr).is_some() {
                        out.insert(*addr);
                    } else {
                        tracing::debug!(register = %addr, "unknown register left out of plan");
                    }
                }
            }
        }
        out.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<RegisterKey> {
        list.iter().map(|k| RegisterKey::parse(k)).collect()
    }

    fn planner(yaml: &str) -> ClusterPlanner {
        ClusterPlanner::new(Arc::new(RegisterMap::from_yaml_str(yaml).unwrap()))
    }

    fn spans(plan: &[Cluster]) -> Vec<(u16, u16)> {
        plan.iter().map(|c| (c.start.raw(), c.length)).collect()
    }

    const INVERTER: &str = r#"
100: { name: a, type: U16 }
101: { name: b, type: U32, scale: 100 }
103: { name: c, type: I16 }
110: { name: d, type: U16 }
120: { name: e, type: DAT }
123: { name: f, type: U16 }
consumption: { name: calc, formula: "r100 + r101" }
"#;

    #[test]
    fn test_adjacent_registers_share_a_cluster() {
        let mut p = planner("100: { name: a, type: U16 }\n101: { name: b, type: U32, scale: 100 }\n");
        let plan = p.plan(&keys(&["100", "101"]));
        assert_eq!(spans(&plan), vec![(100, 3)]);
        assert_eq!(plan[0].items.len(), 2);
    }

    #[test]
    fn test_gap_opens_new_cluster() {
        let mut p = planner("10: { name: a, type: U16 }\n20: { name: b, type: U16 }\n");
        let plan = p.plan(&keys(&["10", "20"]));
        assert_eq!(spans(&plan), vec![(10, 1), (20, 1)]);
    }

    #[test]
    fn test_plan_over_mixed_set() {
        let mut p = planner(INVERTER);
        let plan = p.plan(&keys(&["123", "100", "110", "101", "103", "120", "consumption"]));
        assert_eq!(spans(&plan), vec![(100, 4), (110, 1), (120, 4)]);
        let first: Vec<u16> = plan[0].items.iter().map(|d| d.address.raw()).collect();
        assert_eq!(first, vec![100, 101, 103]);
    }

    #[test]
    fn test_coverage_matches_requested_spans() {
        let mut p = planner(INVERTER);
        let plan = p.plan(&keys(&["100", "101", "103", "110", "120", "123"]));
        let mut covered = Vec::new();
        for c in plan.iter() {
            let mut at = u32::from(c.start.raw());
            for item in &c.items {
                assert_eq!(u32::from(item.address.raw()), at);
                at += u32::from(item.length);
                covered.extend(item.address.raw()..item.address.raw() + item.length);
            }
            assert_eq!(at, c.end());
        }
        let expected: Vec<u16> = [100..104, 110..111, 120..124]
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(covered, expected);
    }

    #[test]
    fn test_unknown_and_pseudo_keys_are_ignored() {
        let mut p = planner(INVERTER);
        let plan = p.plan(&keys(&["100", "101", "555", "consumption"]));
        assert_eq!(spans(&plan), vec![(100, 3)]);
        assert!(p.plan(&keys(&["555", "consumption"])).is_empty());
    }

    #[test]
    fn test_plans_are_cached_per_key_set() {
        let mut p = planner(INVERTER);
        let a = p.plan(&keys(&["100", "101"]));
        let b = p.plan(&keys(&["101", "100", "101"]));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(p.cached_plans(), 1);
        let c = p.plan(&keys(&["110"]));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(p.cached_plans(), 2);
    }

    #[test]
    fn test_overlapping_register_does_not_extend_cluster() {
        let yaml = "100: { name: a, type: U32 }\n101: { name: alias, type: U16 }\n102: { name: c, type: U16 }\n";
        let mut p = planner(yaml);
        let plan = p.plan(&keys(&["100", "101", "102"]));
        assert_eq!(spans(&plan), vec![(100, 3)]);
        let addrs: Vec<Address> = plan[0].registers().collect();
        assert_eq!(addrs, vec![Address(100), Address(102)]);
    }

    #[test]
    fn test_register_at_address_zero() {
        let mut p = planner("0: { name: a, type: U16 }\n1: { name: b, type: U16 }\n");
        let plan = p.plan(&keys(&["0", "1"]));
        assert_eq!(spans(&plan), vec![(0, 2)]);
    }

    #[test]
    fn test_dummy_fills_gap_when_requested() {
        let yaml = "100: { name: a, type: U16 }\n101: { name: pad, length: 2 }\n103: { name: b, type: U16 }\n";
        let mut p = planner(yaml);
        assert_eq!(spans(&p.plan(&keys(&["100", "101", "103"]))), vec![(100, 4)]);
        assert_eq!(spans(&p.plan(&keys(&["100", "103"]))), vec![(100, 1), (103, 1)]);
        let with_pad = p.plan(&keys(&["100", "101", "103"]));
        let typed: Vec<Address> = with_pad[0].registers().collect();
        assert_eq!(typed, vec![Address(100), Address(103)]);
    }
}
