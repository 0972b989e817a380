//! Shortest paths over the switch-only subgraph

use std::collections::{BTreeMap, HashMap, VecDeque};

use super::{TopologyError, TopologyView};

/// Breadth-first path finder between switches
///
/// Host links are ignored; every switch-to-switch link counts as one hop.
#[derive(Debug, Clone)]
pub struct PathResolver {
    graph: BTreeMap<String, Vec<String>>,
}

impl PathResolver {
    pub fn new(topology: &TopologyView) -> Self {
        let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for switch in topology.switches() {
            let mut peers: Vec<String> = topology
                .neighbors(&switch)
                .iter()
                .filter(|adj| topology.is_switch(&adj.peer))
                .map(|adj| adj.peer.clone())
                .collect();
            peers.sort();
            peers.dedup();
            graph.insert(switch, peers);
        }
        Self { graph }
    }

    /// Ordered switch sequence from `src` to `dst`, both inclusive
    pub fn shortest_path(&self, src: &str, dst: &str) -> Result<Vec<String>, TopologyError> {
        for name in [src, dst] {
            if !self.graph.contains_key(name) {
                return Err(TopologyError::UnknownNode(name.to_string()));
            }
        }
        if src == dst {
            return Ok(vec![src.to_string()]);
        }

        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([src]);
        parent.insert(src, src);

        while let Some(current) = queue.pop_front() {
            if current == dst {
                break;
            }
            for peer in self.graph.get(current).into_iter().flatten() {
                if !parent.contains_key(peer.as_str()) {
                    parent.insert(peer.as_str(), current);
                    queue.push_back(peer.as_str());
                }
            }
        }

        if !parent.contains_key(dst) {
            return Err(TopologyError::PathNotFound {
                from: src.to_string(),
                to: dst.to_string(),
            });
        }

        let mut path = vec![dst.to_string()];
        let mut cursor = dst;
        while cursor != src {
            cursor = parent[cursor];
            path.push(cursor.to_string());
        }
        path.reverse();
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{LinkSpec, NodeSpec, TopologySpec};

    fn link(a: &str, a_port: u32, b: &str, b_port: u32) -> LinkSpec {
        LinkSpec {
            a: a.into(),
            a_port,
            b: b.into(),
            b_port,
        }
    }

    fn view(switches: &[&str], links: Vec<LinkSpec>) -> TopologyView {
        let nodes = switches
            .iter()
            .enumerate()
            .map(|(i, s)| NodeSpec::switch(*s, i as u64 + 1))
            .collect();
        TopologyView::from_spec(&TopologySpec { nodes, links }).unwrap()
    }

    #[test]
    fn test_same_switch_is_single_hop() {
        let resolver = PathResolver::new(&view(&["s1"], vec![]));
        assert_eq!(resolver.shortest_path("s1", "s1").unwrap(), vec!["s1"]);
    }

    #[test]
    fn test_ring_takes_short_side() {
        let topo = view(
            &["s1", "s2", "s3", "s4"],
            vec![
                link("s1", 1, "s2", 1),
                link("s2", 2, "s3", 1),
                link("s3", 2, "s4", 1),
                link("s4", 2, "s1", 2),
            ],
        );
        let resolver = PathResolver::new(&topo);
        assert_eq!(resolver.shortest_path("s1", "s4").unwrap(), vec!["s1", "s4"]);
        assert_eq!(resolver.shortest_path("s1", "s3").unwrap().len(), 3);
    }

    #[test]
    fn test_disconnected_switches() {
        let topo = view(&["s1", "s2", "s3"], vec![link("s1", 1, "s2", 1)]);
        let resolver = PathResolver::new(&topo);
        assert_eq!(
            resolver.shortest_path("s1", "s3"),
            Err(TopologyError::PathNotFound {
                from: "s1".to_string(),
                to: "s3".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_switch() {
        let resolver = PathResolver::new(&view(&["s1"], vec![]));
        assert!(matches!(
            resolver.shortest_path("s1", "s9"),
            Err(TopologyError::UnknownNode(_))
        ));
    }
}
