//! Step graph analysis: topological order and cycle detection.

use std::collections::VecDeque;

use crate::config::types::PipelineConfig;

/// Enabled hops whose endpoints both resolve, as `(from, to)` step indexes.
pub(crate) fn resolved_edges(config: &PipelineConfig) -> Vec<(usize, usize)> {
    config
        .hops
        .iter()
        .filter(|h| h.enabled)
        .filter_map(|h| Some((config.step_index(&h.from)?, config.step_index(&h.to)?)))
        .collect()
}

/// Step indexes in topological order (Kahn's algorithm, ties by declaration order).
///
/// # Errors
///
/// Returns the names of the steps left on a cycle.
pub fn topological_order(config: &PipelineConfig) -> Result<Vec<usize>, Vec<String>> {
    let n = config.steps.len();
    let edges = resolved_edges(config);
    let mut indegree = vec![0usize; n];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(from, to) in &edges {
        indegree[to] += 1;
        outgoing[from].push(to);
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &next in &outgoing[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err((0..n)
            .filter(|&i| indegree[i] > 0)
            .map(|i| config.steps[i].name.clone())
            .collect())
    }
}

/// Count of enabled incoming hops per step index.
pub(crate) fn incoming_counts(config: &PipelineConfig) -> Vec<usize> {
    let mut counts = vec![0usize; config.steps.len()];
    for (_, to) in resolved_edges(config) {
        counts[to] += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn config(hops: &str) -> PipelineConfig {
        parse_pipeline_str(&format!(
            r#"
version: "1.0"
pipeline: g
steps:
  - {{ name: a, kind: dummy }}
  - {{ name: b, kind: dummy }}
  - {{ name: c, kind: dummy }}
hops: {hops}
"#
        ))
        .unwrap()
    }

    #[test]
    fn orders_a_chain() {
        let cfg = config("[{from: c, to: b}, {from: b, to: a}]");
        assert_eq!(topological_order(&cfg).unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn reports_cycle_members() {
        let cfg = config("[{from: a, to: b}, {from: b, to: c}, {from: c, to: b}]");
        let cycle = topological_order(&cfg).unwrap_err();
        assert_eq!(cycle, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn disabled_hops_are_ignored() {
        let cfg = config("[{from: a, to: b}, {from: b, to: a, enabled: false}]");
        assert!(topological_order(&cfg).is_ok());
        assert_eq!(incoming_counts(&cfg), vec![0, 1, 0]);
    }
}
