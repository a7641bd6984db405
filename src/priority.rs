//! Runtime priority groups.
//!
//! Units are bucketed by their `//priority:` value. The build itself always
//! processes every unit together; grouping only decides the order the
//! generated program runs them in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::unit::ScriptUnit;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityGroups {
    /// Distinct priorities in first-encounter order.
    pub order: Vec<i64>,
    /// Unit file names per priority, in registration order.
    pub groups: BTreeMap<i64, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionGroup {
    pub priority: i64,
    pub units: Vec<String>,
}

impl PriorityGroups {
    pub fn from_units(units: &[ScriptUnit]) -> Self {
        Self::from_pairs(units.iter().map(|u| (u.priority(), u.file_name.clone())))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (i64, String)>) -> Self {
        let mut groups = Self::default();
        for (priority, name) in pairs {
            let members = groups.groups.entry(priority).or_default();
            if members.is_empty() {
                groups.order.push(priority);
            }
            members.push(name);
        }
        groups
    }

    pub fn get(&self, priority: i64) -> &[String] {
        self.groups.get(&priority).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Groups in the order the generated program runs them: lowest priority first.
    pub fn execution_order(&self) -> Vec<ExecutionGroup> {
        let mut order = self.order.clone();
        order.sort_unstable();
        order
            .into_iter()
            .map(|priority| ExecutionGroup {
                priority,
                units: self.get(priority).to_vec(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn groups(priorities: &[i64]) -> PriorityGroups {
        PriorityGroups::from_pairs(
            priorities
                .iter()
                .enumerate()
                .map(|(i, p)| (*p, format!("u{}.js", i + 1))),
        )
    }

    #[test]
    fn test_first_encounter_order() {
        let g = groups(&[5, 1, 5, 3]);
        assert_eq!(g.order, vec![5, 1, 3]);
        assert_eq!(g.get(5), &["u1.js".to_string(), "u3.js".to_string()]);
        assert_eq!(g.get(1), &["u2.js".to_string()]);
        assert!(g.get(7).is_empty());
    }

    #[test]
    fn test_execution_order_is_ascending() {
        let g = groups(&[5, 1, 5, 3]);
        let priorities: Vec<i64> = g.execution_order().iter().map(|e| e.priority).collect();
        assert_eq!(priorities, vec![1, 3, 5]);
        assert_eq!(g.order, vec![5, 1, 3]);
    }

    #[test]
    fn test_derivation_is_pure() {
        assert_eq!(groups(&[2, 2, 9]), groups(&[2, 2, 9]));
    }
}
