//! CART regression tree over sparse feature rows.
//!
//! Splits minimize the summed squared error of the two children. Features
//! absent from a row are zero, so the split search only visits the non-zero
//! entries of the samples in a node and accounts for the zeros in bulk.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tw_types::{FeatureMatrix, ModelError, SparseRow, TwResult};

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// `None` grows until leaves are pure or too small.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

/// Run of equal feature values inside a node.
struct ValueGroup {
    value: f64,
    count: usize,
    sum: f64,
}

impl RegressionTree {
    /// Fit a tree on the rows listed in `samples`. Repeated indices (bootstrap
    /// draws) count once per occurrence.
    pub fn fit(
        x: &FeatureMatrix,
        y: &[f64],
        samples: Vec<usize>,
        params: &TreeParams,
    ) -> TwResult<Self> {
        if samples.is_empty() {
            return Err(ModelError::EmptyTrainingSet.into());
        }
        if x.n_rows() != y.len() {
            return Err(ModelError::ShapeMismatch {
                what: "targets".to_string(),
                expected: x.n_rows(),
                actual: y.len(),
            }
            .into());
        }

        let mut tree = Self {
            nodes: Vec::new(),
            n_features: x.n_cols(),
        };

        // (node slot, samples, depth)
        let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();
        tree.nodes.push(Node::Leaf { value: 0.0 });
        stack.push((0, samples, 0));

        while let Some((slot, node_samples, depth)) = stack.pop() {
            let sum: f64 = node_samples.iter().map(|&i| y[i]).sum();
            let mean = sum / node_samples.len() as f64;

            let splittable = params.max_depth.map_or(true, |d| depth < d)
                && node_samples.len() >= params.min_samples_split
                && node_samples.len() >= 2 * params.min_samples_leaf
                && !is_constant(y, &node_samples);

            let candidate = if splittable {
                best_split(x, y, &node_samples, sum, params.min_samples_leaf)
            } else {
                None
            };

            match candidate {
                Some(c) => {
                    let (left, right): (Vec<usize>, Vec<usize>) = node_samples
                        .iter()
                        .partition(|&&i| x.get(i, c.feature) <= c.threshold);

                    let left_slot = tree.nodes.len();
                    tree.nodes.push(Node::Leaf { value: 0.0 });
                    let right_slot = tree.nodes.len();
                    tree.nodes.push(Node::Leaf { value: 0.0 });

                    tree.nodes[slot] = Node::Split {
                        feature: c.feature,
                        threshold: c.threshold,
                        left: left_slot,
                        right: right_slot,
                    };
                    stack.push((right_slot, right, depth + 1));
                    stack.push((left_slot, left, depth + 1));
                }
                None => {
                    tree.nodes[slot] = Node::Leaf { value: mean };
                }
            }
        }

        Ok(tree)
    }

    pub fn predict_row(&self, row: SparseRow<'_>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row.get(*feature) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Length of the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            match &self.nodes[idx] {
                Node::Leaf { .. } => max_depth = max_depth.max(depth),
                Node::Split { left, right, .. } => {
                    stack.push((*left, depth + 1));
                    stack.push((*right, depth + 1));
                }
            }
        }
        max_depth
    }
}

fn is_constant(y: &[f64], samples: &[usize]) -> bool {
    let first = y[samples[0]];
    samples.iter().all(|&i| y[i] == first)
}

/// Best split of a node, or `None` when no split lowers the squared error.
fn best_split(
    x: &FeatureMatrix,
    y: &[f64],
    samples: &[usize],
    total_sum: f64,
    min_leaf: usize,
) -> Option<Candidate> {
    let n = samples.len();

    // Non-zero (value, target) pairs per feature, ordered by feature index so
    // ties resolve to the lowest feature.
    let mut per_feature: BTreeMap<usize, Vec<(f64, f64)>> = BTreeMap::new();
    for &i in samples {
        for (col, value) in x.row(i).iter() {
            per_feature.entry(col).or_default().push((value, y[i]));
        }
    }

    let parent_score = total_sum * total_sum / n as f64;
    let mut best: Option<Candidate> = None;

    for (feature, mut entries) in per_feature {
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut groups: Vec<ValueGroup> = Vec::with_capacity(entries.len() + 1);
        for (value, target) in &entries {
            match groups.last_mut() {
                Some(g) if g.value == *value => {
                    g.count += 1;
                    g.sum += target;
                }
                _ => groups.push(ValueGroup {
                    value: *value,
                    count: 1,
                    sum: *target,
                }),
            }
        }

        let zero_count = n - entries.len();
        if zero_count > 0 {
            let nonzero_sum: f64 = entries.iter().map(|(_, t)| t).sum();
            let pos = groups.partition_point(|g| g.value < 0.0);
            groups.insert(
                pos,
                ValueGroup {
                    value: 0.0,
                    count: zero_count,
                    sum: total_sum - nonzero_sum,
                },
            );
        }

        if groups.len() < 2 {
            continue;
        }

        let mut left_n = 0usize;
        let mut left_sum = 0.0;
        for k in 0..groups.len() - 1 {
            left_n += groups[k].count;
            left_sum += groups[k].sum;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let right_sum = total_sum - left_sum;
            let score = left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64;

            let improves = match &best {
                None => score > parent_score + 1e-12,
                Some(b) => score > b.score + 1e-12,
            };
            if improves {
                best = Some(Candidate {
                    feature,
                    threshold: (groups[k].value + groups[k + 1].value) / 2.0,
                    score,
                });
            }
        }
    }

    best
}
