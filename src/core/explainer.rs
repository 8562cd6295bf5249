//! Exact path-dependent TreeSHAP over a gradient-boosted ensemble.
//!
//! Contributions are expressed in margin space: `baseline + Σ phi` equals
//! `ScoreModel::predict_margin` for the explained row.

use crate::core::booster::{GradientBoostedModel, Tree};
use crate::domain::model::{AttributionResult, FeatureContribution, FeatureVector};
use crate::utils::error::Result;

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// 計算單一病患特徵向量的 SHAP 貢獻值
pub fn explain(model: &GradientBoostedModel, features: &FeatureVector) -> Result<AttributionResult> {
    model.check_features(features)?;
    let values = features.values();

    let mut phi = vec![0.0; values.len()];
    let mut baseline = model.base_margin();
    for tree in model.trees() {
        baseline += tree.expected_value();
        let capacity = tree.max_depth() + 2;
        let mut walker = TreeWalker {
            tree,
            values,
            phi: &mut phi,
        };
        walker.recurse(0, Vec::with_capacity(capacity), 1.0, 1.0, None);
    }

    let contributions = features
        .iter()
        .zip(phi)
        .map(|((name, value), contribution)| FeatureContribution {
            feature: name.to_string(),
            feature_value: value,
            contribution,
        })
        .collect();

    let result = AttributionResult::new(baseline, contributions);
    tracing::debug!(
        "Explained {} features, baseline={:.6}, reconstructed={:.6}",
        features.len(),
        baseline,
        result.reconstructed_score()
    );
    Ok(result)
}

struct TreeWalker<'a> {
    tree: &'a Tree,
    values: &'a [f64],
    phi: &'a mut [f64],
}

impl TreeWalker<'_> {
    fn recurse(
        &mut self,
        node_idx: usize,
        parent_path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        let mut path = parent_path;
        extend(&mut path, zero_fraction, one_fraction, feature);

        let tree = self.tree;
        let node = &tree.nodes[node_idx];
        let (left, right) = match (node.left, node.right) {
            (Some(l), Some(r)) => (l, r),
            _ => {
                let leaf = node.leaf_value();
                for i in 1..path.len() {
                    let weight = unwound_path_sum(&path, i);
                    let el = path[i];
                    if let Some(f) = el.feature {
                        self.phi[f] += weight * (el.one_fraction - el.zero_fraction) * leaf;
                    }
                }
                return;
            }
        };

        let hot = node.next_child(self.values[node.split_index]);
        let cold = if hot == left { right } else { left };

        // 同一特徵在路徑上重複出現時，先移除舊的紀錄
        let mut incoming_zero = 1.0;
        let mut incoming_one = 1.0;
        if let Some(k) = (1..path.len()).find(|&k| path[k].feature == Some(node.split_index)) {
            incoming_zero = path[k].zero_fraction;
            incoming_one = path[k].one_fraction;
            unwind(&mut path, k);
        }

        let hot_zero = tree.nodes[hot].cover / node.cover;
        let cold_zero = tree.nodes[cold].cover / node.cover;
        let split = Some(node.split_index);

        self.recurse(hot, path.clone(), hot_zero * incoming_zero, incoming_one, split);
        self.recurse(cold, path, cold_zero * incoming_zero, 0.0, split);
    }
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let d = depth as f64;
    for i in (0..depth).rev() {
        let fi = i as f64;
        path[i + 1].weight += one_fraction * path[i].weight * (fi + 1.0) / (d + 1.0);
        path[i].weight = zero_fraction * path[i].weight * (d - fi) / (d + 1.0);
    }
}

fn unwind(path: &mut Vec<PathElement>, path_index: usize) {
    let depth = path.len() - 1;
    let d = depth as f64;
    let one = path[path_index].one_fraction;
    let zero = path[path_index].zero_fraction;
    let mut next_one_portion = path[depth].weight;

    for i in (0..depth).rev() {
        let fi = i as f64;
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * (d + 1.0) / ((fi + 1.0) * one);
            next_one_portion = tmp - path[i].weight * zero * (d - fi) / (d + 1.0);
        } else {
            path[i].weight = path[i].weight * (d + 1.0) / (zero * (d - fi));
        }
    }

    for i in path_index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], path_index: usize) -> f64 {
    let depth = path.len() - 1;
    let d = depth as f64;
    let one = path[path_index].one_fraction;
    let zero = path[path_index].zero_fraction;
    let mut next_one_portion = path[depth].weight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        let fi = i as f64;
        if one != 0.0 {
            let tmp = next_one_portion * (d + 1.0) / ((fi + 1.0) * one);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero * (d - fi) / (d + 1.0);
        } else if zero != 0.0 {
            total += path[i].weight / (zero * (d - fi) / (d + 1.0));
        }
    }
    total
}
