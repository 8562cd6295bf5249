use crate::domain::model::FeatureVector;
use crate::domain::ports::ScoreModel;
use crate::utils::error::{Result, RiskError};
use serde::Deserialize;
use std::path::Path;

/// 目標函數決定 margin 與輸出分數之間的轉換
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Cox,
    Logistic,
    Identity,
}

impl Objective {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "survival:cox" => Some(Objective::Cox),
            "binary:logistic" | "reg:logistic" => Some(Objective::Logistic),
            "reg:squarederror" | "reg:linear" | "survival:aft" => Some(Objective::Identity),
            _ => None,
        }
    }

    fn link(&self, margin: f64) -> f64 {
        match self {
            Objective::Cox => margin.exp(),
            Objective::Logistic => 1.0 / (1.0 + (-margin).exp()),
            Objective::Identity => margin,
        }
    }

    /// base_score 以輸出空間儲存，需轉回 margin 空間
    fn inverse_link(&self, value: f64) -> f64 {
        match self {
            Objective::Cox => value.ln(),
            Objective::Logistic => (value / (1.0 - value)).ln(),
            Objective::Identity => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub split_index: usize,
    pub split_condition: f64,
    pub default_left: bool,
    pub cover: f64,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.left.is_none()
    }

    /// Leaf value is stored in the split condition slot.
    pub fn leaf_value(&self) -> f64 {
        self.split_condition
    }

    pub fn next_child(&self, value: f64) -> usize {
        let go_left = if value.is_nan() {
            self.default_left
        } else {
            value < self.split_condition
        };
        match (go_left, self.left, self.right) {
            (true, Some(left), _) => left,
            (false, _, Some(right)) => right,
            _ => unreachable!("next_child called on a leaf"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn predict(&self, values: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            if node.is_leaf() {
                return node.leaf_value();
            }
            idx = node.next_child(values[node.split_index]);
        }
    }

    pub fn max_depth(&self) -> usize {
        fn depth(tree: &Tree, idx: usize) -> usize {
            let node = &tree.nodes[idx];
            match (node.left, node.right) {
                (Some(l), Some(r)) => 1 + depth(tree, l).max(depth(tree, r)),
                _ => 0,
            }
        }
        depth(self, 0)
    }

    /// 以 cover 加權的葉節點平均值，即此樹的期望輸出
    pub fn expected_value(&self) -> f64 {
        fn walk(tree: &Tree, idx: usize) -> f64 {
            let node = &tree.nodes[idx];
            match (node.left, node.right) {
                (Some(l), Some(r)) => {
                    (tree.nodes[l].cover * walk(tree, l) + tree.nodes[r].cover * walk(tree, r))
                        / node.cover
                }
                _ => node.leaf_value(),
            }
        }
        walk(self, 0)
    }
}

/// XGBoost 梯度提升樹模型（JSON 格式）
#[derive(Debug, Clone)]
pub struct GradientBoostedModel {
    feature_names: Vec<String>,
    objective: Objective,
    base_margin: f64,
    trees: Vec<Tree>,
}

impl GradientBoostedModel {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().display().to_string();
        let content = std::fs::read_to_string(&path).map_err(|e| RiskError::ModelLoad {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&content).map_err(|e| match e {
            RiskError::ModelLoad { reason, .. } => RiskError::ModelLoad {
                path: path_str,
                reason,
            },
            other => other,
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawModel = serde_json::from_str(content).map_err(|e| load_error(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawModel) -> Result<Self> {
        let learner = raw.learner;
        let objective = Objective::from_name(&learner.objective.name)
            .ok_or_else(|| load_error(format!("unsupported objective '{}'", learner.objective.name)))?;

        let base_score = parse_base_score(&learner.learner_model_param.base_score)?;
        let base_margin = objective.inverse_link(base_score);
        if !base_margin.is_finite() {
            return Err(load_error(format!(
                "base_score {} is outside the domain of objective {:?}",
                base_score, objective
            )));
        }

        let feature_names = learner.feature_names;
        if feature_names.is_empty() {
            return Err(load_error("model declares no feature names".to_string()));
        }

        let raw_trees = learner.gradient_booster.model.trees;
        if raw_trees.is_empty() {
            return Err(load_error("model contains no trees".to_string()));
        }

        let trees = raw_trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| t.into_tree(feature_names.len()).map_err(|r| load_error(format!("tree {}: {}", i, r))))
            .collect::<Result<Vec<Tree>>>()?;

        Ok(Self {
            feature_names,
            objective,
            base_margin,
            trees,
        })
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn base_margin(&self) -> f64 {
        self.base_margin
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// 確認特徵向量與模型宣告的欄位順序完全一致
    pub fn check_features(&self, features: &FeatureVector) -> Result<()> {
        if features.len() != self.feature_names.len() {
            return Err(RiskError::Scoring {
                message: format!(
                    "feature count mismatch: model expects {}, got {}",
                    self.feature_names.len(),
                    features.len()
                ),
            });
        }
        if let Some((expected, got)) = self
            .feature_names
            .iter()
            .zip(features.names())
            .find(|(expected, got)| expected != got)
        {
            return Err(RiskError::Scoring {
                message: format!("feature order mismatch: expected '{}', got '{}'", expected, got),
            });
        }
        if let Some((name, value)) = features.iter().find(|(_, v)| v.is_infinite()) {
            return Err(RiskError::Scoring {
                message: format!("feature '{}' has non-finite value {}", name, value),
            });
        }
        Ok(())
    }
}

impl ScoreModel for GradientBoostedModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_margin(&self, features: &FeatureVector) -> Result<f64> {
        self.check_features(features)?;
        let values = features.values();
        let leaves: f64 = self.trees.iter().map(|tree| tree.predict(values)).sum();
        Ok(self.base_margin + leaves)
    }

    fn margin_to_score(&self, margin: f64) -> f64 {
        self.objective.link(margin)
    }
}

fn load_error(reason: String) -> RiskError {
    RiskError::ModelLoad {
        path: "<inline>".to_string(),
        reason,
    }
}

/// XGBoost 2.x 寫成 "5E-1"，3.x 寫成 "[5E-1]"
fn parse_base_score(raw: &str) -> Result<f64> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<f64>()
        .map_err(|e| load_error(format!("invalid base_score '{}': {}", raw, e)))
}

#[derive(Debug, Deserialize)]
struct RawModel {
    learner: RawLearner,
}

#[derive(Debug, Deserialize)]
struct RawLearner {
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: RawGradientBooster,
    learner_model_param: RawLearnerParam,
    objective: RawObjective,
}

#[derive(Debug, Deserialize)]
struct RawGradientBooster {
    model: RawGbTree,
}

#[derive(Debug, Deserialize)]
struct RawGbTree {
    trees: Vec<RawTree>,
}

#[derive(Debug, Deserialize)]
struct RawLearnerParam {
    base_score: String,
}

#[derive(Debug, Deserialize)]
struct RawObjective {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawTree {
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f64>,
    default_left: Vec<u8>,
    sum_hessian: Vec<f64>,
}

impl RawTree {
    fn into_tree(self, num_features: usize) -> std::result::Result<Tree, String> {
        let n = self.left_children.len();
        if n == 0 {
            return Err("empty tree".to_string());
        }
        let lengths = [
            self.right_children.len(),
            self.split_indices.len(),
            self.split_conditions.len(),
            self.default_left.len(),
            self.sum_hessian.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err("node arrays have inconsistent lengths".to_string());
        }

        let child = |raw: i64| -> std::result::Result<Option<usize>, String> {
            match raw {
                -1 => Ok(None),
                c if c > 0 && (c as usize) < n => Ok(Some(c as usize)),
                c => Err(format!("child index {} out of range", c)),
            }
        };

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let left = child(self.left_children[i])?;
            let right = child(self.right_children[i])?;
            if left.is_some() != right.is_some() {
                return Err(format!("node {} has exactly one child", i));
            }
            let split_index = if left.is_some() {
                let idx = self.split_indices[i];
                if idx < 0 || idx as usize >= num_features {
                    return Err(format!("node {} splits on unknown feature {}", i, idx));
                }
                idx as usize
            } else {
                0
            };
            let cover = self.sum_hessian[i];
            if !(cover > 0.0) {
                return Err(format!("node {} has non-positive cover {}", i, cover));
            }
            nodes.push(Node {
                left,
                right,
                split_index,
                split_condition: self.split_conditions[i],
                default_left: self.default_left[i] != 0,
                cover,
            });
        }

        let tree = Tree { nodes };
        if !is_acyclic(&tree) {
            return Err("tree nodes are not reachable as a proper tree".to_string());
        }
        Ok(tree)
    }
}

fn is_acyclic(tree: &Tree) -> bool {
    let mut seen = vec![false; tree.nodes.len()];
    let mut stack = vec![0usize];
    while let Some(idx) = stack.pop() {
        if seen[idx] {
            return false;
        }
        seen[idx] = true;
        let node = &tree.nodes[idx];
        stack.extend(node.left);
        stack.extend(node.right);
    }
    true
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::model::FeatureVector;

    /// 兩棵小樹：age 與 min_tscore
    pub(crate) fn tiny_model_json(objective: &str, base_score: &str) -> String {
        format!(
            r#"{{
  "learner": {{
    "feature_names": ["age", "min_tscore"],
    "learner_model_param": {{"base_score": "{base_score}", "num_feature": "2"}},
    "objective": {{"name": "{objective}"}},
    "gradient_booster": {{
      "name": "gbtree",
      "model": {{
        "trees": [
          {{
            "left_children": [1, -1, 3, -1, -1],
            "right_children": [2, -1, 4, -1, -1],
            "split_indices": [0, 0, 1, 0, 0],
            "split_conditions": [60.0, -0.2, -2.5, 0.5, 0.1],
            "default_left": [1, 0, 0, 0, 0],
            "sum_hessian": [100.0, 40.0, 60.0, 20.0, 40.0]
          }},
          {{
            "left_children": [1, -1, -1],
            "right_children": [2, -1, -1],
            "split_indices": [1, 0, 0],
            "split_conditions": [-1.0, 0.3, -0.1],
            "default_left": [0, 0, 0],
            "sum_hessian": [100.0, 30.0, 70.0]
          }}
        ]
      }}
    }}
  }},
  "version": [2, 0, 3]
}}"#
        )
    }

    fn features(age: f64, min_tscore: f64) -> FeatureVector {
        FeatureVector::new(
            vec!["age".to_string(), "min_tscore".to_string()],
            vec![age, min_tscore],
        )
        .unwrap()
    }

    #[test]
    fn test_margin_sums_leaves_and_base() {
        let model = GradientBoostedModel::from_json_str(&tiny_model_json("reg:squarederror", "5E-1")).unwrap();
        // age 70 -> right, min_tscore -3 -> left (0.5); tree 2: -3 < -1 -> left (0.3)
        let margin = model.predict_margin(&features(70.0, -3.0)).unwrap();
        assert!((margin - (0.5 + 0.5 + 0.3)).abs() < 1e-12);
        // age 50 -> left (-0.2); tree 2: 0 >= -1 -> right (-0.1)
        let margin = model.predict_margin(&features(50.0, 0.0)).unwrap();
        assert!((margin - (0.5 - 0.2 - 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_cox_objective_uses_log_base_and_exp_link() {
        let model = GradientBoostedModel::from_json_str(&tiny_model_json("survival:cox", "[1E0]")).unwrap();
        assert_eq!(model.objective(), Objective::Cox);
        assert_eq!(model.base_margin(), 0.0);
        let fv = features(70.0, -3.0);
        let margin = model.predict_margin(&fv).unwrap();
        assert!((model.score(&fv).unwrap() - margin.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_missing_value_follows_default_direction() {
        let model = GradientBoostedModel::from_json_str(&tiny_model_json("reg:squarederror", "0")).unwrap();
        let margin = model.predict_margin(&features(f64::NAN, 0.0)).unwrap();
        assert!((margin - (-0.2 - 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_feature_mismatch_is_scoring_error() {
        let model = GradientBoostedModel::from_json_str(&tiny_model_json("reg:squarederror", "0")).unwrap();
        let wrong_order = FeatureVector::new(
            vec!["min_tscore".to_string(), "age".to_string()],
            vec![-3.0, 70.0],
        )
        .unwrap();
        assert!(matches!(model.predict_margin(&wrong_order), Err(RiskError::Scoring { .. })));

        let too_short = FeatureVector::new(vec!["age".to_string()], vec![70.0]).unwrap();
        assert!(matches!(model.predict_margin(&too_short), Err(RiskError::Scoring { .. })));
    }

    #[test]
    fn test_rejects_unknown_objective_and_bad_trees() {
        let err = GradientBoostedModel::from_json_str(&tiny_model_json("rank:pairwise", "0")).unwrap_err();
        assert!(matches!(err, RiskError::ModelLoad { .. }));

        let broken = tiny_model_json("reg:squarederror", "0").replace("[0, 0, 1, 0, 0]", "[0, 0, 7, 0, 0]");
        assert!(GradientBoostedModel::from_json_str(&broken).is_err());

        assert!(GradientBoostedModel::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_expected_value_and_depth() {
        let model = GradientBoostedModel::from_json_str(&tiny_model_json("reg:squarederror", "0")).unwrap();
        let first = &model.trees()[0];
        assert_eq!(first.max_depth(), 2);
        // (40 * -0.2 + 20 * 0.5 + 40 * 0.1) / 100
        assert!((first.expected_value() - 0.06).abs() < 1e-12);
    }
}
