use crate::{
    ease::Easing,
    error::{AnimatoError, AnimatoResult},
};

/// Stable integer handle identifying an animated node for its lifetime.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct NodeTag(pub i64);

/// Identifier of one in-flight animation driver. Expression-spawned drivers
/// count down from -1 per expression instance; embedder-issued ids are
/// expected to be non-negative.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct AnimationId(pub i64);

/// Frame timestamp in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct FrameTime(pub f64);

impl FrameTime {
    pub fn seconds(self) -> f64 {
        self.0 / 1000.0
    }
}

/// A declarative expression tree. This is the input program: supplied once
/// when an expression node is registered, never mutated afterwards.
///
/// The wire form tags every node with `"type"`; operand field names follow
/// the serialized producer (`a`/`b`/`args` for variadic operators, `v` for
/// unary ones, `left`/`right` for comparisons).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExprNode {
    Add(MultiArgs),
    Sub(MultiArgs),
    Multiply(MultiArgs),
    Divide(MultiArgs),
    Modulo(MultiArgs),
    Pow(MultiArgs),
    Max(MultiArgs),
    Min(MultiArgs),
    And(MultiArgs),
    Or(MultiArgs),

    Abs(UnaryArg),
    Sqrt(UnaryArg),
    Log(UnaryArg),
    Sin(UnaryArg),
    Cos(UnaryArg),
    Tan(UnaryArg),
    Asin(UnaryArg),
    Acos(UnaryArg),
    Atan(UnaryArg),
    Exp(UnaryArg),
    Round(UnaryArg),
    Ceil(UnaryArg),
    Floor(UnaryArg),
    Not(UnaryArg),

    Eq(BinaryArgs),
    Neq(BinaryArgs),
    LessThan(BinaryArgs),
    GreaterThan(BinaryArgs),
    LessOrEq(BinaryArgs),
    GreaterOrEq(BinaryArgs),

    /// Reads the referenced node's current value through the store.
    Value { tag: NodeTag },
    Number { value: f64 },

    #[serde(rename_all = "camelCase")]
    Cond {
        expr: Box<ExprNode>,
        if_node: Box<ExprNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_node: Option<Box<ExprNode>>,
    },
    Block {
        args: Vec<ExprNode>,
    },
    Set {
        target: NodeTag,
        source: Box<ExprNode>,
    },
    Diff(UnaryArg),

    Format {
        format: String,
        #[serde(default)]
        args: Vec<ExprNode>,
    },
    CastBoolean(UnaryArg),

    #[serde(rename_all = "camelCase")]
    Call {
        call_id: i64,
        #[serde(default)]
        args: Vec<ExprNode>,
    },
    CallProc {
        #[serde(default)]
        args: Vec<ExprNode>,
        #[serde(default)]
        params: Vec<NodeTag>,
        expression: Box<ExprNode>,
    },

    StartTiming {
        target: NodeTag,
        config: TimingConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        callback: Option<Box<ExprNode>>,
    },
    StartSpring {
        target: NodeTag,
        config: SpringConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        callback: Option<Box<ExprNode>>,
    },
    StartDecay {
        target: NodeTag,
        config: DecayConfig,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        callback: Option<Box<ExprNode>>,
    },
    StartClock {
        target: NodeTag,
    },

    #[serde(rename_all = "camelCase")]
    StopAnimation {
        animation_id: Box<ExprNode>,
    },
    StopClock {
        target: NodeTag,
    },
    ClockRunning {
        target: NodeTag,
    },

    Bezier {
        v: Box<ExprNode>,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },

    /// Operator tags this evaluator does not know compile to a constant-0
    /// closure, so descriptor/evaluator version skew cannot break a frame.
    #[serde(other)]
    Unknown,
}

/// Operands of a variadic operator: two required plus any number of extras,
/// reduced left to right.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MultiArgs {
    pub a: Box<ExprNode>,
    pub b: Box<ExprNode>,
    #[serde(default)]
    pub args: Vec<ExprNode>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct UnaryArg {
    pub v: Box<ExprNode>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BinaryArgs {
    pub left: Box<ExprNode>,
    pub right: Box<ExprNode>,
}

impl From<f64> for ExprNode {
    fn from(value: f64) -> Self {
        Self::Number { value }
    }
}

impl From<NodeTag> for ExprNode {
    fn from(tag: NodeTag) -> Self {
        Self::Value { tag }
    }
}

/// Timing driver configuration. All fields are static.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    pub to_value: f64,
    /// Duration in milliseconds.
    pub duration: f64,
    #[serde(default)]
    pub easing: Easing,
}

/// Spring driver configuration. `initial_velocity` is an expression
/// re-evaluated when the spring starts; everything else is static.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpringConfig {
    pub to_value: f64,
    #[serde(default = "default_stiffness")]
    pub stiffness: f64,
    #[serde(default = "default_damping")]
    pub damping: f64,
    #[serde(default = "default_mass")]
    pub mass: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_velocity: Option<Box<ExprNode>>,
    #[serde(default)]
    pub overshoot_clamping: bool,
    #[serde(default = "default_rest_threshold")]
    pub rest_speed_threshold: f64,
    #[serde(default = "default_rest_threshold")]
    pub rest_displacement_threshold: f64,
}

/// Decay driver configuration. `velocity` is an expression re-evaluated when
/// the decay starts, so it can pick up live gesture state.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayConfig {
    pub velocity: Box<ExprNode>,
    #[serde(default = "default_deceleration")]
    pub deceleration: f64,
}

fn default_stiffness() -> f64 {
    100.0
}

fn default_damping() -> f64 {
    10.0
}

fn default_mass() -> f64 {
    1.0
}

fn default_rest_threshold() -> f64 {
    0.001
}

fn default_deceleration() -> f64 {
    0.998
}

impl ExprNode {
    /// Checks contract-level descriptor invariants. Runtime concerns
    /// (dangling node references, unknown tags) stay fail-soft and are not
    /// errors here.
    pub fn validate(&self) -> AnimatoResult<()> {
        match self {
            Self::Add(m)
            | Self::Sub(m)
            | Self::Multiply(m)
            | Self::Divide(m)
            | Self::Modulo(m)
            | Self::Pow(m)
            | Self::Max(m)
            | Self::Min(m)
            | Self::And(m)
            | Self::Or(m) => {
                m.a.validate()?;
                m.b.validate()?;
                m.args.iter().try_for_each(Self::validate)
            }
            Self::Abs(u)
            | Self::Sqrt(u)
            | Self::Log(u)
            | Self::Sin(u)
            | Self::Cos(u)
            | Self::Tan(u)
            | Self::Asin(u)
            | Self::Acos(u)
            | Self::Atan(u)
            | Self::Exp(u)
            | Self::Round(u)
            | Self::Ceil(u)
            | Self::Floor(u)
            | Self::Not(u)
            | Self::Diff(u)
            | Self::CastBoolean(u) => u.v.validate(),
            Self::Eq(b)
            | Self::Neq(b)
            | Self::LessThan(b)
            | Self::GreaterThan(b)
            | Self::LessOrEq(b)
            | Self::GreaterOrEq(b) => {
                b.left.validate()?;
                b.right.validate()
            }
            Self::Value { .. } | Self::Number { .. } | Self::Unknown => Ok(()),
            Self::Cond {
                expr,
                if_node,
                else_node,
            } => {
                expr.validate()?;
                if_node.validate()?;
                else_node.as_deref().map_or(Ok(()), Self::validate)
            }
            Self::Block { args } => args.iter().try_for_each(Self::validate),
            Self::Set { source, .. } => source.validate(),
            Self::Format { args, .. } => args.iter().try_for_each(Self::validate),
            Self::Call { args, .. } => args.iter().try_for_each(Self::validate),
            Self::CallProc {
                args,
                params,
                expression,
            } => {
                if args.len() != params.len() {
                    return Err(AnimatoError::expression(format!(
                        "callProc has {} arguments but {} parameters",
                        args.len(),
                        params.len()
                    )));
                }
                args.iter().try_for_each(Self::validate)?;
                expression.validate()
            }
            Self::StartTiming {
                config, callback, ..
            } => {
                if !(config.duration.is_finite() && config.duration >= 0.0) {
                    return Err(AnimatoError::expression(
                        "timing duration must be a finite non-negative number",
                    ));
                }
                callback.as_deref().map_or(Ok(()), Self::validate)
            }
            Self::StartSpring {
                config, callback, ..
            } => {
                if config.mass <= 0.0 || config.stiffness < 0.0 {
                    return Err(AnimatoError::expression(
                        "spring requires mass > 0 and stiffness >= 0",
                    ));
                }
                if let Some(v) = &config.initial_velocity {
                    v.validate()?;
                }
                callback.as_deref().map_or(Ok(()), Self::validate)
            }
            Self::StartDecay {
                config, callback, ..
            } => {
                if !(0.0..1.0).contains(&config.deceleration) {
                    return Err(AnimatoError::expression(
                        "decay deceleration must be in [0, 1)",
                    ));
                }
                config.velocity.validate()?;
                callback.as_deref().map_or(Ok(()), Self::validate)
            }
            Self::StartClock { .. } | Self::StopClock { .. } | Self::ClockRunning { .. } => Ok(()),
            Self::StopAnimation { animation_id } => animation_id.validate(),
            Self::Bezier { v, x1, x2, .. } => {
                if !(0.0..=1.0).contains(x1) || !(0.0..=1.0).contains(x2) {
                    return Err(AnimatoError::expression(
                        "bezier x control coordinates must be within [0, 1]",
                    ));
                }
                v.validate()
            }
        }
    }
}

/// Registration shape consumed by the node store, one map per node.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeSpec {
    Value {
        value: f64,
    },
    Expression {
        graph: ExprNode,
    },
    Proc {
        args: Vec<NodeTag>,
        params: Vec<NodeTag>,
        expression: NodeTag,
    },
}

/// A whole graph document: the JSON form used by the CLI and fixtures.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GraphDoc {
    pub nodes: Vec<NodeDecl>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct NodeDecl {
    pub tag: NodeTag,
    #[serde(flatten)]
    pub spec: NodeSpec,
}

impl GraphDoc {
    pub fn validate(&self) -> AnimatoResult<()> {
        let mut seen = std::collections::BTreeSet::new();
        for decl in &self.nodes {
            if !seen.insert(decl.tag) {
                return Err(AnimatoError::graph(format!(
                    "duplicate node tag {:?}",
                    decl.tag
                )));
            }
            match &decl.spec {
                NodeSpec::Value { .. } => {}
                NodeSpec::Expression { graph } => graph.validate()?,
                NodeSpec::Proc { args, params, .. } => {
                    if args.len() != params.len() {
                        return Err(AnimatoError::graph(format!(
                            "proc node {:?} has {} arguments but {} parameters",
                            decl.tag,
                            args.len(),
                            params.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_json_roundtrip() {
        let src = r#"{
            "type": "add",
            "a": {"type": "number", "value": 10},
            "b": {"type": "value", "tag": 3},
            "args": [{"type": "multiply",
                      "a": {"type": "number", "value": 2},
                      "b": {"type": "number", "value": 3}}]
        }"#;
        let node: ExprNode = serde_json::from_str(src).unwrap();
        let ExprNode::Add(multi) = &node else {
            panic!("expected add");
        };
        assert!(matches!(&*multi.b, ExprNode::Value { tag: NodeTag(3) }));
        assert_eq!(multi.args.len(), 1);

        let back = serde_json::to_string(&node).unwrap();
        let again: ExprNode = serde_json::from_str(&back).unwrap();
        assert!(matches!(again, ExprNode::Add(_)));
    }

    #[test]
    fn unknown_operator_tag_parses_as_unknown() {
        let node: ExprNode = serde_json::from_str(r#"{"type": "holographicBlur"}"#).unwrap();
        assert!(matches!(node, ExprNode::Unknown));
    }

    #[test]
    fn cond_else_is_optional() {
        let node: ExprNode = serde_json::from_str(
            r#"{"type": "cond",
                "expr": {"type": "number", "value": 1},
                "ifNode": {"type": "number", "value": 2}}"#,
        )
        .unwrap();
        let ExprNode::Cond { else_node, .. } = &node else {
            panic!("expected cond");
        };
        assert!(else_node.is_none());
        node.validate().unwrap();
    }

    #[test]
    fn spring_config_fills_defaults() {
        let cfg: SpringConfig = serde_json::from_str(r#"{"toValue": 100}"#).unwrap();
        assert_eq!(cfg.stiffness, 100.0);
        assert_eq!(cfg.damping, 10.0);
        assert_eq!(cfg.mass, 1.0);
        assert!(!cfg.overshoot_clamping);
        assert_eq!(cfg.rest_speed_threshold, 0.001);
        assert_eq!(cfg.rest_displacement_threshold, 0.001);
        assert!(cfg.initial_velocity.is_none());
    }

    #[test]
    fn validate_rejects_proc_arity_mismatch() {
        let node: ExprNode = serde_json::from_str(
            r#"{"type": "callProc",
                "args": [{"type": "number", "value": 1}],
                "params": [10, 11],
                "expression": {"type": "value", "tag": 10}}"#,
        )
        .unwrap();
        assert!(node.validate().is_err());
    }

    #[test]
    fn validate_rejects_bezier_out_of_range_x() {
        let node: ExprNode = serde_json::from_str(
            r#"{"type": "bezier",
                "v": {"type": "number", "value": 0.5},
                "x1": 1.5, "y1": 0.0, "x2": 0.5, "y2": 1.0}"#,
        )
        .unwrap();
        assert!(node.validate().is_err());
    }

    #[test]
    fn graph_doc_rejects_duplicate_tags() {
        let doc: GraphDoc = serde_json::from_str(
            r#"{"nodes": [
                {"tag": 1, "type": "value", "value": 0},
                {"tag": 1, "type": "value", "value": 1}
            ]}"#,
        )
        .unwrap();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn graph_doc_parses_all_node_kinds() {
        let doc: GraphDoc = serde_json::from_str(
            r#"{"nodes": [
                {"tag": 1, "type": "value", "value": 0.5},
                {"tag": 2, "type": "expression",
                 "graph": {"type": "value", "tag": 1}},
                {"tag": 3, "type": "proc",
                 "args": [1], "params": [4], "expression": 2},
                {"tag": 4, "type": "value", "value": 0}
            ]}"#,
        )
        .unwrap();
        doc.validate().unwrap();
        assert_eq!(doc.nodes.len(), 4);
    }
}
