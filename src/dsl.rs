//! Builder combinators for expression descriptors.
//!
//! These mirror the operator set one-to-one, plus `interpolate`, which
//! expands multi-segment linear interpolation into the core operators.

use crate::{
    error::{AnimatoError, AnimatoResult},
    model::{
        BinaryArgs, DecayConfig, ExprNode, MultiArgs, NodeTag, SpringConfig, TimingConfig,
        UnaryArg,
    },
};

pub fn number(value: f64) -> ExprNode {
    ExprNode::Number { value }
}

pub fn value(tag: NodeTag) -> ExprNode {
    ExprNode::Value { tag }
}

macro_rules! multi_ops {
    ($($name:ident => $variant:ident,)*) => {
        $(pub fn $name(a: impl Into<ExprNode>, b: impl Into<ExprNode>) -> ExprNode {
            ExprNode::$variant(MultiArgs {
                a: Box::new(a.into()),
                b: Box::new(b.into()),
                args: Vec::new(),
            })
        })*
    };
}

multi_ops! {
    add => Add,
    sub => Sub,
    multiply => Multiply,
    divide => Divide,
    modulo => Modulo,
    pow => Pow,
    max => Max,
    min => Min,
    and => And,
    or => Or,
}

macro_rules! unary_ops {
    ($($name:ident => $variant:ident,)*) => {
        $(pub fn $name(v: impl Into<ExprNode>) -> ExprNode {
            ExprNode::$variant(UnaryArg {
                v: Box::new(v.into()),
            })
        })*
    };
}

unary_ops! {
    abs => Abs,
    sqrt => Sqrt,
    log => Log,
    sin => Sin,
    cos => Cos,
    tan => Tan,
    asin => Asin,
    acos => Acos,
    atan => Atan,
    exp => Exp,
    round => Round,
    ceil => Ceil,
    floor => Floor,
    not => Not,
    diff => Diff,
    cast_boolean => CastBoolean,
}

macro_rules! compare_ops {
    ($($name:ident => $variant:ident,)*) => {
        $(pub fn $name(left: impl Into<ExprNode>, right: impl Into<ExprNode>) -> ExprNode {
            ExprNode::$variant(BinaryArgs {
                left: Box::new(left.into()),
                right: Box::new(right.into()),
            })
        })*
    };
}

compare_ops! {
    eq => Eq,
    neq => Neq,
    less_than => LessThan,
    greater_than => GreaterThan,
    less_or_eq => LessOrEq,
    greater_or_eq => GreaterOrEq,
}

pub fn cond(
    expr: impl Into<ExprNode>,
    if_node: impl Into<ExprNode>,
    else_node: impl Into<ExprNode>,
) -> ExprNode {
    ExprNode::Cond {
        expr: Box::new(expr.into()),
        if_node: Box::new(if_node.into()),
        else_node: Some(Box::new(else_node.into())),
    }
}

/// `cond` without an else branch; the false case yields 0.
pub fn when(expr: impl Into<ExprNode>, if_node: impl Into<ExprNode>) -> ExprNode {
    ExprNode::Cond {
        expr: Box::new(expr.into()),
        if_node: Box::new(if_node.into()),
        else_node: None,
    }
}

pub fn block(args: impl IntoIterator<Item = ExprNode>) -> ExprNode {
    ExprNode::Block {
        args: args.into_iter().collect(),
    }
}

pub fn set(target: NodeTag, source: impl Into<ExprNode>) -> ExprNode {
    ExprNode::Set {
        target,
        source: Box::new(source.into()),
    }
}

pub fn format(format: impl Into<String>, args: impl IntoIterator<Item = ExprNode>) -> ExprNode {
    ExprNode::Format {
        format: format.into(),
        args: args.into_iter().collect(),
    }
}

pub fn call(call_id: i64, args: impl IntoIterator<Item = ExprNode>) -> ExprNode {
    ExprNode::Call {
        call_id,
        args: args.into_iter().collect(),
    }
}

pub fn call_proc(
    args: Vec<ExprNode>,
    params: Vec<NodeTag>,
    expression: impl Into<ExprNode>,
) -> ExprNode {
    ExprNode::CallProc {
        args,
        params,
        expression: Box::new(expression.into()),
    }
}

pub fn start_timing(target: NodeTag, config: TimingConfig, callback: Option<ExprNode>) -> ExprNode {
    ExprNode::StartTiming {
        target,
        config,
        callback: callback.map(Box::new),
    }
}

pub fn start_spring(target: NodeTag, config: SpringConfig, callback: Option<ExprNode>) -> ExprNode {
    ExprNode::StartSpring {
        target,
        config,
        callback: callback.map(Box::new),
    }
}

pub fn start_decay(target: NodeTag, config: DecayConfig, callback: Option<ExprNode>) -> ExprNode {
    ExprNode::StartDecay {
        target,
        config,
        callback: callback.map(Box::new),
    }
}

pub fn start_clock(target: NodeTag) -> ExprNode {
    ExprNode::StartClock { target }
}

pub fn stop_animation(animation_id: impl Into<ExprNode>) -> ExprNode {
    ExprNode::StopAnimation {
        animation_id: Box::new(animation_id.into()),
    }
}

pub fn stop_clock(target: NodeTag) -> ExprNode {
    ExprNode::StopClock { target }
}

pub fn clock_running(target: NodeTag) -> ExprNode {
    ExprNode::ClockRunning { target }
}

pub fn bezier(v: impl Into<ExprNode>, x1: f64, y1: f64, x2: f64, y2: f64) -> ExprNode {
    ExprNode::Bezier {
        v: Box::new(v.into()),
        x1,
        y1,
        x2,
        y2,
    }
}

/// Behavior outside the input range of an [`interpolate`] mapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Extrapolate {
    /// Keep following the last segment's slope.
    #[default]
    Extend,
    /// Pin to the nearest output endpoint.
    Clamp,
    /// Pass the input through unchanged.
    Identity,
}

#[derive(Clone, Debug)]
pub struct InterpolateConfig {
    pub input_range: Vec<f64>,
    pub output_range: Vec<ExprNode>,
    pub extrapolate: Extrapolate,
    pub extrapolate_left: Option<Extrapolate>,
    pub extrapolate_right: Option<Extrapolate>,
}

impl InterpolateConfig {
    pub fn linear(
        input: impl IntoIterator<Item = f64>,
        output: impl IntoIterator<Item = f64>,
    ) -> Self {
        Self {
            input_range: input.into_iter().collect(),
            output_range: output.into_iter().map(number).collect(),
            extrapolate: Extrapolate::Extend,
            extrapolate_left: None,
            extrapolate_right: None,
        }
    }

    pub fn with_extrapolate(mut self, extrapolate: Extrapolate) -> Self {
        self.extrapolate = extrapolate;
        self
    }
}

/// Expands a multi-segment linear mapping of `input` into a cond-chain over
/// the core operators. Equal input endpoints select an output endpoint by
/// comparison instead of dividing by zero.
pub fn interpolate(input: impl Into<ExprNode>, config: &InterpolateConfig) -> AnimatoResult<ExprNode> {
    let value = input.into();
    let inputs = &config.input_range;
    let outputs = &config.output_range;
    if inputs.len() < 2 {
        return Err(AnimatoError::expression(
            "interpolate needs at least two input stops",
        ));
    }
    if inputs.len() != outputs.len() {
        return Err(AnimatoError::expression(format!(
            "interpolate has {} input stops but {} output stops",
            inputs.len(),
            outputs.len()
        )));
    }
    if !inputs.windows(2).all(|w| w[0] <= w[1]) {
        return Err(AnimatoError::expression(
            "interpolate input stops must be non-decreasing",
        ));
    }

    let mut output = segment_chain(&value, inputs, outputs, 0);

    let left = config.extrapolate_left.unwrap_or(config.extrapolate);
    let right = config.extrapolate_right.unwrap_or(config.extrapolate);

    output = match left {
        Extrapolate::Extend => output,
        Extrapolate::Clamp => cond(
            less_than(value.clone(), number(inputs[0])),
            outputs[0].clone(),
            output,
        ),
        Extrapolate::Identity => cond(
            less_than(value.clone(), number(inputs[0])),
            value.clone(),
            output,
        ),
    };
    output = match right {
        Extrapolate::Extend => output,
        Extrapolate::Clamp => cond(
            greater_than(value.clone(), number(inputs[inputs.len() - 1])),
            outputs[outputs.len() - 1].clone(),
            output,
        ),
        Extrapolate::Identity => cond(
            greater_than(value.clone(), number(inputs[inputs.len() - 1])),
            value,
            output,
        ),
    };

    Ok(output)
}

fn segment_chain(value: &ExprNode, inputs: &[f64], outputs: &[ExprNode], offset: usize) -> ExprNode {
    if inputs.len() - offset == 2 {
        return segment(value, inputs, outputs, offset);
    }
    cond(
        less_than(value.clone(), number(inputs[offset + 1])),
        segment(value, inputs, outputs, offset),
        segment_chain(value, inputs, outputs, offset + 1),
    )
}

fn segment(value: &ExprNode, inputs: &[f64], outputs: &[ExprNode], offset: usize) -> ExprNode {
    let in_s = inputs[offset];
    let in_e = inputs[offset + 1];
    let out_s = outputs[offset].clone();
    let out_e = outputs[offset + 1].clone();

    let progress = divide(
        sub(value.clone(), number(in_s)),
        sub(number(in_e), number(in_s)),
    );
    let lerped = add(
        out_s.clone(),
        multiply(progress, sub(out_e.clone(), out_s.clone())),
    );
    cond(
        eq(number(in_s), number(in_e)),
        cond(less_or_eq(value.clone(), number(in_s)), out_s, out_e),
        lerped,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::NodeGraph,
        model::{NodeSpec, NodeTag},
    };

    fn eval(graph: &mut NodeGraph, descriptor: ExprNode) -> f64 {
        let tag = NodeTag(900);
        graph
            .create_node(tag, NodeSpec::Expression { graph: descriptor })
            .unwrap();
        graph.update_node(tag).unwrap();
        let out = graph.node_value(tag).unwrap();
        graph.drop_node(tag);
        out
    }

    fn graph_with_input(v: f64) -> NodeGraph {
        let mut g = NodeGraph::new();
        g.create_node(NodeTag(1), NodeSpec::Value { value: v })
            .unwrap();
        g
    }

    #[test]
    fn builders_emit_the_wire_tags() {
        let json = serde_json::to_value(add(1.0, 2.0)).unwrap();
        assert_eq!(json["type"], "add");

        let json = serde_json::to_value(value(NodeTag(4))).unwrap();
        assert_eq!(json["type"], "value");
        assert_eq!(json["tag"], 4);

        let json = serde_json::to_value(cond(number(1.0), number(2.0), number(3.0))).unwrap();
        assert_eq!(json["type"], "cond");
        assert!(json.get("ifNode").is_some());
        assert!(json.get("elseNode").is_some());

        let json = serde_json::to_value(less_or_eq(number(1.0), number(2.0))).unwrap();
        assert_eq!(json["type"], "lessOrEq");

        let json = serde_json::to_value(stop_animation(number(-1.0))).unwrap();
        assert_eq!(json["type"], "stopAnimation");
        assert!(json.get("animationId").is_some());
    }

    #[test]
    fn interpolate_maps_linearly_between_stops() {
        let mut g = graph_with_input(50.0);
        let expr =
            interpolate(value(NodeTag(1)), &InterpolateConfig::linear([0.0, 100.0], [0.0, 1.0]))
                .unwrap();
        assert!((eval(&mut g, expr) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn interpolate_picks_the_right_segment() {
        let cfg = InterpolateConfig::linear([0.0, 10.0, 20.0], [0.0, 100.0, 0.0]);
        let mut g = graph_with_input(15.0);
        let expr = interpolate(value(NodeTag(1)), &cfg).unwrap();
        assert!((eval(&mut g, expr) - 50.0).abs() < 1e-12);

        let mut g = graph_with_input(5.0);
        let expr = interpolate(value(NodeTag(1)), &cfg).unwrap();
        assert!((eval(&mut g, expr) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn interpolate_extends_by_default() {
        let cfg = InterpolateConfig::linear([0.0, 100.0], [0.0, 1.0]);
        let mut g = graph_with_input(200.0);
        let expr = interpolate(value(NodeTag(1)), &cfg).unwrap();
        assert!((eval(&mut g, expr) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn interpolate_clamps_both_edges() {
        let cfg = InterpolateConfig::linear([0.0, 100.0], [0.0, 1.0])
            .with_extrapolate(Extrapolate::Clamp);
        let mut g = graph_with_input(150.0);
        let expr = interpolate(value(NodeTag(1)), &cfg).unwrap();
        assert_eq!(eval(&mut g, expr), 1.0);

        let mut g = graph_with_input(-50.0);
        let expr = interpolate(value(NodeTag(1)), &cfg).unwrap();
        assert_eq!(eval(&mut g, expr), 0.0);
    }

    #[test]
    fn interpolate_identity_passes_the_input_through() {
        let cfg = InterpolateConfig::linear([0.0, 100.0], [0.0, 1.0])
            .with_extrapolate(Extrapolate::Identity);
        let mut g = graph_with_input(150.0);
        let expr = interpolate(value(NodeTag(1)), &cfg).unwrap();
        assert_eq!(eval(&mut g, expr), 150.0);
    }

    #[test]
    fn interpolate_guards_equal_input_endpoints() {
        let cfg = InterpolateConfig::linear([5.0, 5.0], [10.0, 20.0]);
        let mut g = graph_with_input(3.0);
        let expr = interpolate(value(NodeTag(1)), &cfg).unwrap();
        assert_eq!(eval(&mut g, expr), 10.0);

        let mut g = graph_with_input(7.0);
        let expr = interpolate(value(NodeTag(1)), &cfg).unwrap();
        assert_eq!(eval(&mut g, expr), 20.0);
    }

    #[test]
    fn interpolate_rejects_malformed_ranges() {
        assert!(interpolate(number(0.0), &InterpolateConfig::linear([0.0], [0.0])).is_err());
        assert!(
            interpolate(number(0.0), &InterpolateConfig::linear([0.0, 1.0], [0.0])).is_err()
        );
        assert!(
            interpolate(number(0.0), &InterpolateConfig::linear([1.0, 0.0], [0.0, 1.0]))
                .is_err()
        );
    }
}
