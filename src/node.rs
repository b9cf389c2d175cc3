use std::{cell::Cell, rc::Rc};

use crate::{
    error::AnimatoResult,
    eval::{self, Compiled, EvalCtx},
    graph::NodeGraph,
    model::{ExprNode, NodeSpec, NodeTag},
};

/// Non-numeric side channel of a value-carrying node, written by `format`
/// and `castBoolean` expressions.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Payload {
    Text(String),
    Bool(bool),
}

/// A node in the runtime animation graph. Every variant carries a current
/// numeric value; the store reads results back through [`value`](Self::value)
/// after driving [`update`](Self::update).
#[derive(Debug)]
pub enum AnimatedNode {
    Value(ValueNode),
    Expression(ExpressionNode),
    Proc(ProcNode),
}

/// The base mutable numeric cell.
#[derive(Clone, Debug, Default)]
pub struct ValueNode {
    pub value: f64,
    pub payload: Option<Payload>,
}

impl ValueNode {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            payload: None,
        }
    }
}

/// Holds an unparsed declarative subtree and the closure tree compiled from
/// it on first update. Compilation happens exactly once per node instance;
/// later updates re-invoke the cached closures.
#[derive(Debug)]
pub struct ExpressionNode {
    descriptor: ExprNode,
    compiled: Option<Compiled>,
    // Animation-id allocator shared with completion handlers spawned by this
    // node's start sites. Counts down from -1.
    ids: Rc<Cell<i64>>,
    value: f64,
    payload: Option<Payload>,
}

impl ExpressionNode {
    pub fn new(descriptor: ExprNode) -> Self {
        Self {
            descriptor,
            compiled: None,
            ids: Rc::new(Cell::new(-1)),
            value: 0.0,
            payload: None,
        }
    }

    pub fn descriptor(&self) -> &ExprNode {
        &self.descriptor
    }

    fn update(&mut self, tag: NodeTag, graph: &mut NodeGraph) -> AnimatoResult<()> {
        if self.compiled.is_none() {
            self.compiled = Some(eval::compile(&self.descriptor)?);
        }
        if let Some(compiled) = self.compiled.as_mut() {
            let mut ctx = EvalCtx::new(graph, tag, self.ids.clone());
            self.value = compiled.eval(&mut ctx);
            if let Some(payload) = ctx.take_payload() {
                self.payload = Some(payload);
            }
        }
        Ok(())
    }
}

/// Binds argument nodes to parameter nodes, then delegates to a body node:
/// call-by-value procedure invocation without a call stack.
#[derive(Debug)]
pub struct ProcNode {
    args: Vec<NodeTag>,
    params: Vec<NodeTag>,
    expression: NodeTag,
    resolved: Option<ResolvedProc>,
    value: f64,
}

// References resolved against the store on first update and cached; they do
// not change after first resolution.
#[derive(Clone, Debug)]
struct ResolvedProc {
    pairs: Vec<(NodeTag, NodeTag)>,
    body: Option<NodeTag>,
}

impl ProcNode {
    pub fn new(args: Vec<NodeTag>, params: Vec<NodeTag>, expression: NodeTag) -> Self {
        Self {
            args,
            params,
            expression,
            resolved: None,
            value: 0.0,
        }
    }

    fn update(&mut self, graph: &mut NodeGraph) -> AnimatoResult<()> {
        if self.resolved.is_none() {
            let pairs = self
                .args
                .iter()
                .zip(&self.params)
                .filter(|(arg, param)| graph.contains(**arg) && graph.contains(**param))
                .map(|(arg, param)| (*arg, *param))
                .collect();
            let body = graph.contains(self.expression).then_some(self.expression);
            self.resolved = Some(ResolvedProc { pairs, body });
        }
        let Some(resolved) = self.resolved.clone() else {
            return Ok(());
        };

        // Raw value copies, not recursive updates of the arguments.
        for (arg, param) in &resolved.pairs {
            if let Some(v) = graph.node_value(*arg) {
                graph.copy_value(*param, v);
            }
        }

        if let Some(body) = resolved.body {
            graph.update_node(body)?;
            if let Some(v) = graph.node_value(body) {
                self.value = v;
            }
        }
        Ok(())
    }
}

impl AnimatedNode {
    pub fn from_spec(spec: NodeSpec) -> Self {
        match spec {
            NodeSpec::Value { value } => Self::Value(ValueNode::new(value)),
            NodeSpec::Expression { graph } => Self::Expression(ExpressionNode::new(graph)),
            NodeSpec::Proc {
                args,
                params,
                expression,
            } => Self::Proc(ProcNode::new(args, params, expression)),
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            Self::Value(n) => n.value,
            Self::Expression(n) => n.value,
            Self::Proc(n) => n.value,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Value(n) => n.payload.as_ref(),
            Self::Expression(n) => n.payload.as_ref(),
            Self::Proc(_) => None,
        }
    }

    pub(crate) fn set_value(&mut self, value: f64) {
        match self {
            Self::Value(n) => n.value = value,
            Self::Expression(n) => n.value = value,
            Self::Proc(n) => n.value = value,
        }
    }

    /// Recomputes the node from its current inputs. Results are read back via
    /// [`value`](Self::value) and [`payload`](Self::payload).
    pub(crate) fn update(&mut self, tag: NodeTag, graph: &mut NodeGraph) -> AnimatoResult<()> {
        match self {
            Self::Value(_) => Ok(()),
            Self::Expression(n) => n.update(tag, graph),
            Self::Proc(n) => n.update(graph),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_spec_maps_every_variant() {
        let v = AnimatedNode::from_spec(NodeSpec::Value { value: 2.5 });
        assert_eq!(v.value(), 2.5);

        let e = AnimatedNode::from_spec(NodeSpec::Expression {
            graph: ExprNode::Number { value: 1.0 },
        });
        assert_eq!(e.value(), 0.0); // not evaluated yet

        let p = AnimatedNode::from_spec(NodeSpec::Proc {
            args: vec![NodeTag(1)],
            params: vec![NodeTag(2)],
            expression: NodeTag(3),
        });
        assert!(matches!(p, AnimatedNode::Proc(_)));
    }

    #[test]
    fn set_value_writes_any_variant() {
        let mut v = AnimatedNode::from_spec(NodeSpec::Value { value: 0.0 });
        v.set_value(9.0);
        assert_eq!(v.value(), 9.0);

        let mut e = AnimatedNode::from_spec(NodeSpec::Expression {
            graph: ExprNode::Number { value: 1.0 },
        });
        e.set_value(4.0);
        assert_eq!(e.value(), 4.0);
    }

    #[test]
    fn value_node_payload_is_preserved() {
        let mut n = ValueNode::new(1.0);
        n.payload = Some(Payload::Text("val: 10".to_string()));
        assert_eq!(n.payload, Some(Payload::Text("val: 10".to_string())));
    }
}
