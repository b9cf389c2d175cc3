use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use crate::{
    drivers::DriverConfig,
    error::{AnimatoError, AnimatoResult},
    graph::NodeGraph,
    model::{AnimationId, ExprNode, MultiArgs, NodeTag, TimingConfig},
    node::Payload,
};

/// Compiles an expression descriptor into its executable form.
///
/// Compilation is a pure recursive descent over the descriptor and happens
/// exactly once per expression node instance; re-evaluation re-invokes the
/// resulting closure tree. Unknown operator tags compile to a constant-0
/// closure, while structural contract violations (argument/parameter arity
/// mismatch, bad format template) are hard errors.
#[tracing::instrument(level = "debug", skip_all)]
pub(crate) fn compile(descriptor: &ExprNode) -> AnimatoResult<Compiled> {
    compile_node(descriptor)
}

/// Evaluation context for one `update` of an expression node: the store, the
/// owning node's tag, the node's animation-id allocator, and the payload slot
/// written by `format`/`castBoolean`.
pub(crate) struct EvalCtx<'a> {
    graph: &'a mut NodeGraph,
    owner: NodeTag,
    ids: Rc<Cell<i64>>,
    payload: Option<Payload>,
}

impl<'a> EvalCtx<'a> {
    pub(crate) fn new(graph: &'a mut NodeGraph, owner: NodeTag, ids: Rc<Cell<i64>>) -> Self {
        Self {
            graph,
            owner,
            ids,
            payload: None,
        }
    }

    pub(crate) fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    // Ids count down so they never collide with the non-negative ids issued
    // by the embedder.
    fn next_animation_id(&mut self) -> AnimationId {
        let id = self.ids.get();
        self.ids.set(id - 1);
        AnimationId(id)
    }
}

/// Completion callback of an expression-started driver: a compiled
/// sub-expression shared between the start site and the running driver,
/// evaluated for its side effects when the driver finishes.
pub(crate) struct CompletionHandler {
    expr: Rc<RefCell<Compiled>>,
    owner: NodeTag,
    ids: Rc<Cell<i64>>,
}

impl CompletionHandler {
    pub(crate) fn run(self, graph: &mut NodeGraph) {
        let mut compiled = self.expr.borrow_mut();
        let mut ctx = EvalCtx::new(graph, self.owner, self.ids);
        let _ = compiled.eval(&mut ctx);
    }
}

/// The compiled closure tree: one variant per operator family, dispatched by
/// pattern match. Stateful operators (`diff`, the start sites' pending
/// tables) keep their state inline, scoped to this tree's lifetime.
#[derive(Debug)]
pub(crate) enum Compiled {
    Const(f64),
    Read(NodeTag),
    Multi {
        op: MultiOp,
        a: Box<Compiled>,
        b: Box<Compiled>,
        rest: Vec<Compiled>,
    },
    Unary {
        op: UnaryOp,
        v: Box<Compiled>,
    },
    Compare {
        op: CompareOp,
        left: Box<Compiled>,
        right: Box<Compiled>,
    },
    Cond {
        expr: Box<Compiled>,
        on_true: Box<Compiled>,
        on_false: Box<Compiled>,
    },
    Block(Vec<Compiled>),
    Set {
        target: NodeTag,
        source: Box<Compiled>,
    },
    Diff {
        v: Box<Compiled>,
        prev: Option<f64>,
    },
    Format {
        template: Template,
        args: Vec<Compiled>,
    },
    CastBool {
        v: Box<Compiled>,
    },
    Call {
        call_id: i64,
        args: Vec<Compiled>,
    },
    CallProc {
        args: Vec<Compiled>,
        params: Vec<NodeTag>,
        body: Box<Compiled>,
    },
    Start {
        target: NodeTag,
        law: StartLaw,
        callback: Option<Rc<RefCell<Compiled>>>,
        // Most recently started animation per target for this site; starting
        // again first cancels the stale entry.
        pending: HashMap<NodeTag, AnimationId>,
    },
    StopAnimation {
        id: Box<Compiled>,
    },
    StopClock {
        target: NodeTag,
    },
    ClockRunning {
        target: NodeTag,
    },
    Bezier {
        v: Box<Compiled>,
        curve: crate::ease::CubicBezier,
    },
    Nop,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum MultiOp {
    Add,
    Sub,
    Multiply,
    Divide,
    Modulo,
    Pow,
    Max,
    Min,
    And,
    Or,
}

impl MultiOp {
    fn reduce(self, p: f64, c: f64) -> f64 {
        match self {
            Self::Add => p + c,
            Self::Sub => p - c,
            Self::Multiply => p * c,
            Self::Divide => p / c,
            // Floored remainder: always non-negative for a positive divisor.
            Self::Modulo => ((p % c) + c) % c,
            Self::Pow => p.powf(c),
            Self::Max => p.max(c),
            Self::Min => p.min(c),
            Self::And => bool_value(truthy(p) && truthy(c)),
            Self::Or => bool_value(truthy(p) || truthy(c)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum UnaryOp {
    Abs,
    Sqrt,
    Log,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
    Round,
    Ceil,
    Floor,
    Not,
}

impl UnaryOp {
    fn reduce(self, v: f64) -> f64 {
        match self {
            Self::Abs => v.abs(),
            Self::Sqrt => v.sqrt(),
            Self::Log => v.ln(),
            Self::Sin => v.sin(),
            Self::Cos => v.cos(),
            Self::Tan => v.tan(),
            Self::Asin => v.asin(),
            Self::Acos => v.acos(),
            Self::Atan => v.atan(),
            Self::Exp => v.exp(),
            // Half-up rounding, so -2.5 rounds to -2.
            Self::Round => (v + 0.5).floor(),
            Self::Ceil => v.ceil(),
            Self::Floor => v.floor(),
            Self::Not => bool_value(!truthy(v)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum CompareOp {
    Eq,
    Neq,
    LessThan,
    GreaterThan,
    LessOrEq,
    GreaterOrEq,
}

impl CompareOp {
    fn reduce(self, left: f64, right: f64) -> f64 {
        bool_value(match self {
            Self::Eq => left == right,
            Self::Neq => left != right,
            Self::LessThan => left < right,
            Self::GreaterThan => left > right,
            Self::LessOrEq => left <= right,
            Self::GreaterOrEq => left >= right,
        })
    }
}

/// Static part of a start site's motion law. Dynamic velocity fields stay
/// compiled sub-expressions, re-evaluated at each start.
#[derive(Debug)]
pub(crate) enum StartLaw {
    Timing(TimingConfig),
    Spring(SpringLaw),
    Decay {
        deceleration: f64,
        velocity: Box<Compiled>,
    },
    Clock,
}

#[derive(Debug)]
pub(crate) struct SpringLaw {
    to_value: f64,
    stiffness: f64,
    damping: f64,
    mass: f64,
    overshoot_clamping: bool,
    rest_speed_threshold: f64,
    rest_displacement_threshold: f64,
    initial_velocity: Option<Box<Compiled>>,
}

fn truthy(v: f64) -> bool {
    v != 0.0
}

fn bool_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn compile_node(node: &ExprNode) -> AnimatoResult<Compiled> {
    Ok(match node {
        ExprNode::Add(m) => compile_multi(MultiOp::Add, m)?,
        ExprNode::Sub(m) => compile_multi(MultiOp::Sub, m)?,
        ExprNode::Multiply(m) => compile_multi(MultiOp::Multiply, m)?,
        ExprNode::Divide(m) => compile_multi(MultiOp::Divide, m)?,
        ExprNode::Modulo(m) => compile_multi(MultiOp::Modulo, m)?,
        ExprNode::Pow(m) => compile_multi(MultiOp::Pow, m)?,
        ExprNode::Max(m) => compile_multi(MultiOp::Max, m)?,
        ExprNode::Min(m) => compile_multi(MultiOp::Min, m)?,
        ExprNode::And(m) => compile_multi(MultiOp::And, m)?,
        ExprNode::Or(m) => compile_multi(MultiOp::Or, m)?,

        ExprNode::Abs(u) => compile_unary(UnaryOp::Abs, &u.v)?,
        ExprNode::Sqrt(u) => compile_unary(UnaryOp::Sqrt, &u.v)?,
        ExprNode::Log(u) => compile_unary(UnaryOp::Log, &u.v)?,
        ExprNode::Sin(u) => compile_unary(UnaryOp::Sin, &u.v)?,
        ExprNode::Cos(u) => compile_unary(UnaryOp::Cos, &u.v)?,
        ExprNode::Tan(u) => compile_unary(UnaryOp::Tan, &u.v)?,
        ExprNode::Asin(u) => compile_unary(UnaryOp::Asin, &u.v)?,
        ExprNode::Acos(u) => compile_unary(UnaryOp::Acos, &u.v)?,
        ExprNode::Atan(u) => compile_unary(UnaryOp::Atan, &u.v)?,
        ExprNode::Exp(u) => compile_unary(UnaryOp::Exp, &u.v)?,
        ExprNode::Round(u) => compile_unary(UnaryOp::Round, &u.v)?,
        ExprNode::Ceil(u) => compile_unary(UnaryOp::Ceil, &u.v)?,
        ExprNode::Floor(u) => compile_unary(UnaryOp::Floor, &u.v)?,
        ExprNode::Not(u) => compile_unary(UnaryOp::Not, &u.v)?,

        ExprNode::Eq(b) => compile_compare(CompareOp::Eq, b)?,
        ExprNode::Neq(b) => compile_compare(CompareOp::Neq, b)?,
        ExprNode::LessThan(b) => compile_compare(CompareOp::LessThan, b)?,
        ExprNode::GreaterThan(b) => compile_compare(CompareOp::GreaterThan, b)?,
        ExprNode::LessOrEq(b) => compile_compare(CompareOp::LessOrEq, b)?,
        ExprNode::GreaterOrEq(b) => compile_compare(CompareOp::GreaterOrEq, b)?,

        ExprNode::Value { tag } => Compiled::Read(*tag),
        ExprNode::Number { value } => Compiled::Const(*value),

        ExprNode::Cond {
            expr,
            if_node,
            else_node,
        } => Compiled::Cond {
            expr: Box::new(compile_node(expr)?),
            on_true: Box::new(compile_node(if_node)?),
            on_false: Box::new(match else_node {
                Some(e) => compile_node(e)?,
                None => Compiled::Const(0.0),
            }),
        },
        ExprNode::Block { args } => Compiled::Block(compile_list(args)?),
        ExprNode::Set { target, source } => Compiled::Set {
            target: *target,
            source: Box::new(compile_node(source)?),
        },
        ExprNode::Diff(u) => Compiled::Diff {
            v: Box::new(compile_node(&u.v)?),
            prev: None,
        },

        ExprNode::Format { format, args } => Compiled::Format {
            template: Template::parse(format)?,
            args: compile_list(args)?,
        },
        ExprNode::CastBoolean(u) => Compiled::CastBool {
            v: Box::new(compile_node(&u.v)?),
        },

        ExprNode::Call { call_id, args } => Compiled::Call {
            call_id: *call_id,
            args: compile_list(args)?,
        },
        ExprNode::CallProc {
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
            Compiled::CallProc {
                args: compile_list(args)?,
                params: params.clone(),
                body: Box::new(compile_node(expression)?),
            }
        }

        ExprNode::StartTiming {
            target,
            config,
            callback,
        } => compile_start(*target, StartLaw::Timing(config.clone()), callback)?,
        ExprNode::StartSpring {
            target,
            config,
            callback,
        } => {
            let law = StartLaw::Spring(SpringLaw {
                to_value: config.to_value,
                stiffness: config.stiffness,
                damping: config.damping,
                mass: config.mass,
                overshoot_clamping: config.overshoot_clamping,
                rest_speed_threshold: config.rest_speed_threshold,
                rest_displacement_threshold: config.rest_displacement_threshold,
                initial_velocity: match &config.initial_velocity {
                    Some(v) => Some(Box::new(compile_node(v)?)),
                    None => None,
                },
            });
            compile_start(*target, law, callback)?
        }
        ExprNode::StartDecay {
            target,
            config,
            callback,
        } => {
            let law = StartLaw::Decay {
                deceleration: config.deceleration,
                velocity: Box::new(compile_node(&config.velocity)?),
            };
            compile_start(*target, law, callback)?
        }
        ExprNode::StartClock { target } => compile_start(*target, StartLaw::Clock, &None)?,

        ExprNode::StopAnimation { animation_id } => Compiled::StopAnimation {
            id: Box::new(compile_node(animation_id)?),
        },
        ExprNode::StopClock { target } => Compiled::StopClock { target: *target },
        ExprNode::ClockRunning { target } => Compiled::ClockRunning { target: *target },

        ExprNode::Bezier { v, x1, y1, x2, y2 } => Compiled::Bezier {
            v: Box::new(compile_node(v)?),
            curve: crate::ease::CubicBezier::new(*x1, *y1, *x2, *y2),
        },

        ExprNode::Unknown => {
            tracing::warn!("unknown operator tag compiles to a constant 0");
            Compiled::Nop
        }
    })
}

fn compile_multi(op: MultiOp, m: &MultiArgs) -> AnimatoResult<Compiled> {
    Ok(Compiled::Multi {
        op,
        a: Box::new(compile_node(&m.a)?),
        b: Box::new(compile_node(&m.b)?),
        rest: compile_list(&m.args)?,
    })
}

fn compile_unary(op: UnaryOp, v: &ExprNode) -> AnimatoResult<Compiled> {
    Ok(Compiled::Unary {
        op,
        v: Box::new(compile_node(v)?),
    })
}

fn compile_compare(op: CompareOp, b: &crate::model::BinaryArgs) -> AnimatoResult<Compiled> {
    Ok(Compiled::Compare {
        op,
        left: Box::new(compile_node(&b.left)?),
        right: Box::new(compile_node(&b.right)?),
    })
}

fn compile_start(
    target: NodeTag,
    law: StartLaw,
    callback: &Option<Box<ExprNode>>,
) -> AnimatoResult<Compiled> {
    Ok(Compiled::Start {
        target,
        law,
        callback: match callback {
            Some(cb) => Some(Rc::new(RefCell::new(compile_node(cb)?))),
            None => None,
        },
        pending: HashMap::new(),
    })
}

fn compile_list(nodes: &[ExprNode]) -> AnimatoResult<Vec<Compiled>> {
    nodes.iter().map(compile_node).collect()
}

impl Compiled {
    /// Runs the closure tree. Never fails: dangling references and other
    /// runtime irregularities degrade to the neutral value 0.
    pub(crate) fn eval(&mut self, ctx: &mut EvalCtx<'_>) -> f64 {
        match self {
            Self::Const(v) => *v,
            Self::Read(tag) => {
                let tag = *tag;
                match ctx.graph.node_value(tag) {
                    Some(v) => v,
                    None => {
                        tracing::debug!(?tag, "value reference did not resolve");
                        0.0
                    }
                }
            }
            Self::Multi { op, a, b, rest } => {
                let op = *op;
                let mut acc = op.reduce(a.eval(ctx), b.eval(ctx));
                for operand in rest {
                    acc = op.reduce(acc, operand.eval(ctx));
                }
                acc
            }
            Self::Unary { op, v } => op.reduce(v.eval(ctx)),
            Self::Compare { op, left, right } => {
                let op = *op;
                let l = left.eval(ctx);
                let r = right.eval(ctx);
                op.reduce(l, r)
            }
            Self::Cond {
                expr,
                on_true,
                on_false,
            } => {
                // Exactly one branch runs, so only its side effects happen.
                if truthy(expr.eval(ctx)) {
                    on_true.eval(ctx)
                } else {
                    on_false.eval(ctx)
                }
            }
            Self::Block(stmts) => {
                let mut ret = 0.0;
                for stmt in stmts {
                    ret = stmt.eval(ctx);
                }
                ret
            }
            Self::Set { target, source } => {
                let value = source.eval(ctx);
                ctx.graph.set_value(*target, value);
                ctx.graph.node_value(*target).unwrap_or(0.0)
            }
            Self::Diff { v, prev } => {
                let value = v.eval(ctx);
                let out = match *prev {
                    Some(previous) => value - previous,
                    None => 0.0,
                };
                *prev = Some(value);
                out
            }
            Self::Format { template, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    values.push(arg.eval(ctx));
                }
                ctx.payload = Some(Payload::Text(template.render(&values)));
                0.0
            }
            Self::CastBool { v } => {
                let value = v.eval(ctx);
                ctx.payload = Some(Payload::Bool(truthy(value)));
                0.0
            }
            Self::Call { call_id, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    values.push(arg.eval(ctx));
                }
                let (owner, call_id) = (ctx.owner, *call_id);
                ctx.graph.emit_call_event(owner, call_id, values);
                0.0
            }
            Self::CallProc { args, params, body } => {
                for (arg, param) in args.iter_mut().zip(params.iter()) {
                    let value = arg.eval(ctx);
                    ctx.graph.set_value(*param, value);
                }
                body.eval(ctx)
            }
            Self::Start {
                target,
                law,
                callback,
                pending,
            } => {
                let target = *target;
                // Never let two drivers fight over one node: cancel the stale
                // animation for this target before starting the new one.
                if let Some(stale) = pending.remove(&target) {
                    ctx.graph.stop_driver(stale);
                }

                let config = match law {
                    StartLaw::Timing(cfg) => DriverConfig::Timing {
                        to_value: cfg.to_value,
                        duration: cfg.duration,
                        easing: cfg.easing,
                    },
                    StartLaw::Spring(s) => DriverConfig::Spring {
                        to_value: s.to_value,
                        stiffness: s.stiffness,
                        damping: s.damping,
                        mass: s.mass,
                        initial_velocity: match s.initial_velocity.as_mut() {
                            Some(v) => v.eval(ctx),
                            None => 0.0,
                        },
                        overshoot_clamping: s.overshoot_clamping,
                        rest_speed_threshold: s.rest_speed_threshold,
                        rest_displacement_threshold: s.rest_displacement_threshold,
                    },
                    StartLaw::Decay {
                        deceleration,
                        velocity,
                    } => DriverConfig::Decay {
                        velocity: velocity.eval(ctx),
                        deceleration: *deceleration,
                    },
                    StartLaw::Clock => DriverConfig::Clock,
                };

                let id = ctx.next_animation_id();
                let handler = callback.as_ref().map(|expr| CompletionHandler {
                    expr: Rc::clone(expr),
                    owner: ctx.owner,
                    ids: Rc::clone(&ctx.ids),
                });
                ctx.graph.start_driver(id, target, config, handler);
                pending.insert(target, id);
                id.0 as f64
            }
            Self::StopAnimation { id } => {
                let id = AnimationId(id.eval(ctx).round() as i64);
                bool_value(ctx.graph.stop_driver(id))
            }
            Self::StopClock { target } => {
                let target = *target;
                let ids: Vec<AnimationId> = ctx
                    .graph
                    .active_drivers()
                    .filter(|(_, d)| d.target() == target)
                    .map(|(id, _)| id)
                    .collect();
                let any = !ids.is_empty();
                for id in ids {
                    ctx.graph.stop_driver(id);
                }
                bool_value(any)
            }
            Self::ClockRunning { target } => bool_value(ctx.graph.is_animating(*target)),
            Self::Bezier { v, curve } => {
                let x = v.eval(ctx);
                curve.apply(x)
            }
            Self::Nop => 0.0,
        }
    }
}

/// Positional printf-style template rendered into the node's non-numeric
/// payload. Supports `%f`, `%.Nf`, `%d` and the `%%` escape.
#[derive(Clone, Debug)]
pub(crate) struct Template {
    parts: Vec<Part>,
}

#[derive(Clone, Debug)]
enum Part {
    Text(String),
    Float { precision: Option<usize> },
    Int,
}

impl Template {
    fn parse(format: &str) -> AnimatoResult<Self> {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut chars = format.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch != '%' {
                text.push(ch);
                continue;
            }
            match chars.peek() {
                Some('%') => {
                    chars.next();
                    text.push('%');
                }
                Some(_) => {
                    if !text.is_empty() {
                        parts.push(Part::Text(std::mem::take(&mut text)));
                    }
                    parts.push(Self::parse_spec(&mut chars)?);
                }
                None => {
                    return Err(AnimatoError::expression(
                        "format template ends with a dangling '%'",
                    ));
                }
            }
        }
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        Ok(Self { parts })
    }

    fn parse_spec(
        chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    ) -> AnimatoResult<Part> {
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|c| c.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            let parsed = digits.parse::<usize>().map_err(|_| {
                AnimatoError::expression("format precision must be a number")
            })?;
            precision = Some(parsed);
        }
        match chars.next() {
            Some('f') => Ok(Part::Float { precision }),
            Some('d') if precision.is_none() => Ok(Part::Int),
            other => Err(AnimatoError::expression(format!(
                "unsupported format specifier {other:?}"
            ))),
        }
    }

    fn render(&self, values: &[f64]) -> String {
        let mut out = String::new();
        let mut next = 0usize;
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Float { precision } => {
                    let v = values.get(next).copied().unwrap_or(0.0);
                    next += 1;
                    match precision {
                        Some(p) => out.push_str(&format!("{v:.p$}", p = *p)),
                        None => out.push_str(&format!("{v:.6}")),
                    }
                }
                Part::Int => {
                    let v = values.get(next).copied().unwrap_or(0.0);
                    next += 1;
                    out.push_str(&format!("{}", v.round() as i64));
                }
            }
        }
        out
    }
}
