use std::collections::{BTreeMap, HashMap};

use crate::{
    drivers::{AnimationDriver, DriverConfig, DriverState},
    error::{AnimatoError, AnimatoResult},
    eval::CompletionHandler,
    model::{AnimationId, FrameTime, GraphDoc, NodeSpec, NodeTag},
    node::{AnimatedNode, Payload},
};

/// An argument package emitted by a `call` expression, addressed by the
/// owning expression node and the call route id. The embedder drains these
/// once per frame and dispatches them to the application layer.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CallEvent {
    pub node: NodeTag,
    pub call_id: i64,
    pub values: Vec<f64>,
}

/// Node store and driver registry: owns every animated node by tag, owns the
/// set of in-flight animation drivers, and runs the per-frame tick.
///
/// All cross-node references are tag lookups into this arena; nothing holds a
/// node reference across frames, so the graph can be restructured between
/// frames without invalidating anything.
#[derive(Default)]
pub struct NodeGraph {
    nodes: BTreeMap<NodeTag, AnimatedNode>,
    drivers: Vec<AnimationDriver>,
    completions: HashMap<AnimationId, CompletionHandler>,
    events: Vec<CallEvent>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a validated document, registering nodes in
    /// document order.
    pub fn from_doc(doc: &GraphDoc) -> AnimatoResult<Self> {
        doc.validate()?;
        let mut graph = Self::new();
        for decl in &doc.nodes {
            graph.create_node(decl.tag, decl.spec.clone())?;
        }
        Ok(graph)
    }

    pub fn create_node(&mut self, tag: NodeTag, spec: NodeSpec) -> AnimatoResult<()> {
        if self.nodes.contains_key(&tag) {
            return Err(AnimatoError::graph(format!(
                "node {tag:?} is already registered"
            )));
        }
        self.nodes.insert(tag, AnimatedNode::from_spec(spec));
        Ok(())
    }

    /// Removes a node. Drivers still targeting it are cancelled on the next
    /// frame tick.
    pub fn drop_node(&mut self, tag: NodeTag) -> bool {
        self.nodes.remove(&tag).is_some()
    }

    pub fn contains(&self, tag: NodeTag) -> bool {
        self.nodes.contains_key(&tag)
    }

    /// Registered node tags in ascending order.
    pub fn tags(&self) -> impl Iterator<Item = NodeTag> {
        self.nodes.keys().copied()
    }

    pub fn node(&self, tag: NodeTag) -> Option<&AnimatedNode> {
        self.nodes.get(&tag)
    }

    pub fn node_value(&self, tag: NodeTag) -> Option<f64> {
        self.nodes.get(&tag).map(AnimatedNode::value)
    }

    pub fn node_payload(&self, tag: NodeTag) -> Option<&Payload> {
        self.nodes.get(&tag).and_then(AnimatedNode::payload)
    }

    /// Writes a value through the store so other observers can react. A
    /// missing target degrades to a no-op.
    pub fn set_value(&mut self, tag: NodeTag, value: f64) {
        match self.nodes.get_mut(&tag) {
            Some(node) => {
                tracing::trace!(?tag, value, "set value");
                node.set_value(value);
            }
            None => tracing::warn!(?tag, "set on a node that is not registered"),
        }
    }

    // Raw value write used by driver ticks and proc parameter copies.
    pub(crate) fn copy_value(&mut self, tag: NodeTag, value: f64) {
        if let Some(node) = self.nodes.get_mut(&tag) {
            node.set_value(value);
        }
    }

    /// Recomputes one node from its current inputs. An unknown tag is a
    /// no-op: the graph may have been restructured since the update was
    /// scheduled, and a stale tag must not break the frame.
    ///
    /// The node is taken out of the arena for the duration of its own update,
    /// so re-entrant updates of the same node (a graph cycle) terminate as
    /// no-ops instead of recursing forever.
    pub fn update_node(&mut self, tag: NodeTag) -> AnimatoResult<()> {
        let Some(mut node) = self.nodes.remove(&tag) else {
            tracing::debug!(?tag, "update on a node that is not registered");
            return Ok(());
        };
        let result = node.update(tag, self);
        self.nodes.insert(tag, node);
        result
    }

    /// Updates every expression and procedure node in tag order. Value nodes
    /// have nothing to recompute.
    pub fn update_all(&mut self) -> AnimatoResult<()> {
        let tags: Vec<NodeTag> = self
            .nodes
            .iter()
            .filter(|(_, node)| !matches!(node, AnimatedNode::Value(_)))
            .map(|(tag, _)| *tag)
            .collect();
        for tag in tags {
            self.update_node(tag)?;
        }
        Ok(())
    }

    /// Registers a new driver and begins ticking it on the next frame.
    pub fn start_animation(&mut self, id: AnimationId, target: NodeTag, config: DriverConfig) {
        self.start_driver(id, target, config, None);
    }

    pub(crate) fn start_driver(
        &mut self,
        id: AnimationId,
        target: NodeTag,
        config: DriverConfig,
        on_complete: Option<CompletionHandler>,
    ) {
        tracing::debug!(?id, node = ?target, "start driver");
        self.drivers.push(AnimationDriver::new(id, target, config));
        if let Some(handler) = on_complete {
            self.completions.insert(id, handler);
        }
    }

    /// Cancels the driver with the given id, removing it from the active set
    /// within this call. Cancellation never invokes the completion callback.
    /// Returns whether a driver was found.
    pub fn stop_driver(&mut self, id: AnimationId) -> bool {
        let Some(index) = self.drivers.iter().position(|d| d.id() == id) else {
            return false;
        };
        let mut driver = self.drivers.remove(index);
        driver.cancel();
        self.completions.remove(&id);
        tracing::debug!(?id, "driver cancelled");
        true
    }

    /// The active drivers in start order.
    pub fn active_drivers(&self) -> impl Iterator<Item = (AnimationId, &AnimationDriver)> {
        self.drivers.iter().map(|d| (d.id(), d))
    }

    /// Whether any active driver currently targets the given node.
    pub fn is_animating(&self, target: NodeTag) -> bool {
        self.drivers.iter().any(|d| d.target() == target)
    }

    /// One display-refresh tick: advances every active driver, writes the new
    /// values into the target nodes, removes drivers that reached a terminal
    /// state, and invokes completion callbacks for the finished ones.
    #[tracing::instrument(skip(self))]
    pub fn run_frame(&mut self, now: FrameTime) {
        for driver in &mut self.drivers {
            match self.nodes.get_mut(&driver.target()) {
                Some(node) => {
                    let value = driver.tick(now, node.value());
                    node.set_value(value);
                }
                None => {
                    tracing::warn!(node = ?driver.target(), "driver target vanished");
                    driver.cancel();
                }
            }
        }

        let (done, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.drivers)
            .into_iter()
            .partition(AnimationDriver::is_terminal);
        self.drivers = live;

        for driver in done {
            let handler = self.completions.remove(&driver.id());
            if driver.state() == DriverState::Finished
                && let Some(handler) = handler
            {
                handler.run(self);
            }
        }
    }

    pub(crate) fn emit_call_event(&mut self, node: NodeTag, call_id: i64, values: Vec<f64>) {
        tracing::debug!(?node, call_id, "call event");
        self.events.push(CallEvent {
            node,
            call_id,
            values,
        });
    }

    /// Hands the queued call events to the embedder, clearing the queue.
    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ease::{Ease, Easing},
        model::ExprNode,
    };

    fn timing(to_value: f64, duration: f64) -> DriverConfig {
        DriverConfig::Timing {
            to_value,
            duration,
            easing: Easing::Named(Ease::Linear),
        }
    }

    #[test]
    fn create_lookup_and_drop() {
        let mut g = NodeGraph::new();
        g.create_node(NodeTag(1), NodeSpec::Value { value: 3.0 })
            .unwrap();
        assert!(g.contains(NodeTag(1)));
        assert!(g.node(NodeTag(1)).is_some());
        assert_eq!(g.node_value(NodeTag(1)), Some(3.0));
        assert!(g.create_node(NodeTag(1), NodeSpec::Value { value: 0.0 }).is_err());

        assert!(g.drop_node(NodeTag(1)));
        assert!(!g.drop_node(NodeTag(1)));
        assert_eq!(g.node_value(NodeTag(1)), None);
    }

    #[test]
    fn set_value_on_missing_node_is_a_noop() {
        let mut g = NodeGraph::new();
        g.set_value(NodeTag(9), 1.0);
        assert_eq!(g.node_value(NodeTag(9)), None);
    }

    #[test]
    fn update_on_missing_node_is_a_noop() {
        let mut g = NodeGraph::new();
        g.update_node(NodeTag(9)).unwrap();
    }

    #[test]
    fn driver_moves_its_target_each_frame() {
        let mut g = NodeGraph::new();
        g.create_node(NodeTag(1), NodeSpec::Value { value: 0.0 })
            .unwrap();
        g.start_animation(AnimationId(7), NodeTag(1), timing(100.0, 1000.0));

        g.run_frame(FrameTime(0.0));
        g.run_frame(FrameTime(500.0));
        assert!((g.node_value(NodeTag(1)).unwrap() - 50.0).abs() < 1e-9);
        assert!(g.is_animating(NodeTag(1)));

        g.run_frame(FrameTime(1000.0));
        assert_eq!(g.node_value(NodeTag(1)), Some(100.0));
        assert!(!g.is_animating(NodeTag(1)));
        assert_eq!(g.active_drivers().count(), 0);
    }

    #[test]
    fn stop_driver_removes_synchronously() {
        let mut g = NodeGraph::new();
        g.create_node(NodeTag(1), NodeSpec::Value { value: 0.0 })
            .unwrap();
        g.start_animation(AnimationId(7), NodeTag(1), timing(100.0, 1000.0));
        g.run_frame(FrameTime(0.0));

        assert!(g.stop_driver(AnimationId(7)));
        assert!(!g.stop_driver(AnimationId(7)));
        assert!(!g.is_animating(NodeTag(1)));

        // No further ticks are delivered; the value stays where it was.
        let before = g.node_value(NodeTag(1)).unwrap();
        g.run_frame(FrameTime(800.0));
        assert_eq!(g.node_value(NodeTag(1)), Some(before));
    }

    #[test]
    fn driver_with_vanished_target_is_cancelled() {
        let mut g = NodeGraph::new();
        g.create_node(NodeTag(1), NodeSpec::Value { value: 0.0 })
            .unwrap();
        g.start_animation(AnimationId(7), NodeTag(1), timing(100.0, 1000.0));
        g.run_frame(FrameTime(0.0));

        g.drop_node(NodeTag(1));
        g.run_frame(FrameTime(16.0));
        assert_eq!(g.active_drivers().count(), 0);
    }

    #[test]
    fn active_drivers_keep_start_order() {
        let mut g = NodeGraph::new();
        g.create_node(NodeTag(1), NodeSpec::Value { value: 0.0 })
            .unwrap();
        g.create_node(NodeTag(2), NodeSpec::Value { value: 0.0 })
            .unwrap();
        g.start_animation(AnimationId(3), NodeTag(1), timing(1.0, 1000.0));
        g.start_animation(AnimationId(1), NodeTag(2), timing(1.0, 1000.0));

        let ids: Vec<AnimationId> = g.active_drivers().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![AnimationId(3), AnimationId(1)]);
    }

    #[test]
    fn from_doc_registers_in_document_order() {
        let doc: GraphDoc = serde_json::from_str(
            r#"{"nodes": [
                {"tag": 1, "type": "value", "value": 4},
                {"tag": 2, "type": "expression",
                 "graph": {"type": "value", "tag": 1}}
            ]}"#,
        )
        .unwrap();
        let mut g = NodeGraph::from_doc(&doc).unwrap();
        g.update_all().unwrap();
        assert_eq!(g.node_value(NodeTag(2)), Some(4.0));
    }

    #[test]
    fn self_referential_proc_terminates() {
        let mut g = NodeGraph::new();
        g.create_node(
            NodeTag(12),
            NodeSpec::Proc {
                args: vec![],
                params: vec![],
                expression: NodeTag(12),
            },
        )
        .unwrap();
        // The node is out of the arena during its own update, so the body
        // reference does not resolve and the update bottoms out.
        g.update_node(NodeTag(12)).unwrap();
        assert_eq!(g.node_value(NodeTag(12)), Some(0.0));
    }

    #[test]
    fn proc_with_dangling_references_degrades() {
        let mut g = NodeGraph::new();
        g.create_node(
            NodeTag(12),
            NodeSpec::Proc {
                args: vec![NodeTag(50)],
                params: vec![NodeTag(51)],
                expression: NodeTag(52),
            },
        )
        .unwrap();
        g.update_node(NodeTag(12)).unwrap();
        assert_eq!(g.node_value(NodeTag(12)), Some(0.0));
    }

    #[test]
    fn update_all_skips_plain_values() {
        let mut g = NodeGraph::new();
        g.create_node(NodeTag(1), NodeSpec::Value { value: 4.0 })
            .unwrap();
        g.create_node(
            NodeTag(2),
            NodeSpec::Expression {
                graph: ExprNode::Number { value: 8.0 },
            },
        )
        .unwrap();
        g.update_all().unwrap();
        assert_eq!(g.node_value(NodeTag(1)), Some(4.0));
        assert_eq!(g.node_value(NodeTag(2)), Some(8.0));
    }
}
