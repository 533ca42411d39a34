//! Diagnostics export of the posture graph.
//!
//! Two formats: GraphML for graph viewers and a JSON node-link document.
//! Nodes carry their state-spec attributes; edges carry their operation
//! list and cost. This is the only artifact the planner writes to disk.

use std::io::Write;

use posture_types::{CarrySpec, SlotTarget, StateSpec};
use serde::Serialize;

use crate::error::GraphError;
use crate::graph::{NodeId, PostureGraph};

/// Node attributes shared by both formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    /// Node handle, as `n<index>`.
    pub id: String,
    /// Posture name.
    pub posture: String,
    /// Body target object, or empty.
    pub body_target: String,
    /// Surface object, or empty.
    pub surface_target: String,
    /// Slot type in use, or empty.
    pub slot_type: String,
    /// Whether a slot target is set.
    pub slot_target: bool,
    /// Whether the agent carries something.
    pub carrying: bool,
    /// Whether the node is a neutral marker.
    pub neutral: bool,
    /// Human-readable summary.
    pub label: String,
}

impl NodeRecord {
    fn new(id: NodeId, spec: &StateSpec, neutral: bool) -> Self {
        let surface = spec.surface;
        Self {
            id: id.to_string(),
            posture: spec.body.posture.as_str().to_owned(),
            body_target: spec.body.target.map(|t| t.to_string()).unwrap_or_default(),
            surface_target: surface.map(|s| s.target.to_string()).unwrap_or_default(),
            slot_type: surface
                .and_then(|s| s.slot_type)
                .map(|st| st.as_str().to_owned())
                .unwrap_or_default(),
            slot_target: surface.is_some_and(|s| matches!(s.slot_target, Some(SlotTarget::Variable | SlotTarget::Slot(_)))),
            carrying: spec.carry != CarrySpec::Nothing,
            neutral,
            label: spec.to_string(),
        }
    }
}

/// Edge attributes shared by both formats.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRecord {
    /// Source node handle.
    pub source: String,
    /// Target node handle.
    pub target: String,
    /// Operation labels in order, `;`-separated.
    pub operations: String,
    /// Edge cost in units.
    pub cost: f64,
}

/// JSON node-link document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeLinkGraph {
    /// Always `true`.
    pub directed: bool,
    /// Nodes.
    pub nodes: Vec<NodeRecord>,
    /// Edges.
    pub links: Vec<EdgeRecord>,
}

/// Collect node and edge records.
pub fn records(graph: &PostureGraph) -> NodeLinkGraph {
    let nodes = graph
        .nodes()
        .map(|(id, spec)| NodeRecord::new(id, spec, graph.is_neutral(id)))
        .collect();
    let links = graph
        .edges()
        .map(|(from, to, edge)| EdgeRecord {
            source: from.to_string(),
            target: to.to_string(),
            operations: edge
                .operations
                .iter()
                .map(crate::operation::Operation::label)
                .collect::<Vec<_>>()
                .join(";"),
            cost: edge.cost.units(),
        })
        .collect();
    NodeLinkGraph {
        directed: true,
        nodes,
        links,
    }
}

/// Serialize the graph as a pretty-printed JSON node-link document.
///
/// # Errors
///
/// Returns [`GraphError::Json`] if serialization fails.
pub fn to_json(graph: &PostureGraph) -> Result<String, GraphError> {
    Ok(serde_json::to_string_pretty(&records(graph))?)
}

/// Write the graph as GraphML.
///
/// # Errors
///
/// Returns [`GraphError::Io`] on write failure.
pub fn write_graphml<W: Write>(graph: &PostureGraph, out: &mut W) -> Result<(), GraphError> {
    let doc = records(graph);
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(out, r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns">"#)?;
    for (key, kind, name) in [
        ("d0", "string", "posture"),
        ("d1", "string", "body_target"),
        ("d2", "string", "surface_target"),
        ("d3", "string", "slot_type"),
        ("d4", "boolean", "slot_target"),
        ("d5", "boolean", "carrying"),
        ("d6", "boolean", "neutral"),
        ("d7", "string", "label"),
    ] {
        writeln!(
            out,
            r#"  <key id="{key}" for="node" attr.name="{name}" attr.type="{kind}"/>"#
        )?;
    }
    writeln!(out, r#"  <key id="e0" for="edge" attr.name="operations" attr.type="string"/>"#)?;
    writeln!(out, r#"  <key id="e1" for="edge" attr.name="cost" attr.type="double"/>"#)?;
    writeln!(out, r#"  <graph id="posture" edgedefault="directed">"#)?;
    for node in &doc.nodes {
        writeln!(out, r#"    <node id="{}">"#, escape(&node.id))?;
        for (key, value) in [
            ("d0", node.posture.clone()),
            ("d1", node.body_target.clone()),
            ("d2", node.surface_target.clone()),
            ("d3", node.slot_type.clone()),
            ("d4", node.slot_target.to_string()),
            ("d5", node.carrying.to_string()),
            ("d6", node.neutral.to_string()),
            ("d7", node.label.clone()),
        ] {
            writeln!(out, r#"      <data key="{key}">{}</data>"#, escape(&value))?;
        }
        writeln!(out, "    </node>")?;
    }
    for edge in &doc.links {
        writeln!(
            out,
            r#"    <edge source="{}" target="{}">"#,
            escape(&edge.source),
            escape(&edge.target)
        )?;
        writeln!(out, r#"      <data key="e0">{}</data>"#, escape(&edge.operations))?;
        writeln!(out, r#"      <data key="e1">{}</data>"#, edge.cost)?;
        writeln!(out, "    </edge>")?;
    }
    writeln!(out, "  </graph>")?;
    writeln!(out, "</graphml>")?;
    Ok(())
}

/// Escape XML special characters.
fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use posture_types::{Location, PostureKind};

    use super::*;
    use crate::builder;
    use crate::config::GraphConfig;
    use crate::world::{Placement, WorldObject, WorldState};

    fn built() -> PostureGraph {
        let mut world = WorldState::new();
        world
            .add_object(
                WorldObject::new("stool", Placement::World(Location::new(1.0, 1.0, 0)))
                    .with_posture(PostureKind::Sit),
            )
            .unwrap();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        builder::rebuild(&mut graph, &world, &config).unwrap();
        graph
    }

    #[test]
    fn graphml_lists_every_node_and_edge() {
        let graph = built();
        let mut out = Vec::new();
        write_graphml(&graph, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("<node ").count(), graph.node_count());
        assert_eq!(text.matches("<edge ").count(), graph.edge_count());
        assert!(text.contains("body(sit@"));
        assert!(text.ends_with("</graphml>\n"));
    }

    #[test]
    fn json_export_is_node_link() {
        let graph = built();
        let json = to_json(&graph).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["directed"], serde_json::Value::Bool(true));
        assert_eq!(
            value["nodes"].as_array().map(Vec::len),
            Some(graph.node_count())
        );
        let neutral_count = value["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|n| n["neutral"] == serde_json::Value::Bool(true))
            .count();
        assert_eq!(neutral_count, 2);
    }

    #[test]
    fn escape_handles_markup() {
        assert_eq!(escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&apos;");
    }
}
