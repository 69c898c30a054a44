//! Entity graph
//!
//! The process tree of a project, fixture or test case. Nodes live in an arena
//! keyed by id; the parent of a node is stored as an id, never as a pointer.
//!
//! Container nodes keep two child lists:
//! - `children` are persisted with the document
//! - `runtime_children` hold subtrees attached while open for edit (fixtures
//!   under the project root, test cases under their fixture) and are never
//!   written by [`EntityGraph::save`]
//!
//! Persisted form:
//!
//! ```json
//! {
//!   "data_model": "Checkout",
//!   "root": { "id": "...", "name": "Main", "tag": "Root", "type": "Sequence",
//!             "children": [ { "type": "Log", "properties": { "message": "hi" } } ] }
//! }
//! ```

use crate::actor::Actor;
use crate::catalog::{ComponentKind, ComponentType, TypeCatalog, SEQUENCE};
use crate::model::{rewrite_module_identity, ModuleIdentity};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Tag reserved for the project root
pub const ROOT_TAG: &str = "Root";

fn default_true() -> bool {
    true
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Serialized form of one node and its persisted children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDocument>,
}

/// Serialized form of a whole graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDocument {
    /// Logical name of the data model the process was written against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_model: Option<String>,
    pub root: NodeDocument,
}

/// One node of the graph
#[derive(Debug, Clone)]
pub struct ComponentNode {
    pub id: String,
    pub name: String,
    pub tag: String,
    pub type_name: String,
    pub enabled: bool,
    pub properties: Map<String, Value>,
    kind: ComponentKind,
    children: Vec<String>,
    runtime_children: Vec<String>,
    parent: Option<String>,
    context: Option<String>,
}

impl ComponentNode {
    pub fn new(name: impl Into<String>, component: &ComponentType) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            tag: String::new(),
            type_name: component.name().to_string(),
            enabled: true,
            properties: Map::new(),
            kind: component.kind(),
            children: Vec::new(),
            runtime_children: Vec::new(),
            parent: None,
            context: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn is_container(&self) -> bool {
        self.kind == ComponentKind::Container
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn runtime_children(&self) -> &[String] {
        &self.runtime_children
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn all_children(&self) -> impl DoubleEndedIterator<Item = &String> {
        self.children.iter().chain(self.runtime_children.iter())
    }
}

/// Actor resolved for execution, detached from the graph
#[derive(Clone)]
pub struct PlannedActor {
    pub node_id: String,
    pub name: String,
    pub actor: Arc<dyn Actor>,
}

/// Arena-backed process tree
#[derive(Debug, Clone)]
pub struct EntityGraph {
    nodes: HashMap<String, ComponentNode>,
    root: String,
    context: String,
    data_model: Option<String>,
}

impl EntityGraph {
    /// New graph holding only `root`
    pub fn new(root: ComponentNode, context: impl Into<String>) -> Self {
        let context = context.into();
        let root_id = root.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        let mut graph = Self {
            nodes,
            root: root_id,
            context: String::new(),
            data_model: None,
        };
        graph.propagate_context(&context);
        graph
    }

    /// New project graph with an empty `Sequence` root tagged [`ROOT_TAG`]
    pub fn with_root(name: impl Into<String>, context: impl Into<String>) -> Self {
        let root = ComponentNode {
            id: new_id(),
            name: name.into(),
            tag: ROOT_TAG.to_string(),
            type_name: SEQUENCE.to_string(),
            enabled: true,
            properties: Map::new(),
            kind: ComponentKind::Container,
            children: Vec::new(),
            runtime_children: Vec::new(),
            parent: None,
            context: None,
        };
        Self::new(root, context)
    }

    /// Deserialize a process document.
    ///
    /// Legacy documents carry `<model>_<iteration>` identities; they are
    /// rewritten to `current` before parsing and the model reference is
    /// reduced to its logical name. Every node type is resolved through
    /// `catalog`, then parents and `context` are restored.
    pub fn load(
        text: &str,
        catalog: &dyn TypeCatalog,
        current: Option<&ModuleIdentity>,
        context: &str,
    ) -> Result<Self> {
        let text = match current {
            Some(identity) => rewrite_module_identity(text, identity),
            None => text.to_string(),
        };
        let document: ProcessDocument = serde_json::from_str(&text)?;

        let data_model = document.data_model.map(|name| match ModuleIdentity::parse(&name) {
            Some(identity) if current.is_some_and(|c| c.name == identity.name) => identity.name,
            _ => name,
        });

        let mut nodes = HashMap::new();
        let root = insert_document(document.root, catalog, &mut nodes)?;
        let mut graph = Self {
            nodes,
            root,
            context: String::new(),
            data_model,
        };
        graph.restore_parent_child_relation(context)?;
        debug!("Loaded graph with {} node(s)", graph.nodes.len());
        Ok(graph)
    }

    /// Re-link every parent and propagate `context` to every node.
    ///
    /// Fails when a node is reachable twice or not at all.
    pub fn restore_parent_child_relation(&mut self, context: &str) -> Result<()> {
        self.context = context.to_string();
        let mut visited = HashSet::new();
        let mut stack = vec![(self.root.clone(), None::<String>)];

        while let Some((id, parent)) = stack.pop() {
            if !visited.insert(id.clone()) {
                return Err(Error::GraphInvariant(format!(
                    "node {} is reachable more than once",
                    id
                )));
            }
            let node = self
                .nodes
                .get_mut(&id)
                .ok_or_else(|| Error::GraphInvariant(format!("dangling child id {}", id)))?;
            node.parent = parent;
            node.context = Some(context.to_string());
            for child in node.all_children().rev() {
                stack.push((child.clone(), Some(id.clone())));
            }
        }

        if visited.len() != self.nodes.len() {
            return Err(Error::GraphInvariant(format!(
                "{} node(s) are not reachable from the root",
                self.nodes.len() - visited.len()
            )));
        }
        Ok(())
    }

    /// Check that every link is consistent; mutations refuse broken trees
    pub fn verify_linkage(&self) -> Result<()> {
        for node in self.nodes.values() {
            if node.context.as_deref() != Some(self.context.as_str()) {
                return Err(Error::GraphInvariant(format!(
                    "node {} has a stale context",
                    node.id
                )));
            }
            if node.id == self.root {
                continue;
            }
            let parent_id = node.parent.as_ref().ok_or_else(|| {
                Error::GraphInvariant(format!("node {} has no parent", node.id))
            })?;
            let parent = self.nodes.get(parent_id).ok_or_else(|| {
                Error::GraphInvariant(format!("parent {} of {} is missing", parent_id, node.id))
            })?;
            if !parent.all_children().any(|c| c == &node.id) {
                return Err(Error::GraphInvariant(format!(
                    "{} does not list {} as a child",
                    parent_id, node.id
                )));
            }
        }
        Ok(())
    }

    /// Serialize the persisted part of the graph
    pub fn save(&self) -> Result<String> {
        self.export_subtree(&self.root)
    }

    /// Serialize the persisted part of the subtree rooted at `id`
    pub fn export_subtree(&self, id: &str) -> Result<String> {
        let document = ProcessDocument {
            data_model: self.data_model.clone(),
            root: self.document(id)?,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    fn document(&self, id: &str) -> Result<NodeDocument> {
        let node = self.node(id)?;
        Ok(NodeDocument {
            id: node.id.clone(),
            name: node.name.clone(),
            tag: node.tag.clone(),
            type_name: node.type_name.clone(),
            enabled: node.enabled,
            properties: node.properties.clone(),
            children: node
                .children
                .iter()
                .map(|c| self.document(c))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    pub fn root_id(&self) -> &str {
        &self.root
    }

    pub fn root(&self) -> &ComponentNode {
        &self.nodes[&self.root]
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn data_model(&self) -> Option<&str> {
        self.data_model.as_deref()
    }

    pub fn set_data_model(&mut self, name: impl Into<String>) {
        self.data_model = Some(name.into());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ComponentNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ComponentNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ComponentNode> {
        self.nodes.values()
    }

    fn node(&self, id: &str) -> Result<&ComponentNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::not_found("component", id))
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut ComponentNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::not_found("component", id))
    }

    /// Direct child (persisted or runtime) of `parent` carrying `tag`
    pub fn child_by_tag(&self, parent: &str, tag: &str) -> Option<&ComponentNode> {
        let parent = self.nodes.get(parent)?;
        parent
            .all_children()
            .filter_map(|c| self.nodes.get(c))
            .find(|c| c.tag == tag)
    }

    /// Ids of `id` and every node beneath it, depth-first
    pub fn subtree_ids(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.all_children().rev().cloned());
                out.push(current);
            }
        }
        out
    }

    fn is_protected(&self, node: &ComponentNode) -> bool {
        node.id == self.root || node.tag == ROOT_TAG
    }

    fn ensure_container(&self, id: &str) -> Result<()> {
        if self.node(id)?.is_container() {
            Ok(())
        } else {
            Err(Error::GraphInvariant(format!("{} cannot have children", id)))
        }
    }

    /// Append `node` as a persisted child of `parent`
    pub fn add(&mut self, parent: &str, mut node: ComponentNode) -> Result<String> {
        self.verify_linkage()?;
        self.ensure_container(parent)?;
        if self.nodes.contains_key(&node.id) {
            return Err(Error::AlreadyExists {
                kind: "component".to_string(),
                id: node.id,
            });
        }

        let id = node.id.clone();
        node.parent = Some(parent.to_string());
        node.context = Some(self.context.clone());
        node.children.clear();
        node.runtime_children.clear();
        self.nodes.insert(id.clone(), node);
        self.node_mut(parent)?.children.push(id.clone());
        Ok(id)
    }

    /// Attach another graph as a runtime child of `parent`; returns its root id
    pub fn attach_runtime(&mut self, parent: &str, subgraph: EntityGraph) -> Result<String> {
        self.verify_linkage()?;
        self.ensure_container(parent)?;
        if let Some(clash) = subgraph.nodes.keys().find(|id| self.nodes.contains_key(*id)) {
            return Err(Error::AlreadyExists {
                kind: "component".to_string(),
                id: clash.clone(),
            });
        }

        let sub_root = subgraph.root.clone();
        for (id, mut node) in subgraph.nodes {
            node.context = Some(self.context.clone());
            if id == sub_root {
                node.parent = Some(parent.to_string());
            }
            self.nodes.insert(id, node);
        }
        self.node_mut(parent)?.runtime_children.push(sub_root.clone());
        Ok(sub_root)
    }

    /// Drop a runtime subtree previously attached with [`EntityGraph::attach_runtime`]
    pub fn detach_runtime(&mut self, id: &str) -> Result<()> {
        let parent_id = self
            .node(id)?
            .parent
            .clone()
            .ok_or_else(|| Error::GraphInvariant(format!("{} has no parent", id)))?;
        let parent = self.node_mut(&parent_id)?;
        let before = parent.runtime_children.len();
        parent.runtime_children.retain(|c| c != id);
        if parent.runtime_children.len() == before {
            return Err(Error::GraphInvariant(format!(
                "{} is not a runtime child of {}",
                id, parent_id
            )));
        }
        for node_id in self.subtree_ids(id) {
            self.nodes.remove(&node_id);
        }
        Ok(())
    }

    /// Remove a persisted node and its subtree; the root is protected
    pub fn remove(&mut self, id: &str) -> Result<ComponentNode> {
        self.verify_linkage()?;
        let node = self.node(id)?;
        if self.is_protected(node) {
            return Err(Error::ProtectedComponent(format!("{} ({})", node.name, node.tag)));
        }
        let parent_id = node
            .parent
            .clone()
            .ok_or_else(|| Error::GraphInvariant(format!("{} has no parent", id)))?;

        let subtree = self.subtree_ids(id);
        let parent = self.node_mut(&parent_id)?;
        parent.children.retain(|c| c != id);
        parent.runtime_children.retain(|c| c != id);

        let mut removed = None;
        for node_id in subtree {
            let node = self.nodes.remove(&node_id);
            if node_id == id {
                removed = node;
            }
        }
        removed.ok_or_else(|| Error::not_found("component", id))
    }

    /// Move a persisted node under `new_parent` at `index` (clamped)
    pub fn move_node(&mut self, id: &str, new_parent: &str, index: usize) -> Result<()> {
        self.verify_linkage()?;
        let node = self.node(id)?;
        if self.is_protected(node) {
            return Err(Error::ProtectedComponent(format!("{} ({})", node.name, node.tag)));
        }
        self.ensure_container(new_parent)?;
        if self.subtree_ids(id).iter().any(|n| n == new_parent) {
            return Err(Error::GraphInvariant(format!(
                "cannot move {} beneath itself",
                id
            )));
        }

        let old_parent = node
            .parent
            .clone()
            .ok_or_else(|| Error::GraphInvariant(format!("{} has no parent", id)))?;
        let old = self.node_mut(&old_parent)?;
        if !old.children.iter().any(|c| c == id) {
            return Err(Error::GraphInvariant(format!(
                "{} is a runtime child and cannot be moved",
                id
            )));
        }
        old.children.retain(|c| c != id);

        let target = self.node_mut(new_parent)?;
        let index = index.min(target.children.len());
        target.children.insert(index, id.to_string());
        self.node_mut(id)?.parent = Some(new_parent.to_string());
        Ok(())
    }

    /// Resolve the enabled actors beneath `id`, depth-first over persisted children
    pub fn plan(&self, id: &str, catalog: &dyn TypeCatalog) -> Result<Vec<PlannedActor>> {
        let mut planned = Vec::new();
        self.plan_into(id, catalog, &mut planned)?;
        Ok(planned)
    }

    fn plan_into(
        &self,
        id: &str,
        catalog: &dyn TypeCatalog,
        planned: &mut Vec<PlannedActor>,
    ) -> Result<()> {
        let node = self.node(id)?;
        if !node.enabled {
            return Ok(());
        }
        if node.is_container() {
            for child in &node.children {
                self.plan_into(child, catalog, planned)?;
            }
            return Ok(());
        }

        let component = catalog
            .resolve(&node.type_name)
            .ok_or_else(|| Error::UnknownComponentType(node.type_name.clone()))?;
        planned.push(PlannedActor {
            node_id: node.id.clone(),
            name: if node.name.is_empty() {
                node.type_name.clone()
            } else {
                node.name.clone()
            },
            actor: component.create_actor(&node.properties)?,
        });
        Ok(())
    }

    fn propagate_context(&mut self, context: &str) {
        self.context = context.to_string();
        for node in self.nodes.values_mut() {
            node.context = Some(context.to_string());
        }
    }
}

fn insert_document(
    document: NodeDocument,
    catalog: &dyn TypeCatalog,
    nodes: &mut HashMap<String, ComponentNode>,
) -> Result<String> {
    let component = catalog
        .resolve(&document.type_name)
        .ok_or_else(|| Error::UnknownComponentType(document.type_name.clone()))?;
    if !component.is_container() && !document.children.is_empty() {
        return Err(Error::GraphInvariant(format!(
            "{} ({}) is not a container but has children",
            document.id, document.type_name
        )));
    }
    if nodes.contains_key(&document.id) {
        return Err(Error::GraphInvariant(format!("duplicate node id {}", document.id)));
    }

    let children = document
        .children
        .into_iter()
        .map(|child| insert_document(child, catalog, nodes))
        .collect::<Result<Vec<_>>>()?;

    let id = document.id;
    nodes.insert(
        id.clone(),
        ComponentNode {
            id: id.clone(),
            name: document.name,
            tag: document.tag,
            type_name: document.type_name,
            enabled: document.enabled,
            properties: document.properties,
            kind: component.kind(),
            children,
            runtime_children: Vec::new(),
            parent: None,
            context: None,
        },
    );
    Ok(id)
}
