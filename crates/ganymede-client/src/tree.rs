//! Lazily populated tree of schema types and their object instances.
//!
//! The [`TreeCache`] is the single owner that mutates nodes; rendering code
//! reads them through shared references. Type ids and queries are set-once
//! cells that are only cleared when a node's type reference is replaced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use ganymede_core::{GResult, GanymedeError, Invid, ObjectHandle, Query, TypeRef, TypeSummary};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use crate::session::SessionHandle;

/// One object instance under a type node.
#[derive(Debug, Clone)]
pub struct ObjectInstanceNode {
    handle: ObjectHandle,
    parent_label: String,
}

impl ObjectInstanceNode {
    /// `parent_label` is copied now and never updated afterwards.
    pub fn new(handle: ObjectHandle, parent_label: &str) -> Self {
        Self {
            handle,
            parent_label: parent_label.to_string(),
        }
    }

    pub fn invid(&self) -> Invid {
        self.handle.invid
    }

    pub fn label(&self) -> &str {
        &self.handle.label
    }

    /// The parent type's label as it was when this node was built.
    pub fn parent_label(&self) -> &str {
        &self.parent_label
    }

    pub fn is_editable(&self) -> bool {
        self.handle.editable
    }

    pub fn is_inactive(&self) -> bool {
        self.handle.inactive
    }

    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }
}

/// One schema type in the tree.
#[derive(Debug)]
pub struct ObjectTypeNode {
    type_ref: TypeRef,
    label: String,
    can_create: bool,
    can_inactivate: bool,
    type_id: OnceCell<u16>,
    editable_query: OnceLock<Arc<Query>>,
    all_query: OnceLock<Arc<Query>>,
    loaded: AtomicBool,
    show_all: bool,
    children: Vec<ObjectInstanceNode>,
}

impl ObjectTypeNode {
    pub fn new(summary: TypeSummary) -> Self {
        Self {
            type_ref: summary.type_ref,
            label: summary.label,
            can_create: summary.can_create,
            can_inactivate: summary.can_inactivate,
            type_id: OnceCell::new(),
            editable_query: OnceLock::new(),
            all_query: OnceLock::new(),
            loaded: AtomicBool::new(false),
            show_all: false,
            children: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    pub fn can_create(&self) -> bool {
        self.can_create
    }

    pub fn can_inactivate(&self) -> bool {
        self.can_inactivate
    }

    pub fn show_all(&self) -> bool {
        self.show_all
    }

    /// Cached children; empty until the node has been expanded.
    pub fn children(&self) -> &[ObjectInstanceNode] {
        &self.children
    }

    /// Resolve the numeric type id on first use and remember it.
    ///
    /// Every query depends on the id, so a failure here is fatal for the
    /// calling operation.
    pub async fn get_type_id(&self, session: &SessionHandle) -> GResult<u16> {
        let id = self
            .type_id
            .get_or_try_init(|| async {
                let id = session.type_id(&self.type_ref).await.map_err(|e| {
                    error!(label = %self.label, error = %e, "cannot resolve type id");
                    GanymedeError::Fatal(format!("type id for '{}': {e}", self.label))
                })?;
                debug!(label = %self.label, type_id = id, "resolved type id");
                Ok::<_, GanymedeError>(id)
            })
            .await?;
        Ok(*id)
    }

    /// Query for the objects this session may edit. Built once, then shared.
    pub async fn get_editable_query(&self, session: &SessionHandle) -> GResult<Arc<Query>> {
        if let Some(q) = self.editable_query.get() {
            return Ok(q.clone());
        }
        let id = self.get_type_id(session).await?;
        Ok(self
            .editable_query
            .get_or_init(|| Arc::new(Query::editable(id)))
            .clone())
    }

    /// Query for every visible object. Built once, then shared.
    pub async fn get_all_query(&self, session: &SessionHandle) -> GResult<Arc<Query>> {
        if let Some(q) = self.all_query.get() {
            return Ok(q.clone());
        }
        let id = self.get_type_id(session).await?;
        Ok(self.all_query.get_or_init(|| Arc::new(Query::all(id))).clone())
    }

    /// The query matching the current display mode.
    pub async fn current_query(&self, session: &SessionHandle) -> GResult<Arc<Query>> {
        if self.show_all {
            self.get_all_query(session).await
        } else {
            self.get_editable_query(session).await
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }

    pub fn mark_unloaded(&self) {
        self.loaded.store(false, Ordering::Release);
    }

    /// Point this node at a different type; cached id and queries are dropped.
    pub fn set_type_ref(&mut self, type_ref: TypeRef) {
        if type_ref == self.type_ref {
            return;
        }
        self.type_ref = type_ref;
        self.type_id = OnceCell::new();
        self.editable_query = OnceLock::new();
        self.all_query = OnceLock::new();
        self.mark_unloaded();
        self.children.clear();
    }

    /// Switch between editable-only and all objects. A change forces a
    /// refetch on the next expansion.
    pub fn set_show_all(&mut self, show_all: bool) {
        if self.show_all != show_all {
            self.show_all = show_all;
            self.mark_unloaded();
        }
    }
}

/// Root of the type/object tree for one session.
pub struct TreeCache {
    session: Arc<SessionHandle>,
    roots: Vec<ObjectTypeNode>,
    roots_loaded: bool,
}

impl TreeCache {
    pub fn new(session: Arc<SessionHandle>) -> Self {
        Self {
            session,
            roots: Vec::new(),
            roots_loaded: false,
        }
    }

    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    /// Fetch the type list once and build the root nodes, sorted by label.
    pub async fn load_roots(&mut self) -> GResult<&[ObjectTypeNode]> {
        if !self.roots_loaded {
            let types = self.session.list_types().await?;
            let mut roots: Vec<ObjectTypeNode> = types
                .into_iter()
                .filter(|t| !t.embedded)
                .map(ObjectTypeNode::new)
                .collect();
            roots.sort_by(|a, b| a.label.cmp(&b.label));
            info!(types = roots.len(), "loaded type tree");
            self.roots = roots;
            self.roots_loaded = true;
        }
        Ok(&self.roots)
    }

    pub fn roots(&self) -> &[ObjectTypeNode] {
        &self.roots
    }

    pub fn node(&self, label: &str) -> Option<&ObjectTypeNode> {
        self.roots.iter().find(|n| n.label == label)
    }

    pub fn node_mut(&mut self, label: &str) -> GResult<&mut ObjectTypeNode> {
        self.roots
            .iter_mut()
            .find(|n| n.label == label)
            .ok_or_else(|| GanymedeError::ProtocolState(format!("no type labelled '{label}'")))
    }

    /// Children of a type node, fetching them only if the node is not loaded.
    pub async fn expand(&mut self, label: &str) -> GResult<&[ObjectInstanceNode]> {
        let session = self.session.clone();
        let node = self.node_mut(label)?;

        if !node.is_loaded() {
            let query = node.current_query(&session).await?;
            let rows = session.query(&query).await?;

            let mut children: Vec<ObjectInstanceNode> = rows
                .into_iter()
                .map(|h| ObjectInstanceNode::new(h, &node.label))
                .collect();
            children.sort_by(|a, b| a.label().cmp(b.label()));

            debug!(%label, objects = children.len(), "expanded type node");
            node.children = children;
            node.mark_loaded();
        }

        Ok(&node.children)
    }

    /// Drop a node's children; the next expansion fetches them again.
    pub fn refresh(&mut self, label: &str) -> GResult<()> {
        let node = self.node_mut(label)?;
        node.mark_unloaded();
        node.children.clear();
        Ok(())
    }
}
