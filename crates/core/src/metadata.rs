use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::api::ApiError;
use crate::labels;
use crate::result_table::ResultTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Namespace,
    Table,
    Column { data_type: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawMetaNode")]
pub struct MetaNode {
    pub name: String,
    pub kind: NodeKind,
    pub children: Vec<MetaNode>,
    pub samples: Option<Vec<Vec<Value>>>,
}

#[derive(Debug, Deserialize)]
struct RawMetaNode {
    name: String,
    #[serde(rename = "type", default)]
    node_type: String,
    #[serde(default)]
    children: Vec<MetaNode>,
    #[serde(default)]
    samples: Option<Vec<Vec<Value>>>,
}

impl From<RawMetaNode> for MetaNode {
    fn from(raw: RawMetaNode) -> Self {
        let kind = match raw.node_type.as_str() {
            "namespace" => NodeKind::Namespace,
            "table" => NodeKind::Table,
            _ => NodeKind::Column {
                data_type: raw.node_type,
            },
        };
        Self {
            name: raw.name,
            kind,
            children: raw.children,
            samples: raw.samples,
        }
    }
}

impl MetaNode {
    #[must_use]
    pub fn namespace(name: impl Into<String>, children: Vec<MetaNode>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Namespace,
            children,
            samples: None,
        }
    }

    #[must_use]
    pub fn table(
        name: impl Into<String>,
        columns: Vec<MetaNode>,
        samples: Option<Vec<Vec<Value>>>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Table,
            children: columns,
            samples,
        }
    }

    #[must_use]
    pub fn column(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Column {
                data_type: data_type.into(),
            },
            children: Vec::new(),
            samples: None,
        }
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&MetaNode> {
        self.children.iter().find(|child| child.name == name)
    }

    #[must_use]
    pub fn type_label(&self) -> &str {
        match &self.kind {
            NodeKind::Namespace => "namespace",
            NodeKind::Table => "table",
            NodeKind::Column { data_type } => data_type,
        }
    }
}

/// Metadata snapshot: apps at the root, then versions, databases, tables and columns.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(transparent)]
pub struct MetadataTree {
    pub roots: Vec<MetaNode>,
}

/// A flattened, display-ready tree row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    pub path: Vec<String>,
    pub depth: usize,
    pub label: String,
    pub type_label: String,
    pub expandable: bool,
    pub expanded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("no metadata node at `{0}`")]
    UnknownPath(String),
    #[error("node `{0}` is not a table")]
    NotATable(String),
    #[error("table `{0}` has no sample rows")]
    NoSamples(String),
}

impl MetadataError {
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoSamples(_) => labels::NO_SAMPLES,
            Self::UnknownPath(_) | Self::NotATable(_) => labels::NO_RECORDS,
        }
    }
}

impl MetadataTree {
    #[must_use]
    pub fn new(roots: Vec<MetaNode>) -> Self {
        Self { roots }
    }

    #[must_use]
    pub fn app_names(&self) -> Vec<String> {
        self.roots.iter().map(|app| app.name.clone()).collect()
    }

    #[must_use]
    pub fn version_names(&self, app: &str) -> Vec<String> {
        self.roots
            .iter()
            .find(|root| root.name == app)
            .map(|root| root.children.iter().map(|v| v.name.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn find_path(&self, path: &[String]) -> Option<&MetaNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.iter().find(|root| &root.name == first)?;
        for segment in rest {
            node = node.child(segment)?;
        }
        Some(node)
    }

    /// Editor fragment for a table or column: the back-quoted path without its app level.
    /// Assumes the app → version → db → table → column layout; in a shallower tree every
    /// level below the app is still quoted. Namespaces yield `None`.
    #[must_use]
    pub fn identifier_fragment(&self, path: &[String]) -> Option<String> {
        let node = self.find_path(path)?;
        if matches!(node.kind, NodeKind::Namespace) {
            return None;
        }
        let fragment = path
            .iter()
            .skip(1)
            .map(|segment| quote_identifier(segment))
            .collect::<Vec<_>>()
            .join(".");
        Some(fragment)
    }

    /// Reference rows for a table, titled by its column names.
    pub fn sample_preview(&self, path: &[String]) -> Result<ResultTable, MetadataError> {
        let joined = path.join(".");
        let node = self
            .find_path(path)
            .ok_or_else(|| MetadataError::UnknownPath(joined.clone()))?;
        if node.kind != NodeKind::Table {
            return Err(MetadataError::NotATable(joined));
        }
        let samples = node
            .samples
            .as_ref()
            .ok_or(MetadataError::NoSamples(joined))?;
        let titles = node
            .children
            .iter()
            .map(|column| column.name.clone())
            .collect();
        Ok(ResultTable::new(titles, samples, None, None))
    }

    /// Depth-first rows for every node whose ancestors are all in `expanded`.
    #[must_use]
    pub fn visible_rows(&self, expanded: &BTreeSet<Vec<String>>) -> Vec<TreeRow> {
        let mut rows = Vec::new();
        for root in &self.roots {
            push_visible(root, Vec::new(), expanded, &mut rows);
        }
        rows
    }

    /// Every expandable path, for "expand all".
    #[must_use]
    pub fn expandable_paths(&self) -> BTreeSet<Vec<String>> {
        let mut paths = BTreeSet::new();
        for root in &self.roots {
            collect_expandable(root, Vec::new(), &mut paths);
        }
        paths
    }
}

fn push_visible(
    node: &MetaNode,
    parent: Vec<String>,
    expanded: &BTreeSet<Vec<String>>,
    rows: &mut Vec<TreeRow>,
) {
    let mut path = parent;
    path.push(node.name.clone());
    let is_expanded = expanded.contains(&path);
    rows.push(TreeRow {
        depth: path.len() - 1,
        path: path.clone(),
        label: node.name.clone(),
        type_label: node.type_label().to_string(),
        expandable: !node.children.is_empty(),
        expanded: is_expanded,
    });
    if is_expanded {
        for child in &node.children {
            push_visible(child, path.clone(), expanded, rows);
        }
    }
}

fn collect_expandable(node: &MetaNode, parent: Vec<String>, paths: &mut BTreeSet<Vec<String>>) {
    if node.children.is_empty() {
        return;
    }
    let mut path = parent;
    path.push(node.name.clone());
    for child in &node.children {
        collect_expandable(child, path.clone(), paths);
    }
    paths.insert(path);
}

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

#[async_trait]
pub trait MetadataApi: Send + Sync {
    async fn fetch_tree(&self) -> Result<MetadataTree, ApiError>;
}

#[async_trait]
impl<T: MetadataApi + ?Sized> MetadataApi for Arc<T> {
    async fn fetch_tree(&self) -> Result<MetadataTree, ApiError> {
        (**self).fetch_tree().await
    }
}

#[derive(Debug)]
struct CachedTree {
    fetched_at: Instant,
    tree: Arc<MetadataTree>,
}

/// Session cache over the metadata endpoint. Without a TTL the tree is fetched once.
#[derive(Debug)]
pub struct MetadataCache<B: MetadataApi> {
    backend: B,
    ttl: Option<Duration>,
    cache: Option<CachedTree>,
}

impl<B: MetadataApi> MetadataCache<B> {
    #[must_use]
    pub fn new(backend: B, ttl: Option<Duration>) -> Self {
        Self {
            backend,
            ttl,
            cache: None,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    #[must_use]
    pub fn cached(&self) -> Option<Arc<MetadataTree>> {
        self.cache.as_ref().map(|cache| Arc::clone(&cache.tree))
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub async fn tree(&mut self) -> Result<Arc<MetadataTree>, ApiError> {
        self.tree_at(Instant::now()).await
    }

    pub async fn refresh(&mut self) -> Result<Arc<MetadataTree>, ApiError> {
        self.refresh_at(Instant::now()).await
    }

    async fn tree_at(&mut self, now: Instant) -> Result<Arc<MetadataTree>, ApiError> {
        if let Some(cache) = &self.cache {
            let fresh = match self.ttl {
                Some(ttl) => now.duration_since(cache.fetched_at) <= ttl,
                None => true,
            };
            if fresh {
                return Ok(Arc::clone(&cache.tree));
            }
        }
        self.refresh_at(now).await
    }

    async fn refresh_at(&mut self, now: Instant) -> Result<Arc<MetadataTree>, ApiError> {
        let tree = Arc::new(self.backend.fetch_tree().await?);
        tracing::debug!(apps = tree.roots.len(), "metadata tree fetched");
        self.cache = Some(CachedTree {
            fetched_at: now,
            tree: Arc::clone(&tree),
        });
        Ok(tree)
    }
}
