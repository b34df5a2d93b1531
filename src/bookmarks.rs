//! Local bookmark tree reading.
//!
//! Accepts two input shapes:
//! - the `chrome.bookmarks.getTree()` export (`[{id, parentId, title, url, children}]`)
//! - the browser profile's on-disk `Bookmarks` file (`{"roots": {...}}`)
//!
//! Both are turned into [`BookmarkTreeNode`]s and flattened into
//! [`BookmarkRecord`]s. Folder nodes (no `url`) never become records.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

/// A single bookmark as seen by the reconciler. Sync identity is the url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkTreeNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<BookmarkTreeNode>>,
}

#[cfg(test)]
impl BookmarkTreeNode {
    pub fn folder(id: &str, children: Vec<BookmarkTreeNode>) -> Self {
        Self {
            id: id.to_string(),
            title: id.to_string(),
            children: Some(children),
            ..Default::default()
        }
    }

    pub fn bookmark(id: &str, title: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            url: Some(url.to_string()),
            ..Default::default()
        }
    }
}

/// Pre-order flatten. Nodes without `parentId` inherit the enclosing folder id.
pub fn flatten(nodes: &[BookmarkTreeNode]) -> Vec<BookmarkRecord> {
    let mut records = vec![];
    collect(nodes, None, &mut records);
    records
}

fn collect(nodes: &[BookmarkTreeNode], parent: Option<&str>, out: &mut Vec<BookmarkRecord>) {
    for node in nodes {
        if let Some(url) = &node.url {
            out.push(BookmarkRecord {
                id: node.id.clone(),
                url: url.clone(),
                title: node.title.clone(),
                parent_id: node
                    .parent_id
                    .clone()
                    .or_else(|| parent.map(str::to_string)),
            });
        }

        if let Some(children) = &node.children {
            collect(children, Some(&node.id), out);
        }
    }
}

/// Records whose url is missing from `remote_urls`, first occurrence per url.
pub fn unsynced(records: Vec<BookmarkRecord>, remote_urls: &HashSet<String>) -> Vec<BookmarkRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| !remote_urls.contains(&record.url))
        .filter(|record| seen.insert(record.url.clone()))
        .collect()
}

/// A change in the local bookmark tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookmarkEvent {
    Created(BookmarkRecord),
    /// `survivor` is another local bookmark that still carries the removed
    /// bookmark's url. The remote row is handed over to it instead of being
    /// soft-deleted.
    Removed {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        survivor: Option<BookmarkRecord>,
    },
}

/// Diff two flattened snapshots by local id.
///
/// A bookmark whose url changed is reported as removed then created, so the
/// remote side soft-deletes the old url and enriches the new one.
pub fn diff_snapshots(prev: &[BookmarkRecord], next: &[BookmarkRecord]) -> Vec<BookmarkEvent> {
    let prev_by_id: HashMap<&str, &BookmarkRecord> =
        prev.iter().map(|r| (r.id.as_str(), r)).collect();
    let next_ids: HashSet<&str> = next.iter().map(|r| r.id.as_str()).collect();

    let mut next_by_url: HashMap<&str, &BookmarkRecord> = HashMap::new();
    for record in next {
        next_by_url.entry(record.url.as_str()).or_insert(record);
    }
    let survivor = |url: &str| next_by_url.get(url).map(|r| (*r).clone());

    let mut events = vec![];

    for record in prev {
        if !next_ids.contains(record.id.as_str()) {
            events.push(BookmarkEvent::Removed {
                id: record.id.clone(),
                survivor: survivor(&record.url),
            });
        }
    }

    for record in next {
        match prev_by_id.get(record.id.as_str()) {
            None => events.push(BookmarkEvent::Created(record.clone())),
            Some(old) if old.url != record.url => {
                events.push(BookmarkEvent::Removed {
                    id: record.id.clone(),
                    survivor: survivor(&old.url),
                });
                events.push(BookmarkEvent::Created(record.clone()));
            }
            Some(_) => {}
        }
    }

    events
}

#[derive(Debug, Deserialize)]
struct ProfileNode {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    children: Vec<ProfileNode>,
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    roots: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TreeFile {
    Export(Vec<BookmarkTreeNode>),
    Profile(ProfileFile),
}

impl From<ProfileNode> for BookmarkTreeNode {
    fn from(node: ProfileNode) -> Self {
        let children = if node.url.is_some() {
            None
        } else {
            Some(node.children.into_iter().map(Into::into).collect())
        };

        BookmarkTreeNode {
            id: node.id,
            parent_id: None,
            title: node.name,
            url: node.url,
            children,
        }
    }
}

/// Parse either tree shape from raw json.
pub fn parse_tree(json: &str) -> anyhow::Result<Vec<BookmarkTreeNode>> {
    let file: TreeFile =
        serde_json::from_str(json).context("not a bookmark export nor a profile Bookmarks file")?;

    match file {
        TreeFile::Export(nodes) => Ok(nodes),
        TreeFile::Profile(profile) => {
            // roots also carries non-node keys on some versions (e.g. sync metadata)
            let mut roots: Vec<(String, ProfileNode)> = profile
                .roots
                .into_iter()
                .filter_map(|(key, value)| {
                    serde_json::from_value::<ProfileNode>(value)
                        .ok()
                        .map(|node| (key, node))
                })
                .collect();
            roots.sort_by(|a, b| a.0.cmp(&b.0));

            Ok(roots.into_iter().map(|(_, node)| node.into()).collect())
        }
    }
}

pub fn load_tree(path: &Path) -> anyhow::Result<Vec<BookmarkTreeNode>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bookmarks from {}", path.display()))?;
    parse_tree(&json)
}
