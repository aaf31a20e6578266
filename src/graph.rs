//! Flat permissions graph: logical path -> `Node`, persisted as a JSON array
//! whose filename prefix decides plaintext-vs-ciphertext storage format.
//!
//! A tree of pointers would need re-parenting on every rename and a
//! recursive walk for `delete_group`/`check_path_integrity`; a flat map
//! keyed on the full path makes both O(1) and O(n) over a single
//! iteration, respectively, at the cost of `rename_node` needing to reject
//! non-leaf renames explicitly (see below) instead of rekeying a subtree.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::crypto::CryptoProvider;
use crate::error::{SfsError, SfsResult};
use crate::fs::EncryptedFs;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub name: String,
    #[serde(rename = "isRead")]
    pub is_read: bool,
    #[serde(rename = "isWrite")]
    pub is_write: bool,
}

fn upsert(acl: &mut Vec<Permission>, name: &str, is_read: bool, is_write: bool) {
    if let Some(existing) = acl.iter_mut().find(|p| p.name == name) {
        existing.is_read = is_read;
        existing.is_write = is_write;
    } else {
        acl.push(Permission {
            name: name.to_string(),
            is_read,
            is_write,
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeDump {
    name: String,
    owner: String,
    #[serde(rename = "allowedUsers")]
    allowed_users: Vec<Permission>,
    #[serde(rename = "allowedGroups")]
    allowed_groups: Vec<Permission>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub owner: String,
    pub user_acl: Vec<Permission>,
    pub group_acl: Vec<Permission>,
}

impl Node {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            user_acl: Vec::new(),
            group_acl: Vec::new(),
        }
    }

    fn passes(&self, user_name: &str, groups: &[String], want_read: bool) -> bool {
        if user_name == "admin" || user_name == self.owner {
            return true;
        }
        let bit_set = |p: &Permission| if want_read { p.is_read } else { p.is_write };
        if self
            .user_acl
            .iter()
            .any(|p| (p.name == user_name || p.name == "all") && bit_set(p))
        {
            return true;
        }
        self.group_acl
            .iter()
            .any(|p| groups.iter().any(|g| g == &p.name) && bit_set(p))
    }

    pub fn is_readable(&self, user_name: &str, groups: &[String]) -> bool {
        self.passes(user_name, groups, true)
    }

    pub fn is_writable(&self, user_name: &str, groups: &[String]) -> bool {
        self.passes(user_name, groups, false)
    }

    pub fn is_owner(&self, user_name: &str) -> bool {
        user_name == self.owner
    }

    pub fn add_user(&mut self, name: &str, is_read: bool, is_write: bool) {
        upsert(&mut self.user_acl, name, is_read, is_write);
    }

    pub fn add_group(&mut self, name: &str, is_read: bool, is_write: bool) {
        upsert(&mut self.group_acl, name, is_read, is_write);
    }

    pub fn remove_user(&mut self, name: &str) {
        self.user_acl.retain(|p| p.name != name);
    }

    fn from_dump(dump: NodeDump) -> Self {
        Self {
            owner: dump.owner,
            user_acl: dump.allowed_users,
            group_acl: dump.allowed_groups,
        }
    }

    fn to_dump(&self, path: &str) -> NodeDump {
        NodeDump {
            name: path.to_string(),
            owner: self.owner.clone(),
            allowed_users: self.user_acl.clone(),
            allowed_groups: self.group_acl.clone(),
        }
    }
}

/// The three `change_permissions` modes of the shell's `chp` verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    OwnerOnly,
    GroupShare,
    WorldShare,
}

impl TryFrom<u8> for ShareMode {
    type Error = SfsError;

    fn try_from(choice: u8) -> SfsResult<Self> {
        match choice {
            1 => Ok(ShareMode::OwnerOnly),
            2 => Ok(ShareMode::GroupShare),
            3 => Ok(ShareMode::WorldShare),
            other => Err(SfsError::BadInput(format!("unknown permission choice {other}"))),
        }
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(i) => path[..i].to_string(),
        None => String::new(),
    }
}

/// Proper ancestor keys of `path`, nearest first excluded, root excluded
/// (top-level home nodes have no explicit root Node).
fn ancestors(path: &str) -> Vec<String> {
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    (1..components.len())
        .map(|i| components[..i].join("/"))
        .collect()
}

pub struct Graph {
    nodes: HashMap<String, Node>,
    json_path: PathBuf,
}

impl Graph {
    pub fn load(json_path: &Path, crypto: &CryptoProvider) -> SfsResult<Self> {
        let dumps: Vec<NodeDump> = if json_path.exists() {
            if CryptoProvider::is_encrypted(json_path) {
                crypto.decrypt_json(json_path)?
            } else {
                let text = fs::read_to_string(json_path)?;
                serde_json::from_str(&text)?
            }
        } else {
            Vec::new()
        };

        let mut nodes = HashMap::with_capacity(dumps.len());
        for dump in dumps {
            nodes.insert(dump.name.clone(), Node::from_dump(dump));
        }

        Ok(Self {
            nodes,
            json_path: json_path.to_path_buf(),
        })
    }

    fn persist(&self, crypto: &CryptoProvider) -> SfsResult<()> {
        if let Some(dir) = self.json_path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut dumps: Vec<NodeDump> = self
            .nodes
            .iter()
            .map(|(path, node)| node.to_dump(path))
            .collect();
        dumps.sort_by(|a, b| a.name.cmp(&b.name));

        if CryptoProvider::is_encrypted(&self.json_path) {
            crypto.encrypt_json(&dumps, &self.json_path)
        } else {
            let text = serde_json::to_string_pretty(&dumps)?;
            let tmp = self.json_path.with_extension("tmp");
            fs::write(&tmp, text)?;
            fs::rename(&tmp, &self.json_path)?;
            Ok(())
        }
    }

    pub fn get_node(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    /// True iff any Node's group ACL still references `name` (used by the
    /// coordinator to decide whether a group "exists" for `update_group`/
    /// `delete_group`, alongside the user store's own membership check).
    pub fn has_group_reference(&self, name: &str) -> bool {
        self.nodes
            .values()
            .any(|node| node.group_acl.iter().any(|p| p.name == name))
    }

    /// Pretty directory listing: plaintext names for children the caller
    /// may read, opaque encrypted names for children they may not, folder
    /// entries suffixed with `/`. Children with no Node are omitted. No
    /// readability check on `path`'s own node: a caller who cannot read the
    /// directory itself still sees that something is there, per child,
    /// exactly as `getReadableSubNodes` in the original source does.
    pub fn list_directory(
        &self,
        fs: &EncryptedFs,
        crypto: &CryptoProvider,
        path: &str,
        user_name: &str,
        groups: &[String],
    ) -> Vec<String> {
        if !self.nodes.contains_key(path) {
            return Vec::new();
        }

        let entries = match fs.list_dir(crypto, path) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut out = Vec::new();
        for entry in entries {
            let child_path = if path.is_empty() {
                entry.plain_name.clone()
            } else {
                format!("{path}/{}", entry.plain_name)
            };

            let Some(child) = self.nodes.get(&child_path) else {
                continue;
            };

            let mut display = if child.is_readable(user_name, groups) {
                entry.plain_name
            } else {
                entry.encrypted_name
            };
            if entry.is_folder {
                display.push('/');
            }
            out.push(display);
        }

        out
    }

    pub fn init_user_directory(
        &mut self,
        fs: &EncryptedFs,
        crypto: &CryptoProvider,
        name: &str,
    ) -> SfsResult<()> {
        fs.make_path(crypto, name, false)?;

        let mut node = Node::new(name);
        node.add_user(name, true, true);
        self.nodes.insert(name.to_string(), node);
        self.persist(crypto)
    }

    fn create_node(
        &mut self,
        fs: &EncryptedFs,
        crypto: &CryptoProvider,
        path: &str,
        user_name: &str,
        groups: &[String],
        is_file: bool,
    ) -> SfsResult<()> {
        if self.nodes.contains_key(path) {
            return Err(SfsError::Conflict(format!("{path} already exists")));
        }

        let parent_path = parent_of(path);
        let parent = self
            .nodes
            .get(&parent_path)
            .ok_or_else(|| SfsError::NotFound(format!("no parent node for {path}")))?;
        if !parent.is_writable(user_name, groups) {
            return Err(SfsError::Denied(format!("{user_name} cannot write to {parent_path}")));
        }
        let parent_owner = parent.owner.clone();

        if is_file {
            fs.write_file(crypto, path, "")?;
        } else {
            fs.make_path(crypto, path, false)?;
        }

        let mut node = Node::new(user_name);
        node.add_user(user_name, true, true);
        node.add_user(&parent_owner, true, true);
        self.nodes.insert(path.to_string(), node);
        self.persist(crypto)
    }

    pub fn create_file(
        &mut self,
        fs: &EncryptedFs,
        crypto: &CryptoProvider,
        path: &str,
        user_name: &str,
        groups: &[String],
    ) -> SfsResult<()> {
        self.create_node(fs, crypto, path, user_name, groups, true)
    }

    pub fn create_folder(
        &mut self,
        fs: &EncryptedFs,
        crypto: &CryptoProvider,
        path: &str,
        user_name: &str,
        groups: &[String],
    ) -> SfsResult<()> {
        self.create_node(fs, crypto, path, user_name, groups, false)
    }

    /// Forbids renaming a node with descendants (returns `Conflict`) rather
    /// than rekeying a subtree (see the design notes on rename policy).
    pub fn rename_node(
        &mut self,
        fs: &EncryptedFs,
        crypto: &CryptoProvider,
        old_path: &str,
        new_last_name: &str,
    ) -> SfsResult<()> {
        if !self.nodes.contains_key(old_path) {
            return Err(SfsError::NotFound(old_path.to_string()));
        }

        let prefix = format!("{old_path}/");
        if self.nodes.keys().any(|k| k.starts_with(&prefix)) {
            return Err(SfsError::Conflict(format!(
                "{old_path} has descendants and cannot be renamed"
            )));
        }

        let parent = parent_of(old_path);
        let new_path = if parent.is_empty() {
            new_last_name.to_string()
        } else {
            format!("{parent}/{new_last_name}")
        };
        if self.nodes.contains_key(&new_path) {
            return Err(SfsError::Conflict(format!("{new_path} already exists")));
        }

        fs.rename(crypto, old_path, new_last_name)?;
        let node = self.nodes.remove(old_path).expect("checked above");
        self.nodes.insert(new_path, node);
        self.persist(crypto)
    }

    pub fn delete_group(&mut self, crypto: &CryptoProvider, name: &str) -> SfsResult<()> {
        for node in self.nodes.values_mut() {
            node.group_acl.retain(|p| p.name != name);
        }
        self.persist(crypto)
    }

    /// No ownership check here by design: the coordinator gates `chp` on
    /// `is_owner` before calling this.
    pub fn change_permissions(
        &mut self,
        crypto: &CryptoProvider,
        mode: ShareMode,
        path: &str,
        groups: &[String],
    ) -> SfsResult<()> {
        if !self.nodes.contains_key(path) {
            return Err(SfsError::NotFound(path.to_string()));
        }

        match mode {
            ShareMode::OwnerOnly => {
                let node = self.nodes.get_mut(path).expect("checked above");
                node.user_acl.clear();
                node.group_acl.clear();
            }
            ShareMode::GroupShare => {
                {
                    let node = self.nodes.get_mut(path).expect("checked above");
                    node.remove_user("all");
                    for group in groups {
                        node.add_group(group, true, true);
                    }
                }
                for ancestor in ancestors(path) {
                    if let Some(node) = self.nodes.get_mut(&ancestor) {
                        for group in groups {
                            node.add_group(group, true, false);
                        }
                    }
                }
            }
            ShareMode::WorldShare => {
                self.nodes
                    .get_mut(path)
                    .expect("checked above")
                    .add_user("all", true, true);
                for ancestor in ancestors(path) {
                    if let Some(node) = self.nodes.get_mut(&ancestor) {
                        node.add_user("all", true, false);
                    }
                }
            }
        }

        self.persist(crypto)
    }

    /// Every Node keyed under `prefix` that is not a folder on disk is
    /// read once; any that fails to decrypt is reported.
    pub fn check_path_integrity(
        &self,
        fs: &EncryptedFs,
        crypto: &CryptoProvider,
        prefix: &str,
    ) -> Vec<String> {
        let mut corrupt: Vec<String> = self
            .nodes
            .keys()
            .filter(|path| path.starts_with(prefix))
            .filter(|path| !matches!(fs.is_folder(crypto, path), Ok(true)))
            .filter(|path| fs.read_file(crypto, path).is_err())
            .cloned()
            .collect();
        corrupt.sort();
        corrupt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, CryptoProvider, EncryptedFs, Graph) {
        let dir = tempfile::tempdir().unwrap();
        let crypto = CryptoProvider::from_key_bytes([9u8; 32]);
        let fs = EncryptedFs::new(dir.path().join("files")).unwrap();
        let graph = Graph::load(&dir.path().join("json/permissions.json"), &crypto).unwrap();
        (dir, crypto, fs, graph)
    }

    #[test]
    fn init_user_directory_grants_self_full_access() {
        let (_dir, crypto, fs, mut graph) = setup();
        graph.init_user_directory(&fs, &crypto, "alice").unwrap();
        let node = graph.get_node("alice").unwrap();
        assert!(node.is_readable("alice", &[]));
        assert!(node.is_writable("alice", &[]));
    }

    #[test]
    fn create_file_fails_without_parent() {
        let (_dir, crypto, fs, mut graph) = setup();
        let err = graph
            .create_file(&fs, &crypto, "alice/note", "alice", &[])
            .unwrap_err();
        assert!(matches!(err, SfsError::NotFound(_)));
    }

    #[test]
    fn create_file_denied_for_non_writer() {
        let (_dir, crypto, fs, mut graph) = setup();
        graph.init_user_directory(&fs, &crypto, "alice").unwrap();
        let err = graph
            .create_file(&fs, &crypto, "alice/note", "bob", &[])
            .unwrap_err();
        assert!(matches!(err, SfsError::Denied(_)));
    }

    #[test]
    fn cross_user_read_denied_until_shared() {
        let (_dir, crypto, fs, mut graph) = setup();
        graph.init_user_directory(&fs, &crypto, "alice").unwrap();
        graph
            .create_file(&fs, &crypto, "alice/secret", "alice", &[])
            .unwrap();

        let node = graph.get_node("alice/secret").unwrap();
        assert!(!node.is_readable("bob", &[]));

        graph
            .change_permissions(&crypto, ShareMode::WorldShare, "alice/secret", &[])
            .unwrap();
        let node = graph.get_node("alice/secret").unwrap();
        assert!(node.is_readable("bob", &[]));
    }

    #[test]
    fn list_directory_lists_unreadable_home_with_encrypted_child_name() {
        let (_dir, crypto, fs, mut graph) = setup();
        graph.init_user_directory(&fs, &crypto, "alice").unwrap();
        graph
            .create_file(&fs, &crypto, "alice/secret", "alice", &[])
            .unwrap();

        // bob cannot read alice's home node itself, yet the listing still
        // surfaces one entry for "secret" under its opaque encrypted name.
        let listing = graph.list_directory(&fs, &crypto, "alice", "bob", &[]);
        assert_eq!(listing.len(), 1);
        assert_ne!(listing[0], "secret");
    }

    #[test]
    fn group_share_grants_read_only_breadcrumb_to_ancestors() {
        let (_dir, crypto, fs, mut graph) = setup();
        graph.init_user_directory(&fs, &crypto, "alice").unwrap();
        graph
            .create_file(&fs, &crypto, "alice/note", "alice", &[])
            .unwrap();

        let teams = vec!["team".to_string()];
        graph
            .change_permissions(&crypto, ShareMode::GroupShare, "alice/note", &teams)
            .unwrap();

        let target = graph.get_node("alice/note").unwrap();
        assert!(target.is_writable("bob", &teams));

        let home = graph.get_node("alice").unwrap();
        assert!(home.is_readable("bob", &teams));
        assert!(!home.is_writable("bob", &teams));
    }

    #[test]
    fn delete_group_strips_every_acl_entry() {
        let (_dir, crypto, fs, mut graph) = setup();
        graph.init_user_directory(&fs, &crypto, "alice").unwrap();
        graph
            .create_file(&fs, &crypto, "alice/note", "alice", &[])
            .unwrap();
        graph
            .change_permissions(
                &crypto,
                ShareMode::GroupShare,
                "alice/note",
                &["team".to_string()],
            )
            .unwrap();

        graph.delete_group(&crypto, "team").unwrap();

        assert!(graph
            .get_node("alice/note")
            .unwrap()
            .group_acl
            .iter()
            .all(|p| p.name != "team"));
        assert!(graph
            .get_node("alice")
            .unwrap()
            .group_acl
            .iter()
            .all(|p| p.name != "team"));
    }

    #[test]
    fn rename_node_moves_key_and_forbids_non_leaf() {
        let (_dir, crypto, fs, mut graph) = setup();
        graph.init_user_directory(&fs, &crypto, "alice").unwrap();
        graph
            .create_file(&fs, &crypto, "alice/note", "alice", &[])
            .unwrap();

        graph
            .rename_node(&fs, &crypto, "alice/note", "memo")
            .unwrap();
        assert!(graph.get_node("alice/note").is_none());
        assert!(graph.get_node("alice/memo").is_some());

        graph
            .create_file(&fs, &crypto, "alice/child", "alice", &[])
            .unwrap();
        assert!(matches!(
            graph.rename_node(&fs, &crypto, "alice", "alice2"),
            Err(SfsError::Conflict(_))
        ));
    }

    #[test]
    fn check_path_integrity_reports_tampered_files() {
        let (_dir, crypto, fs, mut graph) = setup();
        graph.init_user_directory(&fs, &crypto, "alice").unwrap();
        graph
            .create_file(&fs, &crypto, "alice/x", "alice", &[])
            .unwrap();
        fs.write_file(&crypto, "alice/x", "hello").unwrap();

        let on_disk = fs.find_path(&crypto, "alice/x").unwrap();
        let mut bytes = std::fs::read(&on_disk).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&on_disk, bytes).unwrap();

        let corrupt = graph.check_path_integrity(&fs, &crypto, "");
        assert_eq!(corrupt, vec!["alice/x".to_string()]);
    }

    #[test]
    fn persisted_graph_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = CryptoProvider::from_key_bytes([11u8; 32]);
        let fs = EncryptedFs::new(dir.path().join("files")).unwrap();
        let json_path = dir.path().join("json/encrypted_permissions.json");

        {
            let mut graph = Graph::load(&json_path, &crypto).unwrap();
            graph.init_user_directory(&fs, &crypto, "alice").unwrap();
        }

        let reloaded = Graph::load(&json_path, &crypto).unwrap();
        assert!(reloaded.get_node("alice").is_some());
    }
}
