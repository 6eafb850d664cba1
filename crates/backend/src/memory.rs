use crate::error::BackendError;
use crate::path::{normalize, validate_name};
use crate::{AccessHandle, Backend};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::yield_now;
use tracing::trace;

type NodeId = u64;

const ROOT: NodeId = 0;

/// Largest file a [`MemoryBackend`] holds (4 `GiB`).
pub const MAX_MEMORY_FILE_SIZE: u64 = 1 << 32;

/// Resizes `data` to `len` bytes, failing instead of aborting when the memory is not there.
fn resize(data: &mut Vec<u8>, len: u64) -> Result<(), BackendError> {
    if len > MAX_MEMORY_FILE_SIZE {
        return Err(BackendError::too_large(format!(
            "{len} bytes exceed the {MAX_MEMORY_FILE_SIZE}-byte limit"
        )));
    }
    let len = usize::try_from(len).map_err(|_| BackendError::too_large(format!("{len} bytes")))?;
    if len > data.len() {
        data.try_reserve_exact(len - data.len())
            .map_err(|err| BackendError::too_large(format!("{len} bytes: {err}")))?;
    }
    data.resize(len, 0);
    Ok(())
}

#[derive(Debug)]
enum Node {
    Dir { children: BTreeMap<String, NodeId> },
    File { data: Vec<u8>, held: bool },
}

#[derive(Debug)]
struct Tree {
    nodes: FxHashMap<NodeId, Node>,
    next_id: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        let mut nodes = FxHashMap::default();
        nodes.insert(ROOT, Node::Dir { children: BTreeMap::new() });
        Self { nodes, next_id: ROOT + 1 }
    }
}

impl Tree {
    fn children(&self, dir: NodeId) -> Result<&BTreeMap<String, NodeId>, BackendError> {
        match self.nodes.get(&dir) {
            Some(Node::Dir { children }) => Ok(children),
            Some(Node::File { .. }) => Err(BackendError::type_mismatch("expected a directory")),
            None => Err(BackendError::not_found("directory was removed")),
        }
    }

    fn children_mut(&mut self, dir: NodeId) -> Result<&mut BTreeMap<String, NodeId>, BackendError> {
        match self.nodes.get_mut(&dir) {
            Some(Node::Dir { children }) => Ok(children),
            Some(Node::File { .. }) => Err(BackendError::type_mismatch("expected a directory")),
            None => Err(BackendError::not_found("directory was removed")),
        }
    }

    fn file_mut(&mut self, id: NodeId) -> Result<(&mut Vec<u8>, &mut bool), BackendError> {
        match self.nodes.get_mut(&id) {
            Some(Node::File { data, held }) => Ok((data, held)),
            Some(Node::Dir { .. }) => Err(BackendError::type_mismatch("expected a file")),
            None => Err(BackendError::not_found("file was removed")),
        }
    }

    fn add(&mut self, parent: NodeId, name: &str, node: Node) -> Result<NodeId, BackendError> {
        let id = self.next_id;
        self.children_mut(parent)?.insert(name.to_owned(), id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        Ok(id)
    }

    fn any_held(&self, id: NodeId) -> bool {
        match self.nodes.get(&id) {
            Some(Node::File { held, .. }) => *held,
            Some(Node::Dir { children }) => children.values().any(|child| self.any_held(*child)),
            None => false,
        }
    }

    fn drop_subtree(&mut self, id: NodeId) {
        if let Some(Node::Dir { children }) = self.nodes.remove(&id) {
            for child in children.into_values() {
                self.drop_subtree(child);
            }
        }
    }

    fn lookup(&self, path: &str) -> Option<NodeId> {
        normalize(path).into_iter().try_fold(ROOT, |dir, name| match self.nodes.get(&dir) {
            Some(Node::Dir { children }) => children.get(name).copied(),
            _ => None,
        })
    }
}

/// Reference to a directory of a [`MemoryBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryDir(NodeId);

/// Reference to a file of a [`MemoryBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryFile(NodeId);

/// An in-memory tree. Clones share the same tree and the same handle exclusivity.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `path` names an existing entry.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.tree.lock().lookup(path).is_some()
    }

    /// Copy of the file content at `path`.
    #[must_use]
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let tree = self.tree.lock();
        match tree.nodes.get(&tree.lookup(path)?) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// True while an access handle to the file at `path` is open.
    #[must_use]
    pub fn is_held(&self, path: &str) -> bool {
        let tree = self.tree.lock();
        tree.lookup(path)
            .is_some_and(|id| matches!(tree.nodes.get(&id), Some(Node::File { held: true, .. })))
    }
}

impl Backend for MemoryBackend {
    type Dir = MemoryDir;
    type File = MemoryFile;
    type Access = MemoryAccess;

    fn root(&self) -> MemoryDir {
        MemoryDir(ROOT)
    }

    async fn directory(&self, parent: &MemoryDir, name: &str, create: bool) -> Result<MemoryDir, BackendError> {
        validate_name(name)?;
        yield_now().await;

        let mut tree = self.tree.lock();
        let existing = tree.children(parent.0)?.get(name).copied();
        match existing {
            Some(id) => match tree.nodes.get(&id) {
                Some(Node::Dir { .. }) => Ok(MemoryDir(id)),
                _ => Err(BackendError::type_mismatch(format!("{name} is a file"))),
            },
            None if create => {
                let id = tree.add(parent.0, name, Node::Dir { children: BTreeMap::new() })?;
                trace!(name, id, "Created directory");
                Ok(MemoryDir(id))
            },
            None => Err(BackendError::not_found(name.to_owned())),
        }
    }

    async fn file(&self, dir: &MemoryDir, name: &str, create: bool) -> Result<MemoryFile, BackendError> {
        validate_name(name)?;
        yield_now().await;

        let mut tree = self.tree.lock();
        let existing = tree.children(dir.0)?.get(name).copied();
        match existing {
            Some(id) => match tree.nodes.get(&id) {
                Some(Node::File { .. }) => Ok(MemoryFile(id)),
                _ => Err(BackendError::type_mismatch(format!("{name} is a directory"))),
            },
            None if create => {
                let id = tree.add(dir.0, name, Node::File { data: Vec::new(), held: false })?;
                trace!(name, id, "Created file");
                Ok(MemoryFile(id))
            },
            None => Err(BackendError::not_found(name.to_owned())),
        }
    }

    async fn remove_entry(&self, dir: &MemoryDir, name: &str, recursive: bool) -> Result<(), BackendError> {
        validate_name(name)?;
        yield_now().await;

        let mut tree = self.tree.lock();
        let id = tree
            .children(dir.0)?
            .get(name)
            .copied()
            .ok_or_else(|| BackendError::not_found(name.to_owned()))?;

        match tree.nodes.get(&id) {
            Some(Node::Dir { children }) if !children.is_empty() && !recursive => {
                return Err(BackendError::not_empty(name.to_owned()));
            },
            _ => {},
        }
        if tree.any_held(id) {
            return Err(BackendError::conflict(format!("{name} has an open access handle")));
        }

        tree.children_mut(dir.0)?.remove(name);
        tree.drop_subtree(id);
        trace!(name, id, "Removed entry");
        Ok(())
    }

    async fn open_access(&self, file: &MemoryFile) -> Result<MemoryAccess, BackendError> {
        yield_now().await;

        let mut tree = self.tree.lock();
        let (_, held) = tree.file_mut(file.0)?;
        if *held {
            return Err(BackendError::conflict("access handle already open"));
        }
        *held = true;
        Ok(MemoryAccess { tree: Arc::clone(&self.tree), node: file.0, open: true })
    }
}

/// Exclusive handle of one [`MemoryBackend`] file.
#[derive(Debug)]
pub struct MemoryAccess {
    tree: Arc<Mutex<Tree>>,
    node: NodeId,
    open: bool,
}

impl MemoryAccess {
    fn release(&mut self) {
        if std::mem::take(&mut self.open)
            && let Ok((_, held)) = self.tree.lock().file_mut(self.node)
        {
            *held = false;
        }
    }
}

impl AccessHandle for MemoryAccess {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, BackendError> {
        yield_now().await;

        let mut tree = self.tree.lock();
        let (data, _) = tree.file_mut(self.node)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    async fn write_at(&mut self, bytes: &[u8], offset: u64) -> Result<usize, BackendError> {
        yield_now().await;

        let end = offset
            .checked_add(bytes.len() as u64)
            .ok_or_else(|| BackendError::too_large(format!("offset {offset} overflows")))?;
        let mut tree = self.tree.lock();
        let (data, _) = tree.file_mut(self.node)?;
        if (data.len() as u64) < end {
            resize(data, end)?;
        }
        // Both fit in usize once the buffer holds `end` bytes.
        let (start, end) = (offset as usize, end as usize);
        data[start..end].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    async fn truncate(&mut self, len: u64) -> Result<(), BackendError> {
        yield_now().await;

        let mut tree = self.tree.lock();
        resize(tree.file_mut(self.node)?.0, len)
    }

    async fn flush(&mut self) -> Result<(), BackendError> {
        yield_now().await;
        self.tree.lock().file_mut(self.node).map(|_| ())
    }

    async fn size(&mut self) -> Result<u64, BackendError> {
        yield_now().await;
        Ok(self.tree.lock().file_mut(self.node)?.0.len() as u64)
    }

    async fn close(mut self) -> Result<(), BackendError> {
        yield_now().await;
        self.release();
        Ok(())
    }
}

impl Drop for MemoryAccess {
    fn drop(&mut self) {
        self.release();
    }
}
