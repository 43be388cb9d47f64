//! B-tree over index pages
//!
//! Entries have a fixed length: the key followed by the row id in big
//! endian, so byte order is entry order and duplicate keys stay distinct.
//! Leaves hold entries; internal nodes hold a leftmost child in the page
//! header and `[separator][child u32 BE]` pairs, where a child holds every
//! entry at or above its separator. Leaves are chained through their right
//! sibling.
//!
//! The index is derived from the data pages and is never logged; after a
//! crash it is rebuilt with [`BTree::bulk_load`]. Deletes do not rebalance.
//! The tree holds at most one page latch at a time; callers serialize
//! writers.

use super::errors::{TableError, TableResult};
use super::RowId;
use crate::lsn::Lsn;
use crate::page::{page_type, IndexPage, PageNo, PageType};
use crate::pagecache::{FileId, PageCache};

pub const ENTRY_ROWID_SIZE: usize = 8;
const CHILD_SIZE: usize = 4;

#[derive(Debug, Clone)]
struct Node {
    level: u8,
    sibling: PageNo,
    entries: Vec<Vec<u8>>,
    /// Internal nodes only: `entries.len() + 1` children
    children: Vec<PageNo>,
}

impl Node {
    fn leaf(entries: Vec<Vec<u8>>) -> Self {
        Self {
            level: 0,
            sibling: 0,
            entries,
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.level == 0
    }

    fn child_for(&self, entry: &[u8]) -> PageNo {
        let idx = self.entries.partition_point(|s| s.as_slice() <= entry);
        self.children[idx]
    }
}

#[derive(Debug)]
pub struct BTree<'a> {
    cache: &'a PageCache,
    file: FileId,
    key_len: usize,
    root: PageNo,
    next_page: PageNo,
    lsn: Lsn,
}

impl<'a> BTree<'a> {
    pub fn new(cache: &'a PageCache, file: FileId, key_len: usize, root: PageNo, next_page: PageNo) -> Self {
        Self {
            cache,
            file,
            key_len,
            root,
            next_page: next_page.max(1),
            lsn: Lsn::IMPOSSIBLE,
        }
    }

    /// Stamp changed pages with `lsn`
    pub fn with_lsn(mut self, lsn: Lsn) -> Self {
        self.lsn = lsn;
        self
    }

    pub fn root(&self) -> PageNo {
        self.root
    }

    pub fn next_page(&self) -> PageNo {
        self.next_page
    }

    fn entry_len(&self) -> usize {
        self.key_len + ENTRY_ROWID_SIZE
    }

    pub fn make_entry(&self, key: &[u8], rowid: RowId) -> Vec<u8> {
        let mut entry = Vec::with_capacity(self.entry_len());
        entry.extend_from_slice(key);
        entry.extend_from_slice(&rowid.raw().to_be_bytes());
        entry
    }

    fn split_entry(&self, entry: &[u8]) -> (Vec<u8>, RowId) {
        let mut raw = [0u8; ENTRY_ROWID_SIZE];
        raw.copy_from_slice(&entry[self.key_len..]);
        (entry[..self.key_len].to_vec(), RowId::from_raw(u64::from_be_bytes(raw)))
    }

    fn max_entries(&self, leaf: bool) -> TableResult<usize> {
        let capacity = self.cache.block_size(self.file)? - crate::page::INDEX_HEADER_SIZE
            - crate::page::PAGE_TRAILER_SIZE;
        let stride = if leaf {
            self.entry_len()
        } else {
            self.entry_len() + CHILD_SIZE
        };
        Ok(capacity / stride)
    }

    fn alloc(&mut self) -> PageNo {
        let page = self.next_page;
        self.next_page += 1;
        page
    }

    fn load(&self, page: PageNo) -> TableResult<Node> {
        let guard = self.cache.read(self.file, page)?;
        if page_type(&guard) != Some(PageType::Index) {
            return Err(TableError::corrupt(format!("index page {} is not a B-tree node", page)));
        }
        let view = IndexPage::new(&guard[..]);
        let count = view.key_count();
        let mut node = Node {
            level: view.level(),
            sibling: view.right_sibling(),
            entries: Vec::with_capacity(count),
            children: Vec::new(),
        };
        if node.is_leaf() {
            let len = self.entry_len();
            if count * len > view.capacity() {
                return Err(TableError::corrupt(format!("index page {} overfull", page)));
            }
            for i in 0..count {
                node.entries.push(view.entry(i, len).to_vec());
            }
        } else {
            let stride = self.entry_len() + CHILD_SIZE;
            if count * stride > view.capacity() {
                return Err(TableError::corrupt(format!("index page {} overfull", page)));
            }
            node.children.push(view.leftmost_child());
            for i in 0..count {
                let raw = view.entry(i, stride);
                node.entries.push(raw[..self.entry_len()].to_vec());
                let mut child = [0u8; CHILD_SIZE];
                child.copy_from_slice(&raw[self.entry_len()..]);
                node.children.push(u32::from_be_bytes(child));
            }
        }
        Ok(node)
    }

    fn store(&self, page: PageNo, node: &Node) -> TableResult<()> {
        let mut guard = self.cache.write(self.file, page)?;
        {
            let mut view = IndexPage::new(&mut guard[..]);
            view.init(node.level);
            view.set_right_sibling(node.sibling);
            if node.is_leaf() {
                view.set_entries(&node.entries, self.entry_len());
            } else {
                view.set_leftmost_child(node.children[0]);
                let packed: Vec<Vec<u8>> = node
                    .entries
                    .iter()
                    .zip(&node.children[1..])
                    .map(|(sep, child)| {
                        let mut raw = sep.clone();
                        raw.extend_from_slice(&child.to_be_bytes());
                        raw
                    })
                    .collect();
                view.set_entries(&packed, self.entry_len() + CHILD_SIZE);
            }
        }
        guard.mark_dirty(self.lsn);
        Ok(())
    }

    /// Add an entry; returns false when it was already present
    pub fn insert(&mut self, key: &[u8], rowid: RowId) -> TableResult<bool> {
        let entry = self.make_entry(key, rowid);
        if self.root == 0 {
            let page = self.alloc();
            self.store(page, &Node::leaf(vec![entry]))?;
            self.root = page;
            return Ok(true);
        }

        let mut path: Vec<(PageNo, Node)> = Vec::new();
        let mut page = self.root;
        let mut node = self.load(page)?;
        while !node.is_leaf() {
            let child = node.child_for(&entry);
            path.push((page, node));
            page = child;
            node = self.load(page)?;
        }

        let pos = match node.entries.binary_search(&entry) {
            Ok(_) => return Ok(false),
            Err(pos) => pos,
        };
        node.entries.insert(pos, entry);
        if node.entries.len() <= self.max_entries(true)? {
            self.store(page, &node)?;
            return Ok(true);
        }

        // Split the leaf, then push separators up as long as nodes overflow
        let mid = node.entries.len() / 2;
        let right_page = self.alloc();
        let right = Node {
            level: 0,
            sibling: node.sibling,
            entries: node.entries.split_off(mid),
            children: Vec::new(),
        };
        node.sibling = right_page;
        let mut separator = right.entries[0].clone();
        let mut new_child = right_page;
        self.store(right_page, &right)?;
        self.store(page, &node)?;
        let mut left_level = 0u8;
        let mut left_page = page;

        while let Some((ppage, mut parent)) = path.pop() {
            let idx = parent.entries.partition_point(|s| s.as_slice() <= separator.as_slice());
            parent.entries.insert(idx, separator.clone());
            parent.children.insert(idx + 1, new_child);
            if parent.entries.len() <= self.max_entries(false)? {
                self.store(ppage, &parent)?;
                return Ok(true);
            }
            let mid = parent.entries.len() / 2;
            let mut right_entries = parent.entries.split_off(mid);
            let promoted = right_entries.remove(0);
            let right_children = parent.children.split_off(mid + 1);
            let right_page = self.alloc();
            let right = Node {
                level: parent.level,
                sibling: 0,
                entries: right_entries,
                children: right_children,
            };
            self.store(right_page, &right)?;
            self.store(ppage, &parent)?;
            separator = promoted;
            new_child = right_page;
            left_level = parent.level;
            left_page = ppage;
        }

        let root_page = self.alloc();
        let root = Node {
            level: left_level + 1,
            sibling: 0,
            entries: vec![separator],
            children: vec![left_page, new_child],
        };
        self.store(root_page, &root)?;
        self.root = root_page;
        Ok(true)
    }

    fn find_leaf(&self, target: &[u8]) -> TableResult<Option<(PageNo, Node)>> {
        if self.root == 0 {
            return Ok(None);
        }
        let mut page = self.root;
        let mut node = self.load(page)?;
        while !node.is_leaf() {
            page = node.child_for(target);
            node = self.load(page)?;
        }
        Ok(Some((page, node)))
    }

    /// Remove an entry; returns false when it was not there
    pub fn delete(&mut self, key: &[u8], rowid: RowId) -> TableResult<bool> {
        let entry = self.make_entry(key, rowid);
        let (page, mut node) = match self.find_leaf(&entry)? {
            Some(found) => found,
            None => return Ok(false),
        };
        match node.entries.binary_search(&entry) {
            Ok(pos) => {
                node.entries.remove(pos);
                self.store(page, &node)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Row ids stored under `key`, in row id order
    pub fn lookup(&self, key: &[u8]) -> TableResult<Vec<RowId>> {
        let target = self.make_entry(key, RowId::from_raw(0));
        let (_, mut node) = match self.find_leaf(&target)? {
            Some(found) => found,
            None => return Ok(Vec::new()),
        };
        let mut found = Vec::new();
        loop {
            for entry in node.entries.iter().filter(|e| e.as_slice() >= target.as_slice()) {
                if &entry[..self.key_len] != key {
                    return Ok(found);
                }
                found.push(self.split_entry(entry).1);
            }
            if node.sibling == 0 {
                return Ok(found);
            }
            node = self.load(node.sibling)?;
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> TableResult<bool> {
        Ok(!self.lookup(key)?.is_empty())
    }

    /// Every entry in order
    pub fn entries(&self) -> TableResult<Vec<(Vec<u8>, RowId)>> {
        if self.root == 0 {
            return Ok(Vec::new());
        }
        let mut node = self.load(self.root)?;
        while !node.is_leaf() {
            node = self.load(node.children[0])?;
        }
        let mut out = Vec::new();
        loop {
            out.extend(node.entries.iter().map(|e| self.split_entry(e)));
            if node.sibling == 0 {
                return Ok(out);
            }
            node = self.load(node.sibling)?;
        }
    }

    /// Build a fresh tree from `entries`, starting at page 1. The caller
    /// drops the old index pages first.
    pub fn bulk_load(&mut self, mut entries: Vec<(Vec<u8>, RowId)>) -> TableResult<()> {
        self.root = 0;
        self.next_page = 1;
        if entries.is_empty() {
            return Ok(());
        }
        entries.sort();
        let raw: Vec<Vec<u8>> = entries
            .iter()
            .map(|(key, rowid)| self.make_entry(key, *rowid))
            .collect();

        let per_leaf = self.max_entries(true)?;
        let chunks: Vec<Vec<Vec<u8>>> = raw.chunks(per_leaf).map(|c| c.to_vec()).collect();
        let first_page = self.next_page;
        let mut level: Vec<(PageNo, Vec<u8>)> = Vec::with_capacity(chunks.len());
        let count = chunks.len() as PageNo;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let page = self.alloc();
            let sibling = if (i as PageNo) + 1 < count {
                first_page + i as PageNo + 1
            } else {
                0
            };
            let first = chunk[0].clone();
            let node = Node {
                sibling,
                ..Node::leaf(chunk)
            };
            self.store(page, &node)?;
            level.push((page, first));
        }

        let per_node = self.max_entries(false)? + 1;
        let mut height = 0u8;
        while level.len() > 1 {
            height += 1;
            let mut upper = Vec::with_capacity(level.len() / per_node + 1);
            for group in level.chunks(per_node) {
                let page = self.alloc();
                let node = Node {
                    level: height,
                    sibling: 0,
                    entries: group[1..].iter().map(|(_, first)| first.clone()).collect(),
                    children: group.iter().map(|(child, _)| *child).collect(),
                };
                self.store(page, &node)?;
                upper.push((page, group[0].1.clone()));
            }
            level = upper;
        }
        self.root = level[0].0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Pipeline;
    use crate::observability::MetricsRegistry;
    use crate::pagecache::FileBlockStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> (PageCache, FileId) {
        let cache = PageCache::new(64, None, Arc::new(MetricsRegistry::new()));
        let store = FileBlockStore::open(&dir.path().join("t.aid"), 1024).unwrap();
        let file = cache
            .register_file("t.aid", Arc::new(store), Arc::new(Pipeline::standard(false, None)), 1024)
            .unwrap();
        (cache, file)
    }

    fn key(n: u32) -> [u8; 4] {
        n.to_be_bytes()
    }

    #[test]
    fn test_insert_splits_and_stays_ordered() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = cache(&dir);
        let mut tree = BTree::new(&cache, file, 4, 0, 1);
        // 1024-byte pages hold 82 leaf entries, so this needs three levels
        let order: Vec<u32> = (0..2000).map(|i| (i * 7919) % 2000).collect();
        for n in &order {
            assert!(tree.insert(&key(*n), RowId::from_raw(*n as u64 + 1)).unwrap());
        }
        assert!(!tree.insert(&key(5), RowId::from_raw(6)).unwrap());

        let all = tree.entries().unwrap();
        assert_eq!(all.len(), 2000);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tree.lookup(&key(1234)).unwrap(), vec![RowId::from_raw(1235)]);
        assert!(tree.lookup(&key(5000)).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_keys_and_delete() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = cache(&dir);
        let mut tree = BTree::new(&cache, file, 4, 0, 1);
        for rowid in [30u64, 10, 20] {
            tree.insert(&key(9), RowId::from_raw(rowid)).unwrap();
        }
        tree.insert(&key(8), RowId::from_raw(1)).unwrap();
        assert_eq!(
            tree.lookup(&key(9)).unwrap(),
            vec![RowId::from_raw(10), RowId::from_raw(20), RowId::from_raw(30)]
        );
        assert!(tree.delete(&key(9), RowId::from_raw(20)).unwrap());
        assert!(!tree.delete(&key(9), RowId::from_raw(20)).unwrap());
        assert_eq!(tree.lookup(&key(9)).unwrap().len(), 2);
    }

    #[test]
    fn test_lookup_across_emptied_leaves() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = cache(&dir);
        let mut tree = BTree::new(&cache, file, 4, 0, 1);
        for n in 0..500u32 {
            tree.insert(&key(n / 100), RowId::from_raw(n as u64)).unwrap();
        }
        for n in 100..150u32 {
            tree.delete(&key(1), RowId::from_raw(n as u64)).unwrap();
        }
        assert_eq!(tree.lookup(&key(1)).unwrap().len(), 50);
        assert_eq!(tree.lookup(&key(2)).unwrap().len(), 100);
    }

    #[test]
    fn test_bulk_load_matches_inserts() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = cache(&dir);
        let entries: Vec<(Vec<u8>, RowId)> = (0..3000u32)
            .rev()
            .map(|n| (key(n).to_vec(), RowId::from_raw(n as u64)))
            .collect();
        let mut tree = BTree::new(&cache, file, 4, 0, 1);
        tree.bulk_load(entries).unwrap();
        assert!(tree.root() > 1);
        let all = tree.entries().unwrap();
        assert_eq!(all.len(), 3000);
        assert_eq!(all[0].1, RowId::from_raw(0));
        assert_eq!(tree.lookup(&key(2999)).unwrap(), vec![RowId::from_raw(2999)]);

        // Inserting after a bulk load keeps working
        tree.insert(&key(10_000), RowId::from_raw(1)).unwrap();
        assert_eq!(tree.entries().unwrap().len(), 3001);
    }
}
