use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vpack_store::{CompoundFileEngine, Container, StorageEngine};

use crate::config::ManagerConfig;
use crate::error::{DisposalFailure, ManagerError, ManagerResult, PathError};
use crate::lifecycle::{Lifecycle, PackageSlot};
use crate::locks::PackageLocks;
use crate::path::{self, DirPath, VirtualPath};

/// A stream entry reported by scrub or inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    /// Virtual path of the entry.
    pub path: VirtualPath,
    /// Length of the entry's content in bytes.
    pub size: u64,
}

/// Concurrent, path-addressable access to package files.
///
/// Every operation runs under its package's exclusive lock: it opens the
/// container if needed, resolves the virtual path, reads or mutates,
/// commits if it mutated, and releases the lock (closing the container
/// first in auto-flush mode). Operations on different packages run fully
/// concurrently.
///
/// Construct one instance and share it (for example behind an `Arc`); it
/// owns both the lock registry and the open containers.
pub struct PackageManager<E: StorageEngine = CompoundFileEngine> {
    lifecycle: Lifecycle<E>,
    locks: PackageLocks<PackageSlot<E::Container>>,
}

impl PackageManager<CompoundFileEngine> {
    /// Manager over on-disk compound containers.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_engine(CompoundFileEngine::new(config.engine), config.auto_flush)
    }
}

impl<E: StorageEngine> PackageManager<E> {
    pub fn with_engine(engine: E, auto_flush: bool) -> Self {
        Self {
            lifecycle: Lifecycle::new(engine, auto_flush),
            locks: PackageLocks::new(),
        }
    }

    pub fn auto_flush(&self) -> bool {
        self.lifecycle.auto_flush()
    }

    // ---- Entry operations ----

    /// Store `data` at `virtual_path`, replacing any previous content.
    ///
    /// Missing directories are created, and so is the package file.
    pub async fn add_item(
        &self,
        package: impl AsRef<Path>,
        data: &[u8],
        virtual_path: &str,
    ) -> ManagerResult<()> {
        let package = package.as_ref();
        let path = VirtualPath::parse(virtual_path)?;
        self.with_package(package, |container| {
            let node = path::resolve_or_create(container, path.dir())?;
            let existing = container.stream(&node, path.leaf())?;
            let replaced = existing.is_some();
            let stream = match existing {
                Some(stream) => stream,
                None => container.add_stream(&node, path.leaf())?,
            };
            container.write_all(&stream, data)?;
            container.commit()?;
            debug!(
                package = %package.display(),
                path = %path,
                bytes = data.len(),
                replaced,
                "stored item"
            );
            Ok(())
        })
        .await
    }

    /// Read the entry at `virtual_path`, or `None` if it (or any directory
    /// above it) does not exist.
    ///
    /// The returned bytes are a copy and stay valid after the package is
    /// closed.
    pub async fn try_retrieve(
        &self,
        package: impl AsRef<Path>,
        virtual_path: &str,
    ) -> ManagerResult<Option<Bytes>> {
        let package = package.as_ref();
        let path = VirtualPath::parse(virtual_path)?;
        self.with_package(package, |container| {
            let Some(node) = path::resolve(&*container, path.dir())? else {
                return Ok(None);
            };
            let Some(stream) = container.stream(&node, path.leaf())? else {
                return Ok(None);
            };
            Ok(Some(Bytes::from(container.read_all(&stream)?)))
        })
        .await
    }

    /// Read the entry at `virtual_path`, failing with
    /// [`ManagerError::NotFound`] if it does not exist.
    pub async fn retrieve(
        &self,
        package: impl AsRef<Path>,
        virtual_path: &str,
    ) -> ManagerResult<Bytes> {
        let package = package.as_ref();
        match self.try_retrieve(package, virtual_path).await? {
            Some(data) => Ok(data),
            None => Err(ManagerError::NotFound {
                package: package.to_path_buf(),
                path: VirtualPath::parse(virtual_path)?,
            }),
        }
    }

    /// Whether a stream exists at `virtual_path`.
    pub async fn contains(
        &self,
        package: impl AsRef<Path>,
        virtual_path: &str,
    ) -> ManagerResult<bool> {
        let path = VirtualPath::parse(virtual_path)?;
        self.with_package(package.as_ref(), |container| {
            Ok(match path::resolve(&*container, path.dir())? {
                Some(node) => container.stream(&node, path.leaf())?.is_some(),
                None => false,
            })
        })
        .await
    }

    /// Delete the entry at `virtual_path`.
    ///
    /// Removing an entry that does not exist succeeds without doing
    /// anything. Directories are never created by a removal.
    pub async fn remove(&self, package: impl AsRef<Path>, virtual_path: &str) -> ManagerResult<()> {
        let package = package.as_ref();
        let path = VirtualPath::parse(virtual_path)?;
        self.with_package(package, |container| {
            let Some(node) = path::resolve(&*container, path.dir())? else {
                return Ok(());
            };
            if container.delete_entry(&node, path.leaf())? {
                container.commit()?;
                debug!(package = %package.display(), path = %path, "removed item");
            }
            Ok(())
        })
        .await
    }

    // ---- Bulk operations ----

    /// Prune every stream in the directories named by `keep_list` that is
    /// not itself in `keep_list`.
    pub async fn scrub<S: AsRef<str>>(
        &self,
        package: impl AsRef<Path>,
        keep_list: &[S],
    ) -> ManagerResult<()> {
        self.scrub_with_feedback(package, keep_list).await.map(|_| ())
    }

    /// Like [`scrub`](Self::scrub), returning the path and size of every
    /// entry it deleted.
    ///
    /// Only directories that appear in `keep_list` are visited; everything
    /// else in the package is left alone, as are child storages of the
    /// visited directories. All deletions land in one commit, so a failed
    /// scrub deletes nothing.
    pub async fn scrub_with_feedback<S: AsRef<str>>(
        &self,
        package: impl AsRef<Path>,
        keep_list: &[S],
    ) -> ManagerResult<Vec<ItemInfo>> {
        let package = package.as_ref();
        let groups = group_by_directory(keep_list)?;
        self.with_package(package, |container| {
            let mut removed = Vec::new();
            for (dir, keep) in &groups {
                let Some(node) = path::resolve(&*container, dir)? else {
                    debug!(package = %package.display(), dir = %dir, "scrub skipped missing directory");
                    continue;
                };

                let doomed: Vec<String> = container
                    .entries(&node, false)?
                    .into_iter()
                    .filter(|entry| entry.is_stream() && !keep.contains(&entry.name))
                    .map(|entry| entry.name)
                    .collect();

                let before = removed.len();
                for name in doomed {
                    let Some(stream) = container.stream(&node, &name)? else {
                        continue;
                    };
                    let size = container.stream_len(&stream)?;
                    if container.delete_entry(&node, &name)? {
                        removed.push(ItemInfo {
                            path: dir.join(name),
                            size,
                        });
                    }
                }
                debug!(
                    package = %package.display(),
                    dir = %dir,
                    removed = removed.len() - before,
                    kept = keep.len(),
                    "scrubbed directory"
                );
            }
            if !removed.is_empty() {
                container.commit()?;
            }
            Ok(removed)
        })
        .await
    }

    /// List the streams directly inside each directory prefix.
    ///
    /// Missing directories contribute nothing. Order is unspecified.
    pub async fn inventory<S: AsRef<str>>(
        &self,
        package: impl AsRef<Path>,
        directory_prefixes: &[S],
    ) -> ManagerResult<Vec<ItemInfo>> {
        let mut dirs: Vec<DirPath> = Vec::with_capacity(directory_prefixes.len());
        for prefix in directory_prefixes {
            let dir = DirPath::parse(prefix.as_ref())?;
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }

        self.with_package(package.as_ref(), |container| {
            let mut items = Vec::new();
            for dir in &dirs {
                let Some(node) = path::resolve(&*container, dir)? else {
                    continue;
                };
                container.visit_entries(&node, false, &mut |entry| {
                    if entry.is_stream() {
                        items.push(ItemInfo {
                            path: dir.join(entry.name.clone()),
                            size: entry.size,
                        });
                    }
                })?;
            }
            Ok(items)
        })
        .await
    }

    /// List every stream in the package, at any depth.
    pub async fn inventory_all(&self, package: impl AsRef<Path>) -> ManagerResult<Vec<ItemInfo>> {
        self.with_package(package.as_ref(), |container| {
            let mut items = Vec::new();
            container.visit_entries(&container.root(), true, &mut |entry| {
                if entry.is_stream() {
                    items.push(ItemInfo {
                        path: DirPath::from_segments(entry.parents.clone())
                            .join(entry.name.clone()),
                        size: entry.size,
                    });
                }
            })?;
            Ok(items)
        })
        .await
    }

    // ---- Handle management ----

    /// Close the package's container if it is open.
    ///
    /// Afterwards no file handle on the package is held, so the file can be
    /// deleted or moved. The package's lock is dropped from the registry
    /// once no other operation references it.
    pub async fn close_package(&self, package: impl AsRef<Path>) -> ManagerResult<()> {
        let package = package.as_ref();
        let Some(lock) = self.locks.existing(package) else {
            return Ok(());
        };
        let closed = {
            let mut slot = lock.lock().await;
            self.lifecycle.close(package, &mut slot)
        };
        drop(lock);

        let evicted = self.locks.evict_if_idle(package, |slot| !slot.is_open());
        debug!(package = %package.display(), evicted, "close requested");
        closed?;
        Ok(())
    }

    /// Close every open container.
    ///
    /// Waits for in-flight operations on each package. A failure on one
    /// package does not stop the others from being closed; all failures
    /// are returned together in [`ManagerError::Disposal`].
    pub async fn dispose(&self) -> ManagerResult<()> {
        let mut failures = Vec::new();
        let mut closed = 0usize;
        for (package, lock) in self.locks.snapshot() {
            let mut slot = lock.lock().await;
            match self.lifecycle.close(&package, &mut slot) {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(package = %package.display(), %error, "failed to close package during dispose");
                    failures.push(DisposalFailure { package, error });
                }
            }
        }

        debug!(closed, failed = failures.len(), "disposed packages");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::Disposal { failures })
        }
    }

    /// Whether a container is currently open for `package`.
    pub async fn is_open(&self, package: impl AsRef<Path>) -> bool {
        let Some(lock) = self.locks.existing(package.as_ref()) else {
            return false;
        };
        let slot = lock.lock().await;
        slot.is_open()
    }

    /// Sorted list of packages that currently hold an open container.
    pub async fn tracked_packages(&self) -> Vec<PathBuf> {
        let mut open = Vec::new();
        for (package, lock) in self.locks.snapshot() {
            if lock.lock().await.is_open() {
                open.push(package);
            }
        }
        open.sort();
        open
    }

    /// Run `op` against the package's container inside its critical section.
    async fn with_package<T, F>(&self, package: &Path, op: F) -> ManagerResult<T>
    where
        F: FnOnce(&mut E::Container) -> ManagerResult<T>,
    {
        let mut slot = self.locks.acquire(package).await;
        let result = match self.lifecycle.ensure_open(package, &mut slot) {
            Ok(container) => op(container),
            Err(error) => Err(error.into()),
        };
        let finished = if result.is_ok() {
            self.lifecycle.finish(package, &mut slot)
        } else {
            // A failed operation may have left uncommitted changes behind.
            // Drop the handle so the next access starts from the last commit.
            self.lifecycle.close(package, &mut slot).map(drop)
        };

        match (result, finished) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(error)) => Err(error.into()),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(close_error)) => {
                warn!(
                    package = %package.display(),
                    error = %close_error,
                    "failed to close package after failed operation"
                );
                Err(error)
            }
        }
    }
}

impl<E: StorageEngine> std::fmt::Debug for PackageManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageManager")
            .field("auto_flush", &self.auto_flush())
            .field("locks", &self.locks)
            .finish()
    }
}

/// Partition a keep list into leaf-name sets per directory.
fn group_by_directory<S: AsRef<str>>(
    keep_list: &[S],
) -> Result<BTreeMap<DirPath, HashSet<String>>, PathError> {
    let mut groups: BTreeMap<DirPath, HashSet<String>> = BTreeMap::new();
    for entry in keep_list {
        let path = VirtualPath::parse(entry.as_ref())?;
        groups
            .entry(path.dir().clone())
            .or_default()
            .insert(path.leaf().to_string());
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vpack_store::{InMemoryEngine, StoreError};

    const PKG: &str = "pkg.vpak";

    fn memory_manager(auto_flush: bool) -> (PackageManager<InMemoryEngine>, InMemoryEngine) {
        let engine = InMemoryEngine::new();
        (PackageManager::with_engine(engine.clone(), auto_flush), engine)
    }

    fn sorted_paths(items: &[ItemInfo]) -> Vec<String> {
        let mut paths: Vec<String> = items.iter().map(|i| i.path.to_string()).collect();
        paths.sort();
        paths
    }

    // -----------------------------------------------------------------------
    // Add / retrieve / remove
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn add_then_retrieve_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("store.vpak");
        let manager = PackageManager::new(ManagerConfig::default());

        manager.add_item(&package, b"hello world", "docs/greeting.txt").await.unwrap();
        assert!(package.is_file());

        let data = manager.retrieve(&package, "docs/greeting.txt").await.unwrap();
        assert_eq!(data.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn add_overwrites_instead_of_appending() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"first, longer payload", "a/b").await.unwrap();
        manager.add_item(PKG, b"second", "a/b").await.unwrap();

        assert_eq!(manager.retrieve(PKG, "a/b").await.unwrap().as_ref(), b"second");
        let items = manager.inventory(PKG, &["a"]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].size, 6);
    }

    #[tokio::test]
    async fn top_level_entry_lives_under_root() {
        let (manager, engine) = memory_manager(false);
        manager.add_item(PKG, b"x", "readme").await.unwrap();

        let committed = engine.committed(Path::new(PKG)).unwrap();
        assert!(committed.children.is_empty());
        assert!(committed.streams.contains_key("readme"));
    }

    #[tokio::test]
    async fn retrieve_missing_is_not_found() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"x", "docs/a").await.unwrap();

        let err = manager.retrieve(PKG, "docs/missing").await.unwrap_err();
        assert!(err.is_not_found());
        let err = manager.retrieve(PKG, "nodir/a").await.unwrap_err();
        assert!(err.is_not_found());

        assert!(manager.try_retrieve(PKG, "docs/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retrieve_does_not_create_directories() {
        let (manager, engine) = memory_manager(false);
        let _ = manager.try_retrieve(PKG, "x/y/z").await.unwrap();
        assert!(engine.committed(Path::new(PKG)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_then_retrieve_not_found() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"x", "docs/a").await.unwrap();
        assert!(manager.contains(PKG, "docs/a").await.unwrap());

        manager.remove(PKG, "docs/a").await.unwrap();
        assert!(!manager.contains(PKG, "docs/a").await.unwrap());
        assert!(manager.retrieve(PKG, "docs/a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn remove_missing_is_noop() {
        let (manager, _) = memory_manager(false);
        manager.remove(PKG, "docs/never").await.unwrap();
        manager.add_item(PKG, b"x", "docs/a").await.unwrap();
        manager.remove(PKG, "docs/never").await.unwrap();
        assert!(manager.contains(PKG, "docs/a").await.unwrap());
    }

    #[tokio::test]
    async fn invalid_path_rejected_before_locking() {
        let (manager, engine) = memory_manager(false);
        let err = manager.add_item(PKG, b"x", "docs/").await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidPath(PathError::MissingLeaf(_))));
        assert!(manager.locks.is_empty());
        assert_eq!(engine.open_count(Path::new(PKG)), 0);
    }

    #[tokio::test]
    async fn retrieved_bytes_outlive_close() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("p.vpak");
        let manager = PackageManager::new(ManagerConfig::default());
        manager.add_item(&package, b"keep me", "k").await.unwrap();

        let data = manager.retrieve(&package, "k").await.unwrap();
        manager.close_package(&package).await.unwrap();
        std::fs::remove_file(&package).unwrap();
        assert_eq!(data.as_ref(), b"keep me");
    }

    #[tokio::test]
    async fn data_survives_a_new_manager() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("p.vpak");

        let first = PackageManager::new(ManagerConfig::default());
        first.add_item(&package, b"persisted", "deep/er/item").await.unwrap();
        first.dispose().await.unwrap();

        let second = PackageManager::new(ManagerConfig::default());
        let data = second.retrieve(&package, "deep/er/item").await.unwrap();
        assert_eq!(data.as_ref(), b"persisted");
    }

    // -----------------------------------------------------------------------
    // Scrub
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn scrub_only_touches_listed_directories() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"a", "docs/a").await.unwrap();
        manager.add_item(PKG, b"stale", "docs/stale").await.unwrap();
        manager.add_item(PKG, b"b", "other/b").await.unwrap();

        manager.scrub(PKG, &["docs/a"]).await.unwrap();

        assert!(manager.contains(PKG, "docs/a").await.unwrap());
        assert!(!manager.contains(PKG, "docs/stale").await.unwrap());
        assert!(manager.contains(PKG, "other/b").await.unwrap());
    }

    #[tokio::test]
    async fn scrub_feedback_lists_exactly_the_deleted_entries() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"keep", "docs/keep").await.unwrap();
        manager.add_item(PKG, b"12345", "docs/old1").await.unwrap();
        manager.add_item(PKG, b"123", "docs/old2").await.unwrap();
        manager.add_item(PKG, b"root-level", "top").await.unwrap();
        manager.add_item(PKG, b"r", "top-keep").await.unwrap();

        let removed = manager
            .scrub_with_feedback(PKG, &["docs/keep", "top-keep"])
            .await
            .unwrap();

        assert_eq!(sorted_paths(&removed), ["docs/old1", "docs/old2", "top"]);
        let size_of = |p: &str| removed.iter().find(|i| i.path.to_string() == p).unwrap().size;
        assert_eq!(size_of("docs/old1"), 5);
        assert_eq!(size_of("docs/old2"), 3);
        assert_eq!(size_of("top"), 10);

        let left = manager.inventory_all(PKG).await.unwrap();
        assert_eq!(sorted_paths(&left), ["docs/keep", "top-keep"]);
    }

    #[tokio::test]
    async fn scrub_keeps_child_storages() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"a", "docs/a").await.unwrap();
        manager.add_item(PKG, b"n", "docs/nested/n").await.unwrap();

        let removed = manager.scrub_with_feedback(PKG, &["docs/a"]).await.unwrap();
        assert!(removed.is_empty());
        assert!(manager.contains(PKG, "docs/nested/n").await.unwrap());
    }

    #[tokio::test]
    async fn scrub_skips_missing_directories() {
        let (manager, engine) = memory_manager(false);
        manager.add_item(PKG, b"x", "x").await.unwrap();

        let removed = manager.scrub_with_feedback(PKG, &["ghost/a"]).await.unwrap();
        assert!(removed.is_empty());
        assert!(!engine.committed(Path::new(PKG)).unwrap().children.contains_key("ghost"));
    }

    #[tokio::test]
    async fn scrub_with_empty_keep_list_does_nothing() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"x", "docs/x").await.unwrap();
        let keep: [&str; 0] = [];
        let removed = manager.scrub_with_feedback(PKG, &keep).await.unwrap();
        assert!(removed.is_empty());
        assert!(manager.contains(PKG, "docs/x").await.unwrap());
    }

    #[tokio::test]
    async fn scrub_rejects_invalid_keep_entries() {
        let (manager, _) = memory_manager(false);
        let err = manager.scrub(PKG, &["docs//a"]).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidPath(_)));
    }

    // -----------------------------------------------------------------------
    // Inventory
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn inventory_reports_written_sizes() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, &[0u8; 10], "docs/ten").await.unwrap();
        manager.add_item(PKG, &[0u8; 0], "docs/empty").await.unwrap();
        manager.add_item(PKG, &[1u8; 300], "img/big").await.unwrap();
        manager.add_item(PKG, b"n", "docs/sub/nested").await.unwrap();

        let items = manager.inventory(PKG, &["docs", "img", "missing"]).await.unwrap();
        assert_eq!(sorted_paths(&items), ["docs/empty", "docs/ten", "img/big"]);
        for item in &items {
            let expected = match item.path.leaf() {
                "ten" => 10,
                "empty" => 0,
                "big" => 300,
                other => panic!("unexpected entry {other}"),
            };
            assert_eq!(item.size, expected);
        }
    }

    #[tokio::test]
    async fn inventory_of_root_and_duplicates() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"r", "top").await.unwrap();
        manager.add_item(PKG, b"d", "docs/d").await.unwrap();

        let items = manager.inventory(PKG, &["/", ""]).await.unwrap();
        assert_eq!(sorted_paths(&items), ["top"]);
    }

    #[tokio::test]
    async fn inventory_all_is_recursive() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"1", "a").await.unwrap();
        manager.add_item(PKG, b"22", "x/b").await.unwrap();
        manager.add_item(PKG, b"333", "x/y/c").await.unwrap();

        let items = manager.inventory_all(PKG).await.unwrap();
        assert_eq!(sorted_paths(&items), ["a", "x/b", "x/y/c"]);
        let total: u64 = items.iter().map(|i| i.size).sum();
        assert_eq!(total, 6);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn persistent_mode_opens_once() {
        let (manager, engine) = memory_manager(false);
        for i in 0..5 {
            manager.add_item(PKG, b"x", &format!("item{i}")).await.unwrap();
        }
        manager.retrieve(PKG, "item0").await.unwrap();

        assert_eq!(engine.open_count(Path::new(PKG)), 1);
        assert!(manager.is_open(PKG).await);
        assert_eq!(manager.tracked_packages().await, vec![PathBuf::from(PKG)]);
    }

    #[tokio::test]
    async fn auto_flush_closes_after_every_operation() {
        let (manager, engine) = memory_manager(true);
        manager.add_item(PKG, b"x", "a").await.unwrap();
        assert_eq!(engine.live_containers(), 0);
        assert!(!manager.is_open(PKG).await);

        manager.retrieve(PKG, "a").await.unwrap();
        manager.inventory(PKG, &["/"]).await.unwrap();
        assert_eq!(engine.live_containers(), 0);
        assert_eq!(engine.open_count(Path::new(PKG)), 3);
    }

    #[tokio::test]
    async fn auto_flush_closes_after_failed_operation() {
        let (manager, engine) = memory_manager(true);
        assert!(manager.retrieve(PKG, "missing").await.unwrap_err().is_not_found());
        assert_eq!(engine.live_containers(), 0);
    }

    #[tokio::test]
    async fn auto_flush_file_deletable_between_operations() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("p.vpak");
        let manager = PackageManager::new(ManagerConfig::auto_flush());

        manager.add_item(&package, b"x", "a").await.unwrap();
        assert!(manager.tracked_packages().await.is_empty());
        std::fs::remove_file(&package).unwrap();

        // Next access recreates an empty container.
        assert!(manager.try_retrieve(&package, "a").await.unwrap().is_none());
        assert!(package.is_file());
    }

    #[tokio::test]
    async fn close_package_releases_handle() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("p.vpak");
        let manager = PackageManager::new(ManagerConfig::default());

        manager.add_item(&package, b"x", "a").await.unwrap();
        assert!(manager.is_open(&package).await);

        manager.close_package(&package).await.unwrap();
        assert!(!manager.is_open(&package).await);
        assert!(manager.locks.is_empty());
        std::fs::remove_file(&package).unwrap();
    }

    #[tokio::test]
    async fn close_then_reopen_lazily() {
        let (manager, engine) = memory_manager(false);
        manager.add_item(PKG, b"v", "a").await.unwrap();
        manager.close_package(PKG).await.unwrap();
        assert_eq!(engine.live_containers(), 0);

        assert_eq!(manager.retrieve(PKG, "a").await.unwrap().as_ref(), b"v");
        assert_eq!(engine.open_count(Path::new(PKG)), 2);
    }

    #[tokio::test]
    async fn close_unknown_package_is_noop() {
        let (manager, _) = memory_manager(false);
        manager.close_package("never-opened.vpak").await.unwrap();
        assert!(manager.locks.is_empty());
    }

    #[tokio::test]
    async fn dispose_closes_everything() {
        let (manager, engine) = memory_manager(false);
        manager.add_item("a.vpak", b"1", "x").await.unwrap();
        manager.add_item("b.vpak", b"2", "x").await.unwrap();
        assert_eq!(engine.live_containers(), 2);

        manager.dispose().await.unwrap();
        assert_eq!(engine.live_containers(), 0);
        assert!(manager.tracked_packages().await.is_empty());
    }

    #[tokio::test]
    async fn dispose_attempts_every_handle() {
        let (manager, engine) = memory_manager(false);
        for name in ["a.vpak", "b.vpak", "c.vpak"] {
            manager.add_item(name, b"1", "x").await.unwrap();
        }
        engine.set_fail_closes(true);

        let err = manager.dispose().await.unwrap_err();
        let failures = match err {
            ManagerError::Disposal { failures } => failures,
            other => panic!("expected disposal error, got {other:?}"),
        };
        assert_eq!(failures.len(), 3);
        assert!(failures.iter().all(|f| matches!(f.error, StoreError::Io(_))));
        assert_eq!(engine.live_containers(), 0);
    }

    // -----------------------------------------------------------------------
    // Failure handling
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn storage_failure_releases_lock() {
        let (manager, engine) = memory_manager(false);
        engine.set_fail_commits(true);
        let err = manager.add_item(PKG, b"x", "a").await.unwrap_err();
        assert!(matches!(err, ManagerError::Storage(StoreError::Io(_))));

        engine.set_fail_commits(false);
        let next = tokio::time::timeout(Duration::from_secs(1), manager.add_item(PKG, b"y", "a"))
            .await
            .expect("lock should have been released");
        next.unwrap();
        assert_eq!(manager.retrieve(PKG, "a").await.unwrap().as_ref(), b"y");
    }

    #[tokio::test]
    async fn failed_add_is_never_persisted() {
        let (manager, engine) = memory_manager(false);
        manager.add_item(PKG, b"k", "keep").await.unwrap();

        engine.set_fail_commits(true);
        assert!(manager.add_item(PKG, b"rejected", "ghost").await.is_err());
        assert!(!manager.is_open(PKG).await);

        engine.set_fail_commits(false);
        assert!(manager.try_retrieve(PKG, "ghost").await.unwrap().is_none());
        manager.add_item(PKG, b"u", "unrelated").await.unwrap();
        manager.close_package(PKG).await.unwrap();

        let committed = engine.committed(Path::new(PKG)).unwrap();
        let names: Vec<&str> = committed.streams.keys().map(String::as_str).collect();
        assert_eq!(names, ["keep", "unrelated"]);
    }

    #[tokio::test]
    async fn failed_scrub_deletes_nothing() {
        let (manager, engine) = memory_manager(false);
        manager.add_item(PKG, b"a", "d/keep").await.unwrap();
        manager.add_item(PKG, b"old", "d/old").await.unwrap();
        manager.add_item(PKG, b"x", "e/keep").await.unwrap();
        manager.add_item(PKG, b"stale", "e/stale").await.unwrap();

        engine.set_fail_commits(true);
        assert!(manager.scrub(PKG, &["d/keep", "e/keep"]).await.is_err());

        engine.set_fail_commits(false);
        manager.add_item(PKG, b"n", "other").await.unwrap();
        assert!(manager.contains(PKG, "d/old").await.unwrap());
        assert!(manager.contains(PKG, "e/stale").await.unwrap());

        let removed = manager
            .scrub_with_feedback(PKG, &["d/keep", "e/keep"])
            .await
            .unwrap();
        assert_eq!(sorted_paths(&removed), ["d/old", "e/stale"]);
        assert!(removed.iter().all(|i| i.size == i.path.leaf().len() as u64));
    }

    #[tokio::test]
    async fn open_failure_surfaces_as_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PackageManager::new(ManagerConfig::default());
        let err = manager.add_item(dir.path(), b"x", "a").await.unwrap_err();
        assert!(matches!(err, ManagerError::Storage(StoreError::NotAFile(_))));
        assert!(!manager.is_open(dir.path()).await);
    }

    #[tokio::test]
    async fn kind_conflict_is_reported() {
        let (manager, _) = memory_manager(false);
        manager.add_item(PKG, b"x", "docs").await.unwrap();
        let err = manager.add_item(PKG, b"y", "docs/a").await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Storage(StoreError::EntryKindConflict { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_never_interleave() {
        let (manager, _) = memory_manager(false);
        let manager = Arc::new(manager);
        let payloads: Vec<Vec<u8>> = (0..32u8).map(|i| vec![i; 512 + i as usize]).collect();

        let tasks: Vec<_> = payloads
            .iter()
            .cloned()
            .map(|payload| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.add_item(PKG, &payload, "docs/shared").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = manager.retrieve(PKG, "docs/shared").await.unwrap();
        assert!(payloads.iter().any(|p| p.as_slice() == stored.as_ref()));
        assert_eq!(manager.inventory(PKG, &["docs"]).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("shared.vpak");
        let manager = Arc::new(PackageManager::new(ManagerConfig::default()));

        let tasks: Vec<_> = (0..8u8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let package = package.clone();
                tokio::spawn(async move {
                    manager.add_item(&package, &[i; 64], &format!("items/{i}")).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        manager.dispose().await.unwrap();

        let reopened = PackageManager::new(ManagerConfig::default());
        let items = reopened.inventory(&package, &["items"]).await.unwrap();
        assert_eq!(items.len(), 8);
        assert!(items.iter().all(|i| i.size == 64));
    }

    #[tokio::test]
    async fn blocked_package_does_not_block_others() {
        let (manager, _) = memory_manager(false);
        let held = manager.locks.acquire(Path::new("a.vpak")).await;

        let other =
            tokio::time::timeout(Duration::from_millis(500), manager.add_item("b.vpak", b"x", "x"))
                .await;
        assert!(matches!(other, Ok(Ok(()))));

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), manager.add_item("a.vpak", b"x", "x"))
                .await;
        assert!(blocked.is_err());

        drop(held);
        manager.add_item("a.vpak", b"x", "x").await.unwrap();
    }
}
