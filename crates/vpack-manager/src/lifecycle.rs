use std::path::Path;

use tracing::debug;
use vpack_store::{Container, StorageEngine, StoreResult};

/// The open container of one package, if any.
///
/// A slot lives inside the package's lock, so only the operation holding
/// that lock can reach the container.
pub struct PackageSlot<C> {
    container: Option<C>,
}

impl<C> PackageSlot<C> {
    pub fn is_open(&self) -> bool {
        self.container.is_some()
    }
}

impl<C> Default for PackageSlot<C> {
    fn default() -> Self {
        Self { container: None }
    }
}

impl<C> std::fmt::Debug for PackageSlot<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageSlot")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Opens, caches, and releases package containers.
///
/// With `auto_flush` off a container stays open in its slot until it is
/// closed explicitly. With `auto_flush` on, [`finish`](Self::finish) closes
/// it after every operation and the next access re-opens it.
#[derive(Debug)]
pub struct Lifecycle<E> {
    engine: E,
    auto_flush: bool,
}

impl<E: StorageEngine> Lifecycle<E> {
    pub fn new(engine: E, auto_flush: bool) -> Self {
        Self { engine, auto_flush }
    }

    pub fn auto_flush(&self) -> bool {
        self.auto_flush
    }

    /// Return the open container for `package`, opening (and creating the
    /// backing file) only if the slot is empty.
    pub fn ensure_open<'a>(
        &self,
        package: &Path,
        slot: &'a mut PackageSlot<E::Container>,
    ) -> StoreResult<&'a mut E::Container> {
        let container = match slot.container.take() {
            Some(container) => container,
            None => {
                let container = self.engine.open_or_create(package)?;
                debug!(package = %package.display(), auto_flush = self.auto_flush, "opened package");
                container
            }
        };
        Ok(slot.container.insert(container))
    }

    /// End-of-operation hook: closes the container in auto-flush mode.
    pub fn finish(&self, package: &Path, slot: &mut PackageSlot<E::Container>) -> StoreResult<()> {
        if self.auto_flush {
            self.close(package, slot)?;
        }
        Ok(())
    }

    /// Detach and close the container. Returns `false` if none was open.
    ///
    /// The slot is emptied even when closing fails.
    pub fn close(&self, package: &Path, slot: &mut PackageSlot<E::Container>) -> StoreResult<bool> {
        let Some(container) = slot.container.take() else {
            return Ok(false);
        };
        container.close()?;
        debug!(package = %package.display(), "closed package");
        Ok(true)
    }
}
