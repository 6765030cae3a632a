//! Resource management

use crate::error::IngestError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Scratch space is accounted in units of this many bytes.
const SCRATCH_UNIT: u64 = 1024;

/// [crate::resource_manager::ResourceManager] provides a simple way to allocate various resources
/// to ingests. Resource management is performed using a Tokio Semaphore for each type of
/// resource.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for concurrent ingests.
    tasks: Option<Semaphore>,

    /// Optional semaphore for scratch space (KiB).
    scratch: Option<Semaphore>,

    /// Optional total scratch space in bytes.
    total_scratch: Option<u64>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(task_limit: Option<usize>, scratch_limit: Option<u64>) -> Self {
        Self {
            tasks: task_limit.map(Semaphore::new),
            scratch: scratch_limit.map(|bytes| Semaphore::new(scratch_units(bytes) as usize)),
            total_scratch: scratch_limit,
        }
    }

    /// Acquire a task resource.
    pub async fn task(&self) -> Result<Option<SemaphorePermit>, IngestError> {
        optional_acquire(&self.tasks, 1).await
    }

    /// Acquire scratch space.
    pub async fn scratch(&self, bytes: u64) -> Result<Option<SemaphorePermit>, IngestError> {
        if let Some(total_scratch) = self.total_scratch {
            if bytes > total_scratch {
                return Err(IngestError::InsufficientScratchSpace {
                    requested: bytes,
                    total: total_scratch,
                });
            };
        };
        optional_acquire(&self.scratch, scratch_units(bytes)).await
    }
}

/// Number of scratch units needed to hold `bytes`.
fn scratch_units(bytes: u64) -> u64 {
    bytes.div_ceil(SCRATCH_UNIT)
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: u64,
) -> Result<Option<SemaphorePermit>, IngestError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
