//! Device memory registry.
//!
//! Owns every device buffer the pipeline creates. Callers hold opaque
//! [`MemoryHandle`]s; one handle names a group of per-frame buffers sharing an
//! element kind. The handle table is the only shared mutable state in the
//! pipeline and sits behind a mutex. Buffers are reference counted so
//! operations can work on a group without holding the lock.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, MutexGuard};

use super::device::{Accelerator, DeviceElement, ElementKind};
use super::error::ComputeError;

/// Opaque identifier of one buffer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryHandle(NonZeroU64);

impl MemoryHandle {
    pub fn id(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem#{}", self.0)
    }
}

/// Summary of a buffer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub count: usize,
    pub lengths: Vec<usize>,
    pub total_len: usize,
    pub total_bytes: u64,
    pub kind: ElementKind,
}

/// Ordering context. Work submitted on one stream runs in order.
pub struct ExecStream<A: Accelerator> {
    id: usize,
    pub(crate) inner: A::Stream,
}

impl<A: Accelerator> ExecStream<A> {
    pub fn id(&self) -> usize {
        self.id
    }

    /// The backend stream, for backend-specific diagnostics.
    pub fn raw(&self) -> &A::Stream {
        &self.inner
    }
}

/// Buffers and lengths of a group, detached from the table.
pub(crate) struct GroupView<A: Accelerator> {
    pub buffers: Vec<Arc<A::Buffer>>,
    pub lengths: Vec<usize>,
    pub kind: ElementKind,
}

struct MemoryGroup<A: Accelerator> {
    buffers: Vec<Arc<A::Buffer>>,
    lengths: Vec<usize>,
    kind: ElementKind,
}

impl<A: Accelerator> MemoryGroup<A> {
    fn bytes(&self) -> u64 {
        self.lengths
            .iter()
            .map(|&len| (len * self.kind.size()) as u64)
            .sum()
    }

    fn info(&self) -> GroupInfo {
        GroupInfo {
            count: self.lengths.len(),
            lengths: self.lengths.clone(),
            total_len: self.lengths.iter().sum(),
            total_bytes: self.bytes(),
            kind: self.kind,
        }
    }
}

struct Table<A: Accelerator> {
    next_id: u64,
    groups: HashMap<MemoryHandle, MemoryGroup<A>>,
    streams: Vec<Arc<ExecStream<A>>>,
    allocated_bytes: u64,
}

/// Handle table over an accelerator's buffers and streams.
pub struct DeviceRegistry<A: Accelerator> {
    accelerator: Arc<A>,
    table: Mutex<Table<A>>,
    max_streams: usize,
}

impl<A: Accelerator> DeviceRegistry<A> {
    pub fn new(accelerator: Arc<A>, max_streams: usize) -> Self {
        Self {
            accelerator,
            table: Mutex::new(Table {
                next_id: 1,
                groups: HashMap::new(),
                streams: Vec::new(),
                allocated_bytes: 0,
            }),
            max_streams: max_streams.max(1),
        }
    }

    pub fn accelerator(&self) -> &Arc<A> {
        &self.accelerator
    }

    pub fn max_streams(&self) -> usize {
        self.max_streams
    }

    /// Copy host frames to the device as one group.
    pub fn push<T: DeviceElement>(&self, frames: &[Vec<T>]) -> Result<MemoryHandle, ComputeError> {
        if frames.is_empty() || frames.iter().all(|f| f.is_empty()) {
            return Err(ComputeError::EmptyInput);
        }

        let lengths: Vec<usize> = frames.iter().map(Vec::len).collect();
        let buffers = self.allocate_buffers(&lengths, T::KIND)?;
        for (buffer, frame) in buffers.iter().zip(frames) {
            self.accelerator
                .upload(buffer, bytemuck::cast_slice::<T, f32>(frame))?;
        }

        let handle = self.insert(buffers, lengths, T::KIND);
        log::debug!("Pushed {} frames as {}", frames.len(), handle);
        Ok(handle)
    }

    /// Copy a group back to host frames. `keep = false` frees the group after
    /// a successful copy.
    pub fn pull<T: DeviceElement>(
        &self,
        handle: MemoryHandle,
        keep: bool,
    ) -> Result<Vec<Vec<T>>, ComputeError> {
        let view = self.view(handle)?;
        if view.kind != T::KIND {
            return Err(ComputeError::DomainMismatch {
                handle,
                expected: T::KIND,
                found: view.kind,
            });
        }

        let words = T::KIND.words();
        let frames = view
            .buffers
            .iter()
            .zip(&view.lengths)
            .map(|(buffer, &len)| {
                let data = self.accelerator.download(buffer, len * words)?;
                Ok(bytemuck::cast_slice::<f32, T>(&data).to_vec())
            })
            .collect::<Result<Vec<_>, ComputeError>>()?;

        if !keep {
            self.free(handle)?;
        }
        Ok(frames)
    }

    /// Allocate an uninitialized group with the given per-frame lengths.
    pub fn allocate_group<T: DeviceElement>(&self, lengths: &[usize]) -> Result<MemoryHandle, ComputeError> {
        self.allocate_group_of(T::KIND, lengths)
    }

    pub fn allocate_group_of(
        &self,
        kind: ElementKind,
        lengths: &[usize],
    ) -> Result<MemoryHandle, ComputeError> {
        if lengths.is_empty() {
            return Err(ComputeError::EmptyInput);
        }
        let buffers = self.allocate_buffers(lengths, kind)?;
        Ok(self.insert(buffers, lengths.to_vec(), kind))
    }

    /// Release a group. Buffers still borrowed by running work are dropped
    /// once that work lets go of them.
    pub fn free(&self, handle: MemoryHandle) -> Result<(), ComputeError> {
        let mut table = self.lock();
        let group = table
            .groups
            .remove(&handle)
            .ok_or(ComputeError::UnknownHandle(handle))?;
        table.allocated_bytes = table.allocated_bytes.saturating_sub(group.bytes());
        log::trace!("Freed {}", handle);
        Ok(())
    }

    pub fn info(&self, handle: MemoryHandle) -> Result<GroupInfo, ComputeError> {
        self.lock()
            .groups
            .get(&handle)
            .map(MemoryGroup::info)
            .ok_or(ComputeError::UnknownHandle(handle))
    }

    pub fn contains(&self, handle: MemoryHandle) -> bool {
        self.lock().groups.contains_key(&handle)
    }

    /// The default stream.
    pub fn get_stream(&self) -> Result<Arc<ExecStream<A>>, ComputeError> {
        Ok(self.get_streams(1)?.remove(0))
    }

    /// `n` distinct streams from the pool, capped at `max_streams`.
    pub fn get_streams(&self, n: usize) -> Result<Vec<Arc<ExecStream<A>>>, ComputeError> {
        if n == 0 {
            return Err(ComputeError::InvalidStreamCount(n));
        }
        let n = n.min(self.max_streams);

        let mut table = self.lock();
        while table.streams.len() < n {
            let id = table.streams.len();
            let inner = self.accelerator.create_stream(id)?;
            table.streams.push(Arc::new(ExecStream { id, inner }));
        }
        Ok(table.streams[..n].to_vec())
    }

    /// Bytes held by live groups.
    pub fn allocated_bytes(&self) -> u64 {
        self.lock().allocated_bytes
    }

    pub fn live_groups(&self) -> usize {
        self.lock().groups.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.lock().groups.values().map(|g| g.buffers.len()).sum()
    }

    pub fn stream_pool_size(&self) -> usize {
        self.lock().streams.len()
    }

    pub(crate) fn view(&self, handle: MemoryHandle) -> Result<GroupView<A>, ComputeError> {
        let table = self.lock();
        let group = table
            .groups
            .get(&handle)
            .ok_or(ComputeError::UnknownHandle(handle))?;
        Ok(GroupView {
            buffers: group.buffers.clone(),
            lengths: group.lengths.clone(),
            kind: group.kind,
        })
    }

    fn allocate_buffers(
        &self,
        lengths: &[usize],
        kind: ElementKind,
    ) -> Result<Vec<Arc<A::Buffer>>, ComputeError> {
        // Zero-length frames still get a minimal buffer so every frame has one.
        lengths
            .iter()
            .map(|&len| {
                let buffer = self.accelerator.allocate((len * kind.words()).max(1))?;
                Ok(Arc::new(buffer))
            })
            .collect()
    }

    fn insert(&self, buffers: Vec<Arc<A::Buffer>>, lengths: Vec<usize>, kind: ElementKind) -> MemoryHandle {
        let group = MemoryGroup {
            buffers,
            lengths,
            kind,
        };
        let mut table = self.lock();
        let id = table.next_id;
        table.next_id += 1;
        // next_id starts at 1 and only grows.
        let handle = MemoryHandle(NonZeroU64::MIN.saturating_add(id - 1));
        table.allocated_bytes += group.bytes();
        table.groups.insert(handle, group);
        handle
    }

    fn lock(&self) -> MutexGuard<'_, Table<A>> {
        self.table.lock().unwrap_or_else(|p| p.into_inner())
    }
}
