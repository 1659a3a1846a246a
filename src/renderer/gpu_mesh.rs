use super::context::GpuContext;
use crate::assets::{AssetChange, AssetId, AssetRegistry};
use crate::error::EngineError;
use crate::mesh::MeshData;
use ash::vk;
use std::collections::{HashMap, HashSet};

/// Items waiting for every frame that may still reference them to retire. Each retired frame slot
/// counts down once; an item released at `frames_in_flight` countdowns is unreachable by the GPU.
#[derive(Debug)]
pub struct DeferredReleases<T> {
    pending: Vec<(usize, T)>,
    frames_in_flight: usize,
}

impl<T> DeferredReleases<T> {
    pub fn new(frames_in_flight: usize) -> Self {
        Self { pending: Vec::new(), frames_in_flight: frames_in_flight.max(1) }
    }

    pub fn defer(&mut self, item: T) {
        self.pending.push((self.frames_in_flight, item));
    }

    /// Counts down after a frame slot retired and returns what is now safe to destroy.
    pub fn retire_frame(&mut self) -> Vec<T> {
        let mut ready = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            self.pending[index].0 -= 1;
            if self.pending[index].0 == 0 {
                ready.push(self.pending.swap_remove(index).1);
            } else {
                index += 1;
            }
        }
        ready
    }

    /// Everything still pending, for teardown after a device-idle wait.
    pub fn drain(&mut self) -> Vec<T> {
        self.pending.drain(..).map(|(_, item)| item).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Host-visible, host-coherent buffer.
#[derive(Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    mapped: *mut u8,
}

impl GpuBuffer {
    pub fn new(ctx: &GpuContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Self, EngineError> {
        let size = size.max(4);
        unsafe {
            let info = vk::BufferCreateInfo::default().size(size).usage(usage).sharing_mode(vk::SharingMode::EXCLUSIVE);
            let buffer = ctx.device.create_buffer(&info, None).map_err(|e| EngineError::from_vk("create buffer", e))?;
            let requirements = ctx.device.get_buffer_memory_requirements(buffer);
            let Some(memory_type) = ctx.find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ) else {
                ctx.device.destroy_buffer(buffer, None);
                return Err(EngineError::FatalGpu("no host-visible coherent memory type".to_string()));
            };
            let alloc = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            let memory = match ctx.device.allocate_memory(&alloc, None) {
                Ok(memory) => memory,
                Err(err) => {
                    ctx.device.destroy_buffer(buffer, None);
                    return Err(EngineError::from_vk("allocate buffer memory", err));
                }
            };
            let mapped = ctx
                .device
                .bind_buffer_memory(buffer, memory, 0)
                .and_then(|()| ctx.device.map_memory(memory, 0, size, vk::MemoryMapFlags::empty()));
            match mapped {
                Ok(mapped) => Ok(Self { buffer, memory, size, mapped: mapped.cast() }),
                Err(err) => {
                    ctx.device.destroy_buffer(buffer, None);
                    ctx.device.free_memory(memory, None);
                    Err(EngineError::from_vk("map buffer memory", err))
                }
            }
        }
    }

    pub fn with_data(ctx: &GpuContext, bytes: &[u8], usage: vk::BufferUsageFlags) -> Result<Self, EngineError> {
        let buffer = Self::new(ctx, bytes.len() as vk::DeviceSize, usage)?;
        buffer.write(bytes);
        Ok(buffer)
    }

    /// Copies `bytes` to the start of the mapping; excess bytes are dropped.
    pub fn write(&self, bytes: &[u8]) {
        let len = bytes.len().min(self.size as usize);
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped, len) };
    }

    /// # Safety
    /// No pending GPU work may reference the buffer.
    pub unsafe fn destroy(self, ctx: &GpuContext) {
        ctx.device.unmap_memory(self.memory);
        ctx.device.destroy_buffer(self.buffer, None);
        ctx.device.free_memory(self.memory, None);
    }
}

#[derive(Debug)]
pub struct GpuMesh {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload(ctx: &GpuContext, mesh: &MeshData) -> Result<Self, EngineError> {
        let vertices = GpuBuffer::with_data(
            ctx,
            bytemuck::cast_slice(&mesh.interleaved()),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let indices = match GpuBuffer::with_data(ctx, bytemuck::cast_slice(&mesh.indices), vk::BufferUsageFlags::INDEX_BUFFER)
        {
            Ok(indices) => indices,
            Err(err) => {
                unsafe { vertices.destroy(ctx) };
                return Err(err);
            }
        };
        Ok(Self { vertices, indices, index_count: mesh.indices.len() as u32 })
    }

    /// # Safety
    /// No pending GPU work may reference the buffers.
    pub unsafe fn destroy(self, ctx: &GpuContext) {
        self.vertices.destroy(ctx);
        self.indices.destroy(ctx);
    }
}

/// GPU copies of registry meshes plus the builtin cube drawn when a mesh is missing. Buffers replaced or
/// evicted while frames are in flight go through [`DeferredReleases`].
pub struct GpuMeshCache {
    builtin: Option<GpuMesh>,
    meshes: HashMap<AssetId, GpuMesh>,
    failed: HashSet<AssetId>,
    releases: DeferredReleases<GpuMesh>,
}

impl GpuMeshCache {
    pub fn new(ctx: &GpuContext, frames_in_flight: usize) -> Result<Self, EngineError> {
        Ok(Self {
            builtin: Some(GpuMesh::upload(ctx, &MeshData::cube(1.0))?),
            meshes: HashMap::new(),
            failed: HashSet::new(),
            releases: DeferredReleases::new(frames_in_flight),
        })
    }

    /// Uploads every id not yet resident. Ids the registry cannot load are remembered and fall back to the
    /// builtin mesh until a change event clears them.
    pub fn prepare<'a>(
        &mut self,
        ctx: &GpuContext,
        registry: &AssetRegistry,
        ids: impl IntoIterator<Item = &'a AssetId>,
    ) {
        for id in ids {
            if self.meshes.contains_key(id) || self.failed.contains(id) {
                continue;
            }
            let uploaded = registry.load_mesh_data(*id).map(|mesh| GpuMesh::upload(ctx, &mesh));
            match uploaded {
                Some(Ok(mesh)) => {
                    self.meshes.insert(*id, mesh);
                }
                Some(Err(err)) => {
                    log::warn!(target: "viewport", "mesh {id} upload failed: {err}");
                    self.failed.insert(*id);
                }
                None => {
                    self.failed.insert(*id);
                }
            }
        }
    }

    pub fn get(&self, id: Option<AssetId>) -> Option<&GpuMesh> {
        id.and_then(|id| self.meshes.get(&id)).or(self.builtin.as_ref())
    }

    pub fn is_resident(&self, id: AssetId) -> bool {
        self.meshes.contains_key(&id)
    }

    /// Drops GPU copies invalidated by registry changes; they are destroyed once in-flight frames retire.
    pub fn apply_changes(&mut self, changes: &[AssetChange]) -> usize {
        let mut evicted = 0;
        for change in changes {
            self.failed.remove(&change.id);
            if !change.kind.invalidates_cache() {
                continue;
            }
            if let Some(mesh) = self.meshes.remove(&change.id) {
                self.releases.defer(mesh);
                evicted += 1;
            }
        }
        evicted
    }

    /// Evicts every resident mesh, for consumers that lost change events.
    pub fn invalidate_all(&mut self) {
        self.failed.clear();
        for (_, mesh) in self.meshes.drain() {
            self.releases.defer(mesh);
        }
    }

    pub fn retire_frame(&mut self, ctx: &GpuContext) {
        for mesh in self.releases.retire_frame() {
            unsafe { mesh.destroy(ctx) };
        }
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) {
        for mesh in self.releases.drain() {
            mesh.destroy(ctx);
        }
        for (_, mesh) in self.meshes.drain() {
            mesh.destroy(ctx);
        }
        if let Some(builtin) = self.builtin.take() {
            builtin.destroy(ctx);
        }
        self.failed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_wait_for_every_frame_slot() {
        let mut releases = DeferredReleases::new(2);
        releases.defer("a");
        assert!(releases.retire_frame().is_empty());
        releases.defer("b");
        assert_eq!(releases.retire_frame(), vec!["a"]);
        assert_eq!(releases.retire_frame(), vec!["b"]);
        assert!(releases.is_empty());
    }

    #[test]
    fn drain_returns_everything_pending() {
        let mut releases = DeferredReleases::new(3);
        releases.defer(1);
        releases.defer(2);
        assert_eq!(releases.len(), 2);
        let mut drained = releases.drain();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
    }
}
