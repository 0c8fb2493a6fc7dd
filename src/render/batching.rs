use std::collections::BTreeMap;

use crate::gpu::{
    BindGroup, BufferSlice, IndexType, IndexedIndirectCommand, IndirectCommand,
};
use crate::utils::Handle;

/// Sort key for one submitted submesh. Lexicographic `Ord` over the fields in
/// declaration order gives the batching priority: material descriptor-set
/// identity, vertex-buffer identity, index-buffer presence/identity, buffer
/// offset, stable per-instance id, then size. The derived order is a strict
/// weak ordering, so batch boundaries are deterministic across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubmeshKey {
    pub material: u32,
    pub vertex_buffer: u32,
    /// `None` (no index buffer) sorts before any identity.
    pub index_buffer: Option<u32>,
    pub offset: u32,
    pub instance: u32,
    pub size: u32,
}

/// Indirect draw record for one submesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawRecord {
    Indexed(IndexedIndirectCommand),
    NonIndexed(IndirectCommand),
}

impl DrawRecord {
    pub fn byte_len(&self) -> usize {
        match self {
            DrawRecord::Indexed(_) => std::mem::size_of::<IndexedIndirectCommand>(),
            DrawRecord::NonIndexed(_) => std::mem::size_of::<IndirectCommand>(),
        }
    }

    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            DrawRecord::Indexed(cmd) => out.extend_from_slice(bytemuck::bytes_of(cmd)),
            DrawRecord::NonIndexed(cmd) => out.extend_from_slice(bytemuck::bytes_of(cmd)),
        }
    }
}

/// One draw inside a batch: the indirect record plus the mesh descriptor
/// (model-matrix bind group) it draws with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchDraw {
    pub mesh_bind_group: Handle<BindGroup>,
    pub record: DrawRecord,
}

/// A run of draws sharing (material, vertex buffer, index buffer). Rebuilt
/// from scratch every frame; nothing here is cached across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshBatch {
    pub material: Handle<BindGroup>,
    pub vertex_buffer: BufferSlice,
    pub index_buffer: Option<(BufferSlice, IndexType)>,
    pub draws: Vec<BatchDraw>,
}

/// Everything needed to emit a submesh once its key position is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingDraw {
    pub material: Handle<BindGroup>,
    pub vertex_buffer: BufferSlice,
    pub index_buffer: Option<(BufferSlice, IndexType)>,
    pub draw: BatchDraw,
}

/// Accumulates keyed submeshes in a balanced tree, then sweeps once.
#[derive(Default)]
pub struct BatchBuilder {
    // Equal keys are one equivalence class; insertion order within a class
    // is submission order, which is itself deterministic.
    submeshes: BTreeMap<SubmeshKey, Vec<PendingDraw>>,
    count: usize,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: SubmeshKey, draw: PendingDraw) {
        self.submeshes.entry(key).or_default().push(draw);
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// O(n) sweep in key order: a new batch opens whenever
    /// (material, vertex buffer, index buffer) changes from the running one.
    pub fn build(self) -> Vec<MeshBatch> {
        let mut batches: Vec<MeshBatch> = Vec::new();
        let mut current_key: Option<(u32, u32, Option<u32>)> = None;

        for (key, draws) in self.submeshes {
            let batch_key = (key.material, key.vertex_buffer, key.index_buffer);
            for pending in draws {
                if current_key != Some(batch_key) {
                    current_key = Some(batch_key);
                    batches.push(MeshBatch {
                        material: pending.material,
                        vertex_buffer: pending.vertex_buffer,
                        index_buffer: pending.index_buffer,
                        draws: Vec::new(),
                    });
                }
                batches
                    .last_mut()
                    .expect("batch opened above")
                    .draws
                    .push(pending.draw);
            }
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(material: u32, vertex: u32, index: Option<u32>, id: u32) -> SubmeshKey {
        SubmeshKey {
            material,
            vertex_buffer: vertex,
            index_buffer: index,
            offset: 0,
            instance: id,
            size: 36,
        }
    }

    fn draw(material: u32, vertex: u32, index: Option<u32>, id: u32) -> PendingDraw {
        PendingDraw {
            material: Handle::new(material as u16, 0),
            vertex_buffer: BufferSlice {
                buffer: Handle::new(vertex as u16, 0),
                offset: 0,
                size: 1024,
            },
            index_buffer: index.map(|i| {
                (
                    BufferSlice {
                        buffer: Handle::new(i as u16, 0),
                        offset: 0,
                        size: 1024,
                    },
                    IndexType::U32,
                )
            }),
            draw: BatchDraw {
                mesh_bind_group: Handle::new(id as u16, 0),
                record: DrawRecord::Indexed(IndexedIndirectCommand {
                    index_count: 36,
                    instance_count: 1,
                    ..Default::default()
                }),
            },
        }
    }

    fn cmp(a: &SubmeshKey, b: &SubmeshKey) -> bool {
        a < b
    }

    #[test]
    fn comparator_is_a_strict_weak_ordering() {
        let keys = [
            key(1, 1, None, 1),
            key(1, 1, Some(5), 1),
            key(1, 2, Some(5), 1),
            key(2, 1, None, 7),
            key(2, 1, Some(3), 2),
            key(1, 1, Some(5), 2),
            key(1, 1, Some(5), 1),
        ];

        for a in &keys {
            // Irreflexive.
            assert!(!cmp(a, a));
            for b in &keys {
                // Asymmetric.
                assert!(!(cmp(a, b) && cmp(b, a)));
                for c in &keys {
                    // Transitive.
                    if cmp(a, b) && cmp(b, c) {
                        assert!(cmp(a, c));
                    }
                    // Incomparability is transitive too.
                    if !cmp(a, b) && !cmp(b, a) && !cmp(b, c) && !cmp(c, b) {
                        assert!(!cmp(a, c) && !cmp(c, a));
                    }
                }
            }
        }
    }

    #[test]
    fn incomparable_keys_share_a_batch() {
        let a = key(1, 1, Some(5), 3);
        let b = key(1, 1, Some(5), 3);
        assert!(!cmp(&a, &b) && !cmp(&b, &a));

        let mut builder = BatchBuilder::new();
        builder.push(a, draw(1, 1, Some(5), 3));
        builder.push(b, draw(1, 1, Some(5), 3));
        let batches = builder.build();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].draws.len(), 2);
    }

    #[test]
    fn same_material_and_buffers_differing_only_by_instance_share_a_batch() {
        // Two opaque submeshes, same material + vertex buffer, different
        // per-instance id: one batch, two draw entries that differ only in
        // their mesh descriptor binding.
        let mut builder = BatchBuilder::new();
        builder.push(key(4, 9, Some(2), 10), draw(4, 9, Some(2), 10));
        builder.push(key(4, 9, Some(2), 11), draw(4, 9, Some(2), 11));

        let batches = builder.build();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].draws.len(), 2);
        assert_ne!(
            batches[0].draws[0].mesh_bind_group,
            batches[0].draws[1].mesh_bind_group
        );
        assert_eq!(batches[0].draws[0].record, batches[0].draws[1].record);
    }

    #[test]
    fn batch_breaks_on_material_vertex_or_index_change() {
        let mut builder = BatchBuilder::new();
        builder.push(key(1, 1, Some(1), 1), draw(1, 1, Some(1), 1));
        builder.push(key(1, 1, None, 2), draw(1, 1, None, 2));
        builder.push(key(1, 2, Some(1), 3), draw(1, 2, Some(1), 3));
        builder.push(key(2, 1, Some(1), 4), draw(2, 1, Some(1), 4));

        let batches = builder.build();
        assert_eq!(batches.len(), 4);
    }

    #[test]
    fn order_is_deterministic_regardless_of_submission_order() {
        let entries = [
            (key(2, 1, Some(1), 4), draw(2, 1, Some(1), 4)),
            (key(1, 2, Some(1), 3), draw(1, 2, Some(1), 3)),
            (key(1, 1, None, 2), draw(1, 1, None, 2)),
            (key(1, 1, Some(1), 1), draw(1, 1, Some(1), 1)),
        ];

        let mut forward = BatchBuilder::new();
        for (k, d) in entries {
            forward.push(k, d);
        }
        let mut reverse = BatchBuilder::new();
        for (k, d) in entries.into_iter().rev() {
            reverse.push(k, d);
        }

        assert_eq!(forward.build(), reverse.build());
    }

    #[test]
    fn no_index_buffer_sorts_before_indexed() {
        let a = key(1, 1, None, 1);
        let b = key(1, 1, Some(0), 1);
        assert!(cmp(&a, &b));
    }
}
