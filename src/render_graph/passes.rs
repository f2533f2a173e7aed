//! Reusable passes

use crate::render_graph::graph::{GraphError, RenderGraph};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;

#[derive(Debug, Default)]
pub struct BufferClearData {
    pub buffer: BufferReadWriteId,
    pub value: u32,
}

/// Fill a graph buffer with `value` through an unordered-access view.
pub fn add_buffer_clear_pass(
    graph: &mut RenderGraph,
    name: &str,
    buffer: ResourceName,
    value: u32,
) -> Result<PassHandle<BufferClearData>, GraphError> {
    graph.add_pass(
        name,
        PassType::Compute,
        PassFlags::ALLOW_UAV_WRITES,
        |data: &mut BufferClearData, builder| {
            data.buffer = builder.write_buffer(buffer)?;
            data.value = value;
            Ok(())
        },
        |data, ctx| {
            let (handle, _) = ctx.read_write_buffer(data.buffer);
            ctx.backend().clear_buffer_uint(handle, data.value);
            Ok(())
        },
    )
}

#[derive(Debug, Default)]
pub struct CopyData {
    pub src: TextureId,
    pub dst: TextureId,
}

/// Copy the whole of `src` into `dst`.
pub fn add_copy_pass(
    graph: &mut RenderGraph,
    name: &str,
    src: ResourceName,
    dst: ResourceName,
) -> Result<PassHandle<CopyData>, GraphError> {
    graph.add_pass(
        name,
        PassType::Copy,
        PassFlags::empty(),
        |data: &mut CopyData, builder| {
            data.src = builder.read_copy_src_texture(src)?;
            data.dst = builder.write_copy_dst_texture(dst)?;
            Ok(())
        },
        |data, ctx| {
            let src = ctx.texture(data.src);
            let dst = ctx.texture(data.dst);
            ctx.backend().copy_texture(src, dst);
            Ok(())
        },
    )
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use crate::backend::traits::*;
    use crate::backend::types::*;
    use crate::config::{GraphConfig, PoolConfig};
    use crate::render_graph::pool::ResourcePool;
    use crate::scene::Scene;

    const COUNTERS: ResourceName = ResourceName::new("Counters");
    const HDR: ResourceName = ResourceName::new("Hdr");
    const HDR_COPY: ResourceName = ResourceName::new("HdrCopy");

    #[test]
    fn test_buffer_clear_pass() {
        let mut graph = RenderGraph::new(ResourcePool::shared(&PoolConfig::default()));
        graph
            .import_buffer(
                COUNTERS,
                BufferHandle(7),
                BufferDesc::new(64, BufferUsage::UNORDERED_ACCESS),
                ResourceState::COMMON,
            )
            .unwrap();
        let handle = add_buffer_clear_pass(&mut graph, "clear counters", COUNTERS, 0).unwrap();
        graph.build(&GraphConfig::default()).unwrap();

        let mut backend = DummyBackend::new();
        graph.execute(&mut backend, &Scene::default()).unwrap();

        assert_eq!(graph.pass_data(handle).unwrap().value, 0);
        assert!(backend
            .commands()
            .contains(&RecordedCommand::ClearBuffer(BufferHandle(7), 0)));
    }

    #[test]
    fn test_copy_pass() {
        let mut graph = RenderGraph::new(ResourcePool::shared(&PoolConfig::default()));
        let desc = TextureDesc::new_2d(
            16,
            16,
            TextureFormat::Rgba16Float,
            TextureUsage::COPY_SRC | TextureUsage::COPY_DST,
        );
        graph
            .import_texture(HDR, TextureHandle(20), desc.clone(), ResourceState::COMMON)
            .unwrap();
        graph
            .import_texture(HDR_COPY, TextureHandle(21), desc, ResourceState::COMMON)
            .unwrap();
        add_copy_pass(&mut graph, "copy hdr", HDR, HDR_COPY).unwrap();
        graph.build(&GraphConfig::default()).unwrap();

        let mut backend = DummyBackend::new();
        graph.execute(&mut backend, &Scene::default()).unwrap();

        assert!(backend.commands().contains(&RecordedCommand::CopyTexture(
            TextureHandle(20),
            TextureHandle(21)
        )));
    }
}
