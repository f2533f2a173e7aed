//! Common utilities for render graph integration tests.
//!
//! Everything runs on the headless `DummyBackend`, which records the commands the
//! graph issues so tests can inspect them.

#![allow(dead_code)]

use framegraph_engine::backend::{
    BufferDesc, BufferUsage, DummyBackend, RecordedCommand, ResourceBarrier, ResourceHandle,
    TextureDesc, TextureFormat, TextureUsage,
};
use framegraph_engine::config::{GraphConfig, PoolConfig};
use framegraph_engine::render_graph::{
    PassFlags, PassId, PassType, ReadAccess, RenderGraph, RenderGraphContext, ResourceName,
    ResourcePool,
};
use framegraph_engine::BackendResult;

/// Install a logger that cooperates with the test harness. Safe to call repeatedly.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Graph scaffolding
// ============================================================================

pub fn new_graph() -> RenderGraph {
    RenderGraph::new(ResourcePool::shared(&PoolConfig::default()))
}

pub fn no_culling() -> GraphConfig {
    GraphConfig {
        cull_passes: false,
        ..GraphConfig::default()
    }
}

pub fn color_desc(width: u32, height: u32) -> TextureDesc {
    TextureDesc::new_2d(
        width,
        height,
        TextureFormat::Rgba16Float,
        TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
    )
}

pub fn storage_desc(size: u64) -> BufferDesc {
    BufferDesc::new(size, BufferUsage::UNORDERED_ACCESS | BufferUsage::SHADER_RESOURCE)
}

pub fn noop<D>(_: &D, _: &mut RenderGraphContext<'_>) -> BackendResult<()> {
    Ok(())
}

/// Resource names built at runtime. Leaks the string, which is fine in a test.
pub fn runtime_name(name: String) -> ResourceName {
    ResourceName::new(Box::leak(name.into_boxed_str()))
}

/// Add a compute pass that creates the textures in `creates` and reads those in `reads`.
pub fn add_texture_pass(
    graph: &mut RenderGraph,
    name: &str,
    flags: PassFlags,
    creates: &[ResourceName],
    reads: &[ResourceName],
) -> PassId {
    let creates = creates.to_vec();
    let reads = reads.to_vec();
    graph
        .add_pass(
            name,
            PassType::Compute,
            flags,
            move |_: &mut (), builder| {
                for &texture in &creates {
                    builder.create_texture(texture, color_desc(16, 16))?;
                }
                for &texture in &reads {
                    builder.read_texture(texture, ReadAccess::NonPixelShader)?;
                }
                Ok(())
            },
            noop,
        )
        .unwrap()
        .id()
}

/// Every pass reachable from `from` through successor edges
pub fn reachable(graph: &RenderGraph, from: PassId) -> Vec<PassId> {
    let mut seen = vec![false; graph.pass_count()];
    let mut stack = vec![from];
    let mut out = Vec::new();
    while let Some(pass) = stack.pop() {
        for &next in graph.adjacency(pass) {
            if !seen[next.index()] {
                seen[next.index()] = true;
                out.push(next);
                stack.push(next);
            }
        }
    }
    out
}

// ============================================================================
// Random graphs
// ============================================================================

/// Small deterministic generator so failures reproduce
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    pub fn below(&mut self, bound: u32) -> u32 {
        self.next_u32() % bound
    }
}

/// Graph where pass `i` creates texture `i` and reads a few textures of earlier passes.
///
/// Acyclic by construction.
pub fn random_dag(seed: u64, pass_count: usize) -> RenderGraph {
    let mut rng = Lcg::new(seed);
    let mut graph = new_graph();
    let names: Vec<ResourceName> = (0..pass_count)
        .map(|i| runtime_name(format!("Random{}_{}", seed, i)))
        .collect();

    for i in 0..pass_count {
        let mut reads = Vec::new();
        if i > 0 {
            for _ in 0..rng.below(4) {
                let source = names[rng.below(i as u32) as usize];
                if !reads.contains(&source) {
                    reads.push(source);
                }
            }
        }
        add_texture_pass(
            &mut graph,
            &format!("pass{}", i),
            PassFlags::empty(),
            &[names[i]],
            &reads,
        );
    }
    graph
}

// ============================================================================
// Recorded command helpers
// ============================================================================

pub fn barrier_batches(backend: &DummyBackend) -> Vec<Vec<ResourceBarrier>> {
    backend
        .commands()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::Barriers(barriers) => Some(barriers.clone()),
            _ => None,
        })
        .collect()
}

/// Every transition recorded for `resource`, as (batch index, barrier)
pub fn transitions_of(
    backend: &DummyBackend,
    resource: ResourceHandle,
) -> Vec<(usize, ResourceBarrier)> {
    barrier_batches(backend)
        .into_iter()
        .enumerate()
        .flat_map(|(batch, barriers)| {
            barriers
                .into_iter()
                .filter(move |barrier| {
                    matches!(barrier, ResourceBarrier::Transition { resource: r, .. } if *r == resource)
                })
                .map(move |barrier| (batch, barrier))
        })
        .collect()
}

pub fn count_commands(backend: &DummyBackend, pred: impl Fn(&RecordedCommand) -> bool) -> usize {
    backend.commands().iter().filter(|command| pred(command)).count()
}
