//! Scoped depth-target binding for shadow rendering

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shadow::cascade::CascadeState;

/// State a shadow map rests in between frames
pub const SHADOW_MAP_READ_STATE: ResourceState = ResourceState::PIXEL_SHADER_RESOURCE;

/// Binds a cascade's shadow map as the depth target for as long as it lives.
///
/// Creating the scope saves the viewport, scissor and rasterizer state, binds and clears
/// the depth target and installs a cascade-sized viewport. Dropping it unbinds the
/// target and puts the saved state back, also when rendering bailed out early with `?`.
pub struct ShadowMapScope<'a> {
    backend: &'a mut dyn RenderBackend,
    state: Option<&'a mut CascadeState>,
    target: TextureHandle,
    cascade: usize,
    transitions: bool,
    saved_viewport: Viewport,
    saved_scissor: ScissorRect,
    saved_rasterizer: RasterizerState,
}

impl<'a> ShadowMapScope<'a> {
    /// Bind `target` without touching its resource state.
    ///
    /// For use inside a render graph pass, where the graph already moved the texture
    /// into `DEPTH_WRITE`.
    pub fn begin(
        backend: &'a mut dyn RenderBackend,
        target: TextureHandle,
        resolution: u32,
        cascade: usize,
    ) -> Self {
        Self::begin_impl(backend, None, target, resolution, cascade, false)
    }

    /// Used by the shadow mapper, which owns the texture's state outside the graph.
    pub(crate) fn begin_tracked(
        backend: &'a mut dyn RenderBackend,
        state: &'a mut CascadeState,
        target: TextureHandle,
        resolution: u32,
        cascade: usize,
    ) -> Self {
        Self::begin_impl(backend, Some(state), target, resolution, cascade, true)
    }

    fn begin_impl(
        backend: &'a mut dyn RenderBackend,
        mut state: Option<&'a mut CascadeState>,
        target: TextureHandle,
        resolution: u32,
        cascade: usize,
        transitions: bool,
    ) -> Self {
        let saved_viewport = backend.viewport();
        let saved_scissor = backend.scissor_rect();
        let saved_rasterizer = backend.rasterizer_state();

        if transitions {
            backend.resource_barriers(&[ResourceBarrier::Transition {
                resource: ResourceHandle::Texture(target),
                before: SHADOW_MAP_READ_STATE,
                after: ResourceState::DEPTH_WRITE,
            }]);
        }
        backend.set_render_targets(&[], Some(target));
        backend.clear_depth_stencil(target, 1.0, 0);
        backend.set_viewport(Viewport::from_size(resolution, resolution));
        backend.set_scissor_rect(ScissorRect::from_size(resolution, resolution));
        backend.set_rasterizer_state(RasterizerState::shadow_map());

        if let Some(state) = state.as_deref_mut() {
            *state = CascadeState::Rendering;
        }
        log::trace!("Rendering to shadow cascade {}", cascade);

        Self {
            backend,
            state,
            target,
            cascade,
            transitions,
            saved_viewport,
            saved_scissor,
            saved_rasterizer,
        }
    }

    /// Backend with the cascade's depth target bound
    pub fn backend(&mut self) -> &mut dyn RenderBackend {
        &mut *self.backend
    }

    pub fn cascade(&self) -> usize {
        self.cascade
    }

    pub fn target(&self) -> TextureHandle {
        self.target
    }

    /// End rendering to the cascade. Same as dropping the scope.
    pub fn stop(self) {}
}

impl Drop for ShadowMapScope<'_> {
    fn drop(&mut self) {
        self.backend.unbind_render_targets();
        if self.transitions {
            self.backend.resource_barriers(&[ResourceBarrier::Transition {
                resource: ResourceHandle::Texture(self.target),
                before: ResourceState::DEPTH_WRITE,
                after: SHADOW_MAP_READ_STATE,
            }]);
        }
        self.backend.set_viewport(self.saved_viewport);
        self.backend.set_scissor_rect(self.saved_scissor);
        self.backend.set_rasterizer_state(self.saved_rasterizer);
        if let Some(state) = self.state.as_deref_mut() {
            *state = CascadeState::Idle;
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};

    #[test]
    fn test_scope_restores_state_on_drop() {
        let mut backend = DummyBackend::new();
        backend.set_viewport(Viewport::from_size(1280, 720));
        backend.set_scissor_rect(ScissorRect::from_size(1280, 720));

        {
            let mut scope = ShadowMapScope::begin(&mut backend, TextureHandle(9), 512, 0);
            assert_eq!(scope.backend().viewport(), Viewport::from_size(512, 512));
            assert_eq!(scope.backend().rasterizer_state(), RasterizerState::shadow_map());
        }

        assert_eq!(backend.viewport(), Viewport::from_size(1280, 720));
        assert_eq!(backend.scissor_rect(), ScissorRect::from_size(1280, 720));
        assert_eq!(backend.rasterizer_state(), RasterizerState::default());
    }

    #[test]
    fn test_untracked_scope_emits_no_barriers() {
        let mut backend = DummyBackend::new();
        ShadowMapScope::begin(&mut backend, TextureHandle(9), 256, 1).stop();
        let commands = backend.take_commands();
        assert!(!commands
            .iter()
            .any(|command| matches!(command, RecordedCommand::Barriers(_))));
        assert!(commands.contains(&RecordedCommand::ClearDepthStencil(TextureHandle(9))));
        assert!(commands.contains(&RecordedCommand::UnbindRenderTargets));
    }

    #[test]
    fn test_tracked_scope_moves_cascade_state() {
        let mut backend = DummyBackend::new();
        let mut state = CascadeState::Configured;
        {
            let scope =
                ShadowMapScope::begin_tracked(&mut backend, &mut state, TextureHandle(3), 256, 2);
            assert_eq!(scope.cascade(), 2);
        }
        assert_eq!(state, CascadeState::Idle);

        let barriers: Vec<_> = backend
            .commands()
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Barriers(barriers) => Some(barriers.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(barriers.len(), 2);
        assert_eq!(
            barriers[1],
            vec![ResourceBarrier::Transition {
                resource: ResourceHandle::Texture(TextureHandle(3)),
                before: ResourceState::DEPTH_WRITE,
                after: SHADOW_MAP_READ_STATE,
            }]
        );
    }
}
