//! Cascade fitting
//!
//! Every cascade covers one slice of the camera's view distance with an orthographic
//! projection looking down the light direction.

use crate::backend::traits::TextureHandle;
use crate::scene::{Camera, DirectionalLight};
use glam::{Mat4, Vec3};

/// Extra depth in front of a fitted box so casters between the light and the slice
/// still land in the map
pub const CASTER_DEPTH_MARGIN: f32 = 10.0;

/// How a cascade's light projection is fitted around its camera slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CascadeFitMode {
    /// Orthographic cube around a sphere bounding the slice.
    ///
    /// The sphere does not change size when the camera turns, which together with
    /// texel snapping keeps shadow edges from shimmering.
    #[default]
    BoundingSphere,
    /// Tightest light-space box around the slice's eight corners
    FrustumSlice,
}

/// Per-cascade lifecycle within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CascadeState {
    #[default]
    Idle,
    /// Light matrices are up to date
    Configured,
    /// Bound as the active depth target
    Rendering,
}

/// One shadow map slice
#[derive(Debug, Clone)]
pub struct Cascade {
    pub(crate) texture: TextureHandle,
    pub(crate) state: CascadeState,
    near: f32,
    far: f32,
    view: Mat4,
    projection: Mat4,
    camera_view_projection: Mat4,
    light_position: Vec3,
    radius: f32,
}

impl Cascade {
    pub(crate) fn new(texture: TextureHandle) -> Self {
        Self {
            texture,
            state: CascadeState::Idle,
            near: 0.0,
            far: 0.0,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_view_projection: Mat4::IDENTITY,
            light_position: Vec3::ZERO,
            radius: 0.0,
        }
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn state(&self) -> CascadeState {
        self.state
    }

    /// Camera distance where the slice starts
    pub fn near(&self) -> f32 {
        self.near
    }

    /// Camera distance where the slice ends
    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// The camera's own view-projection clipped to this slice
    pub fn camera_view_projection(&self) -> Mat4 {
        self.camera_view_projection
    }

    /// World-space position of the light projector
    pub fn light_position(&self) -> Vec3 {
        self.light_position
    }

    /// Radius of the bounding sphere, zero for box-fitted cascades
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Refit the cascade to the camera slice `near..far`.
    pub(crate) fn fit(
        &mut self,
        camera: &Camera,
        light: &DirectionalLight,
        near: f32,
        far: f32,
        fit: CascadeFit,
    ) {
        self.near = near;
        self.far = far;
        self.camera_view_projection =
            camera.projection.with_range(near, far).matrix() * camera.view_matrix();

        match fit.mode {
            CascadeFitMode::BoundingSphere => {
                let (center, radius) = bounding_sphere(camera, near, far);
                let position = if fit.stabilize {
                    snap_to_texels(center, light, radius, fit.resolution)
                } else {
                    center
                };
                self.light_position = position;
                self.radius = radius;
                self.view = Mat4::look_to_rh(position, light.direction, light.up);
                self.projection =
                    Mat4::orthographic_rh(-radius, radius, -radius, radius, -radius, radius);
            }
            CascadeFitMode::FrustumSlice => {
                let corners = camera.frustum_corners(near, far);
                let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
                let view = Mat4::look_to_rh(center, light.direction, light.up);

                let mut min = Vec3::splat(f32::MAX);
                let mut max = Vec3::splat(f32::MIN);
                for corner in corners {
                    let corner = view.transform_point3(corner);
                    min = min.min(corner);
                    max = max.max(corner);
                }

                self.light_position = center;
                self.radius = 0.0;
                self.view = view;
                // View space looks down -Z, so the nearest corner has the largest z.
                self.projection = Mat4::orthographic_rh(
                    min.x,
                    max.x,
                    min.y,
                    max.y,
                    -max.z - CASTER_DEPTH_MARGIN,
                    -min.z,
                );
            }
        }
        self.state = CascadeState::Configured;
    }
}

/// Fitting options shared by all cascades of one update
#[derive(Debug, Clone, Copy)]
pub(crate) struct CascadeFit {
    pub mode: CascadeFitMode,
    pub stabilize: bool,
    pub resolution: u32,
}

/// Sphere enclosing the camera frustum between `near` and `far`.
///
/// For perspective cameras the radius only depends on the field of view, the aspect
/// ratio and the range, never on where the camera looks.
pub fn bounding_sphere(camera: &Camera, near: f32, far: f32) -> (Vec3, f32) {
    let Some(fov_y) = camera.projection.fov_y() else {
        let corners = camera.frustum_corners(near, far);
        let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
        let radius = corners
            .iter()
            .map(|corner| corner.distance(center))
            .fold(0.0, f32::max);
        return (center, radius);
    };

    let forward = camera.forward();
    let right = camera.right();
    let up = camera.true_up();
    let tan_y = (fov_y * 0.5).tan();
    let tan_x = camera.projection.aspect() * tan_y;

    let center = camera.position + forward * (0.5 * (near + far));
    let corner_dir = forward + right * tan_x + up * tan_y;
    let near_corner = camera.position + corner_dir * near;
    let far_corner = camera.position + corner_dir * far;
    let radius = near_corner.distance(center).max(far_corner.distance(center));
    (center, radius)
}

/// Move `position` onto the light-space texel grid of a map of `resolution` texels
/// spanning `2 * radius` world units.
///
/// Only x and y are snapped, the depth axis is left alone.
pub fn snap_to_texels(position: Vec3, light: &DirectionalLight, radius: f32, resolution: u32) -> Vec3 {
    if radius <= 0.0 {
        return position;
    }
    let texel_base = texel_basis(light, radius, resolution);
    let mut texel = texel_base.transform_point3(position);
    texel.x = texel.x.floor();
    texel.y = texel.y.floor();
    texel_base.inverse().transform_point3(texel)
}

/// Light basis scaled so one unit is one shadow map texel
pub fn texel_basis(light: &DirectionalLight, radius: f32, resolution: u32) -> Mat4 {
    let texels_per_unit = resolution as f32 / (2.0 * radius);
    Mat4::from_scale(Vec3::splat(texels_per_unit))
        * Mat4::look_to_rh(Vec3::ZERO, light.direction, light.up)
}
