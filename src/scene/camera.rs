//! Camera system

use glam::{Mat4, Vec3, Vec4};

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4, // 45 degrees
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        let half_w = width / 2.0;
        let half_h = height / 2.0;
        Projection::Orthographic {
            left: -half_w,
            right: half_w,
            bottom: -half_h,
            top: half_h,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        }
    }

    /// Same projection clipped to another depth range
    pub fn with_range(&self, near: f32, far: f32) -> Self {
        let mut projection = *self;
        match &mut projection {
            Projection::Perspective {
                near: n, far: f, ..
            }
            | Projection::Orthographic {
                near: n, far: f, ..
            } => {
                *n = near;
                *f = far;
            }
        }
        projection
    }

    pub fn near(&self) -> f32 {
        match self {
            Projection::Perspective { near, .. } => *near,
            Projection::Orthographic { near, .. } => *near,
        }
    }

    pub fn far(&self) -> f32 {
        match self {
            Projection::Perspective { far, .. } => *far,
            Projection::Orthographic { far, .. } => *far,
        }
    }

    /// Vertical field of view in radians, `None` for orthographic projections
    pub fn fov_y(&self) -> Option<f32> {
        match self {
            Projection::Perspective { fov_y, .. } => Some(*fov_y),
            Projection::Orthographic { .. } => None,
        }
    }

    pub fn aspect(&self) -> f32 {
        match *self {
            Projection::Perspective { aspect, .. } => aspect,
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                ..
            } => (right - left) / (top - bottom),
        }
    }
}

/// Camera for viewing the scene
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    /// Get the forward direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    /// Get the right direction
    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize()
    }

    /// Up direction orthogonal to `forward` and `right`
    pub fn true_up(&self) -> Vec3 {
        self.right().cross(self.forward())
    }

    pub fn near(&self) -> f32 {
        self.projection.near()
    }

    pub fn far(&self) -> f32 {
        self.projection.far()
    }

    /// World-space corners of the view frustum between `near` and `far`.
    ///
    /// Near plane first, then far plane, each as bottom-left, bottom-right, top-right,
    /// top-left.
    pub fn frustum_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let view_projection = self.projection.with_range(near, far).matrix() * self.view_matrix();
        let inverse = view_projection.inverse();
        // Depth range is [0, 1]
        let ndc: [(f32, f32, f32); 8] = [
            (-1.0, -1.0, 0.0),
            (1.0, -1.0, 0.0),
            (1.0, 1.0, 0.0),
            (-1.0, 1.0, 0.0),
            (-1.0, -1.0, 1.0),
            (1.0, -1.0, 1.0),
            (1.0, 1.0, 1.0),
            (-1.0, 1.0, 1.0),
        ];
        ndc.map(|(x, y, z)| {
            let corner = inverse * Vec4::new(x, y, z, 1.0);
            corner.truncate() / corner.w
        })
    }
}
