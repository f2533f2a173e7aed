//! Logical resources for the render graph

use std::fmt;
use std::hash::{Hash, Hasher};

/// Unique identifier for a render graph resource
///
/// Identity only: two ids are equal when their values are equal. Ids are never reused,
/// not even after [`RenderGraph::clear`](crate::render_graph::RenderGraph::clear).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

impl ResourceId {
    pub const INVALID: Self = Self(u32::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Logical texture id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TextureId(pub(crate) ResourceId);

/// Logical buffer id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BufferId(pub(crate) ResourceId);

impl TextureId {
    pub const INVALID: Self = Self(ResourceId::INVALID);

    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    pub fn resource_id(&self) -> ResourceId {
        self.0
    }
}

impl BufferId {
    pub const INVALID: Self = Self(ResourceId::INVALID);

    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    pub fn resource_id(&self) -> ResourceId {
        self.0
    }
}

/// Kind of logical resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Texture => write!(f, "texture"),
            ResourceKind::Buffer => write!(f, "buffer"),
        }
    }
}

/// 64-bit FNV-1a, usable in constant expressions
pub const fn fnv1a(name: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let bytes = name.as_bytes();
    let mut hash = OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(PRIME);
        i += 1;
    }
    hash
}

/// Name used to look up a resource declared by one pass and consumed by another
///
/// Equality and hashing only look at the hash. A collision is a bug in the naming scheme.
#[derive(Clone, Copy)]
pub struct ResourceName {
    name: &'static str,
    hash: u64,
}

impl ResourceName {
    pub const INVALID_HASH: u64 = u64::MAX;

    /// Hash `name` with [`fnv1a`]; usable in `const` items.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            hash: fnv1a(name),
        }
    }

    /// Pair `name` with a hash computed by the caller.
    pub const fn with_hash(name: &'static str, hash: u64) -> Self {
        Self { name, hash }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn is_valid(&self) -> bool {
        self.hash != Self::INVALID_HASH
    }
}

impl Default for ResourceName {
    fn default() -> Self {
        Self::with_hash("", Self::INVALID_HASH)
    }
}

impl PartialEq for ResourceName {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for ResourceName {}

impl Hash for ResourceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceName({:?})", self.name)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl From<&'static str> for ResourceName {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

/// A resource id paired with the index of one of its views
///
/// Packed as `view_id << 32 | resource_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(u64);

impl DescriptorId {
    pub const INVALID: Self = Self(u64::MAX);

    pub fn new(view_id: u32, resource: ResourceId) -> Self {
        Self(((view_id as u64) << 32) | resource.0 as u64)
    }

    pub fn view_id(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn resource_id(&self) -> ResourceId {
        ResourceId(self.0 as u32)
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    pub fn packed(&self) -> u64 {
        self.0
    }
}

impl Default for DescriptorId {
    fn default() -> Self {
        Self::INVALID
    }
}

macro_rules! descriptor_id {
    ($(#[$meta:meta])* $name:ident => $resource:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub(crate) DescriptorId);

        impl $name {
            pub(crate) fn new(view_id: u32, resource: $resource) -> Self {
                Self(DescriptorId::new(view_id, resource.0))
            }

            pub fn resource(&self) -> $resource {
                $resource(self.0.resource_id())
            }

            pub fn view_id(&self) -> u32 {
                self.0.view_id()
            }

            pub fn descriptor(&self) -> DescriptorId {
                self.0
            }

            pub fn is_valid(&self) -> bool {
                self.0.is_valid()
            }
        }
    };
}

descriptor_id!(
    /// Texture bound as a color render target
    RenderTargetId => TextureId
);
descriptor_id!(
    /// Texture bound as a depth-stencil target
    DepthStencilId => TextureId
);
descriptor_id!(
    /// Texture read through a shader-resource view
    TextureReadOnlyId => TextureId
);
descriptor_id!(
    /// Texture written through an unordered-access view
    TextureReadWriteId => TextureId
);
descriptor_id!(
    /// Buffer read through a shader-resource view
    BufferReadOnlyId => BufferId
);
descriptor_id!(
    /// Buffer written through an unordered-access view
    BufferReadWriteId => BufferId
);

/// Subresource range of a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewDesc {
    pub first_mip: u32,
    pub mip_count: u32,
    pub first_slice: u32,
    pub slice_count: u32,
}

impl Default for TextureViewDesc {
    fn default() -> Self {
        Self {
            first_mip: 0,
            mip_count: u32::MAX,
            first_slice: 0,
            slice_count: u32::MAX,
        }
    }
}

/// Byte range of a buffer view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferViewDesc {
    pub offset: u64,
    pub size: u64,
}

impl Default for BufferViewDesc {
    fn default() -> Self {
        Self {
            offset: 0,
            size: u64::MAX,
        }
    }
}

/// What happens to an attachment's contents when a pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoadAccessOp {
    Discard = 0,
    Preserve = 1,
    Clear = 2,
    NoAccess = 3,
}

/// What happens to an attachment's contents when a pass ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StoreAccessOp {
    Discard = 0,
    Preserve = 1,
    Resolve = 2,
    NoAccess = 3,
}

impl LoadAccessOp {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => LoadAccessOp::Discard,
            1 => LoadAccessOp::Preserve,
            2 => LoadAccessOp::Clear,
            _ => LoadAccessOp::NoAccess,
        }
    }
}

impl StoreAccessOp {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => StoreAccessOp::Discard,
            1 => StoreAccessOp::Preserve,
            2 => StoreAccessOp::Resolve,
            _ => StoreAccessOp::NoAccess,
        }
    }
}

/// Load and store op of one attachment, packed into a byte as `load << 2 | store`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadStoreAccessOp(u8);

impl LoadStoreAccessOp {
    pub const DISCARD_DISCARD: Self = Self::new(LoadAccessOp::Discard, StoreAccessOp::Discard);
    pub const DISCARD_PRESERVE: Self = Self::new(LoadAccessOp::Discard, StoreAccessOp::Preserve);
    pub const CLEAR_PRESERVE: Self = Self::new(LoadAccessOp::Clear, StoreAccessOp::Preserve);
    pub const CLEAR_DISCARD: Self = Self::new(LoadAccessOp::Clear, StoreAccessOp::Discard);
    pub const CLEAR_RESOLVE: Self = Self::new(LoadAccessOp::Clear, StoreAccessOp::Resolve);
    pub const PRESERVE_PRESERVE: Self = Self::new(LoadAccessOp::Preserve, StoreAccessOp::Preserve);
    pub const PRESERVE_DISCARD: Self = Self::new(LoadAccessOp::Preserve, StoreAccessOp::Discard);
    pub const PRESERVE_RESOLVE: Self = Self::new(LoadAccessOp::Preserve, StoreAccessOp::Resolve);
    pub const NO_ACCESS_NO_ACCESS: Self = Self::new(LoadAccessOp::NoAccess, StoreAccessOp::NoAccess);

    pub const fn new(load: LoadAccessOp, store: StoreAccessOp) -> Self {
        Self(((load as u8) << 2) | store as u8)
    }

    pub fn load(&self) -> LoadAccessOp {
        LoadAccessOp::from_bits(self.0 >> 2)
    }

    pub fn store(&self) -> StoreAccessOp {
        StoreAccessOp::from_bits(self.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl fmt::Debug for LoadStoreAccessOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}_{:?}", self.load(), self.store())
    }
}
