//! 上采样核心的数据类型
//!
//! `CoarseParticle` 与 `FineParticle` 都是 `#[repr(C)]` + `Pod`，
//! 可以直接按字节交给渲染端上传。

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, Vec3};

/// 体素坐标每个分量的绝对值上限（21位有符号）
pub const VOXEL_COORD_LIMIT: i32 = (1 << 20) - 1;

const KEY_BIAS: i32 = 1 << 20;
const KEY_MASK: u64 = (1 << 21) - 1;

/// 动画相位吸附到 0 或 1 的阈值
pub const PHASE_SNAP_EPSILON: f32 = 1e-4;

// ============================================================================
// 粗粒子
// ============================================================================

/// 物理求解器输出的粗粒子
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CoarseParticle {
    pub position: Vec3,
    pub radius: f32,
    pub velocity: Vec3,
    pub mass: f32,
}

impl CoarseParticle {
    pub fn new(position: Vec3, radius: f32, velocity: Vec3, mass: f32) -> Self {
        Self {
            position,
            radius,
            velocity,
            mass,
        }
    }

    /// 位置、半径、质量都是有限值且质量非负
    pub fn is_valid(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.radius.is_finite()
            && self.radius >= 0.0
            && self.mass.is_finite()
            && self.mass >= 0.0
    }
}

// ============================================================================
// 体素索引
// ============================================================================

/// 体素索引：边长为 `voxel_size` 的立方体单元
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VoxelIndex(pub IVec3);

impl VoxelIndex {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self(IVec3::new(x, y, z))
    }

    /// 计算位置所在的体素：`floor(position / voxel_size)`
    ///
    /// 超出 [`VOXEL_COORD_LIMIT`] 的坐标被截断到边界。
    pub fn from_position(position: Vec3, voxel_size: f32) -> Self {
        let cell = (position / voxel_size).floor();
        let limit = VOXEL_COORD_LIMIT as f32;
        let clamped = cell.clamp(Vec3::splat(-limit), Vec3::splat(limit));
        Self(clamped.as_ivec3())
    }

    /// 体素最小角
    pub fn min_corner(self, voxel_size: f32) -> Vec3 {
        self.0.as_vec3() * voxel_size
    }

    /// 体素中心
    pub fn center(self, voxel_size: f32) -> Vec3 {
        (self.0.as_vec3() + Vec3::splat(0.5)) * voxel_size
    }

    /// 用于排序的分量元组
    pub fn sort_key(self) -> (i32, i32, i32) {
        (self.0.x, self.0.y, self.0.z)
    }

    /// 哈希表使用的空间哈希
    pub fn spatial_hash(self) -> u64 {
        let x = (self.0.x as u32).wrapping_mul(73_856_093);
        let y = (self.0.y as u32).wrapping_mul(19_349_663);
        let z = (self.0.z as u32).wrapping_mul(83_492_791);
        u64::from(x ^ y ^ z)
    }

    /// 打包为非零的 64 位键（0 保留为空槽）
    pub(crate) fn pack(self) -> u64 {
        let axis = |v: i32| ((v.clamp(-VOXEL_COORD_LIMIT, VOXEL_COORD_LIMIT) + KEY_BIAS) as u64) & KEY_MASK;
        ((axis(self.0.x) << 42) | (axis(self.0.y) << 21) | axis(self.0.z)) + 1
    }

    /// `pack` 的逆运算
    pub(crate) fn unpack(key: u64) -> Self {
        let raw = key - 1;
        let axis = |shift: u32| ((raw >> shift) & KEY_MASK) as i32 - KEY_BIAS;
        Self::new(axis(42), axis(21), axis(0))
    }
}

impl From<IVec3> for VoxelIndex {
    fn from(index: IVec3) -> Self {
        Self(index)
    }
}

// ============================================================================
// 包围盒与体素几何
// ============================================================================

/// 轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_point(point: Vec3) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// 合并两个包围盒
    pub fn union(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// 各方向外扩
    pub fn inflate(self, amount: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// 闭区间包含测试
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// 点到盒的距离（点在盒内时为0）
    pub fn distance_to(&self, point: Vec3) -> f32 {
        point.clamp(self.min, self.max).distance(point)
    }
}

/// 体素几何：尺寸与内缩边界
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGeometry {
    pub voxel_size: f32,
    /// 内边界相对外边界的内缩量（细粒子半径）
    pub skin: f32,
}

impl VoxelGeometry {
    pub fn new(voxel_size: f32, skin: f32) -> Self {
        Self {
            voxel_size,
            skin: skin.max(0.0),
        }
    }

    /// 体素立方体
    pub fn outer_bounds(&self, index: VoxelIndex) -> Aabb {
        let min = index.min_corner(self.voxel_size);
        Aabb::new(min, min + Vec3::splat(self.voxel_size))
    }

    /// 去掉边界层后的内部区域；内缩量超过半个体素时退化为中心点
    pub fn inner_bounds(&self, index: VoxelIndex) -> Aabb {
        let outer = self.outer_bounds(index);
        let skin = self.skin.min(self.voxel_size * 0.5);
        Aabb::new(outer.min + Vec3::splat(skin), outer.max - Vec3::splat(skin))
    }
}

impl Default for VoxelGeometry {
    fn default() -> Self {
        Self::new(0.5, 0.0)
    }
}

// ============================================================================
// 体素条目
// ============================================================================

/// 哈希表条目的只读快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelEntry {
    pub index: VoxelIndex,
    /// 剩余可生成的细粒子数（可能为负，表示超额）
    pub room: i32,
    /// 质量加权平均位置
    pub position: Vec3,
    /// 沉积到该体素的总质量
    pub original_mass: f32,
    /// 质量加权平均速度
    pub velocity: Vec3,
    pub min_bound: Vec3,
    pub max_bound: Vec3,
    pub inner_min_bound: Vec3,
    pub inner_max_bound: Vec3,
}

impl VoxelEntry {
    /// 剩余质量预算
    pub fn room_mass(&self, fine_mass: f32) -> f32 {
        self.room.max(0) as f32 * fine_mass
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.min_bound, self.max_bound)
    }

    pub fn inner_bounds(&self) -> Aabb {
        Aabb::new(self.inner_min_bound, self.inner_max_bound)
    }
}

// ============================================================================
// 细粒子
// ============================================================================

/// 细粒子生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleState {
    /// 正在出现或已完全出现
    Spawning,
    /// 正在消失，相位归零后被压缩移除
    Despawning,
}

const STATE_SPAWNING: u32 = 0;
const STATE_DESPAWNING: u32 = 1;

/// 仅用于显示的细粒子
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct FineParticle {
    pub position: Vec3,
    pub mass: f32,
    /// 0 = 刚生成/完全消失，1 = 完全长成
    pub animation_phase: f32,
    pub owner_voxel: VoxelIndex,
    state: u32,
}

impl FineParticle {
    /// 新生成的粒子：相位为0，归属体素由位置决定
    pub fn spawn(position: Vec3, mass: f32, voxel_size: f32) -> Self {
        Self {
            position,
            mass,
            animation_phase: 0.0,
            owner_voxel: VoxelIndex::from_position(position, voxel_size),
            state: STATE_SPAWNING,
        }
    }

    pub fn state(&self) -> ParticleState {
        if self.state == STATE_DESPAWNING {
            ParticleState::Despawning
        } else {
            ParticleState::Spawning
        }
    }

    pub fn is_despawning(&self) -> bool {
        self.state == STATE_DESPAWNING
    }

    /// 标记为消失；不可撤销
    pub fn mark_despawning(&mut self) {
        self.state = STATE_DESPAWNING;
    }

    /// 已完全消失，下一次压缩时移除
    pub fn is_expired(&self) -> bool {
        self.is_despawning() && self.animation_phase <= 0.0
    }

    /// 按状态推进动画相位，结果限制在 [0, 1]
    pub fn advance_phase(&mut self, ease_step: f32) {
        let next = match self.state() {
            ParticleState::Spawning => self.animation_phase + ease_step,
            ParticleState::Despawning => self.animation_phase - ease_step,
        };
        self.animation_phase = if next <= PHASE_SNAP_EPSILON {
            0.0
        } else if next >= 1.0 - PHASE_SNAP_EPSILON {
            1.0
        } else {
            next
        };
    }

    /// 渲染可见度，0 = 不可见，1 = 完整尺寸
    pub fn visibility(&self) -> f32 {
        ease(self.animation_phase)
    }

    /// 重新计算归属体素
    pub fn revalidate_owner(&mut self, voxel_size: f32) {
        self.owner_voxel = VoxelIndex::from_position(self.position, voxel_size);
    }
}

/// 单调缓动函数（smoothstep）
pub fn ease(phase: f32) -> f32 {
    let t = phase.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
