//! 体素空间哈希表
//!
//! 固定容量、开放寻址（线性探测）。每个槽的键是一个 `AtomicU64`，
//! 0 表示空槽，占用通过一次 CAS 完成，因此插入、累加和查找都不需要锁，
//! 可以在 rayon 的并行通道中直接使用。
//!
//! 容量只在两步之间（持有 `&mut self` 时）变化，通道内不会重新分配。

use super::types::{VoxelEntry, VoxelGeometry, VoxelIndex};
use crate::performance::{AtomicF32, LockFreeFlag};
use glam::Vec3;
use rayon::prelude::*;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

/// 活动体素缓冲区的初始大小，哈希表初始容量为其两倍
pub const INITIAL_VOXEL_BUFFER_SIZE: usize = 128;

const EMPTY_KEY: u64 = 0;

/// 哈希表槽
#[derive(Debug, Default)]
struct Slot {
    key: AtomicU64,
    mass: AtomicF32,
    weight: AtomicF32,
    weighted_position: [AtomicF32; 3],
    weighted_velocity: [AtomicF32; 3],
    room: AtomicI32,
}

impl Slot {
    fn reset(&self) {
        self.key.store(EMPTY_KEY, Ordering::Relaxed);
        self.mass.store(0.0);
        self.weight.store(0.0);
        for axis in 0..3 {
            self.weighted_position[axis].store(0.0);
            self.weighted_velocity[axis].store(0.0);
        }
        self.room.store(0, Ordering::Relaxed);
    }

    fn occupied_key(&self) -> Option<u64> {
        match self.key.load(Ordering::Acquire) {
            EMPTY_KEY => None,
            key => Some(key),
        }
    }

    fn accumulate(&self, weight: f32, position: Vec3, velocity: Vec3) {
        self.weight.fetch_add(weight);
        let position = position * weight;
        let velocity = velocity * weight;
        for axis in 0..3 {
            self.weighted_position[axis].fetch_add(position[axis]);
            self.weighted_velocity[axis].fetch_add(velocity[axis]);
        }
    }

    fn copy_payload(&self, other: &Slot) {
        self.mass.store(other.mass.load());
        self.weight.store(other.weight.load());
        for axis in 0..3 {
            self.weighted_position[axis].store(other.weighted_position[axis].load());
            self.weighted_velocity[axis].store(other.weighted_velocity[axis].load());
        }
        self.room.store(other.room.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    fn weighted(values: &[AtomicF32; 3]) -> Vec3 {
        Vec3::new(values[0].load(), values[1].load(), values[2].load())
    }

    fn velocity(&self) -> Vec3 {
        let weight = self.weight.load();
        if weight > 0.0 {
            Self::weighted(&self.weighted_velocity) / weight
        } else {
            Vec3::ZERO
        }
    }
}

/// 认领体素余量的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomClaim {
    /// 体素本步不存在
    Missing,
    /// 成功占用一个细粒子名额
    Claimed,
    /// 体素已无余量
    Exhausted,
}

/// 体素空间哈希表
#[derive(Debug)]
pub struct SpatialHashTable {
    slots: Vec<Slot>,
    occupied: AtomicUsize,
    overflow: LockFreeFlag,
    geometry: VoxelGeometry,
}

impl SpatialHashTable {
    /// 创建指定容量的哈希表
    pub fn new(capacity: usize, geometry: VoxelGeometry) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
            occupied: AtomicUsize::new(0),
            overflow: LockFreeFlag::new(false),
            geometry,
        }
    }

    /// 以默认初始容量（`2 × INITIAL_VOXEL_BUFFER_SIZE`）创建
    pub fn with_initial_capacity(geometry: VoxelGeometry) -> Self {
        Self::new(2 * INITIAL_VOXEL_BUFFER_SIZE, geometry)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 已占用槽数
    pub fn len(&self) -> usize {
        self.occupied.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn geometry(&self) -> VoxelGeometry {
        self.geometry
    }

    pub fn set_geometry(&mut self, geometry: VoxelGeometry) {
        self.geometry = geometry;
    }

    /// 上一步是否有沉积因表满被丢弃
    pub fn needs_growth(&self) -> bool {
        self.overflow.get()
    }

    /// 并行清空所有槽
    pub fn clear(&self) {
        self.slots.par_iter().for_each(Slot::reset);
        self.occupied.store(0, Ordering::Relaxed);
        self.overflow.set(false);
    }

    fn start_slot(&self, index: VoxelIndex) -> usize {
        (index.spatial_hash() % self.slots.len() as u64) as usize
    }

    fn find(&self, index: VoxelIndex) -> Option<&Slot> {
        let key = index.pack();
        let capacity = self.slots.len();
        let start = self.start_slot(index);
        for probe in 0..capacity {
            let slot = &self.slots[(start + probe) % capacity];
            match slot.key.load(Ordering::Acquire) {
                EMPTY_KEY => return None,
                existing if existing == key => return Some(slot),
                _ => {}
            }
        }
        None
    }

    fn find_or_claim(&self, index: VoxelIndex) -> Option<&Slot> {
        let key = index.pack();
        let capacity = self.slots.len();
        let start = self.start_slot(index);
        for probe in 0..capacity {
            let slot = &self.slots[(start + probe) % capacity];
            match slot
                .key
                .compare_exchange(EMPTY_KEY, key, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.occupied.fetch_add(1, Ordering::Relaxed);
                    return Some(slot);
                }
                Err(existing) if existing == key => return Some(slot),
                Err(_) => {}
            }
        }
        self.overflow.set(true);
        None
    }

    /// 插入空条目（已存在时不做任何事）
    ///
    /// 表满时返回`false`并设置扩容标志。
    pub fn insert(&self, index: VoxelIndex) -> bool {
        self.find_or_claim(index).is_some()
    }

    /// 查找或创建条目并原子累加质量、质量加权位置与速度
    ///
    /// 表满时丢弃这次沉积，返回`false`并设置扩容标志。
    pub fn deposit(&self, index: VoxelIndex, mass: f32, position: Vec3, velocity: Vec3) -> bool {
        match self.find_or_claim(index) {
            Some(slot) => {
                slot.mass.fetch_add(mass);
                slot.accumulate(mass, position, velocity);
                true
            }
            None => false,
        }
    }

    /// 只累加位置与速度（按 `weight` 加权），不增加质量预算
    ///
    /// 用于粗粒子影响到但不包含其中心的相邻体素。
    pub fn deposit_motion(&self, index: VoxelIndex, weight: f32, position: Vec3, velocity: Vec3) -> bool {
        match self.find_or_claim(index) {
            Some(slot) => {
                slot.accumulate(weight, position, velocity);
                true
            }
            None => false,
        }
    }

    /// 只读查找
    pub fn lookup(&self, index: VoxelIndex) -> Option<VoxelEntry> {
        self.find(index).map(|slot| self.entry(index, slot))
    }

    /// 只取速度，运动积分时使用
    pub fn velocity(&self, index: VoxelIndex) -> Option<Vec3> {
        self.find(index).map(Slot::velocity)
    }

    pub fn contains(&self, index: VoxelIndex) -> bool {
        self.find(index).is_some()
    }

    /// 将体素余量设为 `room`
    pub fn set_room(&self, index: VoxelIndex, room: i32) -> bool {
        match self.find(index) {
            Some(slot) => {
                slot.room.store(room, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// 原子地占用一个细粒子名额
    pub fn claim_room(&self, index: VoxelIndex) -> RoomClaim {
        let Some(slot) = self.find(index) else {
            return RoomClaim::Missing;
        };
        if slot.room.fetch_sub(1, Ordering::Relaxed) > 0 {
            RoomClaim::Claimed
        } else {
            RoomClaim::Exhausted
        }
    }

    /// 取走体素的全部剩余名额（余量置0），返回取走的数量
    pub fn take_room(&self, index: VoxelIndex) -> usize {
        self.find(index)
            .map(|slot| slot.room.swap(0, Ordering::Relaxed).max(0) as usize)
            .unwrap_or(0)
    }

    /// 当前所有已占用的体素索引（无序）
    pub fn occupied_indices(&self) -> Vec<VoxelIndex> {
        self.slots
            .par_iter()
            .filter_map(|slot| slot.occupied_key().map(VoxelIndex::unpack))
            .collect()
    }

    /// 容量翻倍并重新散列所有已占用条目
    pub fn grow(&mut self) {
        let new_capacity = self.capacity() * 2;
        self.resize(new_capacity);
    }

    /// 倍增直到容量不少于活动体素数的两倍
    ///
    /// # 返回
    ///
    /// 如果发生了扩容返回`true`。
    pub fn reserve_for(&mut self, active_voxels: usize) -> bool {
        let required = Self::required_capacity(self.capacity(), active_voxels);
        if required == self.capacity() {
            return false;
        }
        self.resize(required);
        true
    }

    /// 从 `capacity` 开始倍增，直到不少于 `2 × active_voxels`
    pub fn required_capacity(capacity: usize, active_voxels: usize) -> usize {
        let mut required = capacity.max(1);
        while required < active_voxels.saturating_mul(2) {
            required *= 2;
        }
        required
    }

    fn resize(&mut self, new_capacity: usize) {
        let old_slots = std::mem::replace(
            &mut self.slots,
            (0..new_capacity).map(|_| Slot::default()).collect(),
        );
        self.occupied.store(0, Ordering::Relaxed);
        self.overflow.set(false);

        for slot in &old_slots {
            if let Some(key) = slot.occupied_key() {
                if let Some(target) = self.find_or_claim(VoxelIndex::unpack(key)) {
                    target.copy_payload(slot);
                }
            }
        }

        tracing::info!(
            target: "upsampling.table",
            "Hash table resized from {} to {} slots ({} entries carried over)",
            old_slots.len(),
            new_capacity,
            self.len()
        );
    }

    fn entry(&self, index: VoxelIndex, slot: &Slot) -> VoxelEntry {
        let outer = self.geometry.outer_bounds(index);
        let inner = self.geometry.inner_bounds(index);
        let mass = slot.mass.load();
        let weight = slot.weight.load();
        let (position, velocity) = if weight > 0.0 {
            (
                Slot::weighted(&slot.weighted_position) / weight,
                Slot::weighted(&slot.weighted_velocity) / weight,
            )
        } else {
            (outer.center(), Vec3::ZERO)
        };

        VoxelEntry {
            index,
            room: slot.room.load(Ordering::Relaxed),
            position,
            original_mass: mass,
            velocity,
            min_bound: outer.min,
            max_bound: outer.max,
            inner_min_bound: inner.min,
            inner_max_bound: inner.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(capacity: usize) -> SpatialHashTable {
        SpatialHashTable::new(capacity, VoxelGeometry::new(1.0, 0.1))
    }

    #[test]
    fn test_initial_capacity() {
        let table = SpatialHashTable::with_initial_capacity(VoxelGeometry::default());
        assert_eq!(table.capacity(), 256);
        assert!(table.is_empty());
    }

    #[test]
    fn test_deposit_accumulates_weighted_sums() {
        let table = table(16);
        let index = VoxelIndex::new(1, 2, 3);
        assert!(table.deposit(index, 1.0, Vec3::new(1.0, 2.0, 3.0), Vec3::X));
        assert!(table.deposit(index, 3.0, Vec3::new(1.8, 2.0, 3.0), Vec3::ZERO));

        let entry = table.lookup(index).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(entry.original_mass, 4.0);
        assert!((entry.position - Vec3::new(1.6, 2.0, 3.0)).length() < 1e-5);
        assert!((entry.velocity - Vec3::new(0.25, 0.0, 0.0)).length() < 1e-6);
        assert_eq!(entry.min_bound, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(entry.max_bound, Vec3::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn test_motion_deposit_has_no_mass() {
        let table = table(16);
        let index = VoxelIndex::new(0, 0, 0);
        assert!(table.deposit_motion(index, 2.0, Vec3::splat(0.5), Vec3::new(0.0, -3.0, 0.0)));

        let entry = table.lookup(index).unwrap();
        assert_eq!(entry.original_mass, 0.0);
        assert_eq!(entry.velocity, Vec3::new(0.0, -3.0, 0.0));
        assert_eq!(table.velocity(index), Some(Vec3::new(0.0, -3.0, 0.0)));

        // 质量沉积和运动沉积共同决定平均速度
        table.deposit(index, 2.0, Vec3::splat(0.5), Vec3::new(0.0, 1.0, 0.0));
        let entry = table.lookup(index).unwrap();
        assert_eq!(entry.original_mass, 2.0);
        assert!((entry.velocity - Vec3::new(0.0, -1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_lookup_missing() {
        let table = table(8);
        table.insert(VoxelIndex::new(0, 0, 0));
        assert!(table.lookup(VoxelIndex::new(5, 5, 5)).is_none());
        assert_eq!(table.claim_room(VoxelIndex::new(5, 5, 5)), RoomClaim::Missing);
    }

    #[test]
    fn test_full_table_drops_and_flags() {
        let table = table(2);
        assert!(table.insert(VoxelIndex::new(0, 0, 0)));
        assert!(table.insert(VoxelIndex::new(1, 0, 0)));
        assert!(!table.deposit(VoxelIndex::new(2, 0, 0), 1.0, Vec3::ZERO, Vec3::ZERO));
        assert!(table.needs_growth());
        assert!(table.lookup(VoxelIndex::new(2, 0, 0)).is_none());
        // 已存在的条目仍然可以累加
        assert!(table.deposit(VoxelIndex::new(1, 0, 0), 1.0, Vec3::ZERO, Vec3::ZERO));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let table = table(32);
        for x in 0..10 {
            table.deposit(VoxelIndex::new(x, 0, 0), 1.0, Vec3::ZERO, Vec3::ONE);
        }
        table.clear();
        let once = table.occupied_indices();
        table.clear();
        let twice = table.occupied_indices();

        assert!(once.is_empty());
        assert!(twice.is_empty());
        assert!(table.is_empty());
        assert!(!table.needs_growth());
        assert!(table.lookup(VoxelIndex::new(3, 0, 0)).is_none());
    }

    #[test]
    fn test_room_claims() {
        let table = table(8);
        let index = VoxelIndex::new(0, 1, 0);
        table.insert(index);
        assert!(table.set_room(index, 2));
        assert_eq!(table.claim_room(index), RoomClaim::Claimed);
        assert_eq!(table.claim_room(index), RoomClaim::Claimed);
        assert_eq!(table.claim_room(index), RoomClaim::Exhausted);
        assert_eq!(table.take_room(index), 0);

        table.set_room(index, 5);
        table.claim_room(index);
        assert_eq!(table.take_room(index), 4);
        assert_eq!(table.lookup(index).unwrap().room, 0);
    }

    #[test]
    fn test_grow_preserves_entries() {
        let mut table = table(8);
        let indices: Vec<_> = (0..4).map(|i| VoxelIndex::new(i, -i, 2 * i)).collect();
        for (i, index) in indices.iter().enumerate() {
            table.deposit(*index, i as f32 + 1.0, Vec3::splat(i as f32), Vec3::Y * i as f32);
            table.set_room(*index, i as i32);
        }
        let before: Vec<_> = indices.iter().map(|i| table.lookup(*i).unwrap()).collect();

        table.grow();

        assert_eq!(table.capacity(), 16);
        assert_eq!(table.len(), 4);
        for (index, old) in indices.iter().zip(before) {
            assert_eq!(table.lookup(*index).unwrap(), old);
        }
    }

    #[test]
    fn test_required_capacity() {
        assert_eq!(SpatialHashTable::required_capacity(256, 0), 256);
        assert_eq!(SpatialHashTable::required_capacity(256, 128), 256);
        assert_eq!(SpatialHashTable::required_capacity(256, 129), 512);
        assert_eq!(SpatialHashTable::required_capacity(256, 1000), 2048);
    }

    #[test]
    fn test_parallel_deposits() {
        let table = table(64);
        (0..1000).into_par_iter().for_each(|i| {
            let index = VoxelIndex::new(i % 10, 0, 0);
            assert!(table.deposit(index, 0.5, Vec3::ZERO, Vec3::ZERO));
        });
        assert_eq!(table.len(), 10);
        for x in 0..10 {
            assert_eq!(table.lookup(VoxelIndex::new(x, 0, 0)).unwrap().original_mass, 50.0);
        }
    }
}
