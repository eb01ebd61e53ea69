//! Object transform and scene index written by the engine, plus the
//! lock-free cell the renderer reads them from.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

// ── Geometry ───────────────────────────────────────────────

/// Scene-space position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Object rotation about the x and y axes, in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
}

/// Limits applied to every transform write.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformBounds {
    pub max_x: f32,
    pub max_y: f32,
    pub min_scale: f32,
    pub max_scale: f32,
}

impl Default for TransformBounds {
    fn default() -> Self {
        Self {
            max_x: 6.0,
            max_y: 5.0,
            min_scale: 0.3,
            max_scale: 4.0,
        }
    }
}

impl TransformBounds {
    /// Clamp x and y into their symmetric ranges; z is unbounded.
    pub fn clamp_position(&self, p: Point3) -> Point3 {
        Point3 {
            x: p.x.clamp(-self.max_x, self.max_x),
            y: p.y.clamp(-self.max_y, self.max_y),
            z: p.z,
        }
    }

    pub fn clamp_scale(&self, scale: f32) -> f32 {
        scale.clamp(self.min_scale, self.max_scale)
    }
}

/// Position, rotation and uniform scale of the manipulated object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectTransform {
    pub position: Point3,
    pub rotation: Rotation,
    pub scale: f32,
}

impl ObjectTransform {
    pub fn with_scale(scale: f32) -> Self {
        Self {
            position: Point3::default(),
            rotation: Rotation::default(),
            scale,
        }
    }

    pub fn sexp(&self) -> String {
        format!(
            "(:position (:x {:.4} :y {:.4} :z {:.4}) :rotation (:x {:.4} :y {:.4}) :scale {:.4})",
            self.position.x,
            self.position.y,
            self.position.z,
            self.rotation.x,
            self.rotation.y,
            self.scale,
        )
    }
}

// ── Scene index ────────────────────────────────────────────

/// Active scene, cycling through `count` scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneIndex {
    index: u32,
    count: u32,
}

impl SceneIndex {
    /// A zero count is treated as one.
    pub fn new(count: u32) -> Self {
        Self {
            index: 0,
            count: count.max(1),
        }
    }

    pub fn get(&self) -> u32 {
        self.index
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn advance(&mut self) -> u32 {
        self.index = (self.index + 1) % self.count;
        self.index
    }

    pub fn retreat(&mut self) -> u32 {
        self.index = (self.index + self.count - 1) % self.count;
        self.index
    }

    /// Jump to `index` (wrapped into range).
    pub fn set(&mut self, index: u32) -> u32 {
        self.index = index % self.count;
        self.index
    }
}

// ── Shared renderer cell ───────────────────────────────────

/// Snapshot read from a [`SharedTransform`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSnapshot {
    pub transform: ObjectTransform,
    pub scene: u32,
    /// Number of commits so far.
    pub version: u64,
}

/// Single-writer, multi-reader cell holding the last committed transform.
///
/// Sequence-counter scheme: the writer makes `seq` odd, stores the
/// fields, then makes it even again.  Readers retry while `seq` is odd
/// or changed under them.  Neither side takes a lock.
#[derive(Debug)]
pub struct SharedTransform {
    seq: AtomicU64,
    // position x/y/z, rotation x/y, scale, scene
    fields: [AtomicU32; 7],
}

impl SharedTransform {
    pub fn new(initial: ObjectTransform, scene: u32) -> Arc<Self> {
        let cell = Self {
            seq: AtomicU64::new(0),
            fields: Default::default(),
        };
        cell.store(&initial, scene);
        Arc::new(cell)
    }

    fn store(&self, t: &ObjectTransform, scene: u32) {
        let values = [
            t.position.x.to_bits(),
            t.position.y.to_bits(),
            t.position.z.to_bits(),
            t.rotation.x.to_bits(),
            t.rotation.y.to_bits(),
            t.scale.to_bits(),
            scene,
        ];
        for (field, value) in self.fields.iter().zip(values) {
            field.store(value, Ordering::Relaxed);
        }
    }

    /// Commit a new value.  Only the engine thread may call this.
    pub fn publish(&self, t: &ObjectTransform, scene: u32) {
        self.seq.fetch_add(1, Ordering::Relaxed);
        // Field stores must not become visible before the odd sequence.
        fence(Ordering::Release);
        self.store(t, scene);
        self.seq.fetch_add(1, Ordering::Release);
    }

    /// Read a consistent snapshot of the last committed value.
    pub fn load(&self) -> TransformSnapshot {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let v: [u32; 7] = std::array::from_fn(|i| self.fields[i].load(Ordering::Relaxed));
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) != before {
                continue;
            }
            return TransformSnapshot {
                transform: ObjectTransform {
                    position: Point3::new(
                        f32::from_bits(v[0]),
                        f32::from_bits(v[1]),
                        f32::from_bits(v[2]),
                    ),
                    rotation: Rotation {
                        x: f32::from_bits(v[3]),
                        y: f32::from_bits(v[4]),
                    },
                    scale: f32::from_bits(v[5]),
                },
                scene: v[6],
                version: before / 2,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clamp_position() {
        let bounds = TransformBounds::default();
        let p = bounds.clamp_position(Point3::new(7.5, -9.0, 3.0));
        assert_eq!(p, Point3::new(6.0, -5.0, 3.0));
        let inside = Point3::new(1.2, 0.4, 0.0);
        assert_eq!(bounds.clamp_position(inside), inside);
    }

    #[test]
    fn test_clamp_scale() {
        let bounds = TransformBounds::default();
        assert_eq!(bounds.clamp_scale(0.1), 0.3);
        assert_eq!(bounds.clamp_scale(10.0), 4.0);
        assert_eq!(bounds.clamp_scale(1.5), 1.5);
    }

    #[test]
    fn test_scene_wraps() {
        let mut scene = SceneIndex::new(4);
        assert_eq!(scene.get(), 0);
        assert_eq!(scene.retreat(), 3);
        assert_eq!(scene.advance(), 0);
        assert_eq!(scene.advance(), 1);
        assert_eq!(scene.set(6), 2);
    }

    #[test]
    fn test_scene_zero_count() {
        let mut scene = SceneIndex::new(0);
        assert_eq!(scene.count(), 1);
        assert_eq!(scene.advance(), 0);
        assert_eq!(scene.retreat(), 0);
    }

    #[test]
    fn test_transform_sexp() {
        let t = ObjectTransform::with_scale(1.5);
        let sexp = t.sexp();
        assert!(sexp.contains(":scale 1.5000"));
        assert!(sexp.contains(":position (:x 0.0000"));
        assert!(lexpr::from_str(&sexp).is_ok());
    }

    #[test]
    fn test_shared_publish_and_load() {
        let cell = SharedTransform::new(ObjectTransform::with_scale(1.5), 0);
        let first = cell.load();
        assert_eq!(first.transform.scale, 1.5);
        assert_eq!(first.version, 0);

        let mut t = ObjectTransform::with_scale(2.0);
        t.position = Point3::new(1.0, -2.0, 0.5);
        t.rotation.x = 0.25;
        cell.publish(&t, 3);

        let snap = cell.load();
        assert_eq!(snap.transform, t);
        assert_eq!(snap.scene, 3);
        assert_eq!(snap.version, 1);
    }

    #[test]
    fn test_shared_reader_sees_whole_commits() {
        let cell = SharedTransform::new(ObjectTransform::with_scale(0.0), 0);
        let reader = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    let snap = cell.load();
                    let p = snap.transform.position;
                    // Every commit writes x == y == scale and scene == scale mod 4.
                    assert_eq!(p.x, p.y);
                    assert_eq!(p.x, snap.transform.scale);
                    assert_eq!(snap.scene, snap.transform.scale as u32 % 4);
                }
            })
        };
        for i in 1..=10_000 {
            let v = i as f32;
            let mut t = ObjectTransform::with_scale(v);
            t.position = Point3::new(v, v, 0.0);
            cell.publish(&t, i % 4);
        }
        reader.join().unwrap();
    }
}
