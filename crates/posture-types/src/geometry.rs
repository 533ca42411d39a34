//! Planar geometry used by the spatial index, goal constraints, and routing.
//!
//! Positions are metres on a floor plane; floors are whole-numbered levels.
//! A [`SpatialConstraint`] is the *intersection* of its regions on a single
//! floor, while a goal that spans several areas is a list of constraints
//! (their union).

use core::f64::consts::TAU;
use core::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Tolerance for geometric comparisons.
pub const EPSILON: f64 = 1e-9;

/// A point or direction on a floor plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    /// East-west coordinate in metres.
    pub x: f64,
    /// North-south coordinate in metres.
    pub y: f64,
}

impl Vec2 {
    /// The origin.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Create a vector from its components.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing at `angle` radians from the +x axis.
    pub fn from_angle(angle: f64) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    /// Euclidean length.
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Self) -> f64 {
        (other - self).length()
    }

    /// Dot product.
    pub fn dot(self, other: Self) -> f64 {
        self.x.mul_add(other.x, self.y * other.y)
    }

    /// Unit vector in the same direction, or zero for a zero vector.
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len < EPSILON {
            Self::ZERO
        } else {
            Self::new(self.x / len, self.y / len)
        }
    }

    /// Linear interpolation towards `other` by `t` in `[0, 1]`.
    pub fn lerp(self, other: Self, t: f64) -> Self {
        self + (other - self) * t
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// An axis-aligned bounding box on a floor plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec2,
    /// Maximum corner.
    pub max: Vec2,
}

impl Aabb {
    /// Create a box from its corners.
    pub const fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Box centred on `center` extending `half` in each direction.
    pub fn around(center: Vec2, half: Vec2) -> Self {
        Self::new(center - half, center + half)
    }

    /// Square box of half-size `radius` centred on `center`.
    pub fn square(center: Vec2, radius: f64) -> Self {
        Self::around(center, Vec2::new(radius, radius))
    }

    /// Whether the box encloses no area (the result of intersecting
    /// disjoint boxes).
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    /// Whether `point` lies inside or on the boundary.
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    /// Whether `other` lies entirely inside this box.
    pub fn encloses(&self, other: &Self) -> bool {
        self.contains(other.min) && self.contains(other.max)
    }

    /// Whether the two boxes overlap (touching counts).
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    /// Overlap of the two boxes; may be empty.
    pub fn intersection(&self, other: &Self) -> Self {
        Self::new(
            Vec2::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            Vec2::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        )
    }

    /// Smallest box enclosing both.
    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            Vec2::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            Vec2::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        )
    }

    /// Centre point.
    pub fn center(&self) -> Vec2 {
        self.min.lerp(self.max, 0.5)
    }

    /// The four equal quadrants, in `[sw, se, nw, ne]` order.
    pub fn quadrants(&self) -> [Self; 4] {
        let c = self.center();
        [
            Self::new(self.min, c),
            Self::new(Vec2::new(c.x, self.min.y), Vec2::new(self.max.x, c.y)),
            Self::new(Vec2::new(self.min.x, c.y), Vec2::new(c.x, self.max.y)),
            Self::new(c, self.max),
        ]
    }
}

/// A position on a specific floor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Position on the floor plane.
    pub position: Vec2,
    /// Floor level (0 = ground).
    pub floor: i32,
}

impl Location {
    /// Create a location.
    pub const fn new(x: f64, y: f64, floor: i32) -> Self {
        Self {
            position: Vec2::new(x, y),
            floor,
        }
    }

    /// Location at `position` on `floor`.
    pub const fn at(position: Vec2, floor: i32) -> Self {
        Self { position, floor }
    }

    /// Planar distance, ignoring floors.
    pub fn planar_distance(&self, other: &Self) -> f64 {
        self.position.distance(other.position)
    }
}

/// A planar region on one floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Region {
    /// Disc of `radius` around `center`.
    Circle {
        /// Disc centre.
        center: Vec2,
        /// Disc radius in metres.
        radius: f64,
    },
    /// Simple polygon given by its vertices in order.
    Polygon {
        /// Polygon vertices.
        points: Vec<Vec2>,
    },
}

impl Region {
    /// Disc region.
    pub const fn circle(center: Vec2, radius: f64) -> Self {
        Self::Circle { center, radius }
    }

    /// Axis-aligned rectangle as a polygon.
    pub fn rect(bounds: Aabb) -> Self {
        Self::Polygon {
            points: vec![
                bounds.min,
                Vec2::new(bounds.max.x, bounds.min.y),
                bounds.max,
                Vec2::new(bounds.min.x, bounds.max.y),
            ],
        }
    }

    /// Whether `point` lies inside the region.
    pub fn contains(&self, point: Vec2) -> bool {
        match self {
            Self::Circle { center, radius } => center.distance(point) <= *radius + EPSILON,
            Self::Polygon { points } => polygon_contains(points, point),
        }
    }

    /// Bounding box of the region.
    pub fn bounds(&self) -> Aabb {
        match self {
            Self::Circle { center, radius } => Aabb::square(*center, *radius),
            Self::Polygon { points } => {
                let mut iter = points.iter();
                let Some(first) = iter.next() else {
                    return Aabb::new(Vec2::new(1.0, 1.0), Vec2::ZERO);
                };
                iter.fold(Aabb::new(*first, *first), |acc, p| {
                    acc.union(&Aabb::new(*p, *p))
                })
            }
        }
    }

    /// Representative interior point (disc centre or vertex centroid).
    pub fn anchor(&self) -> Vec2 {
        match self {
            Self::Circle { center, .. } => *center,
            Self::Polygon { points } => centroid(points),
        }
    }

    /// Candidate goal points inside the region: the anchor followed by
    /// `ring` points spread around it.
    pub fn sample_points(&self, ring: u32) -> Vec<Vec2> {
        let anchor = self.anchor();
        let mut samples = vec![anchor];
        match self {
            Self::Circle { center, radius } => {
                let n = ring.max(1);
                for k in 0..n {
                    let angle = TAU * f64::from(k) / f64::from(n);
                    samples.push(*center + Vec2::from_angle(angle) * (radius * 0.8));
                }
            }
            Self::Polygon { points } => {
                for (a, b) in points.iter().zip(points.iter().cycle().skip(1)) {
                    samples.push(a.lerp(anchor, 0.25));
                    samples.push(a.lerp(*b, 0.5).lerp(anchor, 0.25));
                }
            }
        }
        samples.retain(|p| self.contains(*p));
        samples
    }
}

/// Intersection of planar regions on one floor. No regions means the whole
/// floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialConstraint {
    /// Floor the constraint applies to.
    pub floor: i32,
    /// Regions that must all contain a point for it to satisfy the
    /// constraint.
    pub regions: Vec<Region>,
}

impl SpatialConstraint {
    /// Constraint made of a single region.
    pub fn new(floor: i32, region: Region) -> Self {
        Self {
            floor,
            regions: vec![region],
        }
    }

    /// The whole floor.
    pub const fn whole_floor(floor: i32) -> Self {
        Self {
            floor,
            regions: Vec::new(),
        }
    }

    /// Whether the constraint places no restriction on its floor.
    pub fn is_unbounded(&self) -> bool {
        self.regions.is_empty()
    }

    /// Whether `location` satisfies the constraint.
    pub fn contains(&self, location: &Location) -> bool {
        location.floor == self.floor && self.regions.iter().all(|r| r.contains(location.position))
    }

    /// Bounding box of the intersection, `None` when unbounded.
    pub fn bounds(&self) -> Option<Aabb> {
        let mut iter = self.regions.iter();
        let first = iter.next()?.bounds();
        Some(iter.fold(first, |acc, r| acc.intersection(&r.bounds())))
    }

    /// Intersection with `other`, or `None` when they lie on different
    /// floors. The result may be empty; check with [`is_satisfiable`].
    ///
    /// [`is_satisfiable`]: Self::is_satisfiable
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.floor != other.floor {
            return None;
        }
        let mut regions = self.regions.clone();
        regions.extend(other.regions.iter().cloned());
        Some(Self {
            floor: self.floor,
            regions,
        })
    }

    /// Sampled points that satisfy every region.
    pub fn sample_locations(&self, ring: u32) -> Vec<Location> {
        self.regions
            .iter()
            .flat_map(|r| r.sample_points(ring))
            .filter(|p| self.regions.iter().all(|r| r.contains(*p)))
            .map(|p| Location::at(p, self.floor))
            .collect()
    }

    /// Whether any sampled point satisfies every region.
    pub fn is_satisfiable(&self, ring: u32) -> bool {
        if self.is_unbounded() {
            return true;
        }
        if self.bounds().is_some_and(|b| b.is_empty()) {
            return false;
        }
        !self.sample_locations(ring).is_empty()
    }
}

/// Even-odd ray casting test.
fn polygon_contains(points: &[Vec2], point: Vec2) -> bool {
    let mut inside = false;
    for (a, b) in points.iter().zip(points.iter().cycle().skip(1)) {
        let crosses = (a.y > point.y) != (b.y > point.y);
        if crosses {
            let t = (point.y - a.y) / (b.y - a.y);
            let x = (b.x - a.x).mul_add(t, a.x);
            if point.x < x {
                inside = !inside;
            }
        }
    }
    inside
}

fn centroid(points: &[Vec2]) -> Vec2 {
    let mut sum = Vec2::ZERO;
    let mut count = 0.0_f64;
    for p in points {
        sum = sum + *p;
        count += 1.0;
    }
    if count < 1.0 { sum } else { sum * (1.0 / count) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f64) -> Region {
        Region::rect(Aabb::new(Vec2::ZERO, Vec2::new(size, size)))
    }

    #[test]
    fn polygon_containment() {
        let region = square(4.0);
        assert!(region.contains(Vec2::new(2.0, 2.0)));
        assert!(!region.contains(Vec2::new(5.0, 2.0)));
        assert!(!region.contains(Vec2::new(-0.1, 3.0)));
    }

    #[test]
    fn circle_samples_stay_inside() {
        let region = Region::circle(Vec2::new(3.0, 3.0), 1.0);
        let samples = region.sample_points(8);
        assert_eq!(samples.len(), 9);
        assert!(samples.iter().all(|p| region.contains(*p)));
    }

    #[test]
    fn disjoint_constraints_are_unsatisfiable() {
        let a = SpatialConstraint::new(0, Region::circle(Vec2::ZERO, 1.0));
        let b = SpatialConstraint::new(0, Region::circle(Vec2::new(10.0, 0.0), 1.0));
        let both = a.intersect(&b);
        assert!(both.is_some_and(|c| !c.is_satisfiable(8)));
    }

    #[test]
    fn overlapping_constraints_are_satisfiable() {
        let a = SpatialConstraint::new(0, square(4.0));
        let b = SpatialConstraint::new(0, Region::circle(Vec2::new(2.0, 2.0), 1.0));
        let both = a.intersect(&b);
        assert!(both.is_some_and(|c| c.is_satisfiable(8)));
    }

    #[test]
    fn constraints_on_different_floors_do_not_intersect() {
        let a = SpatialConstraint::whole_floor(0);
        let b = SpatialConstraint::whole_floor(1);
        assert!(a.intersect(&b).is_none());
    }

    #[test]
    fn aabb_quadrants_cover_parent() {
        let parent = Aabb::new(Vec2::ZERO, Vec2::new(8.0, 8.0));
        let quads = parent.quadrants();
        assert!(quads.iter().all(|q| parent.encloses(q)));
        assert!(quads.iter().any(|q| q.contains(Vec2::new(7.0, 1.0))));
    }
}
