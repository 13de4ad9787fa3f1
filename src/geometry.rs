//! Geometry information

use mpi::traits::Equivalence;

/// Definition of a point.
#[derive(Clone, Copy, Equivalence)]
pub struct Point {
    coords: [f64; 3],
    global_id: usize,
}

impl Point {
    /// Create a new point from coordinates and global id.
    pub fn new(coords: [f64; 3], global_id: usize) -> Self {
        Self { coords, global_id }
    }

    /// Return the coordinates of a point.
    pub fn coords(&self) -> [f64; 3] {
        self.coords
    }

    /// Return the global id of the point.
    pub fn global_id(&self) -> usize {
        self.global_id
    }
}

/// An axis-aligned bounding box around a set of points.
#[derive(Clone, Copy)]
pub struct BoundingBox {
    coords: [f64; 6],
}

impl BoundingBox {
    /// Create a new bounding box.
    ///
    /// The coordinates are given by `[xmin, ymin, zmin, xmax, ymax, zmax]`.
    pub fn new(coords: [f64; 6]) -> Self {
        Self { coords }
    }

    /// Given a slice of points, compute the tight bounding box around them.
    pub fn from_points(points: &[Point]) -> BoundingBox {
        assert!(!points.is_empty());

        let mut xmin = f64::MAX;
        let mut xmax = f64::MIN;

        let mut ymin = f64::MAX;
        let mut ymax = f64::MIN;

        let mut zmin = f64::MAX;
        let mut zmax = f64::MIN;

        for point in points {
            let x = point.coords()[0];
            let y = point.coords()[1];
            let z = point.coords()[2];

            xmin = f64::min(xmin, x);
            xmax = f64::max(xmax, x);

            ymin = f64::min(ymin, y);
            ymax = f64::max(ymax, y);

            zmin = f64::min(zmin, z);
            zmax = f64::max(zmax, z);
        }

        BoundingBox {
            coords: [xmin, ymin, zmin, xmax, ymax, zmax],
        }
    }

    /// Return coordinates
    pub fn coordinates(&self) -> [f64; 6] {
        self.coords
    }

    /// Return the index of the dimension with the largest extent.
    pub fn widest_dimension(&self) -> usize {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;
        let extents = [xmax - xmin, ymax - ymin, zmax - zmin];

        let mut widest = 0;
        for dim in 1..3 {
            if extents[dim] > extents[widest] {
                widest = dim;
            }
        }
        widest
    }

    /// Return the minimum of the box in the given dimension.
    pub fn min(&self, dim: usize) -> f64 {
        self.coords[dim]
    }

    /// Return the maximum of the box in the given dimension.
    pub fn max(&self, dim: usize) -> f64 {
        self.coords[3 + dim]
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        write!(
            f,
            "(xmin: {}, ymin: {}, zmin: {}, xmax: {}, ymax: {}, zmax: {})",
            xmin, ymin, zmin, xmax, ymax, zmax
        )
    }
}

/// A closed range of squared distances between two bounding boxes.
#[derive(Clone, Copy, Debug)]
pub struct DistRange {
    /// Smallest possible squared distance between any two points of the boxes.
    pub min: f64,
    /// Largest possible squared distance between any two points of the boxes.
    pub max: f64,
}

impl DistRange {
    /// Return the midpoint of the range.
    pub fn mid(&self) -> f64 {
        0.5 * (self.min + self.max)
    }
}

/// Distance computations between bounding boxes.
///
/// The task queue orders pairs of subtrees by how close their bounds can
/// possibly be, so all it needs from a metric is the range of squared
/// distances attainable between two boxes.
pub trait Metric: Sync {
    /// Compute the range of squared distances between any point of `first`
    /// and any point of `second`.
    fn squared_distance_range(&self, first: &BoundingBox, second: &BoundingBox) -> DistRange;
}

/// The standard Euclidean metric.
pub struct Euclidean;

impl Metric for Euclidean {
    fn squared_distance_range(&self, first: &BoundingBox, second: &BoundingBox) -> DistRange {
        let mut min = 0.0;
        let mut max = 0.0;

        for dim in 0..3 {
            // The boxes are separated in this dimension by the gap between
            // the closer pair of faces, or not at all if they overlap.
            let gap = f64::max(
                0.0,
                f64::max(
                    second.min(dim) - first.max(dim),
                    first.min(dim) - second.max(dim),
                ),
            );
            min += gap * gap;

            let span = f64::max(
                (first.max(dim) - second.min(dim)).abs(),
                (second.max(dim) - first.min(dim)).abs(),
            );
            max += span * span;
        }

        DistRange { min, max }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bounding_box_from_points() {
        let points = vec![
            Point::new([0.0, 1.0, 2.0], 0),
            Point::new([3.0, -1.0, 0.5], 1),
            Point::new([1.5, 0.0, 4.0], 2),
        ];

        let bound = BoundingBox::from_points(&points);
        assert_eq!(bound.coordinates(), [0.0, -1.0, 0.5, 3.0, 1.0, 4.0]);
    }

    #[test]
    fn test_widest_dimension() {
        let bound = BoundingBox::new([0.0, 0.0, 0.0, 1.0, 3.0, 2.0]);
        assert_eq!(bound.widest_dimension(), 1);
    }

    #[test]
    fn test_distance_range_disjoint_boxes() {
        // Unit boxes separated by 2 along x.
        let first = BoundingBox::new([0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let second = BoundingBox::new([3.0, 0.0, 0.0, 4.0, 1.0, 1.0]);

        let range = Euclidean.squared_distance_range(&first, &second);

        assert_eq!(range.min, 4.0);
        // Farthest corners are (0, 0, 0) and (4, 1, 1).
        assert_eq!(range.max, 18.0);
        assert_eq!(range.mid(), 11.0);
    }

    #[test]
    fn test_distance_range_overlapping_boxes() {
        let first = BoundingBox::new([0.0, 0.0, 0.0, 2.0, 2.0, 2.0]);
        let second = BoundingBox::new([1.0, 1.0, 1.0, 3.0, 3.0, 3.0]);

        let range = Euclidean.squared_distance_range(&first, &second);

        assert_eq!(range.min, 0.0);
        assert_eq!(range.max, 27.0);
    }

    #[test]
    fn test_distance_range_of_box_with_itself() {
        let bound = BoundingBox::new([0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);

        let range = Euclidean.squared_distance_range(&bound, &bound);

        assert_eq!(range.min, 0.0);
        assert_eq!(range.max, 3.0);
    }
}
