//! Utility routines.

use itertools::Itertools;
use rand::Rng;

use crate::geometry::Point;

/// Generate random points in the unit cube.
///
/// Global ids are assigned consecutively starting from `first_global_id`,
/// so each rank of a distributed run can generate a disjoint id range.
pub fn generate_random_points<R: Rng>(
    npoints: usize,
    rng: &mut R,
    first_global_id: usize,
) -> Vec<Point> {
    let mut points = Vec::<Point>::with_capacity(npoints);

    for index in 0..npoints {
        points.push(Point::new(
            [rng.gen(), rng.gen(), rng.gen()],
            first_global_id + index,
        ));
    }

    points
}

/// Convert a flat coordinate array into points.
///
/// The array length must be a multiple of 3; global ids are assigned
/// consecutively starting from `first_global_id`.
pub fn points_from_coords(coords: &[f64], first_global_id: usize) -> Vec<Point> {
    assert_eq!(coords.len() % 3, 0);

    let coords: &[[f64; 3]] = bytemuck::cast_slice(coords);

    coords
        .iter()
        .enumerate()
        .map(|(index, &point)| Point::new(point, first_global_id + index))
        .collect_vec()
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_generated_points_lie_in_unit_cube() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let points = generate_random_points(100, &mut rng, 500);

        for (index, point) in points.iter().enumerate() {
            assert_eq!(point.global_id(), 500 + index);
            for dim in 0..3 {
                assert!((0.0..1.0).contains(&point.coords()[dim]));
            }
        }
    }

    #[test]
    fn test_points_from_coords() {
        let coords = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let points = points_from_coords(&coords, 10);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].coords(), [0.0, 1.0, 2.0]);
        assert_eq!(points[1].coords(), [3.0, 4.0, 5.0]);
        assert_eq!(points[1].global_id(), 11);
    }
}
