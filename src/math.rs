//! Math functions used for binaural rendering.
//!
//! Directions follow the usual HRIR data set convention: elevation and azimuth in
//! degrees, elevation in `[-90; 90]` with positive values above the listener, azimuth
//! in `(-180; 180]` measured in the horizontal plane. The matching cartesian frame is
//! y-up with the azimuth sweeping the xz plane.

use fyrox_core::{
    algebra::{Vector2, Vector3},
    math,
};

/// Converts a direction in degrees into a cartesian unit vector.
pub fn direction_to_vector(elevation: f32, azimuth: f32) -> Vector3<f32> {
    let elevation = elevation.to_radians();
    let azimuth = azimuth.to_radians();
    Vector3::new(
        azimuth.cos() * elevation.cos(),
        elevation.sin(),
        azimuth.sin() * elevation.cos().abs(),
    )
}

/// Converts a cartesian vector into `(elevation, azimuth)` degrees. The vector does
/// not have to be normalized. Vectors pointing straight up or down have no defined
/// azimuth, the elevation there is resolved by the sign of the y component.
pub fn vector_to_direction(direction: &Vector3<f32>) -> (f32, f32) {
    let azimuth = direction.z.atan2(direction.x).to_degrees();
    let hypot = direction.z.hypot(direction.x);
    let elevation = if hypot == 0.0 {
        if direction.y < 0.0 {
            -90.0
        } else {
            90.0
        }
    } else {
        (direction.y / hypot).atan().to_degrees()
    };
    (elevation, azimuth)
}

/// Computes barycentric coordinates of `point` with respect to the triangle `(a, b, c)`
/// and returns them if the point lies inside the triangle with the given tolerance.
/// The tolerance keeps queries that land exactly on an edge or a vertex from slipping
/// between adjacent triangles due to rounding.
pub fn barycentric_in_triangle(
    point: Vector2<f32>,
    a: Vector2<f32>,
    b: Vector2<f32>,
    c: Vector2<f32>,
    tolerance: f32,
) -> Option<(f32, f32, f32)> {
    let (u, v, w) = math::get_barycentric_coords_2d(point, a, b, c);
    if u >= -tolerance && v >= -tolerance && u + v <= 1.0 + tolerance {
        Some((u, v, w))
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
    }

    #[test]
    fn test_direction_round_trip() {
        for &(elevation, azimuth) in &[
            (0.0, 0.0),
            (45.0, 90.0),
            (-30.0, -120.0),
            (80.0, 179.0),
            (-80.0, -179.0),
        ] {
            let vector = direction_to_vector(elevation, azimuth);
            let (e, a) = vector_to_direction(&vector);
            assert_close(e, elevation);
            assert_close(a, azimuth);
        }
    }

    #[test]
    fn test_pole_directions() {
        assert_eq!(vector_to_direction(&Vector3::new(0.0, 1.0, 0.0)).0, 90.0);
        assert_eq!(vector_to_direction(&Vector3::new(0.0, -2.0, 0.0)).0, -90.0);
    }

    #[test]
    fn test_barycentric_in_triangle() {
        let a = Vector2::new(0.0, 0.0);
        let b = Vector2::new(1.0, 0.0);
        let c = Vector2::new(0.0, 1.0);

        let (u, v, w) = barycentric_in_triangle(Vector2::new(0.25, 0.25), a, b, c, 1e-3).unwrap();
        assert_close(u + v + w, 1.0);

        // A vertex must be accepted and dominated by its own weight.
        let (u, _, _) = barycentric_in_triangle(a, a, b, c, 1e-3).unwrap();
        assert_close(u, 1.0);

        assert!(barycentric_in_triangle(Vector2::new(1.0, 1.0), a, b, c, 1e-3).is_none());
    }
}
