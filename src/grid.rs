//! Spatial index over the directions of a set of measured impulse responses.
//!
//! # Overview
//!
//! The index is built once, when a database is finalized. Sample directions are
//! triangulated in the (azimuth, elevation) plane and the resulting triangles are
//! rasterized into a coarse uniform grid, so a direction query touches only a handful
//! of candidate triangles instead of the whole set.
//!
//! The (azimuth, elevation) plane is not a plane really - it wraps around at azimuth
//! ±180 and degenerates at the poles. Both spots are closed by inserting ghost
//! vertices (seam duplicates shifted by 360 degrees, pole samples fanned out over
//! several azimuths) that still refer to the real sample they were made from, so
//! queries anywhere on the sphere resolve to real samples.

use crate::{error::BinauralError, math::barycentric_in_triangle};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fyrox_core::algebra::Vector2;
use spade::{DelaunayTriangulation, Point2, Triangulation};
use std::io::{Read, Write};

/// Amount of grid cells along the elevation axis.
pub const GRID_ELEVATION_CELLS: usize = 20;

/// Amount of grid cells along the azimuth axis.
pub const GRID_AZIMUTH_CELLS: usize = 40;

/// Tolerance of the point-in-triangle test, in barycentric units. Queries landing
/// exactly on shared edges or vertices stay inside one of the adjacent triangles.
const CONTAINMENT_TOLERANCE: f32 = 1e-3;

/// Samples within this many degrees of the azimuth seam get a ghost duplicate on the
/// other side of it.
const SEAM_MARGIN: f32 = 60.0;

/// Samples within this many degrees of a pole are fanned out over several azimuths.
const POLE_MARGIN: f32 = 0.5;

const POLE_FAN_STEP: f32 = 30.0;

/// Upper bound on the triangle count field of a serialized grid. Triangulating even
/// the densest data sets stays far below this; anything above it is a corrupt header,
/// rejected before it can drive a huge allocation.
const MAX_TRIANGLE_COUNT: u32 = 1 << 20;

/// A vertex of an index triangle: a position in the (elevation, azimuth) plane plus
/// the index of the measured sample it refers to. Ghost vertices keep their shifted
/// position but refer to the sample they were duplicated from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridVertex {
    /// Elevation of the vertex, in degrees.
    pub elevation: f32,
    /// Azimuth of the vertex, in degrees. May lie outside `(-180; 180]` for ghosts.
    pub azimuth: f32,
    /// Index of the measured sample this vertex refers to.
    pub sample: u32,
}

/// A triangle of the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTriangle {
    /// Vertices of the triangle.
    pub vertices: [GridVertex; 3],
}

/// Result of a successful triangle lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Index of the triangle that contains the query point.
    pub triangle: u32,
    /// Indices of the measured samples at the triangle's vertices.
    pub samples: [u32; 3],
    /// Barycentric weights of the query point, one per sample, summing to one.
    pub weights: [f32; 3],
}

/// Spatial index over sample directions: a triangulation plus a uniform cell grid of
/// candidate triangle lists.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleGrid {
    triangles: Vec<GridTriangle>,
    cells: Vec<Vec<u32>>,
}

fn cell_x(elevation: f32) -> usize {
    let x = (elevation / 180.0 * GRID_ELEVATION_CELLS as f32).floor() as i64;
    x.rem_euclid(GRID_ELEVATION_CELLS as i64) as usize
}

fn cell_y(azimuth: f32) -> usize {
    let y = (azimuth / 360.0 * GRID_AZIMUTH_CELLS as f32).floor() as i64;
    y.rem_euclid(GRID_AZIMUTH_CELLS as i64) as usize
}

impl SampleGrid {
    /// Builds the index from a list of `(elevation, azimuth)` sample directions, in
    /// degrees. The index of a direction in the list is the sample index reported by
    /// lookups. At least three non-collinear directions are required.
    pub fn build(directions: &[(f32, f32)]) -> Result<Self, BinauralError> {
        if directions.len() < 3 {
            return Err(BinauralError::TriangulationFailed(
                "at least three sample directions are required".to_string(),
            ));
        }

        // Planar points to triangulate, each mapped back to a real sample.
        let mut points = Vec::new();
        for (index, &(elevation, azimuth)) in directions.iter().enumerate() {
            let index = index as u32;
            if elevation.abs() >= 90.0 - POLE_MARGIN {
                // A cap sample closes the pole at several azimuths at once.
                let mut fan_azimuth = -180.0;
                while fan_azimuth <= 180.0 {
                    points.push((Vector2::new(fan_azimuth, elevation), index));
                    fan_azimuth += POLE_FAN_STEP;
                }
            } else {
                points.push((Vector2::new(azimuth, elevation), index));
                if azimuth > 180.0 - SEAM_MARGIN {
                    points.push((Vector2::new(azimuth - 360.0, elevation), index));
                } else if azimuth < -180.0 + SEAM_MARGIN {
                    points.push((Vector2::new(azimuth + 360.0, elevation), index));
                }
            }
        }

        let mut triangulation: DelaunayTriangulation<Point2<f32>> = DelaunayTriangulation::new();
        // Vertex handles are issued in insertion order; coincident points merge into
        // the vertex (and thus the sample) they were first inserted for.
        let mut vertex_to_sample: Vec<u32> = Vec::with_capacity(points.len());
        for (position, sample) in points.iter() {
            let vertex = triangulation
                .insert(Point2::new(position.x, position.y))
                .map_err(|err| BinauralError::TriangulationFailed(format!("{:?}", err)))?;
            if vertex.index() == vertex_to_sample.len() {
                vertex_to_sample.push(*sample);
            }
        }

        let mut triangles = Vec::new();
        for face in triangulation.inner_faces() {
            let edges = face.adjacent_edges();
            let vertices = edges.map(|edge| {
                let vertex = edge.from();
                let position = vertex.position();
                GridVertex {
                    elevation: position.y,
                    azimuth: position.x,
                    sample: vertex_to_sample[vertex.index()],
                }
            });

            // Ghost-only triangles fully outside the canonical azimuth range are
            // redundant copies of triangles that already exist on the other side.
            let min_azimuth = vertices
                .iter()
                .fold(f32::INFINITY, |min, v| min.min(v.azimuth));
            let max_azimuth = vertices
                .iter()
                .fold(f32::NEG_INFINITY, |max, v| max.max(v.azimuth));
            if max_azimuth < -180.0 || min_azimuth > 180.0 {
                continue;
            }

            triangles.push(GridTriangle { vertices });
        }

        if triangles.is_empty() {
            return Err(BinauralError::TriangulationFailed(
                "sample directions are collinear".to_string(),
            ));
        }

        // Rasterize every triangle into each cell its bounding box overlaps. The
        // azimuth axis wraps, so raw cell coordinates are reduced modulo the grid
        // size. Candidate lists end up sorted by triangle index, which makes edge
        // queries deterministic: the first containing triangle wins.
        let mut cells = vec![Vec::new(); GRID_ELEVATION_CELLS * GRID_AZIMUTH_CELLS];
        for (triangle_index, triangle) in triangles.iter().enumerate() {
            let mut min = Vector2::new(f32::INFINITY, f32::INFINITY);
            let mut max = Vector2::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
            for vertex in triangle.vertices.iter() {
                min.x = min.x.min(vertex.elevation);
                min.y = min.y.min(vertex.azimuth);
                max.x = max.x.max(vertex.elevation);
                max.y = max.y.max(vertex.azimuth);
            }

            let x1 = (min.x / 180.0 * GRID_ELEVATION_CELLS as f32).floor() as i64;
            let y1 = (min.y / 360.0 * GRID_AZIMUTH_CELLS as f32).floor() as i64;
            let x2 = (max.x / 180.0 * GRID_ELEVATION_CELLS as f32).floor() as i64;
            let y2 = (max.y / 360.0 * GRID_AZIMUTH_CELLS as f32).floor() as i64;

            for x in x1..=x2 {
                for y in y1..=y2 {
                    let xi = x.rem_euclid(GRID_ELEVATION_CELLS as i64) as usize;
                    let yi = y.rem_euclid(GRID_AZIMUTH_CELLS as i64) as usize;
                    cells[xi * GRID_AZIMUTH_CELLS + yi].push(triangle_index as u32);
                }
            }
        }

        Ok(Self { triangles, cells })
    }

    /// Returns the triangles of the index.
    pub fn triangles(&self) -> &[GridTriangle] {
        &self.triangles
    }

    /// Returns the list of candidate triangle indices for the given direction.
    pub fn lookup_cell(&self, elevation: f32, azimuth: f32) -> &[u32] {
        &self.cells[cell_x(elevation) * GRID_AZIMUTH_CELLS + cell_y(azimuth)]
    }

    /// Finds the triangle that contains the given direction and the barycentric
    /// weights of the direction within it. Returns `None` if the direction is not
    /// covered by the triangulation.
    pub fn lookup_triangle(&self, elevation: f32, azimuth: f32) -> Option<TriangleHit> {
        for &triangle_index in self.lookup_cell(elevation, azimuth) {
            let triangle = &self.triangles[triangle_index as usize];
            let [a, b, c] = triangle.vertices;

            // Seam triangles live in unwrapped coordinates, shift the query onto
            // the side of the seam the triangle is on.
            let center = (a.azimuth + b.azimuth + c.azimuth) / 3.0;
            let mut query_azimuth = azimuth;
            if query_azimuth - center > 180.0 {
                query_azimuth -= 360.0;
            } else if center - query_azimuth > 180.0 {
                query_azimuth += 360.0;
            }

            if let Some((u, v, w)) = barycentric_in_triangle(
                Vector2::new(query_azimuth, elevation),
                Vector2::new(a.azimuth, a.elevation),
                Vector2::new(b.azimuth, b.elevation),
                Vector2::new(c.azimuth, c.elevation),
                CONTAINMENT_TOLERANCE,
            ) {
                return Some(TriangleHit {
                    triangle: triangle_index,
                    samples: [a.sample, b.sample, c.sample],
                    weights: [u, v, w],
                });
            }
        }

        None
    }

    /// Writes the index in its flat binary form.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), BinauralError> {
        writer.write_u32::<LittleEndian>(self.triangles.len() as u32)?;
        for triangle in self.triangles.iter() {
            for vertex in triangle.vertices.iter() {
                writer.write_f32::<LittleEndian>(vertex.elevation)?;
                writer.write_f32::<LittleEndian>(vertex.azimuth)?;
                writer.write_u32::<LittleEndian>(vertex.sample)?;
            }
        }

        writer.write_u32::<LittleEndian>(GRID_ELEVATION_CELLS as u32)?;
        writer.write_u32::<LittleEndian>(GRID_AZIMUTH_CELLS as u32)?;
        for cell in self.cells.iter() {
            writer.write_u32::<LittleEndian>(cell.len() as u32)?;
            for &triangle_index in cell.iter() {
                writer.write_u32::<LittleEndian>(triangle_index)?;
            }
        }

        Ok(())
    }

    /// Reads an index written by [`Self::write`]. `sample_count` is the size of the
    /// sample set the index belongs to, used to validate the stored sample indices.
    pub fn read<R: Read>(reader: &mut R, sample_count: u32) -> Result<Self, BinauralError> {
        let triangle_count = reader.read_u32::<LittleEndian>()?;
        if triangle_count > MAX_TRIANGLE_COUNT {
            return Err(BinauralError::InvalidFileFormat(format!(
                "triangle count {} is out of range",
                triangle_count
            )));
        }
        let mut triangles = Vec::with_capacity(triangle_count as usize);
        for _ in 0..triangle_count {
            let mut vertices = [GridVertex {
                elevation: 0.0,
                azimuth: 0.0,
                sample: 0,
            }; 3];
            for vertex in vertices.iter_mut() {
                vertex.elevation = reader.read_f32::<LittleEndian>()?;
                vertex.azimuth = reader.read_f32::<LittleEndian>()?;
                vertex.sample = reader.read_u32::<LittleEndian>()?;
                if vertex.sample >= sample_count {
                    return Err(BinauralError::InvalidFileFormat(format!(
                        "triangle vertex refers to sample {} of {}",
                        vertex.sample, sample_count
                    )));
                }
            }
            triangles.push(GridTriangle { vertices });
        }

        let sx = reader.read_u32::<LittleEndian>()? as usize;
        let sy = reader.read_u32::<LittleEndian>()? as usize;
        if sx != GRID_ELEVATION_CELLS || sy != GRID_AZIMUTH_CELLS {
            return Err(BinauralError::InvalidFileFormat(format!(
                "unexpected grid dimensions {}x{}",
                sx, sy
            )));
        }

        let mut cells = Vec::with_capacity(sx * sy);
        for _ in 0..sx * sy {
            let count = reader.read_u32::<LittleEndian>()?;
            // Rasterization inserts a triangle at most once per cell.
            if count > triangle_count {
                return Err(BinauralError::InvalidFileFormat(format!(
                    "cell refers to {} of {} triangles",
                    count, triangle_count
                )));
            }
            let mut cell = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let triangle_index = reader.read_u32::<LittleEndian>()?;
                if triangle_index >= triangle_count {
                    return Err(BinauralError::InvalidFileFormat(format!(
                        "cell refers to triangle {} of {}",
                        triangle_index, triangle_count
                    )));
                }
                cell.push(triangle_index);
            }
            cells.push(cell);
        }

        Ok(Self { triangles, cells })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn quad_directions() -> Vec<(f32, f32)> {
        vec![(-30.0, -30.0), (-30.0, 30.0), (30.0, -30.0), (30.0, 30.0)]
    }

    fn assert_weights_sum_to_one(hit: &TriangleHit) {
        let sum: f32 = hit.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-3, "weights sum to {}", sum);
    }

    #[test]
    fn test_every_sample_covers_itself() {
        let directions = quad_directions();
        let grid = SampleGrid::build(&directions).unwrap();

        for (index, &(elevation, azimuth)) in directions.iter().enumerate() {
            let hit = grid.lookup_triangle(elevation, azimuth).unwrap();
            assert_weights_sum_to_one(&hit);

            // The weight at the matching vertex must dominate.
            let slot = hit
                .samples
                .iter()
                .position(|&sample| sample == index as u32)
                .unwrap();
            assert!(hit.weights[slot] > 0.99);
        }
    }

    #[test]
    fn test_centroid_lookup() {
        let grid = SampleGrid::build(&quad_directions()).unwrap();
        let hit = grid.lookup_triangle(0.0, 0.0).unwrap();
        assert_weights_sum_to_one(&hit);
        for &weight in hit.weights.iter() {
            assert!(weight > -1e-3 && weight < 1.0);
        }
    }

    #[test]
    fn test_miss_outside_coverage() {
        let grid = SampleGrid::build(&quad_directions()).unwrap();
        assert!(grid.lookup_triangle(80.0, 0.0).is_none());
        assert!(grid.lookup_triangle(0.0, 120.0).is_none());
    }

    #[test]
    fn test_edge_query_is_deterministic() {
        let grid = SampleGrid::build(&quad_directions()).unwrap();
        // The quad center lies on the diagonal shared by both triangles.
        let first = grid.lookup_triangle(0.0, 0.0).unwrap();
        for _ in 0..10 {
            assert_eq!(grid.lookup_triangle(0.0, 0.0).unwrap(), first);
        }
    }

    #[test]
    fn test_seam_continuity() {
        // A ring of samples around the head at two elevations. The seam at ±180
        // must be covered from both sides. The rings are offset against each other
        // so no four directions are cocircular.
        let mut directions = Vec::new();
        for &(elevation, offset) in &[(-45.0f32, 15.0f32), (45.0, 22.5)] {
            let mut azimuth = -180.0f32 + offset;
            while azimuth < 180.0 {
                directions.push((elevation, azimuth));
                azimuth += 45.0;
            }
        }
        let grid = SampleGrid::build(&directions).unwrap();

        let west = grid.lookup_triangle(0.0, -179.9).unwrap();
        let east = grid.lookup_triangle(0.0, 179.9).unwrap();
        assert_weights_sum_to_one(&west);
        assert_weights_sum_to_one(&east);

        // Both queries must blend the same samples straddling the seam, with nearly
        // equal weights: the two query points are 0.2 degrees apart on the sphere.
        let mut west_pairs: Vec<(u32, f32)> = west
            .samples
            .iter()
            .copied()
            .zip(west.weights.iter().copied())
            .collect();
        let mut east_pairs: Vec<(u32, f32)> = east
            .samples
            .iter()
            .copied()
            .zip(east.weights.iter().copied())
            .collect();
        west_pairs.sort_by_key(|&(sample, _)| sample);
        east_pairs.sort_by_key(|&(sample, _)| sample);
        for (&(ws, ww), &(es, ew)) in west_pairs.iter().zip(east_pairs.iter()) {
            assert_eq!(ws, es);
            assert!((ww - ew).abs() < 0.05, "{} vs {}", ww, ew);
        }
    }

    #[test]
    fn test_pole_coverage() {
        let mut directions = quad_directions();
        directions.push((90.0, 0.0));
        directions.push((-90.0, 0.0));
        let grid = SampleGrid::build(&directions).unwrap();

        let top = grid.lookup_triangle(89.0, 77.0).unwrap();
        assert!(top.samples.contains(&4));
        let bottom = grid.lookup_triangle(-89.0, -133.0).unwrap();
        assert!(bottom.samples.contains(&5));
    }

    #[test]
    fn test_round_trip() {
        let grid = SampleGrid::build(&quad_directions()).unwrap();

        let mut bytes = Vec::new();
        grid.write(&mut bytes).unwrap();
        let restored = SampleGrid::read(&mut bytes.as_slice(), 4).unwrap();

        assert_eq!(grid, restored);
        assert_eq!(
            grid.lookup_triangle(5.0, -7.0),
            restored.lookup_triangle(5.0, -7.0)
        );
    }

    #[test]
    fn test_truncated_read_fails() {
        let grid = SampleGrid::build(&quad_directions()).unwrap();
        let mut bytes = Vec::new();
        grid.write(&mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);
        assert!(SampleGrid::read(&mut bytes.as_slice(), 4).is_err());
    }

    #[test]
    fn test_read_rejects_oversized_counts() {
        // A triangle count no real file could hold must be rejected up front, not
        // taken as an allocation size.
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
        assert!(matches!(
            SampleGrid::read(&mut bytes.as_slice(), 4),
            Err(BinauralError::InvalidFileFormat(_))
        ));

        // Same for a cell claiming more triangles than the file declares.
        let grid = SampleGrid::build(&quad_directions()).unwrap();
        let mut bytes = Vec::new();
        grid.write(&mut bytes).unwrap();
        let first_cell_count = 4 + grid.triangles().len() * 36 + 8;
        bytes[first_cell_count..first_cell_count + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            SampleGrid::read(&mut bytes.as_slice(), 4),
            Err(BinauralError::InvalidFileFormat(_))
        ));
    }

    #[test]
    fn test_too_few_directions() {
        assert!(matches!(
            SampleGrid::build(&[(0.0, 0.0), (10.0, 10.0)]),
            Err(BinauralError::TriangulationFailed(_))
        ));
    }
}
