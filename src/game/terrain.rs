//! Terrain queries against a hole's static collision mesh
//!
//! The mesh is a triangle soup where every triangle carries a surface
//! classification. Queries cast a vertical probe down through the mesh and
//! return the highest ground point beneath the query position. A uniform grid
//! over the XZ plane keeps each query to the handful of triangles overlapping
//! one cell, and the query path never allocates.

use serde::{Deserialize, Serialize};

use super::{Vec2, Vec3};

/// How far above the query position the downward probe starts. A ball that
/// has sunk below the surface during a tick still finds the ground above it.
pub const PROBE_HEIGHT: f32 = 10.0;

/// Default edge length of a broad-phase grid cell (metres)
pub const DEFAULT_CELL_SIZE: f32 = 8.0;

/// Widest collision mesh accepted along either axis (metres)
pub const MAX_EXTENT: f32 = 100_000.0;

/// Cells in the broad-phase grid; the cell size grows until the grid fits
const MAX_GRID_CELLS: usize = 1 << 20;

/// Cell-to-triangle references the grid may hold
const MAX_GRID_ENTRIES: u64 = 1 << 24;

const BARYCENTRIC_EPSILON: f32 = 1.0e-5;

/// Surface classification of a piece of ground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Fairway,
    Rough,
    Bunker,
    Water,
    Green,
    Scrub,
    OutOfBounds,
    Obstacle,
}

impl Surface {
    /// Ball coming to rest here is dropped back into play with a penalty
    pub fn is_hazard(self) -> bool {
        matches!(self, Surface::Water | Surface::Scrub)
    }

    /// Ball touching this surface is out of play and returns to its last rest point
    pub fn is_out_of_bounds(self) -> bool {
        matches!(self, Surface::OutOfBounds)
    }

    /// Ball may be played from here
    pub fn is_playable(self) -> bool {
        !self.is_hazard() && !self.is_out_of_bounds()
    }
}

/// Result of a terrain query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainHit {
    /// Ground height at the query position
    pub height: f32,
    /// Upward facing contact normal
    pub normal: Vec3,
    /// Classification of the ground that was hit
    pub surface: Surface,
}

impl TerrainHit {
    /// Positive when the position is below the ground
    pub fn penetration(&self, position: &Vec3) -> f32 {
        self.height - position.y
    }
}

#[derive(Debug, Clone)]
struct Triangle {
    a: Vec3,
    b: Vec3,
    c: Vec3,
    normal: Vec3,
    surface: Surface,
}

impl Triangle {
    /// Height of the triangle's plane at (x, z) if the point lies inside it
    fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        let v0 = Vec2::new(self.b.x - self.a.x, self.b.z - self.a.z);
        let v1 = Vec2::new(self.c.x - self.a.x, self.c.z - self.a.z);
        let v2 = Vec2::new(x - self.a.x, z - self.a.z);

        let det = v0.x * v1.y - v1.x * v0.y;
        if det.abs() < f32::EPSILON {
            return None;
        }

        let u = (v2.x * v1.y - v1.x * v2.y) / det;
        let v = (v0.x * v2.y - v2.x * v0.y) / det;
        if u < -BARYCENTRIC_EPSILON || v < -BARYCENTRIC_EPSILON || u + v > 1.0 + BARYCENTRIC_EPSILON
        {
            return None;
        }

        Some(self.a.y + u * (self.b.y - self.a.y) + v * (self.c.y - self.a.y))
    }
}

/// Errors building collision geometry
#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error("collision mesh contains no walkable triangles")]
    Empty,

    #[error("{surface:?} index list length {len} is not a multiple of 3")]
    IncompleteTriangle { surface: Surface, len: usize },

    #[error("vertex index {index} out of range ({vertex_count} vertices)")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("non-finite vertex at index {0}")]
    NonFiniteVertex(usize),

    #[error("collision mesh spans {width} x {depth} m, beyond {MAX_EXTENT} m")]
    TooLarge { width: f32, depth: f32 },

    #[error("broad-phase grid would need {entries} cell entries")]
    TooDense { entries: u64 },
}

/// Incremental construction of a [`TerrainQuery`]
#[derive(Debug, Default)]
pub struct TerrainBuilder {
    triangles: Vec<Triangle>,
    cell_size: Option<f32>,
}

impl TerrainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the broad-phase grid cell size
    pub fn cell_size(&mut self, cell_size: f32) -> &mut Self {
        self.cell_size = Some(cell_size);
        self
    }

    /// Add an indexed group of triangles sharing one surface classification
    pub fn add_group(
        &mut self,
        vertices: &[Vec3],
        indices: &[u32],
        surface: Surface,
    ) -> Result<&mut Self, TerrainError> {
        if indices.len() % 3 != 0 {
            return Err(TerrainError::IncompleteTriangle {
                surface,
                len: indices.len(),
            });
        }

        if let Some(idx) = vertices.iter().position(|v| !v.iter().all(|c| c.is_finite())) {
            return Err(TerrainError::NonFiniteVertex(idx));
        }

        let fetch = |index: u32| {
            vertices
                .get(index as usize)
                .copied()
                .ok_or(TerrainError::IndexOutOfRange {
                    index,
                    vertex_count: vertices.len(),
                })
        };

        for tri in indices.chunks_exact(3) {
            self.add_triangle(fetch(tri[0])?, fetch(tri[1])?, fetch(tri[2])?, surface);
        }

        Ok(self)
    }

    /// Add a flat axis-aligned rectangle at the given height
    pub fn add_quad(&mut self, min: Vec2, max: Vec2, height: f32, surface: Surface) -> &mut Self {
        let a = Vec3::new(min.x, height, min.y);
        let b = Vec3::new(max.x, height, min.y);
        let c = Vec3::new(max.x, height, max.y);
        let d = Vec3::new(min.x, height, max.y);
        self.add_triangle(a, b, c, surface);
        self.add_triangle(a, c, d, surface);
        self
    }

    /// Add a single triangle. Triangles with no extent on the XZ plane are
    /// skipped since a vertical probe can never hit them.
    pub fn add_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3, surface: Surface) -> &mut Self {
        if ![a, b, c].iter().all(|v| v.iter().all(|x| x.is_finite())) {
            return self;
        }
        let normal = (b - a).cross(&(c - a));
        let Some(mut normal) = normal.try_normalize(f32::EPSILON) else {
            return self;
        };
        if normal.y.abs() < 1.0e-4 {
            return self;
        }
        if normal.y < 0.0 {
            normal = -normal;
        }

        self.triangles.push(Triangle {
            a,
            b,
            c,
            normal,
            surface,
        });
        self
    }

    pub fn build(self) -> Result<TerrainQuery, TerrainError> {
        TerrainQuery::from_triangles(self.triangles, self.cell_size.unwrap_or(DEFAULT_CELL_SIZE))
    }
}

/// Cell size, columns and rows of a grid over `span`, doubling the cell
/// size until the cell count fits
fn grid_dimensions(span: Vec2, mut cell_size: f32) -> (f32, usize, usize) {
    loop {
        let cols = ((span.x / cell_size).ceil() as usize).max(1);
        let rows = ((span.y / cell_size).ceil() as usize).max(1);
        match cols.checked_mul(rows) {
            Some(cells) if cells <= MAX_GRID_CELLS => return (cell_size, cols, rows),
            _ => cell_size *= 2.0,
        }
    }
}

/// Read-only spatial query over a hole's collision mesh
#[derive(Debug)]
pub struct TerrainQuery {
    triangles: Vec<Triangle>,
    min: Vec2,
    max: Vec2,
    cell_size: f32,
    cols: usize,
    rows: usize,
    /// CSR layout: triangles of cell `i` are `cell_items[cell_start[i]..cell_start[i + 1]]`
    cell_start: Vec<u32>,
    cell_items: Vec<u32>,
}

impl TerrainQuery {
    fn from_triangles(triangles: Vec<Triangle>, cell_size: f32) -> Result<Self, TerrainError> {
        if triangles.is_empty() {
            return Err(TerrainError::Empty);
        }

        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };

        let mut min = Vec2::new(f32::MAX, f32::MAX);
        let mut max = Vec2::new(f32::MIN, f32::MIN);
        for tri in &triangles {
            for v in [&tri.a, &tri.b, &tri.c] {
                min.x = min.x.min(v.x);
                min.y = min.y.min(v.z);
                max.x = max.x.max(v.x);
                max.y = max.y.max(v.z);
            }
        }

        let span = max - min;
        if !(span.x <= MAX_EXTENT && span.y <= MAX_EXTENT) {
            return Err(TerrainError::TooLarge {
                width: span.x,
                depth: span.y,
            });
        }

        let (grid_cell, cols, rows) = grid_dimensions(span, cell_size);
        if grid_cell != cell_size {
            tracing::debug!(requested = cell_size, used = grid_cell, "Coarsened terrain grid");
        }
        let cell_size = grid_cell;

        let mut query = Self {
            triangles,
            min,
            max,
            cell_size,
            cols,
            rows,
            cell_start: Vec::new(),
            cell_items: Vec::new(),
        };
        query.build_grid()?;
        Ok(query)
    }

    fn build_grid(&mut self) -> Result<(), TerrainError> {
        let cell_count = self.cols * self.rows;
        let ranges: Vec<_> = self
            .triangles
            .iter()
            .map(|tri| {
                let lo = Vec2::new(tri.a.x.min(tri.b.x).min(tri.c.x), tri.a.z.min(tri.b.z).min(tri.c.z));
                let hi = Vec2::new(tri.a.x.max(tri.b.x).max(tri.c.x), tri.a.z.max(tri.b.z).max(tri.c.z));
                (self.cell_coords(lo.x, lo.y), self.cell_coords(hi.x, hi.y))
            })
            .collect();

        let entries: u64 = ranges
            .iter()
            .map(|((c0, r0), (c1, r1))| ((c1 - c0 + 1) * (r1 - r0 + 1)) as u64)
            .sum();
        if entries > MAX_GRID_ENTRIES {
            return Err(TerrainError::TooDense { entries });
        }

        let mut counts = vec![0u32; cell_count + 1];
        for ((c0, r0), (c1, r1)) in &ranges {
            for r in *r0..=*r1 {
                for c in *c0..=*c1 {
                    counts[r * self.cols + c + 1] += 1;
                }
            }
        }
        for i in 1..counts.len() {
            counts[i] += counts[i - 1];
        }

        let mut cursor = counts.clone();
        let mut items = vec![0u32; counts[cell_count] as usize];
        for (idx, ((c0, r0), (c1, r1))) in ranges.iter().enumerate() {
            for r in *r0..=*r1 {
                for c in *c0..=*c1 {
                    let cell = r * self.cols + c;
                    items[cursor[cell] as usize] = idx as u32;
                    cursor[cell] += 1;
                }
            }
        }

        self.cell_start = counts;
        self.cell_items = items;
        Ok(())
    }

    /// Grid cell containing (x, z), clamped to the grid
    fn cell_coords(&self, x: f32, z: f32) -> (usize, usize) {
        let c = ((x - self.min.x) / self.cell_size).floor().max(0.0) as usize;
        let r = ((z - self.min.y) / self.cell_size).floor().max(0.0) as usize;
        (c.min(self.cols - 1), r.min(self.rows - 1))
    }

    /// Is (x, z) within the collision bounds
    pub fn contains(&self, x: f32, z: f32) -> bool {
        x >= self.min.x && x <= self.max.x && z >= self.min.y && z <= self.max.y
    }

    /// Highest ground point beneath `position`.
    ///
    /// Returns `None` outside the collision bounds, or where the probe finds
    /// no geometry (holes in the mesh).
    pub fn intersect(&self, position: &Vec3) -> Option<TerrainHit> {
        if !position.iter().all(|c| c.is_finite()) || !self.contains(position.x, position.z) {
            return None;
        }

        let (c, r) = self.cell_coords(position.x, position.z);
        let cell = r * self.cols + c;
        let start = self.cell_start[cell] as usize;
        let end = self.cell_start[cell + 1] as usize;
        let ceiling = position.y + PROBE_HEIGHT;

        let mut best: Option<TerrainHit> = None;
        for &idx in &self.cell_items[start..end] {
            let tri = &self.triangles[idx as usize];
            let Some(height) = tri.height_at(position.x, position.z) else {
                continue;
            };
            if height > ceiling {
                continue;
            }
            if best.map_or(true, |b| height > b.height) {
                best = Some(TerrainHit {
                    height,
                    normal: tri.normal,
                    surface: tri.surface,
                });
            }
        }

        best
    }

    /// Collision bounds on the XZ plane (min, max)
    pub fn bounds(&self) -> (Vec2, Vec2) {
        (self.min, self.max)
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(surface: Surface) -> TerrainQuery {
        let mut builder = TerrainBuilder::new();
        builder.add_quad(Vec2::new(-50.0, -50.0), Vec2::new(50.0, 50.0), 0.0, surface);
        builder.build().unwrap()
    }

    #[test]
    fn flat_ground_reports_height_and_up_normal() {
        let terrain = flat(Surface::Fairway);
        let hit = terrain.intersect(&Vec3::new(3.0, 2.0, -7.5)).unwrap();
        assert_eq!(hit.height, 0.0);
        assert_eq!(hit.surface, Surface::Fairway);
        assert!((hit.normal - Vec3::y()).norm() < 1.0e-6);
    }

    #[test]
    fn outside_bounds_has_no_terrain() {
        let terrain = flat(Surface::Green);
        assert!(terrain.intersect(&Vec3::new(60.0, 0.0, 0.0)).is_none());
        assert!(terrain.intersect(&Vec3::new(0.0, 0.0, f32::NAN)).is_none());
    }

    #[test]
    fn highest_layer_beneath_probe_wins() {
        let mut builder = TerrainBuilder::new();
        builder
            .add_quad(Vec2::new(-20.0, -20.0), Vec2::new(20.0, 20.0), 0.0, Surface::Water)
            .add_quad(Vec2::new(-5.0, -5.0), Vec2::new(5.0, 5.0), 1.0, Surface::Green);
        let terrain = builder.build().unwrap();

        let on_green = terrain.intersect(&Vec3::new(0.0, 1.5, 0.0)).unwrap();
        assert_eq!(on_green.surface, Surface::Green);
        assert_eq!(on_green.height, 1.0);

        let off_green = terrain.intersect(&Vec3::new(10.0, 1.5, 0.0)).unwrap();
        assert_eq!(off_green.surface, Surface::Water);
    }

    #[test]
    fn geometry_far_above_probe_is_ignored() {
        let mut builder = TerrainBuilder::new();
        builder
            .add_quad(Vec2::new(-20.0, -20.0), Vec2::new(20.0, 20.0), 0.0, Surface::Rough)
            .add_quad(Vec2::new(-5.0, -5.0), Vec2::new(5.0, 5.0), 40.0, Surface::Obstacle);
        let terrain = builder.build().unwrap();

        let hit = terrain.intersect(&Vec3::new(0.0, 0.5, 0.0)).unwrap();
        assert_eq!(hit.surface, Surface::Rough);
    }

    #[test]
    fn sloped_triangle_interpolates_height() {
        let mut builder = TerrainBuilder::new();
        builder.cell_size(2.0).add_triangle(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 10.0),
            Surface::Fairway,
        );
        let terrain = builder.build().unwrap();

        let hit = terrain.intersect(&Vec3::new(5.0, 3.0, 1.0)).unwrap();
        assert!((hit.height - 0.5).abs() < 1.0e-5);
        assert!(hit.normal.y > 0.0);
        assert!(hit.normal.x < 0.0);
    }

    #[test]
    fn bad_index_groups_are_rejected() {
        let verts = [Vec3::zeros(), Vec3::x(), Vec3::z()];
        let mut builder = TerrainBuilder::new();
        assert!(matches!(
            builder.add_group(&verts, &[0, 1], Surface::Green),
            Err(TerrainError::IncompleteTriangle { len: 2, .. })
        ));
        assert!(matches!(
            builder.add_group(&verts, &[0, 1, 7], Surface::Green),
            Err(TerrainError::IndexOutOfRange { index: 7, .. })
        ));
        assert!(matches!(TerrainBuilder::new().build(), Err(TerrainError::Empty)));
    }

    #[test]
    fn absurd_extents_are_an_error_not_a_crash() {
        let mut builder = TerrainBuilder::new();
        builder.add_quad(Vec2::new(-1.0e30, -1.0e30), Vec2::new(1.0e30, 1.0e30), 0.0, Surface::Fairway);
        assert!(matches!(builder.build(), Err(TerrainError::TooLarge { .. })));

        let mut builder = TerrainBuilder::new();
        builder.add_quad(Vec2::new(0.0, 0.0), Vec2::new(MAX_EXTENT * 2.0, 10.0), 0.0, Surface::Rough);
        assert!(matches!(builder.build(), Err(TerrainError::TooLarge { .. })));

        // non-finite corners never make it into the mesh
        let mut builder = TerrainBuilder::new();
        builder.add_triangle(Vec3::zeros(), Vec3::new(f32::INFINITY, 0.0, 0.0), Vec3::z(), Surface::Green);
        assert!(matches!(builder.build(), Err(TerrainError::Empty)));
    }

    #[test]
    fn fine_cell_size_is_coarsened_to_fit() {
        let mut builder = TerrainBuilder::new();
        builder
            .cell_size(0.001)
            .add_quad(Vec2::new(-500.0, -500.0), Vec2::new(500.0, 500.0), 0.0, Surface::Fairway);
        let terrain = builder.build().unwrap();

        assert!(terrain.cols * terrain.rows <= MAX_GRID_CELLS);
        assert!(terrain.cell_size > 0.001);
        let hit = terrain.intersect(&Vec3::new(123.0, 1.0, -321.0)).unwrap();
        assert_eq!(hit.surface, Surface::Fairway);
        assert_eq!(terrain.triangle_count(), 2);
    }

    #[test]
    fn overlapping_layers_beyond_the_entry_budget_are_rejected() {
        let mut builder = TerrainBuilder::new();
        builder.cell_size(0.1);
        for layer in 0..10 {
            builder.add_quad(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0), layer as f32, Surface::Rough);
        }
        assert!(matches!(builder.build(), Err(TerrainError::TooDense { .. })));
    }
}
