//! Course and hole loading
//!
//! A course is a directory under the course root:
//!
//! ```text
//! <root>/<course id>/course.json   { "title": "...", "holes": ["01.json", ...] }
//! <root>/<course id>/01.json       { "par", "tee", "pin", "target", "mesh" }
//! ```
//!
//! The mesh is a shared vertex list plus one index group per surface.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use super::terrain::{Surface, TerrainBuilder, TerrainError, TerrainQuery};
use super::{horizontal, Vec3};

pub const COURSE_FILE: &str = "course.json";

#[derive(Debug, thiserror::Error)]
pub enum HoleLoadError {
    #[error("{} could not be read: {source}", .path.display())]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is malformed: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("{} is missing required geometry: {reason}", .path.display())]
    MissingGeometry { path: PathBuf, reason: String },
}

#[derive(Debug, Deserialize)]
struct CourseFile {
    title: String,
    holes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HoleFile {
    par: u8,
    tee: [f32; 3],
    pin: [f32; 3],
    target: [f32; 3],
    mesh: Option<MeshFile>,
    #[serde(default)]
    cell_size: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct MeshFile {
    vertices: Vec<[f32; 3]>,
    groups: Vec<SurfaceGroup>,
}

#[derive(Debug, Deserialize)]
struct SurfaceGroup {
    surface: Surface,
    indices: Vec<u32>,
}

/// Static data for one hole. Immutable once loaded.
#[derive(Debug)]
pub struct HoleData {
    pub par: u8,
    pub tee: Vec3,
    pub pin: Vec3,
    pub target: Vec3,
    pub terrain: TerrainQuery,
    /// File the hole was loaded from; empty for generated holes
    pub source: PathBuf,
}

impl HoleData {
    /// Hole built from geometry that never touched disk
    pub fn in_memory(par: u8, tee: Vec3, pin: Vec3, target: Vec3, terrain: TerrainQuery) -> Self {
        Self {
            par,
            tee,
            pin,
            target,
            terrain,
            source: PathBuf::new(),
        }
    }

    /// Surface under the tee, fairway if the tee sits off the mesh
    pub fn tee_surface(&self) -> Surface {
        self.terrain
            .intersect(&self.tee)
            .map(|hit| hit.surface)
            .unwrap_or(Surface::Fairway)
    }

    /// Horizontal distance from `position` to the pin
    pub fn distance_to_pin(&self, position: &Vec3) -> f32 {
        horizontal(&(self.pin - position)).norm()
    }
}

/// An ordered set of holes
#[derive(Debug, Clone)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub holes: Vec<Arc<HoleData>>,
}

impl Course {
    pub fn hole(&self, index: usize) -> Option<&Arc<HoleData>> {
        self.holes.get(index)
    }

    pub fn len(&self) -> usize {
        self.holes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holes.is_empty()
    }
}

fn to_vec3(v: [f32; 3]) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}

/// Load and validate a single hole file
pub fn load_hole(path: &Path) -> Result<HoleData, HoleLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| HoleLoadError::Missing {
        path: path.to_path_buf(),
        source,
    })?;

    let malformed = |reason: String| HoleLoadError::Malformed {
        path: path.to_path_buf(),
        reason,
    };
    let missing_geometry = |reason: String| HoleLoadError::MissingGeometry {
        path: path.to_path_buf(),
        reason,
    };

    let file: HoleFile = serde_json::from_str(&raw).map_err(|e| malformed(e.to_string()))?;

    if file.par == 0 {
        return Err(malformed("par must be at least 1".to_string()));
    }
    let (tee, pin, target) = (to_vec3(file.tee), to_vec3(file.pin), to_vec3(file.target));
    if ![tee, pin, target].iter().all(|v| v.iter().all(|c| c.is_finite())) {
        return Err(malformed("tee, pin and target must be finite".to_string()));
    }

    let mesh = file
        .mesh
        .ok_or_else(|| missing_geometry("no collision mesh".to_string()))?;
    let vertices: Vec<Vec3> = mesh.vertices.into_iter().map(to_vec3).collect();

    let mut builder = TerrainBuilder::new();
    if let Some(cell_size) = file.cell_size {
        builder.cell_size(cell_size);
    }
    for group in &mesh.groups {
        builder
            .add_group(&vertices, &group.indices, group.surface)
            .map_err(|e| malformed(e.to_string()))?;
    }
    let terrain = builder.build().map_err(|e| match e {
        TerrainError::Empty => missing_geometry(e.to_string()),
        other => malformed(other.to_string()),
    })?;

    for (name, point) in [("tee", &tee), ("pin", &pin)] {
        if terrain.intersect(point).is_none() {
            return Err(missing_geometry(format!("no ground under the {name}")));
        }
    }

    tracing::debug!(
        path = %path.display(),
        par = file.par,
        triangles = terrain.triangle_count(),
        "Hole loaded"
    );

    Ok(HoleData {
        par: file.par,
        tee,
        pin,
        target,
        terrain,
        source: path.to_path_buf(),
    })
}

/// Course identifiers are relative directory names under the course root
fn course_dir(root: &Path, id: &str) -> Result<PathBuf, HoleLoadError> {
    let relative = Path::new(id);
    let valid = !id.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !valid {
        return Err(HoleLoadError::Malformed {
            path: relative.to_path_buf(),
            reason: "course identifier must be a relative directory name".to_string(),
        });
    }
    Ok(root.join(relative))
}

/// Load every hole of the course `id` under `root`
pub fn load_course(root: &Path, id: &str) -> Result<Course, HoleLoadError> {
    let dir = course_dir(root, id)?;
    let index_path = dir.join(COURSE_FILE);

    let raw = std::fs::read_to_string(&index_path).map_err(|source| HoleLoadError::Missing {
        path: index_path.clone(),
        source,
    })?;
    let index: CourseFile =
        serde_json::from_str(&raw).map_err(|e| HoleLoadError::Malformed {
            path: index_path.clone(),
            reason: e.to_string(),
        })?;

    if index.holes.is_empty() {
        return Err(HoleLoadError::Malformed {
            path: index_path,
            reason: "course lists no holes".to_string(),
        });
    }

    let mut holes = Vec::with_capacity(index.holes.len());
    for name in &index.holes {
        let hole_path = course_dir(&dir, name)?;
        holes.push(Arc::new(load_hole(&hole_path)?));
    }

    tracing::info!(course = %id, title = %index.title, holes = holes.len(), "Course loaded");

    Ok(Course {
        id: id.to_string(),
        title: index.title,
        holes,
    })
}
