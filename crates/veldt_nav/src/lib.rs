//! Navigation-mesh loading and the pathfinding adapter used by the monster
//! AI.
//!
//! The on-disk format is the `MSET` tile container: a header `{ magic,
//! version, num_tiles, params }` followed by `num_tiles` records of
//! `{ tile_ref: u32, data_size: i32, data }`, everything little-endian.
//! Magic and version mismatches abort the load. Tile data is a small
//! convex-polygon mesh: shared vertices plus up-to-quad polygons with
//! per-edge neighbour indices.
//!
//! The adapter never leaves a caller without a path: when the mesh is not
//! loaded, or either endpoint lies outside every polygon, [`find_path`]
//! degrades to the straight 2-point polyline so the AI keeps moving. All
//! queries take `&self`; nothing here is mutated after loading.
//!
//! [`find_path`]: NavMesh::find_path

mod baker;

use std::fs;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use glam::Vec3;
use thiserror::Error;
use tracing::info;

pub use baker::bake_dummy_map;

/// `'MSET'` in the header of a nav-mesh set file.
pub const NAVMESH_SET_MAGIC: i32 =
    ('M' as i32) << 24 | ('S' as i32) << 16 | ('E' as i32) << 8 | 'T' as i32;

pub const NAVMESH_SET_VERSION: i32 = 1;

/// Marker for "no vertex" in a polygon's vertex list and "no neighbour"
/// across an edge.
const NULL_INDEX: u16 = 0xFFFF;

/// Up to this many vertices per polygon.
const VERTS_PER_POLY: usize = 4;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NavMeshError {
    #[error("an I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad nav-mesh set magic of {0:#010x}")]
    BadMagic(i32),
    #[error("unsupported nav-mesh set version of {0}")]
    UnsupportedVersion(i32),
    #[error("invalid tile count of {0}")]
    InvalidTileCount(i32),
    #[error("tile data is truncated or malformed")]
    MalformedTile,
}

/// Global parameters of a mesh set, mirrored from the file header.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NavMeshParams {
    pub orig: [f32; 3],
    pub tile_width: f32,
    pub tile_height: f32,
    pub max_tiles: i32,
    pub max_polys: i32,
}

/// A convex polygon of the mesh. Unused trailing vertex slots hold
/// `0xFFFF`; `neis[i]` is the polygon across the edge from vertex `i` to
/// vertex `i + 1`, or `0xFFFF` at a border.
#[derive(Copy, Clone, Debug)]
struct Poly {
    verts: [u16; VERTS_PER_POLY],
    neis: [u16; VERTS_PER_POLY],
}

impl Poly {
    fn vert_count(&self) -> usize {
        self.verts.iter().take_while(|&&v| v != NULL_INDEX).count()
    }
}

struct NavTile {
    #[allow(dead_code)]
    tile_ref: u32,
    verts: Vec<Vec3>,
    polys: Vec<Poly>,
}

struct MeshSet {
    #[allow(dead_code)]
    params: NavMeshParams,
    tiles: Vec<NavTile>,
}

/// The pathfinding adapter. Construct unloaded, then [`load`] a baked
/// `.bin` set; a failed load leaves the mesh unloaded and every query on
/// the straight-line fallback.
///
/// [`load`]: Self::load
#[derive(Default)]
pub struct NavMesh {
    set: Option<MeshSet>,
}

impl NavMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.set.is_some()
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), NavMeshError> {
        let bytes = fs::read(path.as_ref())?;
        let mut r = &bytes[..];

        let magic = r.read_i32::<LittleEndian>()?;
        if magic != NAVMESH_SET_MAGIC {
            return Err(NavMeshError::BadMagic(magic));
        }

        let version = r.read_i32::<LittleEndian>()?;
        if version != NAVMESH_SET_VERSION {
            return Err(NavMeshError::UnsupportedVersion(version));
        }

        let num_tiles = r.read_i32::<LittleEndian>()?;
        if num_tiles < 0 {
            return Err(NavMeshError::InvalidTileCount(num_tiles));
        }

        let params = NavMeshParams {
            orig: [
                r.read_f32::<LittleEndian>()?,
                r.read_f32::<LittleEndian>()?,
                r.read_f32::<LittleEndian>()?,
            ],
            tile_width: r.read_f32::<LittleEndian>()?,
            tile_height: r.read_f32::<LittleEndian>()?,
            max_tiles: r.read_i32::<LittleEndian>()?,
            max_polys: r.read_i32::<LittleEndian>()?,
        };

        let mut tiles = Vec::with_capacity(num_tiles as usize);

        for _ in 0..num_tiles {
            let tile_ref = r.read_u32::<LittleEndian>()?;
            let data_size = r.read_i32::<LittleEndian>()?;

            if data_size < 0 || data_size as usize > r.len() {
                return Err(NavMeshError::MalformedTile);
            }

            let (data, rest) = r.split_at(data_size as usize);
            r = rest;

            tiles.push(parse_tile(tile_ref, data)?);
        }

        info!(
            path = %path.as_ref().display(),
            tiles = tiles.len(),
            "loaded nav-mesh set"
        );

        self.set = Some(MeshSet { params, tiles });

        Ok(())
    }

    /// Finds a polyline from `start` to `end` across the mesh. Waypoints
    /// are 2-D world coordinates with z held at 0.
    ///
    /// When the mesh is unloaded, the endpoints lie outside it, or no
    /// polygon corridor connects them, the result is the straight
    /// `[start, end]` polyline so the caller can still make progress.
    pub fn find_path(&self, start: Vec3, end: Vec3) -> Vec<Vec3> {
        let start = flatten(start);
        let end = flatten(end);

        let Some(set) = &self.set else {
            return vec![start, end];
        };

        let located = set.tiles.iter().find_map(|tile| {
            let from = tile.poly_at(start)?;
            let to = tile.poly_at(end)?;
            Some((tile, from, to))
        });

        // Endpoints outside the mesh (or spread over different tiles) fall
        // back to the straight line.
        let Some((tile, from, to)) = located else {
            return vec![start, end];
        };

        if from == to {
            return vec![start, end];
        }

        match tile.corridor(from, to) {
            Some(corridor) => {
                let mut path = Vec::with_capacity(corridor.len() + 1);
                path.push(start);

                // One waypoint per crossed edge: its midpoint. A funnel
                // pass would tighten this; midpoints keep the monster
                // strictly on the mesh.
                for (poly, edge) in corridor {
                    path.push(tile.edge_midpoint(poly, edge));
                }

                path.push(end);
                path
            }
            None => vec![start, end],
        }
    }
}

fn flatten(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.y, 0.0)
}

fn parse_tile(tile_ref: u32, mut r: &[u8]) -> Result<NavTile, NavMeshError> {
    let malformed = |_| NavMeshError::MalformedTile;

    let vert_count = r.read_u16::<LittleEndian>().map_err(malformed)? as usize;
    let poly_count = r.read_u16::<LittleEndian>().map_err(malformed)? as usize;

    let mut verts = Vec::with_capacity(vert_count);
    for _ in 0..vert_count {
        verts.push(Vec3::new(
            r.read_f32::<LittleEndian>().map_err(malformed)?,
            r.read_f32::<LittleEndian>().map_err(malformed)?,
            r.read_f32::<LittleEndian>().map_err(malformed)?,
        ));
    }

    let mut polys = Vec::with_capacity(poly_count);
    for _ in 0..poly_count {
        let mut poly = Poly {
            verts: [NULL_INDEX; VERTS_PER_POLY],
            neis: [NULL_INDEX; VERTS_PER_POLY],
        };

        for v in &mut poly.verts {
            *v = r.read_u16::<LittleEndian>().map_err(malformed)?;
        }
        for n in &mut poly.neis {
            *n = r.read_u16::<LittleEndian>().map_err(malformed)?;
        }

        for &v in &poly.verts {
            if v != NULL_INDEX && v as usize >= vert_count {
                return Err(NavMeshError::MalformedTile);
            }
        }
        for &n in &poly.neis {
            if n != NULL_INDEX && n as usize >= poly_count {
                return Err(NavMeshError::MalformedTile);
            }
        }

        if poly.vert_count() < 3 {
            return Err(NavMeshError::MalformedTile);
        }

        polys.push(poly);
    }

    if !r.is_empty() {
        return Err(NavMeshError::MalformedTile);
    }

    Ok(NavTile {
        tile_ref,
        verts,
        polys,
    })
}

impl NavTile {
    /// Index of the polygon containing the point, if any.
    fn poly_at(&self, p: Vec3) -> Option<usize> {
        (0..self.polys.len()).find(|&i| self.contains(i, p))
    }

    fn contains(&self, poly: usize, p: Vec3) -> bool {
        let poly = &self.polys[poly];
        let n = poly.vert_count();

        // Convex polygon: the point must be on the same side of every
        // edge, either winding.
        let mut sign = 0.0f32;

        for i in 0..n {
            let a = self.verts[poly.verts[i] as usize];
            let b = self.verts[poly.verts[(i + 1) % n] as usize];

            let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);

            if cross.abs() < f32::EPSILON {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }

        true
    }

    fn poly_center(&self, poly: usize) -> Vec3 {
        let poly = &self.polys[poly];
        let n = poly.vert_count();

        let sum: Vec3 = (0..n).map(|i| self.verts[poly.verts[i] as usize]).sum();
        sum / n as f32
    }

    fn edge_midpoint(&self, poly: usize, edge: usize) -> Vec3 {
        let poly = &self.polys[poly];
        let n = poly.vert_count();

        let a = self.verts[poly.verts[edge] as usize];
        let b = self.verts[poly.verts[(edge + 1) % n] as usize];

        flatten((a + b) / 2.0)
    }

    /// Dijkstra over polygon adjacency. Returns the crossed edges as
    /// `(polygon, edge index)` pairs from `from` towards `to`, or `None`
    /// when the polygons are not connected. Polygon counts are small
    /// enough that a linear-scan open list beats a heap here.
    fn corridor(&self, from: usize, to: usize) -> Option<Vec<(usize, usize)>> {
        let mut dist = vec![f32::INFINITY; self.polys.len()];
        let mut prev: Vec<Option<(usize, usize)>> = vec![None; self.polys.len()];
        let mut open = vec![from];

        dist[from] = 0.0;

        while let Some(pos) = (0..open.len()).min_by(|&a, &b| {
            dist[open[a]]
                .partial_cmp(&dist[open[b]])
                .unwrap_or(std::cmp::Ordering::Equal)
        }) {
            let current = open.swap_remove(pos);

            if current == to {
                let mut edges = vec![];
                let mut at = to;

                while let Some((parent, edge)) = prev[at] {
                    edges.push((parent, edge));
                    at = parent;
                }

                edges.reverse();
                return Some(edges);
            }

            let n = self.polys[current].vert_count();

            for edge in 0..n {
                let nei = self.polys[current].neis[edge];
                if nei == NULL_INDEX {
                    continue;
                }

                let nei = nei as usize;
                let step = self
                    .poly_center(current)
                    .distance(self.poly_center(nei))
                    .max(f32::EPSILON);

                if dist[current] + step < dist[nei] {
                    dist[nei] = dist[current] + step;
                    prev[nei] = Some((current, edge));

                    if !open.contains(&nei) {
                        open.push(nei);
                    }
                }
            }
        }

        None
    }
}
