//! Dev-time baking of the dummy map file.
//!
//! Real deployments bake their nav mesh from world geometry with external
//! tooling; this module only guarantees that a fresh checkout has
//! *something* to load. The baked map is a small L-shaped surface useful
//! for exercising obstacle-avoiding corridors: a 50x50 square at the
//! origin with one arm east to x=250 and one arm north to y=250.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::info;

use crate::{NAVMESH_SET_MAGIC, NAVMESH_SET_VERSION};

const NULL: u16 = 0xFFFF;

/// Writes the dummy map container to `path` unless the file already
/// exists.
pub fn bake_dummy_map(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();

    if path.exists() {
        return Ok(());
    }

    let verts: [[f32; 3]; 8] = [
        [0.0, 0.0, 0.0],
        [50.0, 0.0, 0.0],
        [50.0, 50.0, 0.0],
        [0.0, 50.0, 0.0],
        [250.0, 0.0, 0.0],
        [250.0, 50.0, 0.0],
        [50.0, 250.0, 0.0],
        [0.0, 250.0, 0.0],
    ];

    // Origin square, east arm, north arm. Edge i runs from vertex i to
    // vertex i + 1; the paired entry names the polygon across that edge.
    let polys: [([u16; 4], [u16; 4]); 3] = [
        ([0, 1, 2, 3], [NULL, 1, 2, NULL]),
        ([1, 4, 5, 2], [NULL, NULL, NULL, 0]),
        ([3, 2, 6, 7], [0, NULL, NULL, NULL]),
    ];

    let mut tile = Vec::new();
    tile.write_u16::<LittleEndian>(verts.len() as u16)?;
    tile.write_u16::<LittleEndian>(polys.len() as u16)?;

    for vert in &verts {
        for c in vert {
            tile.write_f32::<LittleEndian>(*c)?;
        }
    }

    for (poly_verts, poly_neis) in &polys {
        for v in poly_verts {
            tile.write_u16::<LittleEndian>(*v)?;
        }
        for n in poly_neis {
            tile.write_u16::<LittleEndian>(*n)?;
        }
    }

    let mut w = BufWriter::new(File::create(path)?);

    w.write_i32::<LittleEndian>(NAVMESH_SET_MAGIC)?;
    w.write_i32::<LittleEndian>(NAVMESH_SET_VERSION)?;
    w.write_i32::<LittleEndian>(1)?; // num_tiles

    // params
    for orig in [0.0f32; 3] {
        w.write_f32::<LittleEndian>(orig)?;
    }
    w.write_f32::<LittleEndian>(50.0)?; // tile_width
    w.write_f32::<LittleEndian>(50.0)?; // tile_height
    w.write_i32::<LittleEndian>(1)?; // max_tiles
    w.write_i32::<LittleEndian>(10)?; // max_polys

    w.write_u32::<LittleEndian>(1)?; // tile_ref
    w.write_i32::<LittleEndian>(tile.len() as i32)?;
    w.write_all(&tile)?;

    w.flush()?;

    info!(path = %path.display(), "baked dummy nav-mesh set");

    Ok(())
}
