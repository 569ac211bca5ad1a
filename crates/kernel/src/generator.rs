use chunkstream_common::ChunkCoord;

use crate::chunk::{Chunk, Material};

/// Horizontal frequency of the surface heightmap.
const SURFACE_SCALE: f64 = 0.02;
/// Tallest mountain, in cells above ground level.
const SURFACE_AMPLITUDE: f64 = 48.0;
/// Frequency of the cave field.
const CAVE_SCALE: f64 = 0.05;
/// Depth of the sand cap on top of exposed rock.
const SAND_DEPTH: i64 = 2;

/// Deterministic terrain source for chunks that have never been saved.
///
/// World space has `y` growing downward with ground level at `y = 0`. Above
/// ground a 1D heightmap raises mountains capped with sand; below ground rock
/// is solid near the surface and opens into caves with depth. The same seed
/// and coordinate always produce the same chunk, so an unmodified generated
/// chunk can be dropped and regenerated without loss.
#[derive(Debug, Clone, Copy)]
pub struct Generator {
    seed: u64,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Produce a clean chunk at revision 0.
    pub fn generate(&self, coord: ChunkCoord, size: usize) -> Chunk {
        let mut chunk = Chunk::new(coord, size);
        let edge = size as i64;
        let base_x = coord.x as i64 * edge;
        let base_y = coord.y as i64 * edge;

        for lx in 0..size {
            let x = base_x + lx as i64;
            let height = self.surface_height(x);
            for ly in 0..size {
                let y = base_y + ly as i64;
                chunk.fill(lx, ly, self.material_at(x, y, height));
            }
        }
        chunk
    }

    fn material_at(&self, x: i64, y: i64, surface_height: i64) -> Material {
        if y < 0 {
            let altitude = -y;
            if altitude > surface_height {
                Material::Empty
            } else if surface_height - altitude < SAND_DEPTH {
                Material::Sand
            } else {
                Material::Rock
            }
        } else {
            // Caves only open up once the threshold drops below 1.0.
            let threshold = 0.5 + 8.0 / (y as f64 + 8.0);
            if self.noise_2d(x as f64 * CAVE_SCALE, y as f64 * CAVE_SCALE) > threshold {
                Material::Empty
            } else {
                Material::Rock
            }
        }
    }

    fn surface_height(&self, x: i64) -> i64 {
        (self.noise_1d(x as f64 * SURFACE_SCALE) * SURFACE_AMPLITUDE) as i64
    }

    fn noise_1d(&self, x: f64) -> f64 {
        let x0 = x.floor();
        let t = smoothstep(x - x0);
        let i = x0 as i64;
        let a = self.lattice(i, 0, 1);
        let b = self.lattice(i + 1, 0, 1);
        a + (b - a) * t
    }

    fn noise_2d(&self, x: f64, y: f64) -> f64 {
        let x0 = x.floor();
        let y0 = y.floor();
        let tx = smoothstep(x - x0);
        let ty = smoothstep(y - y0);
        let (ix, iy) = (x0 as i64, y0 as i64);

        let v00 = self.lattice(ix, iy, 2);
        let v10 = self.lattice(ix + 1, iy, 2);
        let v01 = self.lattice(ix, iy + 1, 2);
        let v11 = self.lattice(ix + 1, iy + 1, 2);

        let top = v00 + (v10 - v00) * tx;
        let bottom = v01 + (v11 - v01) * tx;
        top + (bottom - top) * ty
    }

    /// Pseudo-random value in `[0, 1)` for a lattice point on a channel.
    fn lattice(&self, ix: i64, iy: i64, channel: u64) -> f64 {
        let h = splitmix64(
            self.seed ^ splitmix64(ix as u64 ^ splitmix64(iy as u64 ^ channel.rotate_left(32))),
        );
        (h >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

/// Splitmix64 step: a fast, well-mixed hash for reproducible terrain.
fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
