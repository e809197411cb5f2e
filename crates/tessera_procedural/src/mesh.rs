//! # Tile Mesh Builder
//!
//! Builds one detail level of a tile's surface from its blended heights.
//!
//! ## Layout
//!
//! The interior grid has `R + 1` samples per side (`R` = interior
//! resolution). A detail level with stride `s` keeps every `s`-th sample as
//! the coarse lattice, but the four tile edges are always emitted at stride 1
//! so two neighbours built at different levels share every edge vertex.
//!
//! Vertex order:
//!
//! 1. Coarse lattice, row-major, `(R/s + 1)²` vertices.
//! 2. Skirt fill: the fine edge samples between lattice points, edges in the
//!    order bottom (`gy = 0`), top (`gy = R`), left (`gx = 0`), right
//!    (`gx = R`), each walked in ascending order. `4 · (R/s) · (s - 1)`
//!    vertices.
//!
//! [`MeshData::grid_indices`] records the interior grid sample behind every
//! vertex, since the order above is not a uniform grid walk.
//!
//! Each coarse quad is triangulated as a fan over its perimeter. Quads on the
//! tile border have extra perimeter points; the fan is rooted at a corner
//! that does not touch a fine side where possible, and collinear (zero-area)
//! fan triangles are dropped.

use tessera_shared::Vec3;

/// Mesh buffers for one detail level.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    /// Tile-local positions `[x, height, z]`.
    pub positions: Vec<[f32; 3]>,
    /// Unit normals, one per vertex.
    pub normals: Vec<[f32; 3]>,
    /// Texture coordinates in `[0, 1]²` across the interior.
    pub uvs: Vec<[f32; 2]>,
    /// Triangle list, counter-clockwise seen from above.
    pub indices: Vec<u32>,
    /// Interior grid sample `[gx, gy]` behind each vertex.
    pub grid_indices: Vec<[u32; 2]>,
    /// Number of leading vertices that form the coarse lattice.
    pub lattice_vertex_count: u32,
}

impl MeshData {
    /// Total vertex count, skirt fill included.
    #[inline]
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles.
    #[inline]
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Returns true if the mesh has no geometry.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterates over the lattice vertices' positions.
    pub fn lattice_positions(&self) -> impl Iterator<Item = &[f32; 3]> {
        self.positions.iter().take(self.lattice_vertex_count as usize)
    }
}

/// Builds meshes for one `(resolution, stride)` pair.
#[derive(Clone, Copy, Debug)]
pub struct MeshBuilder {
    resolution: u32,
    stride: u32,
    cell_size: f32,
}

impl MeshBuilder {
    /// Creates a builder.
    ///
    /// `stride` must divide `resolution`; invalid strides fall back to 1.
    #[must_use]
    pub fn new(resolution: u32, stride: u32, cell_size: f32) -> Self {
        let resolution = resolution.max(1);
        let stride = if stride == 0 || resolution % stride != 0 {
            1
        } else {
            stride
        };
        Self {
            resolution,
            stride,
            cell_size,
        }
    }

    /// Coarse cells per side.
    #[inline]
    #[must_use]
    pub const fn cells_per_side(&self) -> u32 {
        self.resolution / self.stride
    }

    /// Vertices in the coarse lattice.
    #[inline]
    #[must_use]
    pub const fn lattice_vertex_count(&self) -> u32 {
        let n = self.cells_per_side() + 1;
        n * n
    }

    /// Vertices added along the tile edges.
    #[inline]
    #[must_use]
    pub const fn skirt_vertex_count(&self) -> u32 {
        4 * self.cells_per_side() * (self.stride - 1)
    }

    /// Vertex index of interior grid sample `(gx, gy)`, or `None` if that
    /// sample is not part of this level.
    #[must_use]
    pub fn vertex_index(&self, gx: u32, gy: u32) -> Option<u32> {
        let (r, s, n) = (self.resolution, self.stride, self.cells_per_side());
        if gx > r || gy > r {
            return None;
        }
        if gx % s == 0 && gy % s == 0 {
            return Some((gy / s) * (n + 1) + gx / s);
        }
        let per_edge = n * (s - 1);
        let along = |t: u32| (t / s) * (s - 1) + (t % s) - 1;
        let (edge, t) = if gy == 0 {
            (0, gx)
        } else if gy == r {
            (1, gx)
        } else if gx == 0 {
            (2, gy)
        } else if gx == r {
            (3, gy)
        } else {
            return None;
        };
        if t % s == 0 {
            return None;
        }
        Some(self.lattice_vertex_count() + edge * per_edge + along(t))
    }

    /// Builds the mesh. `height(gx, gy)` returns the elevation of interior
    /// grid sample `(gx, gy)`, both in `0..=resolution`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn build(&self, height: impl Fn(u32, u32) -> f32) -> MeshData {
        let (r, s, n) = (self.resolution, self.stride, self.cells_per_side());
        let total = (self.lattice_vertex_count() + self.skirt_vertex_count()) as usize;

        let mut grid = Vec::with_capacity(total);
        for cy in 0..=n {
            for cx in 0..=n {
                grid.push([cx * s, cy * s]);
            }
        }
        for edge in 0..4 {
            for t in (0..r).filter(|t| t % s != 0) {
                grid.push(match edge {
                    0 => [t, 0],
                    1 => [t, r],
                    2 => [0, t],
                    _ => [r, t],
                });
            }
        }

        let inv_r = 1.0 / r as f32;
        let positions: Vec<[f32; 3]> = grid
            .iter()
            .map(|&[gx, gy]| {
                [
                    gx as f32 * self.cell_size,
                    height(gx, gy),
                    gy as f32 * self.cell_size,
                ]
            })
            .collect();
        let uvs = grid
            .iter()
            .map(|&[gx, gy]| [gx as f32 * inv_r, gy as f32 * inv_r])
            .collect();

        let mut indices = Vec::with_capacity((n * n * 6) as usize);
        let mut perimeter = Vec::with_capacity((4 * s) as usize);
        for cy in 0..n {
            for cx in 0..n {
                self.quad_perimeter(cx, cy, &mut perimeter);
                self.fan(&perimeter, &mut indices);
            }
        }

        let normals = accumulate_normals(&positions, &indices);

        MeshData {
            positions,
            normals,
            uvs,
            indices,
            grid_indices: grid,
            lattice_vertex_count: self.lattice_vertex_count(),
        }
    }

    /// Writes the perimeter of coarse quad `(cx, cy)` as grid samples, rooted
    /// at the corner with the fewest fine sides next to it.
    ///
    /// Walk order is `(x0,y0) → (x0,y1) → (x1,y1) → (x1,y0)`, which is
    /// counter-clockwise seen from +Y with `gx → x` and `gy → z`.
    fn quad_perimeter(&self, cx: u32, cy: u32, out: &mut Vec<[u32; 2]>) {
        let (s, n) = (self.stride, self.cells_per_side());
        let (x0, y0) = (cx * s, cy * s);
        let (x1, y1) = (x0 + s, y0 + s);
        let fine = s > 1;
        // Sides in walk order: left, top, right, bottom.
        let sides = [
            fine && cx == 0,
            fine && cy + 1 == n,
            fine && cx + 1 == n,
            fine && cy == 0,
        ];

        out.clear();
        out.push([x0, y0]);
        if sides[0] {
            out.extend((1..s).map(|j| [x0, y0 + j]));
        }
        out.push([x0, y1]);
        if sides[1] {
            out.extend((1..s).map(|j| [x0 + j, y1]));
        }
        out.push([x1, y1]);
        if sides[2] {
            out.extend((1..s).map(|j| [x1, y1 - j]));
        }
        out.push([x1, y0]);
        if sides[3] {
            out.extend((1..s).map(|j| [x1 - j, y0]));
        }

        // Corner k sits between side (k + 3) % 4 and side k.
        let root = (0..4)
            .min_by_key(|&k| u8::from(sides[(k + 3) % 4]) + u8::from(sides[k]))
            .unwrap_or(0);
        let corners = [[x0, y0], [x0, y1], [x1, y1], [x1, y0]];
        if let Some(pos) = out.iter().position(|&p| p == corners[root]) {
            out.rotate_left(pos);
        }
    }

    fn fan(&self, perimeter: &[[u32; 2]], indices: &mut Vec<u32>) {
        let Some(&apex) = perimeter.first() else {
            return;
        };
        for pair in perimeter[1..].windows(2) {
            let (b, c) = (pair[0], pair[1]);
            if plane_cross(apex, b, c) == 0 {
                continue;
            }
            for p in [apex, b, c] {
                if let Some(i) = self.vertex_index(p[0], p[1]) {
                    indices.push(i);
                }
            }
        }
    }
}

/// Y component of `(b - a) × (c - a)` with `gx → x`, `gy → z`.
#[allow(clippy::cast_possible_wrap)]
fn plane_cross(a: [u32; 2], b: [u32; 2], c: [u32; 2]) -> i64 {
    let (ax, az) = (i64::from(a[0]), i64::from(a[1]));
    let (bx, bz) = (i64::from(b[0]) - ax, i64::from(b[1]) - az);
    let (cx, cz) = (i64::from(c[0]) - ax, i64::from(c[1]) - az);
    bz * cx - bx * cz
}

/// Area-weighted face normals summed per vertex, then normalized.
fn accumulate_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut sums = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| i as usize);
        let pa = Vec3::from_array(positions[a]);
        let face = (Vec3::from_array(positions[b]) - pa).cross(Vec3::from_array(positions[c]) - pa);
        if face.try_normalize().is_none() {
            continue;
        }
        for v in [a, b, c] {
            sums[v] += face;
        }
    }
    sums.into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
        .collect()
}
