//! Coordinates and unit conversions.
//!
//! Two coordinate spaces run through the whole engine: `WorldSpace` is what
//! the server speaks (world units, X east / Y up / Z north), `RenderSpace`
//! is what the scene graph stores. The mapping flips X and scales by
//! `render_units_per_world_unit`; rotations are converted by negating the
//! Y/Z quaternion components (handedness change).

use euclid::{Angle, Point3D, Rotation3D, Vector3D};

/// Unit tag for server-side world coordinates.
pub struct WorldSpace;

/// Unit tag for scene-graph coordinates.
pub struct RenderSpace;

pub type WorldPoint = Point3D<f32, WorldSpace>;
pub type WorldVector = Vector3D<f32, WorldSpace>;
pub type RenderPoint = Point3D<f32, RenderSpace>;
pub type RenderVector = Vector3D<f32, RenderSpace>;
pub type RenderRotation = Rotation3D<f32, RenderSpace, RenderSpace>;

/// A world cell index. One cell covers `world_units_per_cell` world units
/// in X and Z; `cy` runs along world Z.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellCoord {
    pub cx: i32,
    pub cy: i32,
}

impl CellCoord {
    #[inline]
    pub const fn new(cx: i32, cy: i32) -> Self {
        Self { cx, cy }
    }

    /// Chessboard distance - the radius metric for residency neighborhoods.
    #[inline]
    pub fn chebyshev(self, other: CellCoord) -> i32 {
        (self.cx - other.cx).abs().max((self.cy - other.cy).abs())
    }

    #[inline]
    pub fn manhattan(self, other: CellCoord) -> i32 {
        (self.cx - other.cx).abs() + (self.cy - other.cy).abs()
    }

    /// Queue priority relative to the viewer cell: lower is sooner.
    /// Chebyshev dominates so the neighborhood fills ring by ring, the
    /// Manhattan term breaks ties towards the axis-aligned neighbors.
    #[inline]
    pub fn base_priority(self, viewer: CellCoord) -> f32 {
        (self.chebyshev(viewer) * 100 + self.manhattan(viewer)) as f32
    }

    /// The batching region this cell falls into (`region_size` cells per side).
    #[inline]
    pub fn region(self, region_size: i32) -> RegionCoord {
        RegionCoord {
            rx: self.cx.div_euclid(region_size),
            ry: self.cy.div_euclid(region_size),
        }
    }

    /// The terrain tile containing this cell.
    #[inline]
    pub fn tile(self, tile_span: i32) -> TileCoord {
        TileCoord {
            tx: self.cx.div_euclid(tile_span),
            tz: self.cy.div_euclid(tile_span),
        }
    }
}

/// A terrain tile index; one tile spans `tile_cell_span` world cells.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoord {
    pub tx: i32,
    pub tz: i32,
}

impl TileCoord {
    #[inline]
    pub const fn new(tx: i32, tz: i32) -> Self {
        Self { tx, tz }
    }

    #[inline]
    pub fn chebyshev(self, other: TileCoord) -> i32 {
        (self.tx - other.tx).abs().max((self.tz - other.tz).abs())
    }

    #[inline]
    pub fn manhattan(self, other: TileCoord) -> i32 {
        (self.tx - other.tx).abs() + (self.tz - other.tz).abs()
    }

    #[inline]
    pub fn base_priority(self, viewer: TileCoord) -> f32 {
        (self.chebyshev(viewer) * 100 + self.manhattan(viewer)) as f32
    }

    /// World cell of the tile's south-west corner.
    #[inline]
    pub fn origin_cell(self, tile_span: i32) -> CellCoord {
        CellCoord::new(self.tx * tile_span, self.tz * tile_span)
    }

    pub const NEIGHBOR_OFFSETS: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

    /// The four cardinal neighbors (for seam rebuilds).
    pub fn neighbors(self) -> [TileCoord; 4] {
        Self::NEIGHBOR_OFFSETS.map(|(dx, dz)| TileCoord::new(self.tx + dx, self.tz + dz))
    }
}

/// A batching region index (`batch_region_size_cells` cells per side).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionCoord {
    pub rx: i32,
    pub ry: i32,
}

/// Returns the cell containing a world-space position.
#[inline]
pub fn cell_of_position(position: WorldPoint, world_units_per_cell: f32) -> CellCoord {
    CellCoord::new(
        (position.x / world_units_per_cell).floor() as i32,
        (position.z / world_units_per_cell).floor() as i32,
    )
}

/// World ↔ render unit mapping.
///
/// `render.x = -world.x · k`, Y and Z scale by `k`. The X flip converts the
/// server's right-handed convention into the renderer's left-handed one, so
/// quaternions get their Y/Z components negated on the way in.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CoordMap {
    pub render_units_per_world_unit: f32,
}

impl CoordMap {
    pub const fn new(render_units_per_world_unit: f32) -> Self {
        Self {
            render_units_per_world_unit,
        }
    }

    #[inline]
    pub fn world_to_render(&self, p: WorldPoint) -> RenderPoint {
        let k = self.render_units_per_world_unit;
        RenderPoint::new(-p.x * k, p.y * k, p.z * k)
    }

    #[inline]
    pub fn render_to_world(&self, p: RenderPoint) -> WorldPoint {
        let k = self.render_units_per_world_unit;
        WorldPoint::new(-p.x / k, p.y / k, p.z / k)
    }

    /// Converts a server rotation into a render-space rotation.
    ///
    /// An infinite `angle_rad` marks the axis vector as Euler angles in
    /// degrees (Y and Z negated); any finite angle builds an axis/angle
    /// quaternion whose Y/Z components are negated. The result is
    /// normalized in both paths.
    pub fn rotation_to_render(&self, axis: WorldVector, angle_rad: f64) -> RenderRotation {
        if angle_rad.is_infinite() {
            return Rotation3D::euler(
                Angle::degrees(axis.x),
                Angle::degrees(-axis.y),
                Angle::degrees(-axis.z),
            )
            .normalize();
        }
        let len = axis.length();
        if len <= f32::EPSILON || !len.is_finite() {
            return Rotation3D::identity();
        }
        let unit = axis / len;
        let world: Rotation3D<f32, WorldSpace, WorldSpace> =
            Rotation3D::around_axis(unit, Angle::radians(angle_rad as f32));
        Rotation3D::quaternion(world.i, -world.j, -world.k, world.r).normalize()
    }
}
