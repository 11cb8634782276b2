//! The 2-D grid spatial index for one world.
//!
//! A [`Zone`] partitions the world rectangle `[0, width) x [0, height)`
//! into square sectors of `sector_size` units. Each sector holds the set
//! of entity uids currently inside it, players and monsters intermixed.
//! Sector maintenance on movement is O(1) and an area-of-interest query is
//! bounded by the 3x3 neighbourhood around the queried point.
//!
//! The grid does not validate uids; an entity is wherever the caller last
//! put it. All methods treat out-of-world coordinates as a no-op so a
//! client reporting garbage leaves the entity in its last valid sector.

use std::collections::HashSet;

/// The row/column address of one sector.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SectorPos {
    pub row: i32,
    pub col: i32,
}

impl SectorPos {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }
}

impl From<(i32, i32)> for SectorPos {
    fn from((row, col): (i32, i32)) -> Self {
        Self { row, col }
    }
}

pub struct Zone {
    width: i32,
    height: i32,
    sector_size: i32,
    rows: i32,
    cols: i32,
    grid: Vec<HashSet<u64>>,
}

impl Zone {
    /// Constructs the grid for a `width x height` world. Partial sectors at
    /// the far edges are rounded up.
    ///
    /// # Panics
    ///
    /// Panics if any dimension is not positive.
    pub fn new(width: i32, height: i32, sector_size: i32) -> Self {
        assert!(
            width > 0 && height > 0 && sector_size > 0,
            "zone dimensions must be positive"
        );

        let rows = (height + sector_size - 1) / sector_size;
        let cols = (width + sector_size - 1) / sector_size;

        Self {
            width,
            height,
            sector_size,
            rows,
            cols,
            grid: vec![HashSet::new(); (rows * cols) as usize],
        }
    }

    pub fn rows(&self) -> i32 {
        self.rows
    }

    pub fn cols(&self) -> i32 {
        self.cols
    }

    /// Takes a position in world space and returns the sector containing
    /// it, or `None` when the position lies outside the half-open world
    /// bounds.
    pub fn sector_of(&self, x: f32, y: f32) -> Option<SectorPos> {
        if x < 0.0 || y < 0.0 || x >= self.width as f32 || y >= self.height as f32 {
            return None;
        }

        Some(SectorPos {
            row: (y / self.sector_size as f32) as i32,
            col: (x / self.sector_size as f32) as i32,
        })
    }

    fn sector_mut(&mut self, pos: SectorPos) -> &mut HashSet<u64> {
        &mut self.grid[(pos.row * self.cols + pos.col) as usize]
    }

    fn sector(&self, pos: SectorPos) -> &HashSet<u64> {
        &self.grid[(pos.row * self.cols + pos.col) as usize]
    }

    /// Adds `uid` to the sector containing `(x, y)`. Out-of-bounds
    /// positions are ignored.
    pub fn enter(&mut self, uid: u64, x: f32, y: f32) {
        if let Some(pos) = self.sector_of(x, y) {
            self.sector_mut(pos).insert(uid);
        }
    }

    /// Removes `uid` from the sector containing `(x, y)`. Removal is
    /// tolerant of the uid not being present.
    pub fn leave(&mut self, uid: u64, x: f32, y: f32) {
        if let Some(pos) = self.sector_of(x, y) {
            self.sector_mut(pos).remove(&uid);
        }
    }

    /// Moves `uid` between sectors when the move crosses a sector border.
    /// Intra-sector moves and moves with either endpoint out of bounds
    /// skip the grid entirely.
    pub fn update_position(&mut self, uid: u64, old_x: f32, old_y: f32, new_x: f32, new_y: f32) {
        let (Some(old), Some(new)) = (self.sector_of(old_x, old_y), self.sector_of(new_x, new_y))
        else {
            return;
        };

        if old == new {
            return;
        }

        self.sector_mut(old).remove(&uid);
        self.sector_mut(new).insert(uid);
    }

    /// Returns every uid in the 3x3 sector neighbourhood centred on
    /// `(x, y)`, clipped at the world edge. The order is unspecified and
    /// the result may contain the uid of the caller itself.
    pub fn players_in_aoi(&self, x: f32, y: f32) -> Vec<u64> {
        let Some(center) = self.sector_of(x, y) else {
            return Vec::new();
        };

        let mut uids = Vec::new();

        for row in (center.row - 1).max(0)..=(center.row + 1).min(self.rows - 1) {
            for col in (center.col - 1).max(0)..=(center.col + 1).min(self.cols - 1) {
                uids.extend(self.sector(SectorPos { row, col }));
            }
        }

        uids
    }

    /// True if `uid` is registered in the sector containing `(x, y)`.
    pub fn contains(&self, uid: u64, x: f32, y: f32) -> bool {
        self.sector_of(x, y)
            .is_some_and(|pos| self.sector(pos).contains(&uid))
    }

    /// The number of uids registered across the whole grid.
    pub fn population(&self) -> usize {
        self.grid.iter().map(HashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        // 1000x1000 world, 50-unit sectors: a 20x20 grid.
        Zone::new(1000, 1000, 50)
    }

    #[test]
    fn sector_of_is_half_open() {
        let zone = zone();

        assert_eq!(zone.sector_of(0.0, 0.0), Some(SectorPos::new(0, 0)));
        assert_eq!(zone.sector_of(49.9, 49.9), Some(SectorPos::new(0, 0)));
        assert_eq!(zone.sector_of(50.0, 0.0), Some(SectorPos::new(0, 1)));
        assert_eq!(zone.sector_of(999.9, 999.9), Some(SectorPos::new(19, 19)));

        assert_eq!(zone.sector_of(1000.0, 5.0), None);
        assert_eq!(zone.sector_of(5.0, 1000.0), None);
        assert_eq!(zone.sector_of(-0.1, 5.0), None);
        assert_eq!(zone.sector_of(5.0, -0.1), None);
    }

    #[test]
    fn partial_edge_sectors_round_up() {
        let zone = Zone::new(1010, 995, 50);

        assert_eq!(zone.cols(), 21);
        assert_eq!(zone.rows(), 20);
        assert_eq!(zone.sector_of(1009.0, 994.0), Some(SectorPos::new(19, 20)));
    }

    #[test]
    fn enter_then_leave_restores_prior_state() {
        let mut zone = zone();

        zone.enter(1, 5.0, 5.0);
        assert!(zone.contains(1, 5.0, 5.0));
        assert_eq!(zone.population(), 1);

        zone.leave(1, 5.0, 5.0);
        assert!(!zone.contains(1, 5.0, 5.0));
        assert_eq!(zone.population(), 0);

        // Tolerant of a uid that was never there.
        zone.leave(2, 5.0, 5.0);
        assert_eq!(zone.population(), 0);
    }

    #[test]
    fn out_of_bounds_ops_are_noops() {
        let mut zone = zone();

        zone.enter(1, -5.0, 5.0);
        assert_eq!(zone.population(), 0);

        zone.enter(1, 5.0, 5.0);
        zone.update_position(1, 5.0, 5.0, 2000.0, 5.0);
        assert!(zone.contains(1, 5.0, 5.0));

        assert!(zone.players_in_aoi(-1.0, 0.0).is_empty());
    }

    #[test]
    fn intra_sector_moves_skip_the_grid() {
        let mut zone = zone();

        zone.enter(1, 5.0, 5.0);
        zone.update_position(1, 5.0, 5.0, 8.0, 5.0);

        assert!(zone.contains(1, 5.0, 5.0));
        assert_eq!(zone.population(), 1);
    }

    #[test]
    fn cross_sector_moves_migrate_the_uid() {
        let mut zone = zone();

        zone.enter(1, 5.0, 5.0);
        zone.update_position(1, 5.0, 5.0, 55.0, 5.0);

        assert!(!zone.contains(1, 5.0, 5.0));
        assert!(zone.contains(1, 55.0, 5.0));
        assert_eq!(zone.population(), 1);
    }

    #[test]
    fn aoi_covers_the_3x3_neighbourhood() {
        let mut zone = zone();

        zone.enter(1, 75.0, 75.0); // sector (1, 1), the center
        zone.enter(2, 5.0, 5.0); // (0, 0), corner neighbour
        zone.enter(3, 125.0, 75.0); // (1, 2), side neighbour
        zone.enter(4, 175.0, 75.0); // (1, 3), outside
        zone.enter(5, 75.0, 225.0); // (4, 1), outside

        let mut aoi = zone.players_in_aoi(75.0, 75.0);
        aoi.sort_unstable();

        assert_eq!(aoi, [1, 2, 3]);
    }

    #[test]
    fn aoi_clips_at_corners_and_edges() {
        let mut zone = zone();

        // Corner query: the neighbourhood degenerates to 2x2.
        zone.enter(1, 5.0, 5.0); // (0, 0)
        zone.enter(2, 55.0, 55.0); // (1, 1)
        zone.enter(3, 105.0, 5.0); // (0, 2), outside the 2x2

        let mut aoi = zone.players_in_aoi(0.0, 0.0);
        aoi.sort_unstable();
        assert_eq!(aoi, [1, 2]);

        // Edge query at (0, 1): 2x3 neighbourhood.
        let mut aoi = zone.players_in_aoi(75.0, 5.0);
        aoi.sort_unstable();
        assert_eq!(aoi, [1, 2, 3]);
    }

    #[test]
    fn aoi_matches_brute_force_after_random_moves() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);

        let mut zone = zone();
        let mut positions = std::collections::HashMap::new();

        for uid in 0..200u64 {
            let (x, y) = (rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0));
            zone.enter(uid, x, y);
            positions.insert(uid, (x, y));
        }

        for _ in 0..500 {
            let uid = rng.gen_range(0..200u64);
            let (old_x, old_y) = positions[&uid];
            let (new_x, new_y) = (rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0));
            zone.update_position(uid, old_x, old_y, new_x, new_y);
            positions.insert(uid, (new_x, new_y));
        }

        // Every entity sits in exactly the sector its position maps to.
        assert_eq!(zone.population(), positions.len());
        for (&uid, &(x, y)) in &positions {
            assert!(zone.contains(uid, x, y));
        }

        // And the AOI query agrees with a brute-force scan.
        let (qx, qy) = (500.0, 500.0);
        let center = zone.sector_of(qx, qy).unwrap();

        let mut expected: Vec<u64> = positions
            .iter()
            .filter(|(_, &(x, y))| {
                let pos = zone.sector_of(x, y).unwrap();
                (pos.row - center.row).abs() <= 1 && (pos.col - center.col).abs() <= 1
            })
            .map(|(&uid, _)| uid)
            .collect();
        expected.sort_unstable();

        let mut actual = zone.players_in_aoi(qx, qy);
        actual.sort_unstable();

        assert_eq!(actual, expected);
    }
}
