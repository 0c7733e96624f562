//! Lightmap atlas: fixed-size texture tiles shared by all surfaces.
//!
//! Every tile carries two planes of equal size: an RGB color map and an RGBA direction map.
//! Surfaces only ever see their own [`LightMapInfo`] region.

use thiserror::Error;

/// Texels per atlas tile along S.
pub const ATLAS_TILE_S: usize = 256;
/// Texels per atlas tile along T.
pub const ATLAS_TILE_T: usize = 256;

/// Color of a texel nothing has been baked into yet.
pub const NEUTRAL_COLOR: [u8; 3] = [0xFF, 0xFF, 0xFF];
/// Direction texel encoding "light straight along the normal" with full orientation factor.
pub const NEUTRAL_DIRECTION: [u8; 4] = [0x80, 0x80, 0xFF, 0xFF];

/// Placement of one surface's lightmap in the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightMapInfo {
    pub size_s: usize,
    pub size_t: usize,
    /// Atlas tile index.
    pub lightmap_nr: u32,
    pub pos_s: usize,
    pub pos_t: usize,
}

impl LightMapInfo {
    /// A surface without lightmap (not requested, or sizing/allocation failed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size_s == 0 || self.size_t == 0
    }

    #[must_use]
    pub fn texel_count(&self) -> usize {
        self.size_s * self.size_t
    }

    /// Fits in a single atlas tile.
    #[must_use]
    pub fn fits_tile(size_s: usize, size_t: usize) -> bool {
        size_s <= ATLAS_TILE_S && size_t <= ATLAS_TILE_T
    }
}

/// Result of a successful [`LightmapAtlas::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AtlasRegion {
    pub tile: u32,
    pub pos_s: usize,
    pub pos_t: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AtlasError {
    #[error("lightmap of {size_s}x{size_t} texels exceeds the {ATLAS_TILE_S}x{ATLAS_TILE_T} atlas tile")]
    TooLarge { size_s: usize, size_t: usize },
    #[error("no room for a {size_s}x{size_t} lightmap (atlas limited to {tile_limit} tiles)")]
    Full {
        size_s: usize,
        size_t: usize,
        tile_limit: usize,
    },
    #[error("atlas tile {0} does not exist")]
    UnknownTile(u32),
    #[error("texel ({s}, {t}) lies outside the tile")]
    TexelOutOfTile { s: usize, t: usize },
    #[error("texel ({s}, {t}) lies outside the {size_s}x{size_t} lightmap")]
    TexelOutOfRegion {
        s: usize,
        t: usize,
        size_s: usize,
        size_t: usize,
    },
}

/// Allocation and pixel access of a lightmap atlas.
///
/// The required methods address absolute tile texels; the provided methods address texels
/// relative to a surface's [`LightMapInfo`] and refuse to write outside it.
pub trait LightmapAtlas {
    /// Reserves a `size_s` x `size_t` region. Zero-sized requests succeed without using space.
    fn allocate(&mut self, size_s: usize, size_t: usize) -> Result<AtlasRegion, AtlasError>;

    fn set_color(&mut self, tile: u32, s: usize, t: usize, rgb: [u8; 3]) -> Result<(), AtlasError>;

    fn color(&self, tile: u32, s: usize, t: usize) -> Result<[u8; 3], AtlasError>;

    fn set_direction(
        &mut self,
        tile: u32,
        s: usize,
        t: usize,
        rgba: [u8; 4],
    ) -> Result<(), AtlasError>;

    fn direction(&self, tile: u32, s: usize, t: usize) -> Result<[u8; 4], AtlasError>;

    /// Writes both planes of texel `(s, t)` of `info`.
    fn write_texel(
        &mut self,
        info: &LightMapInfo,
        s: usize,
        t: usize,
        rgb: [u8; 3],
        rgba: [u8; 4],
    ) -> Result<(), AtlasError> {
        check_region(info, s, t)?;
        self.set_color(info.lightmap_nr, info.pos_s + s, info.pos_t + t, rgb)?;
        self.set_direction(info.lightmap_nr, info.pos_s + s, info.pos_t + t, rgba)
    }

    fn read_color(&self, info: &LightMapInfo, s: usize, t: usize) -> Result<[u8; 3], AtlasError> {
        check_region(info, s, t)?;
        self.color(info.lightmap_nr, info.pos_s + s, info.pos_t + t)
    }

    fn read_direction(
        &self,
        info: &LightMapInfo,
        s: usize,
        t: usize,
    ) -> Result<[u8; 4], AtlasError> {
        check_region(info, s, t)?;
        self.direction(info.lightmap_nr, info.pos_s + s, info.pos_t + t)
    }

    /// Allocates a `size_s` x `size_t` lightmap and fills it with [`NEUTRAL_COLOR`] and
    /// [`NEUTRAL_DIRECTION`].
    fn allocate_lightmap(&mut self, size_s: usize, size_t: usize) -> Result<LightMapInfo, AtlasError> {
        let region = self.allocate(size_s, size_t)?;
        let info = LightMapInfo {
            size_s,
            size_t,
            lightmap_nr: region.tile,
            pos_s: region.pos_s,
            pos_t: region.pos_t,
        };
        self.fill_region(&info, NEUTRAL_COLOR, NEUTRAL_DIRECTION)?;
        Ok(info)
    }

    /// Sets every texel of `info` to the same color and direction.
    fn fill_region(
        &mut self,
        info: &LightMapInfo,
        rgb: [u8; 3],
        rgba: [u8; 4],
    ) -> Result<(), AtlasError> {
        for t in 0..info.size_t {
            for s in 0..info.size_s {
                self.write_texel(info, s, t, rgb, rgba)?;
            }
        }
        Ok(())
    }
}

fn check_region(info: &LightMapInfo, s: usize, t: usize) -> Result<(), AtlasError> {
    if s < info.size_s && t < info.size_t {
        Ok(())
    } else {
        Err(AtlasError::TexelOutOfRegion {
            s,
            t,
            size_s: info.size_s,
            size_t: info.size_t,
        })
    }
}

#[derive(Debug, Clone)]
struct AtlasTile {
    /// Skyline: first free row per column.
    allocated: Vec<usize>,
    color: Vec<[u8; 3]>,
    direction: Vec<[u8; 4]>,
}

impl AtlasTile {
    fn new() -> Self {
        Self {
            allocated: vec![0; ATLAS_TILE_S],
            color: vec![[0; 3]; ATLAS_TILE_S * ATLAS_TILE_T],
            direction: vec![[0; 4]; ATLAS_TILE_S * ATLAS_TILE_T],
        }
    }

    /// Lowest position where a `w` x `h` block fits, leftmost on ties.
    fn find_spot(&self, w: usize, h: usize) -> Option<(usize, usize)> {
        let mut best = ATLAS_TILE_T;
        let mut spot = None;

        for i in 0..=(ATLAS_TILE_S - w) {
            let columns = &self.allocated[i..i + w];
            if columns.iter().any(|&top| top >= best) {
                continue;
            }
            let top = columns.iter().copied().max().unwrap_or(0);
            spot = Some((i, top));
            best = top;
        }

        spot.filter(|&(_, top)| top + h <= ATLAS_TILE_T)
    }

    fn allocate(&mut self, w: usize, h: usize) -> Option<(usize, usize)> {
        let (x, y) = self.find_spot(w, h)?;
        for top in &mut self.allocated[x..x + w] {
            *top = y + h;
        }
        Some((x, y))
    }

    fn index(s: usize, t: usize) -> Result<usize, AtlasError> {
        if s < ATLAS_TILE_S && t < ATLAS_TILE_T {
            Ok(t * ATLAS_TILE_S + s)
        } else {
            Err(AtlasError::TexelOutOfTile { s, t })
        }
    }
}

/// In-memory atlas that opens new tiles on demand.
#[derive(Debug, Clone, Default)]
pub struct TiledLightmapAtlas {
    tiles: Vec<AtlasTile>,
    tile_limit: Option<usize>,
}

impl TiledLightmapAtlas {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atlas that reports [`AtlasError::Full`] instead of opening tile `limit + 1`.
    #[must_use]
    pub fn with_tile_limit(limit: usize) -> Self {
        Self {
            tiles: Vec::new(),
            tile_limit: Some(limit),
        }
    }

    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    fn tile(&self, tile: u32) -> Result<&AtlasTile, AtlasError> {
        self.tiles
            .get(tile as usize)
            .ok_or(AtlasError::UnknownTile(tile))
    }

    fn tile_mut(&mut self, tile: u32) -> Result<&mut AtlasTile, AtlasError> {
        self.tiles
            .get_mut(tile as usize)
            .ok_or(AtlasError::UnknownTile(tile))
    }
}

impl LightmapAtlas for TiledLightmapAtlas {
    fn allocate(&mut self, size_s: usize, size_t: usize) -> Result<AtlasRegion, AtlasError> {
        if size_s == 0 || size_t == 0 {
            return Ok(AtlasRegion::default());
        }
        if !LightMapInfo::fits_tile(size_s, size_t) {
            return Err(AtlasError::TooLarge { size_s, size_t });
        }

        for (nr, tile) in self.tiles.iter_mut().enumerate() {
            if let Some((pos_s, pos_t)) = tile.allocate(size_s, size_t) {
                return Ok(AtlasRegion {
                    tile: nr as u32,
                    pos_s,
                    pos_t,
                });
            }
        }

        if let Some(limit) = self.tile_limit {
            if self.tiles.len() >= limit {
                return Err(AtlasError::Full {
                    size_s,
                    size_t,
                    tile_limit: limit,
                });
            }
        }

        let mut tile = AtlasTile::new();
        let (pos_s, pos_t) = tile
            .allocate(size_s, size_t)
            .ok_or(AtlasError::TooLarge { size_s, size_t })?;
        self.tiles.push(tile);
        log::debug!("opened lightmap atlas tile {}", self.tiles.len() - 1);
        Ok(AtlasRegion {
            tile: (self.tiles.len() - 1) as u32,
            pos_s,
            pos_t,
        })
    }

    fn set_color(&mut self, tile: u32, s: usize, t: usize, rgb: [u8; 3]) -> Result<(), AtlasError> {
        let idx = AtlasTile::index(s, t)?;
        self.tile_mut(tile)?.color[idx] = rgb;
        Ok(())
    }

    fn color(&self, tile: u32, s: usize, t: usize) -> Result<[u8; 3], AtlasError> {
        let idx = AtlasTile::index(s, t)?;
        Ok(self.tile(tile)?.color[idx])
    }

    fn set_direction(
        &mut self,
        tile: u32,
        s: usize,
        t: usize,
        rgba: [u8; 4],
    ) -> Result<(), AtlasError> {
        let idx = AtlasTile::index(s, t)?;
        self.tile_mut(tile)?.direction[idx] = rgba;
        Ok(())
    }

    fn direction(&self, tile: u32, s: usize, t: usize) -> Result<[u8; 4], AtlasError> {
        let idx = AtlasTile::index(s, t)?;
        Ok(self.tile(tile)?.direction[idx])
    }
}
