//! Read-only material descriptors as seen by the lightmap baker.

use std::collections::HashMap;

use bitflags::bitflags;
use quick_xml::de::from_str;
use serde::Deserialize;
use thiserror::Error;

bitflags! {
    /// What a surface blocks in collision and visibility queries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClipFlags: u32 {
        const PLAYERS = 0x0001;
        const MONSTERS = 0x0002;
        const MOVEABLES = 0x0004;
        const IK = 0x0008;
        const PROJECTILES = 0x0010;
        const SIGHT = 0x0020;
        const BSP_PORTALS = 0x0040;
        /// Blocks light transport; the curved collision proxy traces against this bit.
        const RADIANCE = 0x0080;
        const ALL_BLOCKING = 0x00FF;
        const TRIGGER = 0x0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Default blend function; the surface is opaque.
    #[default]
    Opaque,
    AlphaBlend,
    Additive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    pub name: String,
    /// Whether surfaces with this material get a baked lightmap at all.
    pub uses_generated_lightmap: bool,
    pub two_sided: bool,
    pub clip_flags: ClipFlags,
    pub blend_mode: BlendMode,
}

impl Material {
    /// Opaque, lightmapped material that blocks everything.
    #[must_use]
    pub fn lightmapped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uses_generated_lightmap: true,
            two_sided: false,
            clip_flags: ClipFlags::ALL_BLOCKING,
            blend_mode: BlendMode::Opaque,
        }
    }

    #[must_use]
    pub fn is_opaque(&self) -> bool {
        self.blend_mode == BlendMode::Opaque
    }
}

/// Handle into a [`MaterialRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u32);

impl MaterialId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("material XML error: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("material `{material}` uses unknown clip flag `{flag}`")]
    UnknownClipFlag { material: String, flag: String },
}

/// Name-indexed set of materials. Re-inserting a name replaces the descriptor in place.
#[derive(Debug, Clone, Default)]
pub struct MaterialRegistry {
    materials: Vec<Material>,
    by_name: HashMap<String, MaterialId>,
}

impl MaterialRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: Material) -> MaterialId {
        if let Some(&id) = self.by_name.get(&material.name) {
            self.materials[id.index()] = material;
            return id;
        }
        let id = MaterialId(self.materials.len() as u32);
        self.by_name.insert(material.name.clone(), id);
        self.materials.push(material);
        id
    }

    #[must_use]
    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.index())
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<MaterialId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaterialId, &Material)> {
        self.materials
            .iter()
            .enumerate()
            .map(|(i, m)| (MaterialId(i as u32), m))
    }

    /// Loads a `<materials>` document.
    ///
    /// ```xml
    /// <materials>
    ///   <material name="walls/brick" lightmap="true" clip="all-blocking" />
    ///   <material name="glass" blend="alpha-blend" two-sided="true" clip="sight radiance" />
    /// </materials>
    /// ```
    pub fn from_xml_str(input: &str) -> Result<Self, MaterialError> {
        let document: MaterialsDocument = from_str(input)?;
        let mut registry = Self::new();
        for entry in document.materials {
            let clip_flags = parse_clip_flags(&entry.name, entry.clip.as_deref())?;
            registry.insert(Material {
                name: entry.name,
                uses_generated_lightmap: entry.lightmap,
                two_sided: entry.two_sided,
                clip_flags,
                blend_mode: entry.blend,
            });
        }
        log::debug!("loaded {} materials", registry.len());
        Ok(registry)
    }
}

fn parse_clip_flags(material: &str, clip: Option<&str>) -> Result<ClipFlags, MaterialError> {
    let Some(clip) = clip else {
        return Ok(ClipFlags::ALL_BLOCKING);
    };
    clip.split_whitespace().try_fold(ClipFlags::empty(), |acc, token| {
        let name = token.replace('-', "_").to_uppercase();
        ClipFlags::from_name(&name)
            .map(|flag| acc | flag)
            .ok_or_else(|| MaterialError::UnknownClipFlag {
                material: material.to_owned(),
                flag: token.to_owned(),
            })
    })
}

#[derive(Debug, Deserialize)]
struct MaterialsDocument {
    #[serde(default, rename = "material")]
    materials: Vec<MaterialEntry>,
}

#[derive(Debug, Deserialize)]
struct MaterialEntry {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default = "default_true", rename = "@lightmap")]
    lightmap: bool,
    #[serde(default, rename = "@two-sided")]
    two_sided: bool,
    #[serde(default, rename = "@clip")]
    clip: Option<String>,
    #[serde(default, rename = "@blend")]
    blend: BlendMode,
}

const fn default_true() -> bool {
    true
}
