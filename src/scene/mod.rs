mod controller;

pub use controller::{SceneController, SceneError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque fixture identifier, assigned by the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixtureId(pub u32);

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixture description as written in the scene config
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixtureSpec {
    pub strand: u8,
    pub address: u16,
    pub pixels: u16,
    /// Scene position of the first pixel
    #[serde(default)]
    pub pos1: [i32; 2],
    /// Scene position of the last pixel
    #[serde(default)]
    pub pos2: [i32; 2],
}

/// A logical light occupying `[address, address + pixels)` on one strand.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixture {
    pub id: FixtureId,
    pub strand: u8,
    pub address: u16,
    pub pixels: u16,
    pub pos1: [i32; 2],
    pub pos2: [i32; 2],
}

impl Fixture {
    /// One past the last strand position this fixture owns.
    pub fn end(&self) -> usize {
        self.address as usize + self.pixels as usize
    }
}

/// Partial update of a fixture's addressing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FixtureEdit {
    pub strand: Option<u8>,
    pub address: Option<u16>,
    pub pixels: Option<u16>,
}

/// Scene-level settings and the initial fixture list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Reject fixture edits until unlocked
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub fixtures: Vec<FixtureSpec>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            name: "demo".to_string(),
            width: 200,
            height: 100,
            locked: false,
            fixtures: vec![
                FixtureSpec {
                    strand: 0,
                    address: 0,
                    pixels: 32,
                    pos1: [10, 20],
                    pos2: [190, 20],
                },
                FixtureSpec {
                    strand: 0,
                    address: 32,
                    pixels: 32,
                    pos1: [190, 50],
                    pos2: [10, 50],
                },
                FixtureSpec {
                    strand: 1,
                    address: 0,
                    pixels: 24,
                    pos1: [10, 80],
                    pos2: [190, 80],
                },
            ],
        }
    }
}

/// Ordered, live-editable fixture collection plus scene extents.
#[derive(Debug, Clone)]
pub struct Scene {
    name: String,
    width: u32,
    height: u32,
    fixtures: Vec<Fixture>,
    next_id: u32,
    locked: bool,
}

impl Scene {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            fixtures: Vec::new(),
            next_id: 0,
            locked: false,
        }
    }

    pub fn from_config(config: &SceneConfig) -> Self {
        let mut scene = Self::new(config.name.clone(), config.width, config.height);
        for spec in &config.fixtures {
            scene.add(*spec);
        }
        scene.locked = config.locked;
        scene
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scene extents, used only for drawing.
    pub fn extents(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Scene center in scene coordinates.
    pub fn center(&self) -> (f32, f32) {
        (self.width as f32 / 2.0, self.height as f32 / 2.0)
    }

    pub fn get(&self, id: FixtureId) -> Option<&Fixture> {
        self.fixtures.iter().find(|f| f.id == id)
    }

    pub fn add(&mut self, spec: FixtureSpec) -> FixtureId {
        let id = FixtureId(self.next_id);
        self.next_id += 1;
        self.fixtures.push(Fixture {
            id,
            strand: spec.strand,
            address: spec.address,
            pixels: spec.pixels,
            pos1: spec.pos1,
            pos2: spec.pos2,
        });
        id
    }

    /// Apply an edit; returns `None` if the fixture does not exist.
    pub fn edit(&mut self, id: FixtureId, edit: FixtureEdit) -> Option<&Fixture> {
        let fixture = self.fixtures.iter_mut().find(|f| f.id == id)?;
        if let Some(strand) = edit.strand {
            fixture.strand = strand;
        }
        if let Some(address) = edit.address {
            fixture.address = address;
        }
        if let Some(pixels) = edit.pixels {
            fixture.pixels = pixels;
        }
        Some(fixture)
    }

    pub fn remove(&mut self, id: FixtureId) -> Option<Fixture> {
        let index = self.fixtures.iter().position(|f| f.id == id)?;
        Some(self.fixtures.remove(index))
    }

    pub fn clear(&mut self) {
        self.fixtures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(strand: u8, address: u16, pixels: u16) -> FixtureSpec {
        FixtureSpec {
            strand,
            address,
            pixels,
            pos1: [0, 0],
            pos2: [10, 0],
        }
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut scene = Scene::new("test", 100, 100);
        let a = scene.add(spec(0, 0, 10));
        let b = scene.add(spec(0, 10, 10));
        assert_ne!(a, b);

        scene.remove(b);
        let c = scene.add(spec(1, 0, 5));
        assert_ne!(b, c);
        assert_eq!(scene.fixtures().len(), 2);
    }

    #[test]
    fn test_edit_fixture() {
        let mut scene = Scene::new("test", 100, 100);
        let id = scene.add(spec(0, 0, 10));

        let edited = scene
            .edit(
                id,
                FixtureEdit {
                    address: Some(20),
                    ..Default::default()
                },
            )
            .cloned();
        let edited = edited.unwrap();
        assert_eq!(edited.strand, 0);
        assert_eq!(edited.address, 20);
        assert_eq!(edited.end(), 30);

        assert!(scene.edit(FixtureId(99), FixtureEdit::default()).is_none());
    }

    #[test]
    fn test_from_config_keeps_order() {
        let scene = Scene::from_config(&SceneConfig::default());
        assert_eq!(scene.fixtures().len(), 3);
        assert_eq!(scene.fixtures()[1].address, 32);
        assert_eq!(scene.extents(), (200, 100));
        assert_eq!(scene.center(), (100.0, 50.0));
        assert!(!scene.is_locked());
    }

    #[test]
    fn test_locked_flag_from_config() {
        let config = SceneConfig {
            locked: true,
            ..SceneConfig::default()
        };
        assert!(Scene::from_config(&config).is_locked());
    }
}
