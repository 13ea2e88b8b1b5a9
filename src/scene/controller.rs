use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::{Fixture, FixtureEdit, FixtureId, FixtureSpec, Scene};
use crate::pixels::{AddressMap, PixelStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("scene locked")]
    Locked,
    #[error("no fixture {0}")]
    UnknownFixture(FixtureId),
}

/// Owns the scene and keeps the pixel store's strand layout in step with it.
///
/// Every edit rebuilds the address map and publishes it, so the network side
/// sees either the old layout or the new one, never a half-applied edit.
pub struct SceneController {
    scene: Scene,
    address_map: AddressMap,
    store: Arc<PixelStore>,
}

impl SceneController {
    pub fn new(scene: Scene, store: Arc<PixelStore>) -> Self {
        let mut controller = Self {
            scene,
            address_map: AddressMap::new(),
            store,
        };
        controller.relayout();
        controller
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.address_map
    }

    pub fn fixtures(&self) -> &[Fixture] {
        self.scene.fixtures()
    }

    pub fn is_locked(&self) -> bool {
        self.scene.is_locked()
    }

    /// Flip the lock and return the new state.
    pub fn toggle_locked(&mut self) -> bool {
        let locked = !self.scene.is_locked();
        self.scene.set_locked(locked);
        info!(locked, "Scene lock toggled");
        locked
    }

    fn check_unlocked(&self) -> Result<(), SceneError> {
        if self.scene.is_locked() {
            return Err(SceneError::Locked);
        }
        Ok(())
    }

    pub fn add_fixture(&mut self, spec: FixtureSpec) -> Result<FixtureId, SceneError> {
        self.check_unlocked()?;
        let id = self.scene.add(spec);
        info!(
            fixture = %id,
            strand = spec.strand,
            address = spec.address,
            pixels = spec.pixels,
            "Added fixture"
        );
        self.relayout();
        Ok(id)
    }

    pub fn update_fixture(&mut self, id: FixtureId, edit: FixtureEdit) -> Result<Fixture, SceneError> {
        self.check_unlocked()?;
        let fixture = self
            .scene
            .edit(id, edit)
            .cloned()
            .ok_or(SceneError::UnknownFixture(id))?;
        info!(
            fixture = %id,
            strand = fixture.strand,
            address = fixture.address,
            pixels = fixture.pixels,
            "Updated fixture"
        );
        self.relayout();
        Ok(fixture)
    }

    pub fn remove_fixture(&mut self, id: FixtureId) -> Result<Fixture, SceneError> {
        self.check_unlocked()?;
        let removed = self
            .scene
            .remove(id)
            .ok_or(SceneError::UnknownFixture(id))?;
        info!(fixture = %id, "Removed fixture");
        self.relayout();
        Ok(removed)
    }

    pub fn clear_fixtures(&mut self) -> Result<(), SceneError> {
        self.check_unlocked()?;
        self.scene.clear();
        info!("Cleared all fixtures");
        self.relayout();
        Ok(())
    }

    fn relayout(&mut self) {
        let previous = std::mem::replace(
            &mut self.address_map,
            AddressMap::from_fixtures(self.scene.fixtures()),
        );

        if self.address_map.covers(&previous) {
            // Nothing shrank or vanished: extend strands in place
            debug!("Growing strands in place");
            for (strand, len) in self.address_map.strands() {
                self.store.ensure_strand_length(strand, len);
            }
        } else {
            self.store.apply_layout(&self.address_map);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;

    fn spec(strand: u8, address: u16, pixels: u16) -> FixtureSpec {
        FixtureSpec {
            strand,
            address,
            pixels,
            pos1: [0, 0],
            pos2: [100, 0],
        }
    }

    #[test]
    fn test_initial_layout_is_published() {
        let store = Arc::new(PixelStore::new());
        let mut scene = Scene::new("test", 100, 100);
        scene.add(spec(0, 0, 10));
        scene.add(spec(3, 4, 4));

        let controller = SceneController::new(scene, store.clone());
        assert_eq!(store.strand_len(0), 10);
        assert_eq!(store.strand_len(3), 8);
        assert_eq!(controller.address_map().strand_length(3), 8);
    }

    #[test]
    fn test_edits_resize_strands() {
        let store = Arc::new(PixelStore::new());
        let mut controller = SceneController::new(Scene::new("test", 100, 100), store.clone());

        let id = controller.add_fixture(spec(0, 0, 10)).unwrap();
        assert_eq!(store.strand_len(0), 10);
        store.write(0, 0, &[Rgb::WHITE; 10]).unwrap();

        let updated = controller
            .update_fixture(
                id,
                FixtureEdit {
                    pixels: Some(20),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.pixels, 20);
        assert_eq!(store.strand_len(0), 20);
        assert_eq!(store.snapshot(0)[9], Rgb::WHITE);
        assert_eq!(store.snapshot(0)[10], Rgb::BLACK);

        controller
            .update_fixture(
                id,
                FixtureEdit {
                    strand: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(store.strand_len(0), 0);
        assert_eq!(store.strand_len(1), 20);

        assert!(controller.remove_fixture(id).is_ok());
        assert_eq!(controller.remove_fixture(id), Err(SceneError::UnknownFixture(id)));
        assert_eq!(store.strand_len(1), 0);
    }

    #[test]
    fn test_clear_drops_all_strands() {
        let store = Arc::new(PixelStore::new());
        let mut controller = SceneController::new(Scene::new("test", 100, 100), store.clone());
        controller.add_fixture(spec(0, 0, 10)).unwrap();
        controller.add_fixture(spec(1, 0, 10)).unwrap();

        controller.clear_fixtures().unwrap();
        assert!(controller.fixtures().is_empty());
        assert_eq!(controller.address_map().total_pixels(), 0);
        assert_eq!(store.strand_len(0), 0);
    }

    #[test]
    fn test_growth_keeps_layout_generation() {
        let store = Arc::new(PixelStore::new());
        let mut controller = SceneController::new(Scene::new("test", 100, 100), store.clone());
        let id = controller.add_fixture(spec(0, 0, 10)).unwrap();
        let generation = store.generation();

        // Longer fixture and a second one on the same strand: resized in place
        controller
            .update_fixture(
                id,
                FixtureEdit {
                    pixels: Some(16),
                    ..Default::default()
                },
            )
            .unwrap();
        controller.add_fixture(spec(0, 16, 4)).unwrap();
        assert_eq!(store.strand_len(0), 20);
        assert_eq!(store.generation(), generation);

        // A new strand is published
        controller.add_fixture(spec(2, 0, 4)).unwrap();
        assert!(store.generation() > generation);
    }

    #[test]
    fn test_locked_scene_rejects_edits() {
        let store = Arc::new(PixelStore::new());
        let mut controller = SceneController::new(Scene::new("test", 100, 100), store.clone());
        let id = controller.add_fixture(spec(0, 0, 10)).unwrap();

        assert!(controller.toggle_locked());
        assert_eq!(controller.add_fixture(spec(1, 0, 4)), Err(SceneError::Locked));
        assert_eq!(
            controller.update_fixture(id, FixtureEdit::default()),
            Err(SceneError::Locked)
        );
        assert_eq!(controller.remove_fixture(id), Err(SceneError::Locked));
        assert_eq!(controller.clear_fixtures(), Err(SceneError::Locked));
        assert_eq!(controller.fixtures().len(), 1);
        assert_eq!(store.strand_len(1), 0);

        assert!(!controller.toggle_locked());
        assert!(controller.remove_fixture(id).is_ok());
    }
}
