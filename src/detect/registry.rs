use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::config::DetectorSettings;

use super::backend::Detector;
use super::backends::{MotionBackend, StubBackend};

type Factory = Arc<dyn Fn() -> Result<Box<dyn Detector>> + Send + Sync>;

/// Named detector factories.
///
/// Every stream gets its own detector instance from the registry, so
/// backends with per-stream state never see frames from two sources. Heavy
/// resources (a loaded model) are shared by the factory closure.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    factories: BTreeMap<String, Factory>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry described by the detector settings.
    ///
    /// `stub` and `motion` are always available; `tract` loads the configured
    /// model once and fails here when the model cannot be loaded.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let mut registry = Self::new();
        registry.register("stub", || Ok(Box::new(StubBackend::new()) as Box<dyn Detector>));
        let motion = settings.motion.clone();
        registry.register("motion", move || {
            Ok(Box::new(MotionBackend::new(motion.clone())) as Box<dyn Detector>)
        });

        if settings.backend == "tract" {
            registry.register_tract(settings)?;
        }

        registry
            .set_default(&settings.backend)
            .with_context(|| format!("detector backend '{}' is not available", settings.backend))?;
        Ok(registry)
    }

    #[cfg(feature = "backend-tract")]
    fn register_tract(&mut self, settings: &DetectorSettings) -> Result<()> {
        use super::backends::{TractBackend, TractModel};

        let model_path = settings
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("detector.model_path is required for the tract backend"))?;
        let model = Arc::new(TractModel::load(model_path, settings.input_size)?);
        let settings = settings.clone();
        self.register("tract", move || {
            Ok(Box::new(TractBackend::new(model.clone(), &settings)) as Box<dyn Detector>)
        });
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    fn register_tract(&mut self, _settings: &DetectorSettings) -> Result<()> {
        Err(anyhow!(
            "the tract detector requires the backend-tract feature"
        ))
    }

    /// Register a factory. The first registered name becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn Detector>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Create a fresh detector from a named factory.
    pub fn create(&self, name: &str) -> Result<Box<dyn Detector>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        let mut detector = factory()?;
        detector
            .warm_up()
            .with_context(|| format!("warm-up failed for detector '{}'", name))?;
        Ok(detector)
    }

    /// Create a fresh detector from the default factory.
    pub fn create_default(&self) -> Result<Box<dyn Detector>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        self.create(name)
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() -> Result<()> {
        let settings = DetectorSettings {
            backend: "stub".to_string(),
            ..DetectorSettings::default()
        };
        let registry = DetectorRegistry::from_settings(&settings)?;
        assert_eq!(registry.default_name(), Some("stub"));
        assert_eq!(registry.create_default()?.name(), "stub");
        assert_eq!(registry.list(), vec!["motion".to_string(), "stub".to_string()]);
        Ok(())
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let settings = DetectorSettings {
            backend: "yolo-cloud".to_string(),
            ..DetectorSettings::default()
        };
        assert!(DetectorRegistry::from_settings(&settings).is_err());
    }

    #[test]
    fn create_rejects_unregistered_names() -> Result<()> {
        let registry = DetectorRegistry::from_settings(&DetectorSettings::default())?;
        assert_eq!(registry.create("motion")?.name(), "motion");
        assert!(registry.create("tract").is_err());
        Ok(())
    }

    #[test]
    fn motion_factory_uses_configured_tuning() -> Result<()> {
        use crate::frame::Frame;
        use image::{Rgb, RgbImage};

        let background = Frame::new(RgbImage::from_pixel(64, 64, Rgb([40, 40, 40])), 1);
        let mut moved = RgbImage::from_pixel(64, 64, Rgb([40, 40, 40]));
        for y in 16..32 {
            for x in 16..32 {
                moved.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        let moved = Frame::new(moved, 2);

        let mut settings = DetectorSettings::default();
        let mut default_motion = DetectorRegistry::from_settings(&settings)?.create("motion")?;
        default_motion.detect(&background)?;
        assert_eq!(default_motion.detect(&moved)?.len(), 1);

        settings.motion.min_cells = 64;
        let mut strict_motion = DetectorRegistry::from_settings(&settings)?.create("motion")?;
        strict_motion.detect(&background)?;
        assert!(strict_motion.detect(&moved)?.is_empty());
        Ok(())
    }

    #[test]
    fn first_registration_becomes_default() -> Result<()> {
        let mut registry = DetectorRegistry::new();
        assert!(registry.create_default().is_err());
        registry.register("stub", || Ok(Box::new(StubBackend::new()) as Box<dyn Detector>));
        assert_eq!(registry.default_name(), Some("stub"));
        assert!(registry.set_default("missing").is_err());
        Ok(())
    }
}
