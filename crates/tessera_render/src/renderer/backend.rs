//! Backend selection.

use tracing::{error, info, warn};

use crate::error::{RenderError, RenderResult};
use crate::geometry::Size;
use crate::gpu::{DriverFactory, GpuDriver};

/// Probes backends in preference order and returns the first that works.
///
/// Names without a registered factory count as failed probes.
pub(crate) fn probe(
    preferences: &[String],
    factories: &[&dyn DriverFactory],
    screen: Size,
) -> RenderResult<Box<dyn GpuDriver>> {
    let mut tried = Vec::with_capacity(preferences.len());
    for name in preferences {
        tried.push(name.clone());
        let Some(factory) = factories.iter().find(|f| f.name() == name) else {
            warn!(backend = %name, "no factory registered for backend");
            continue;
        };
        match factory.probe(screen) {
            Ok(driver) => {
                info!(
                    backend = %name,
                    capabilities = ?driver.capabilities(),
                    "rendering backend selected"
                );
                return Ok(driver);
            }
            Err(err) => error!(backend = %name, %err, "backend probe failed"),
        }
    }
    Err(RenderError::NoBackend { tried })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareFactory;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_falls_through_failing_backends() {
        let broken = SoftwareFactory::unavailable("gl3");
        let basic = SoftwareFactory::basic();
        let full = SoftwareFactory::full();

        let driver = probe(
            &names(&["gl3", "missing", "software-basic", "software"]),
            &[&broken, &full, &basic],
            Size::new(8, 8),
        )
        .unwrap();

        assert_eq!(driver.name(), "software-basic");
        assert!(basic.device().is_some());
        assert!(full.device().is_none());
    }

    #[test]
    fn test_no_backend_lists_attempts() {
        let broken = SoftwareFactory::unavailable("gl3");
        let err = probe(&names(&["gl3", "vulkan"]), &[&broken], Size::new(8, 8)).err().unwrap();

        match err {
            RenderError::NoBackend { tried } => assert_eq!(tried, names(&["gl3", "vulkan"])),
            other => panic!("unexpected error: {other}"),
        }
    }
}
