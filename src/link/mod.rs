//! Link abstraction layer for line-oriented serial communication.
//!
//! Provides the `LineLink` trait with a serial device implementation and an
//! in-memory mock, enabling dependency injection and hardware-free tests.

pub mod error;
mod line;
pub mod mock;
pub mod serial_link;
pub mod traits;

pub use error::{LinkError, LinkResult};
pub use mock::MockLink;
pub use serial_link::SerialLink;
pub use traits::*;

/// Open the shared device and every controller device with the same settings.
///
/// Links opened before a failure are closed again when the partially built
/// list is dropped.
pub fn open_all(
    shared: &str,
    controllers: &[String],
    settings: &LinkSettings,
) -> Result<(LinkHandle, Vec<LinkHandle>), (String, LinkError)> {
    let shared_link = SerialLink::open(shared, settings).map_err(|e| (shared.to_string(), e))?;

    let mut controller_links: Vec<LinkHandle> = Vec::with_capacity(controllers.len());
    for device in controllers {
        let link = SerialLink::open(device, settings).map_err(|e| (device.clone(), e))?;
        controller_links.push(Box::new(link));
    }

    Ok((Box::new(shared_link), controller_links))
}
