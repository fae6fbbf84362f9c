pub mod attribute;
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod listener;
pub mod network;
pub mod registry;
pub mod store;
pub mod transform;
pub mod validator;

pub use attribute::{Attribute, AttributeSet, AttributeValue};
pub use buffer::{EventBuffer, Insertion};
pub use config::BeaconConfig;
pub use device::{DeviceInfoProvider, DeviceInformation};
pub use error::{BeaconError, DropReason, Result};
pub use event::{Event, EventCategory, EventFactory};
pub use listener::EventListener;
pub use network::HttpTransaction;
pub use registry::{AttributeRegistry, HarvestPayload};
pub use store::{AttributeStore, EventStore, InMemoryAttributeStore, InMemoryEventStore};
pub use transform::EventTransformAdapter;
