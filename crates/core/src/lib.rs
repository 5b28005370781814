//! job-runner core (component A/C/D): the event bus, the kind registry and
//! state-parsing rules, the resource descriptor lens, and manifest
//! labeling/naming helpers shared by `jobop-stream`, `jobop-watch`, and
//! `jobop-runner`.

#![forbid(unsafe_code)]

pub mod descriptor;
pub mod error;
pub mod events;
pub mod kinds;
pub mod manifest;
pub mod policy;
pub mod state;

pub use descriptor::Descriptor;
pub use error::CoreError;
pub use events::{Event, EventBus, EventPayload};
pub use kinds::{Kind, KindRegistry, ParseStateFn};
pub use manifest::{compose_name, stamp_instance_label, INSTANCE_ID_LABEL};
pub use policy::DeletePolicy;
pub use state::State;
