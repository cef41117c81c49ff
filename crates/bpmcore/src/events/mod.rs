mod base;
mod iggy_bus;

pub use base::{EventBus, EventEmitter, InstanceId, ProcessEvent, StepEvent};
pub use iggy_bus::{
    decode_start_request, StartRequestBus, StartRequestBusConfig, StartRequestBusError,
    StartRequestSubscription,
};
