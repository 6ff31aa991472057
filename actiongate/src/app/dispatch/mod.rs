pub mod model;
pub mod registry;
pub mod service;

pub use model::{
    ActionInvocation, ClientValue, ResponseData, ServiceAction, ServiceRequest, ServiceResponse,
};
pub use service::{DispatchError, DispatchResult, Dispatcher};
