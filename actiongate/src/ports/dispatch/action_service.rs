use crate::app::dispatch::model::{ActionInvocation, ServiceResponse};
use crate::app::dispatch::service::Dispatcher;
use crate::domain::dispatch::HandlerId;
use async_trait::async_trait;

/// External handler that receives requests for actions targeting its id.
///
/// Handlers may grant follow-up actions by registering them on the
/// dispatcher they are handed; whatever they return is passed back to the
/// caller unmodified.
#[async_trait]
pub trait ActionService: Send + Sync {
    /// Process-unique id. Must be stable for the lifetime of the handler.
    fn id(&self) -> HandlerId;

    async fn handle_event(
        &self,
        dispatcher: &Dispatcher,
        invocation: ActionInvocation,
    ) -> ServiceResponse;
}
