//! Command dispatch: handler lookup, invocation and result normalization.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use futures_util::future::{BoxFuture, FutureExt};
use tracing::{error, warn};

use crate::model::result::{CommandResult, Params};
use crate::registry::CommandRegistry;

/// Future returned by [`CommandRegistry::dispatch`]. It never fails.
pub type DispatchFuture = BoxFuture<'static, CommandResult>;

pub(crate) fn unknown_command_error(command_type: &str) -> String {
    format!("Unknown command: {command_type}")
}

impl CommandRegistry {
    /// Executes the handler registered for `command_type`.
    ///
    /// The handler is resolved eagerly, so the returned future does not borrow
    /// the registry. Handler errors and panics are converted to failure results.
    pub fn dispatch(&self, command_type: &str, params: Params) -> DispatchFuture {
        let Some(handler) = self.get(command_type).cloned() else {
            warn!(command_type, "unknown command");
            let result = CommandResult::fail(unknown_command_error(command_type));
            return futures_util::future::ready(result).boxed();
        };

        let command_type = command_type.to_string();
        async move {
            let invoked = panic::catch_unwind(AssertUnwindSafe(|| handler.call(params)));
            let outcome = match invoked {
                Ok(pending) => AssertUnwindSafe(pending).catch_unwind().await,
                Err(payload) => Err(payload),
            };

            match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(message)) => {
                    error!(command_type = %command_type, error = %message, "handler error");
                    CommandResult::fail(message)
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(command_type = %command_type, error = %message, "handler panicked");
                    CommandResult::fail(message)
                }
            }
        }
        .boxed()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "handler panicked".to_string()
}
