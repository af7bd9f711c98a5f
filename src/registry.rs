use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use tracing::debug;

use crate::model::result::{CommandResult, Params};

/// Future produced by a command handler. `Err` carries the handler's error message.
pub type HandlerFuture = BoxFuture<'static, Result<CommandResult, String>>;

type HandlerFn = dyn Fn(Params) -> HandlerFuture + Send + Sync;

/// A type-erased command handler.
///
/// Handlers are built from either synchronous closures or closures returning a
/// future; both shapes are normalized to [`HandlerFuture`] here so the dispatcher
/// only ever awaits.
#[derive(Clone)]
pub struct CommandHandler {
    inner: Arc<HandlerFn>,
}

impl CommandHandler {
    /// Wraps a synchronous handler. The handler runs when the dispatch future is
    /// first polled.
    pub fn sync<F, R, E>(handler: F) -> Self
    where
        F: Fn(Params) -> Result<R, E> + Send + Sync + 'static,
        R: Into<CommandResult>,
        E: Display,
    {
        let handler = Arc::new(handler);
        Self {
            inner: Arc::new(move |params: Params| -> HandlerFuture {
                let handler = Arc::clone(&handler);
                future::lazy(move |_| {
                    handler(params)
                        .map(Into::into)
                        .map_err(|err| err.to_string())
                })
                .boxed()
            }),
        }
    }

    /// Wraps a handler that returns a future.
    pub fn from_async<F, Fut, R, E>(handler: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Into<CommandResult>,
        E: Display,
    {
        Self {
            inner: Arc::new(move |params: Params| -> HandlerFuture {
                handler(params)
                    .map(|outcome| outcome.map(Into::into).map_err(|err| err.to_string()))
                    .boxed()
            }),
        }
    }

    pub(crate) fn call(&self, params: Params) -> HandlerFuture {
        (self.inner)(params)
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CommandHandler")
    }
}

/// Maps command-type strings to handlers. Owned by a single adapter.
#[derive(Clone, Debug, Default)]
pub struct CommandRegistry {
    handlers: BTreeMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handler` under `command_type`, replacing any earlier mapping.
    pub fn register_handler(&mut self, command_type: impl Into<String>, handler: CommandHandler) {
        let command_type = command_type.into();
        debug!(command_type = %command_type, "registered handler");
        self.handlers.insert(command_type, handler);
    }

    /// Registers a synchronous handler.
    pub fn register<F, R, E>(&mut self, command_type: impl Into<String>, handler: F)
    where
        F: Fn(Params) -> Result<R, E> + Send + Sync + 'static,
        R: Into<CommandResult>,
        E: Display,
    {
        self.register_handler(command_type, CommandHandler::sync(handler));
    }

    /// Registers a handler returning a future.
    pub fn register_async<F, Fut, R, E>(&mut self, command_type: impl Into<String>, handler: F)
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Into<CommandResult>,
        E: Display,
    {
        self.register_handler(command_type, CommandHandler::from_async(handler));
    }

    /// Registers every entry of `table` whose name starts with `prefix`, under
    /// the remainder of its name.
    ///
    /// `table` plays the role of an adapter's method list: adapters build it
    /// once in their constructor, e.g. `[("_cmd_create_box", handler), ...]`.
    /// Entries without the prefix, or whose remainder is empty, are skipped.
    /// Calling this again with the same table leaves the command set unchanged.
    /// Returns the number of handlers registered by this call.
    pub fn register_by_prefix<I, S>(&mut self, prefix: &str, table: I) -> usize
    where
        I: IntoIterator<Item = (S, CommandHandler)>,
        S: AsRef<str>,
    {
        let mut registered = 0;
        for (name, handler) in table {
            let Some(command_type) = name.as_ref().strip_prefix(prefix) else {
                continue;
            };
            if command_type.is_empty() {
                continue;
            }
            debug!(
                command_type,
                member = name.as_ref(),
                "registered handler by prefix"
            );
            self.handlers.insert(command_type.to_string(), handler);
            registered += 1;
        }
        registered
    }

    pub fn unregister(&mut self, command_type: &str) -> Option<CommandHandler> {
        self.handlers.remove(command_type)
    }

    pub fn contains(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    pub fn get(&self, command_type: &str) -> Option<&CommandHandler> {
        self.handlers.get(command_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered command types, sorted.
    pub fn list_commands(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::{CommandHandler, CommandRegistry};
    use crate::model::result::CommandResult;

    fn noop() -> CommandHandler {
        CommandHandler::sync(|_| Ok::<_, Infallible>(CommandResult::ok()))
    }

    #[test]
    fn register_overwrites_existing_mapping() {
        let mut registry = CommandRegistry::new();
        registry.register("create_box", |_| Ok::<_, Infallible>(CommandResult::ok()));
        registry.register("create_box", |_| {
            Ok::<_, Infallible>(CommandResult::fail("replaced"))
        });

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_commands(), vec!["create_box".to_string()]);
    }

    #[test]
    fn register_by_prefix_strips_prefix_and_skips_others() {
        let mut registry = CommandRegistry::new();
        let count = registry.register_by_prefix(
            "_cmd_",
            [
                ("_cmd_create_box", noop()),
                ("_cmd_create_cylinder", noop()),
                ("_cmd_", noop()),
                ("health_check", noop()),
            ],
        );

        assert_eq!(count, 2);
        assert_eq!(
            registry.list_commands(),
            vec!["create_box".to_string(), "create_cylinder".to_string()]
        );
    }

    #[test]
    fn register_by_prefix_is_idempotent() {
        let table = || {
            vec![
                ("_handle_custom_action", noop()),
                ("_handle_other", noop()),
            ]
        };
        let mut registry = CommandRegistry::new();
        registry.register_by_prefix("_handle_", table());
        let first = registry.list_commands();
        registry.register_by_prefix("_handle_", table());

        assert_eq!(registry.list_commands(), first);
        assert!(registry.contains("custom_action"));
    }

    #[test]
    fn unregister_removes_command() {
        let mut registry = CommandRegistry::new();
        registry.register_handler("ping", noop());
        assert!(registry.unregister("ping").is_some());
        assert!(registry.is_empty());
    }
}
