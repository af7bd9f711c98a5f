use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchFuture;
use crate::model::capability::Capability;
use crate::model::result::Params;
use crate::registry::CommandRegistry;

/// Capabilities and command list an adapter advertises on registration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct AdapterManifest {
    pub capabilities: Vec<Capability>,
    pub commands: Vec<String>,
}

/// A CAD integration: a command registry plus health and capability declarations.
///
/// Implementors build their [`CommandRegistry`] in their constructor. The
/// provided methods cover dispatch and registration; only the three required
/// methods are integration specific.
pub trait Adapter: Send + Sync {
    fn registry(&self) -> &CommandRegistry;

    /// True when the underlying CAD application is responsive.
    fn health_check(&self) -> bool;

    fn capabilities(&self) -> Vec<Capability>;

    fn execute(&self, command_type: &str, params: Params) -> DispatchFuture {
        self.registry().dispatch(command_type, params)
    }

    fn supported_commands(&self) -> Vec<String> {
        self.registry().list_commands()
    }

    fn manifest(&self) -> AdapterManifest {
        self.registry().registration_payload(self.capabilities())
    }
}

impl CommandRegistry {
    /// Couples `capabilities` with the registered command types.
    pub fn registration_payload(&self, capabilities: Vec<Capability>) -> AdapterManifest {
        AdapterManifest {
            capabilities,
            commands: self.list_commands(),
        }
    }
}

/// Adapter assembled from a registry and a fixed capability list.
#[derive(Debug)]
pub struct BasicAdapter {
    registry: CommandRegistry,
    capabilities: Vec<Capability>,
    healthy: AtomicBool,
}

impl BasicAdapter {
    pub fn new(registry: CommandRegistry) -> Self {
        Self {
            registry,
            capabilities: Vec::new(),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn registry_mut(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl Default for BasicAdapter {
    fn default() -> Self {
        Self::new(CommandRegistry::new())
    }
}

impl Adapter for BasicAdapter {
    fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use serde_json::json;

    use super::{Adapter, BasicAdapter};
    use crate::model::capability::Capability;
    use crate::model::result::{CommandResult, Params};
    use crate::registry::CommandRegistry;

    fn box_adapter() -> BasicAdapter {
        let mut registry = CommandRegistry::new();
        registry.register("create_box", |_| Ok::<_, Infallible>(CommandResult::ok()));
        registry.register("boolean_union", |_| Ok::<_, Infallible>(()));
        BasicAdapter::new(registry).with_capabilities([Capability::PRIMITIVES, Capability::BOOLEANS])
    }

    #[test]
    fn manifest_couples_capabilities_and_commands() {
        let manifest = box_adapter().manifest();
        assert_eq!(
            serde_json::to_value(&manifest).expect("serialize"),
            json!({
                "capabilities": ["primitives", "booleans"],
                "commands": ["boolean_union", "create_box"]
            })
        );
    }

    #[tokio::test]
    async fn empty_adapter_rejects_every_command() {
        let adapter = BasicAdapter::default();
        for command_type in ["create_box", "export_stl"] {
            let result = adapter.execute(command_type, Params::new()).await;
            assert_eq!(
                serde_json::to_value(&result).expect("serialize"),
                json!({
                    "success": false,
                    "data": {},
                    "error": format!("Unknown command: {command_type}")
                })
            );
        }
    }

    #[test]
    fn health_flag_is_observable() {
        let adapter = box_adapter();
        assert!(adapter.health_check());
        adapter.set_healthy(false);
        assert!(!adapter.health_check());
    }
}
