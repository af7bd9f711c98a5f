use std::borrow::Cow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A category of operations an adapter advertises during registration.
///
/// The known vocabulary is exposed as associated constants; adapters may still
/// advertise identifiers outside of it.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(Cow<'static, str>);

impl Capability {
    pub const PRIMITIVES: Self = Self::known("primitives");
    pub const BOOLEANS: Self = Self::known("booleans");
    pub const TRANSFORMS: Self = Self::known("transforms");
    pub const QUERIES: Self = Self::known("queries");
    pub const EXPORT: Self = Self::known("export");
    pub const IMPORT: Self = Self::known("import");
    pub const MODIFIERS: Self = Self::known("modifiers");
    pub const CURVES: Self = Self::known("curves");
    pub const MATERIALS: Self = Self::known("materials");

    pub const ANIMATION: Self = Self::known("animation");
    pub const PHYSICS: Self = Self::known("physics");
    pub const GEOMETRY_NODES: Self = Self::known("geometry_nodes");
    pub const RENDERING: Self = Self::known("rendering");

    pub const SKETCHES: Self = Self::known("sketches");
    pub const ASSEMBLY: Self = Self::known("assembly");
    pub const SIMULATION: Self = Self::known("simulation");

    pub const EDA: Self = Self::known("eda");

    const fn known(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Creates a capability, known or custom.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Every identifier in the known vocabulary.
    pub fn all() -> Vec<Self> {
        KNOWN_CAPABILITIES.iter().copied().map(Self::known).collect()
    }

    pub fn is_known(&self) -> bool {
        Self::validate(self.as_str())
    }

    /// True when `name` belongs to the known vocabulary.
    pub fn validate(name: &str) -> bool {
        KNOWN_CAPABILITIES.contains(&name)
    }
}

const KNOWN_CAPABILITIES: &[&str] = &[
    "primitives",
    "booleans",
    "transforms",
    "queries",
    "export",
    "import",
    "modifiers",
    "curves",
    "materials",
    "animation",
    "physics",
    "geometry_nodes",
    "rendering",
    "sketches",
    "assembly",
    "simulation",
    "eda",
];

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        KNOWN_CAPABILITIES
            .iter()
            .copied()
            .find(|name| *name == value)
            .map(Self::known)
            .ok_or_else(|| {
                format!(
                    "unknown capability `{value}`; expected one of: {}",
                    KNOWN_CAPABILITIES.join(", ")
                )
            })
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Capability;

    #[test]
    fn known_vocabulary_validates() {
        assert!(Capability::validate("primitives"));
        assert!(Capability::validate("eda"));
        assert!(!Capability::validate("invalid"));
        assert!(Capability::all().contains(&Capability::PRIMITIVES));
        assert_eq!(Capability::all().len(), 17);
    }

    #[test]
    fn custom_capabilities_are_allowed_but_unknown() {
        let custom = Capability::new("laser_cutting");
        assert!(!custom.is_known());
        assert_eq!(custom.as_str(), "laser_cutting");
        assert!("laser_cutting".parse::<Capability>().is_err());
    }

    #[test]
    fn owned_and_borrowed_forms_compare_equal() {
        assert_eq!(Capability::new("booleans"), Capability::BOOLEANS);
        assert_eq!(
            "booleans".parse::<Capability>().expect("known capability"),
            Capability::BOOLEANS
        );
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&vec![Capability::PRIMITIVES, Capability::EDA])
            .expect("serialize");
        assert_eq!(json, r#"["primitives","eda"]"#);
    }
}
