//! Services and their components

use crate::criteria::Criteria;
use crate::error::ValidationError;
use crate::params::NestedParameterMap;
use crate::policy::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Component name reserved for the service-level instance
pub const ROOT_COMPONENT: &str = "root";

/// A service is an ordered set of components.
///
/// Each component is either code that a plugin can instantiate, or a
/// reference to another contract that gets resolved recursively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    #[serde(flatten)]
    pub metadata: Metadata,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub components: Vec<Component>,

    #[serde(skip)]
    ordered: OnceLock<std::result::Result<Vec<usize>, ValidationError>>,
}

/// Component within a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,

    /// Optional match criteria; absent criteria always match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Criteria>,

    /// Contract this component depends on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,

    /// Code this component instantiates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Code>,

    /// Discovery parameters exposed to other components (templated)
    #[serde(default)]
    pub discovery: NestedParameterMap,

    /// Components of the same service that must exist before this one
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Code with type and parameters, handed to a code plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Code {
    #[serde(rename = "type")]
    pub code_type: String,

    /// Parameters (templated) passed down to the plugin
    #[serde(default)]
    pub params: NestedParameterMap,
}

impl Service {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(namespace, name),
            labels: BTreeMap::new(),
            components: Vec::new(),
            ordered: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self.ordered = OnceLock::new();
        self
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Returns components in topological order (dependencies first).
    ///
    /// The order is computed once per service and memoized.
    pub fn components_sorted(&self) -> std::result::Result<Vec<&Component>, ValidationError> {
        let order = self.ordered.get_or_init(|| self.topological_order());
        match order {
            Ok(indices) => Ok(indices.iter().map(|&i| &self.components[i]).collect()),
            Err(e) => Err(e.clone()),
        }
    }

    fn topological_order(&self) -> std::result::Result<Vec<usize>, ValidationError> {
        let index: HashMap<&str, usize> = self
            .components
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), i))
            .collect();

        // 1 = visiting, 2 = done
        let mut colors: HashMap<usize, u8> = HashMap::new();
        let mut ordered = Vec::with_capacity(self.components.len());

        for i in 0..self.components.len() {
            if !colors.contains_key(&i) {
                self.visit(i, &index, &mut colors, &mut ordered)?;
            }
        }
        Ok(ordered)
    }

    fn visit(
        &self,
        u: usize,
        index: &HashMap<&str, usize>,
        colors: &mut HashMap<usize, u8>,
        ordered: &mut Vec<usize>,
    ) -> std::result::Result<(), ValidationError> {
        colors.insert(u, 1);

        for dep in &self.components[u].dependencies {
            let v = *index
                .get(dep.as_str())
                .ok_or_else(|| ValidationError::MissingDependency {
                    service: self.metadata.name.clone(),
                    dependency: dep.clone(),
                })?;
            match colors.get(&v) {
                None => self.visit(v, index, colors, ordered)?,
                Some(1) => {
                    return Err(ValidationError::ComponentCycle {
                        service: self.metadata.name.clone(),
                        component: dep.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        ordered.push(u);
        colors.insert(u, 2);
        Ok(())
    }
}

impl Component {
    pub fn code(name: impl Into<String>, code_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: Some(Code {
                code_type: code_type.into(),
                params: NestedParameterMap::new(),
            }),
            ..Default::default()
        }
    }

    pub fn contract(name: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: Some(contract.into()),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: NestedParameterMap) -> Self {
        if let Some(code) = self.code.as_mut() {
            code.params = params;
        }
        self
    }

    pub fn with_discovery(mut self, discovery: NestedParameterMap) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn depends_on(mut self, component: impl Into<String>) -> Self {
        self.dependencies.push(component.into());
        self
    }

    pub fn is_code(&self) -> bool {
        self.code.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(service: &Service) -> Vec<String> {
        service
            .components_sorted()
            .unwrap()
            .into_iter()
            .map(|c| c.name.clone())
            .collect()
    }

    #[test]
    fn test_topological_sort() {
        let service = Service::new("main", "web")
            .with_component(Component::code("frontend", "helm").depends_on("backend"))
            .with_component(Component::code("backend", "helm").depends_on("db"))
            .with_component(Component::contract("db", "postgres"));

        assert_eq!(names(&service), vec!["db", "backend", "frontend"]);
        // Memoized result is stable
        assert_eq!(names(&service), vec!["db", "backend", "frontend"]);
    }

    #[test]
    fn test_component_cycle() {
        let service = Service::new("main", "web")
            .with_component(Component::code("a", "helm").depends_on("b"))
            .with_component(Component::code("b", "helm").depends_on("a"));

        assert!(matches!(
            service.components_sorted(),
            Err(ValidationError::ComponentCycle { .. })
        ));
    }

    #[test]
    fn test_missing_dependency() {
        let service = Service::new("main", "web")
            .with_component(Component::code("a", "helm").depends_on("ghost"));

        assert!(matches!(
            service.components_sorted(),
            Err(ValidationError::MissingDependency { .. })
        ));
    }
}
