//! Query plans: definitions checked and resolved against the model
//!
//! Compiling a definition resolves every field path into a sequence of
//! steps, records which registries evaluation will read, and collects the
//! parameter names callers must supply. Errors here are definition-time
//! errors (`InvalidQuery`), never evaluation-time ones.

use super::definition::{FieldPath, Operand, QueryDefinition};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tally_core::{FieldType, ModelRegistry, RegistryKey, TallyError, TallyResult, TypeDefinition};

/// One step of a resolved field path
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    /// Read a field of the current instance
    Field(String),
    /// Dereference the relationship just read into its registry
    Deref(RegistryKey),
    /// Descend into the concept just read
    Enter,
}

/// A query definition resolved against the model
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub(crate) definition: QueryDefinition,
    pub(crate) key: RegistryKey,
    pub(crate) registries: Vec<RegistryKey>,
    pub(crate) params: BTreeSet<String>,
    pub(crate) paths: HashMap<FieldPath, Vec<Step>>,
}

impl CompiledQuery {
    /// Resolve a definition against the model
    ///
    /// # Errors
    /// `InvalidQuery` if the resource type is unknown or not an asset or
    /// participant, or if a field path does not resolve
    pub fn compile(model: &ModelRegistry, definition: QueryDefinition) -> TallyResult<Self> {
        let invalid = |reason: String| TallyError::InvalidQuery {
            name: definition.name.clone(),
            reason,
        };

        if definition.name.trim().is_empty() {
            return Err(invalid("query name is empty".to_string()));
        }
        let root = model
            .resolve_fq(&definition.resource)
            .map_err(|e| invalid(e.to_string()))?;
        let key = root
            .registry_key()
            .ok_or_else(|| invalid(format!("{} is not an asset or participant", root.name)))?;

        let mut registries = BTreeSet::from([key.clone()]);
        let mut params = BTreeSet::new();
        let mut paths = HashMap::new();

        let mut referenced: Vec<&FieldPath> = definition.order_by.iter().map(|o| &o.path).collect();
        if let Some(predicate) = &definition.predicate {
            predicate.for_each_comparison(&mut |path, operand| {
                referenced.push(path);
                if let Operand::Param(name) = operand {
                    params.insert(name.clone());
                }
            });
        }

        for path in referenced {
            if paths.contains_key(path) {
                continue;
            }
            let steps = resolve_path(model, &root, path, &mut registries).map_err(&invalid)?;
            paths.insert(path.clone(), steps);
        }

        Ok(CompiledQuery {
            key,
            registries: registries.into_iter().collect(),
            params,
            paths,
            definition,
        })
    }

    /// Name of the query
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The definition this plan was compiled from
    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    /// Registry the query selects from
    pub fn registry(&self) -> &RegistryKey {
        &self.key
    }

    /// Every registry evaluation reads, ascending
    pub fn registries_read(&self) -> &[RegistryKey] {
        &self.registries
    }

    /// Parameter names the caller must supply
    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(String::as_str)
    }
}

fn resolve_path(
    model: &ModelRegistry,
    root: &Arc<TypeDefinition>,
    path: &FieldPath,
    registries: &mut BTreeSet<RegistryKey>,
) -> Result<Vec<Step>, String> {
    let segments = path.segments();
    let mut current = Arc::clone(root);
    let mut steps = Vec::with_capacity(segments.len() * 2);

    for (index, segment) in segments.iter().enumerate() {
        let field = current
            .get_field(segment)
            .ok_or_else(|| format!("{} has no field '{}' (in path '{}')", current.name, segment, path))?;
        steps.push(Step::Field(segment.clone()));

        if index + 1 == segments.len() {
            break;
        }
        if field.array {
            return Err(format!("cannot traverse array field '{}' in path '{}'", segment, path));
        }
        current = match &field.field_type {
            FieldType::Relationship(target) => {
                let key = model.registry_key(target).map_err(|e| e.to_string())?;
                registries.insert(key.clone());
                steps.push(Step::Deref(key));
                model.resolve_fq(target).map_err(|e| e.to_string())?
            }
            FieldType::Concept(target) => {
                steps.push(Step::Enter);
                model.resolve_fq(target).map_err(|e| e.to_string())?
            }
            _ => {
                return Err(format!(
                    "field '{}' in path '{}' is neither a relationship nor a concept",
                    segment, path
                ))
            }
        };
    }
    Ok(steps)
}
