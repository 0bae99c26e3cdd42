//! Query evaluation against a [`ResourceView`]
//!
//! The same evaluator serves committed snapshots and in-flight transaction
//! views.
//!
//! ## Comparison rules
//!
//! - A missing or null field never matches, whatever the operator
//! - A relationship compares with a string through its URI form
//!   (`resource:ns.Type#id`)
//! - An enum compares with a string by its value
//! - A DateTime compares with an RFC 3339 string
//! - Integer and Double compare numerically
//! - Other incomparable pairs only satisfy `!=`

use super::definition::{CompareOp, FieldPath, Operand, Predicate, SortOrder};
use super::plan::{CompiledQuery, Step};
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::cmp::Ordering;
use tally_core::{Fields, QueryParams, Resource, ResourceView, TallyError, TallyResult, Value};

impl CompiledQuery {
    /// Evaluate the query
    ///
    /// # Errors
    /// `MissingParameter` if a parameter the query uses is not supplied,
    /// otherwise any error the view raises
    pub fn evaluate(
        &self,
        view: &mut dyn ResourceView,
        params: &QueryParams,
    ) -> TallyResult<Vec<Resource>> {
        if let Some(missing) = self.params.iter().find(|p| !params.contains_key(*p)) {
            return Err(TallyError::MissingParameter {
                query: self.definition.name.clone(),
                parameter: missing.clone(),
            });
        }

        let mut selected = Vec::new();
        for resource in view.scan(&self.key)? {
            let keep = match &self.definition.predicate {
                Some(predicate) => self.test(predicate, &resource, view, params)?,
                None => true,
            };
            if keep {
                selected.push(resource);
            }
        }

        if !self.definition.order_by.is_empty() {
            selected = self.sort(selected, view)?;
        }

        Ok(selected
            .into_iter()
            .skip(self.definition.skip)
            .take(self.definition.limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn test(
        &self,
        predicate: &Predicate,
        resource: &Resource,
        view: &mut dyn ResourceView,
        params: &QueryParams,
    ) -> TallyResult<bool> {
        match predicate {
            Predicate::Compare { path, op, operand } => {
                let Some(field) = self.read(path, resource, view)? else {
                    return Ok(false);
                };
                let operand = match operand {
                    Operand::Literal(value) => value,
                    Operand::Param(name) => params.get(name).ok_or_else(|| {
                        TallyError::MissingParameter {
                            query: self.definition.name.clone(),
                            parameter: name.clone(),
                        }
                    })?,
                };
                Ok(satisfies(*op, &field, operand))
            }
            Predicate::And(items) => {
                for item in items {
                    if !self.test(item, resource, view, params)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(items) => {
                for item in items {
                    if self.test(item, resource, view, params)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(inner) => Ok(!self.test(inner, resource, view, params)?),
        }
    }

    /// Read a field path; None if any hop is missing or dangling
    fn read(
        &self,
        path: &FieldPath,
        resource: &Resource,
        view: &mut dyn ResourceView,
    ) -> TallyResult<Option<Value>> {
        let steps = self.paths.get(path).ok_or_else(|| {
            TallyError::internal(format!("path '{}' missing from plan {}", path, self.definition.name))
        })?;

        let mut fields: Cow<'_, Fields> = Cow::Borrowed(resource.fields());
        let mut current: Option<Value> = None;
        for step in steps {
            match step {
                Step::Field(name) => match fields.get(name) {
                    Some(value) if !value.is_null() => current = Some(value.clone()),
                    _ => return Ok(None),
                },
                Step::Deref(key) => {
                    let Some(Value::Relationship(target)) = current.take() else {
                        return Ok(None);
                    };
                    match view.get_resource(key, target.identifier())? {
                        Some(resolved) => fields = Cow::Owned(resolved.fields().clone()),
                        None => return Ok(None),
                    }
                }
                Step::Enter => {
                    let Some(Value::Concept(concept)) = current.take() else {
                        return Ok(None);
                    };
                    fields = Cow::Owned(concept.fields().clone());
                }
            }
        }
        Ok(current)
    }

    fn sort(&self, selected: Vec<Resource>, view: &mut dyn ResourceView) -> TallyResult<Vec<Resource>> {
        let mut keyed = Vec::with_capacity(selected.len());
        for resource in selected {
            let mut keys = Vec::with_capacity(self.definition.order_by.len());
            for order in &self.definition.order_by {
                keys.push(self.read(&order.path, &resource, view)?);
            }
            keyed.push((keys, resource));
        }

        // Stable: ties keep ascending identifier order from the scan
        keyed.sort_by(|(a, _), (b, _)| {
            for (index, order) in self.definition.order_by.iter().enumerate() {
                let ordering = order_keys(&a[index], &b[index]);
                let ordering = match order.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, resource)| resource).collect())
    }
}

/// Total order over sort keys
///
/// Nulls sort after every value and NaN after every other number. Values of
/// unrelated types group by type so the order stays transitive.
fn order_keys(a: &Option<Value>, b: &Option<Value>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => order_values(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn order_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Double(x), Value::Double(y)) => order_doubles(*x, *y),
        (Value::Integer(i), Value::Double(f)) => order_integer_double(*i, *f),
        (Value::Double(f), Value::Integer(i)) => order_integer_double(*i, *f).reverse(),
        (Value::String(x), Value::String(y)) | (Value::Enum(x), Value::Enum(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (Value::Relationship(x), Value::Relationship(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn order_doubles(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => Ordering::Equal,
    }
}

fn order_integer_double(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Less;
    }
    match (i as f64).partial_cmp(&f) {
        Some(Ordering::Equal) | None => i.cmp(&(f as i64)),
        Some(ordering) => ordering,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Integer(_) | Value::Double(_) => 1,
        Value::String(_) => 2,
        Value::Enum(_) => 3,
        Value::DateTime(_) => 4,
        Value::Relationship(_) => 5,
        Value::Concept(_) => 6,
        Value::Array(_) => 7,
        Value::Null => 8,
    }
}

fn satisfies(op: CompareOp, field: &Value, operand: &Value) -> bool {
    match compare_values(field, operand) {
        Some(ordering) => op.accepts(ordering),
        None => op == CompareOp::Ne && field != operand,
    }
}

/// Order a field value against an operand, coercing where the rules allow
pub fn compare_values(field: &Value, operand: &Value) -> Option<Ordering> {
    match (field, operand) {
        (Value::Relationship(r), Value::String(s)) => Some(r.to_uri().as_str().cmp(s.as_str())),
        (Value::String(s), Value::Relationship(r)) => Some(s.as_str().cmp(r.to_uri().as_str())),
        (Value::Enum(a), Value::String(b)) | (Value::String(a), Value::Enum(b)) => Some(a.cmp(b)),
        (Value::DateTime(d), Value::String(s)) => {
            s.parse::<DateTime<Utc>>().ok().map(|t| d.cmp(&t))
        }
        (Value::String(s), Value::DateTime(d)) => {
            s.parse::<DateTime<Utc>>().ok().map(|t| t.cmp(d))
        }
        (Value::Array(a), Value::Array(b)) if a == b => Some(Ordering::Equal),
        (Value::Concept(a), Value::Concept(b)) if a == b => Some(Ordering::Equal),
        _ => field.compare(operand),
    }
}
