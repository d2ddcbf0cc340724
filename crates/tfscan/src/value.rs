//! value representation of block configuration
//!
//! Checks never see hcl syntax. Each block body is converted into a [Value] tree:
//! - boolean, integer, decimal, string
//! - array (nested blocks with the same identifier are collected into one array)
//! - object (order-preserving "map", key is always a string)
//! - null
//!
//! Expressions that are not literals (variables, traversals, function calls, ...) are kept
//! as their source text wrapped in `${...}`. Nothing is evaluated here.
use indexmap::IndexMap;
use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serializer,
};

/// All possible value types
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(object) => object.get(key),
            _ => None,
        }
    }

    /// Walk a dotted path (`versioning.enabled`), descending into the first element of
    /// arrays along the way
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for key in path.split('.') {
            current = match current {
                Value::Array(array) => array.first()?.get(key)?,
                _ => current.get(key)?,
            };
        }
        Some(current)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Iterate array members, or the value itself when it is not an array
    pub fn members(&self) -> impl Iterator<Item = &Value> {
        match self {
            Value::Array(array) => array.iter().collect::<Vec<_>>().into_iter(),
            other => vec![other].into_iter(),
        }
    }

    /// `true` for string values that still carry an unevaluated expression
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Value::String(s) if s.starts_with("${") && s.ends_with('}'))
    }

    /// Render a scalar the way it appears in source text
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Boolean(b) => Some(b.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Decimal(d) => Some(d.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<hcl::Body> for Value {
    fn from(value: hcl::Body) -> Self {
        let mut object: IndexMap<String, Value> = IndexMap::new();

        for structure in value {
            match structure {
                hcl::Structure::Attribute(attribute) => {
                    object.insert(attribute.key.to_string(), attribute.expr.into());
                }
                hcl::Structure::Block(block) => {
                    let mut nested: Value = block.body.into();
                    for label in block.labels.iter().rev() {
                        nested = Value::Object(IndexMap::from([(label.as_str().to_string(), nested)]));
                    }

                    let entry = object
                        .entry(block.identifier.to_string())
                        .or_insert_with(|| Value::Array(vec![]));
                    if let Value::Array(array) = entry {
                        array.push(nested);
                    }
                }
            }
        }

        Value::Object(object)
    }
}

impl From<hcl::Expression> for Value {
    fn from(value: hcl::Expression) -> Self {
        use hcl::Expression;

        match value {
            Expression::Null => Value::Null,
            Expression::Bool(bool) => bool.into(),
            Expression::Number(num) => num.into(),
            Expression::String(s) => s.into(),
            Expression::Array(array) => array.into(),
            Expression::Object(object) => Value::Object(
                object
                    .into_iter()
                    .map(|(key, value)| (object_key_string(&key), value.into()))
                    .collect(),
            ),
            Expression::TemplateExpr(template) => match *template {
                hcl::TemplateExpr::QuotedString(s) => s.into(),
                hcl::TemplateExpr::Heredoc(heredoc) => heredoc.template.into(),
            },
            Expression::Parenthesis(inner) => (*inner).into(),
            other => unresolved(&other),
        }
    }
}

impl From<hcl::Number> for Value {
    fn from(value: hcl::Number) -> Self {
        if let Some(int) = value.as_i64() {
            return Value::Integer(int);
        }

        match value.as_f64() {
            Some(decimal) => Value::Decimal(decimal),
            None => Value::String(value.to_string()),
        }
    }
}

fn object_key_string(key: &hcl::ObjectKey) -> String {
    match key {
        hcl::ObjectKey::Identifier(ident) => ident.to_string(),
        hcl::ObjectKey::Expression(hcl::Expression::String(s)) => s.clone(),
        hcl::ObjectKey::Expression(expr) => expression_source(expr),
        _ => key.to_string(),
    }
}

/// Source text of an expression, as close to the original as hcl formatting allows
pub fn expression_source(expr: &hcl::Expression) -> String {
    hcl::format::to_string(expr).unwrap_or_else(|_| format!("{expr:?}"))
}

fn unresolved(expr: &hcl::Expression) -> Value {
    Value::String(format!("${{{}}}", expression_source(expr)))
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Boolean(value) => serializer.serialize_bool(*value),
            Value::Integer(value) => serializer.serialize_i64(*value),
            Value::Decimal(value) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Array(value) => {
                let mut ser = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
            Value::Object(value) => {
                let mut ser = serializer.serialize_map(Some(value.len()))?;
                for (element_key, element_value) in value {
                    ser.serialize_entry(element_key, element_value)?;
                }
                ser.end()
            }
        }
    }
}

/// Build an object [Value] from key/value pairs
///
/// ```
/// # use tfscan::object;
/// let value = object! { "acl" => "private", "force_destroy" => true };
/// assert_eq!(value.get("acl").and_then(|v| v.as_str()), Some("private"));
/// ```
#[macro_export]
macro_rules! object {
    {} => { $crate::value::Value::Object(Default::default()) };
    { $($key:expr => $value:expr),+ $(,)? } => {
        $crate::value::Value::Object(
            [$(($key.to_string(), $crate::value::Value::from($value))),+].into_iter().collect()
        )
    };
}
