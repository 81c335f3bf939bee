//! Parameterized statements and type-dispatched parameter binding.
//!
//! Statements are built on the caller's thread and executed later on a
//! background lane, so they own their SQL and their parameters. Binding
//! happens at execution time, when the active profile decides how flags are
//! encoded (native boolean or 0/1 integer).

use sqlx::any::AnyArguments;
use sqlx::query::Query;
use sqlx::Any;
use uuid::Uuid;

/// A single bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// Non-null text.
    Text(String),
    /// Nullable text.
    NullableText(Option<String>),
    /// 32-bit integer.
    Int(i32),
    /// Nullable 32-bit integer.
    NullableInt(Option<i32>),
    /// 64-bit integer.
    BigInt(i64),
    /// Nullable 64-bit integer.
    NullableBigInt(Option<i64>),
    /// Double-precision float.
    Double(f64),
    /// Nullable double-precision float.
    NullableDouble(Option<f64>),
    /// Boolean flag; encoded per backend family.
    Flag(bool),
    /// Nullable boolean flag.
    NullableFlag(Option<bool>),
    /// Opaque bytes.
    Blob(Vec<u8>),
    /// Nullable opaque bytes.
    NullableBlob(Option<Vec<u8>>),
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<Option<String>> for BindValue {
    fn from(v: Option<String>) -> Self {
        Self::NullableText(v)
    }
}

impl From<i32> for BindValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for BindValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for BindValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<f32> for BindValue {
    fn from(v: f32) -> Self {
        Self::Double(f64::from(v))
    }
}

impl From<bool> for BindValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<Vec<u8>> for BindValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<Uuid> for BindValue {
    fn from(v: Uuid) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Option<Uuid>> for BindValue {
    fn from(v: Option<Uuid>) -> Self {
        Self::NullableText(v.map(|id| id.to_string()))
    }
}

/// An owned, parameterized SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Short name used in logs (`grave.insert`, `block.delete`, ...).
    pub label: &'static str,
    /// SQL text with backend-specific placeholders already rendered.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<BindValue>,
}

impl Statement {
    /// Create a statement without parameters.
    pub fn new(label: &'static str, sql: impl Into<String>) -> Self {
        Self {
            label,
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter.
    #[must_use]
    pub fn arg(mut self, value: impl Into<BindValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Build the executable query, binding every parameter.
    pub fn query(&self, native_bool: bool) -> Query<'_, Any, AnyArguments<'_>> {
        bind_params(sqlx::query(&self.sql), &self.params, native_bool)
    }
}

/// Bind `params` onto `query` in order.
///
/// Flags bind as `bool` when the family has a native boolean type and as
/// `0`/`1` integers otherwise.
pub fn bind_params<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[BindValue],
    native_bool: bool,
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param {
            BindValue::Text(v) => query.bind(v.clone()),
            BindValue::NullableText(v) => query.bind(v.clone()),
            BindValue::Int(v) => query.bind(*v),
            BindValue::NullableInt(v) => query.bind(*v),
            BindValue::BigInt(v) => query.bind(*v),
            BindValue::NullableBigInt(v) => query.bind(*v),
            BindValue::Double(v) => query.bind(*v),
            BindValue::NullableDouble(v) => query.bind(*v),
            BindValue::Flag(v) if native_bool => query.bind(*v),
            BindValue::Flag(v) => query.bind(i32::from(*v)),
            BindValue::NullableFlag(v) if native_bool => query.bind(*v),
            BindValue::NullableFlag(v) => query.bind(v.map(i32::from)),
            BindValue::Blob(v) => query.bind(v.clone()),
            BindValue::NullableBlob(v) => query.bind(v.clone()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_appends_in_order() {
        let id = Uuid::new_v4();
        let stmt = Statement::new("grave.update", "UPDATE grave SET experience = ? WHERE uuid = ?")
            .arg(75)
            .arg(id);
        assert_eq!(
            stmt.params,
            vec![BindValue::Int(75), BindValue::Text(id.to_string())]
        );
    }

    #[test]
    fn optional_uuid_binds_as_nullable_text() {
        assert_eq!(BindValue::from(None::<Uuid>), BindValue::NullableText(None));
        assert_eq!(BindValue::from(1.5_f32), BindValue::Double(1.5));
    }
}
