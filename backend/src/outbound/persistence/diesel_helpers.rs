//! Shared helpers for the Diesel repositories.
//!
//! Error mapping is generic over the target port error so each repository
//! supplies only its `query` and `connection` constructors.

use tracing::debug;

/// Map common Diesel error variants onto query or connection constructors.
///
/// `NotFound` and builder failures are query errors; a closed connection or
/// a serialisation failure is reported as a connection error so callers treat
/// it as retryable.
pub(crate) fn map_diesel_error<E, Q, C>(
    error: diesel::result::Error,
    operation: &'static str,
    query: Q,
    connection: C,
) -> E
where
    Q: Fn(String) -> E,
    C: Fn(String) -> E,
{
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), operation, "diesel operation failed");
        }
        _ => debug!(
            error_type = %std::any::type_name_of_val(&error),
            operation,
            "diesel operation failed"
        ),
    }

    match error {
        DieselError::NotFound => query(format!("{operation}: record not found")),
        DieselError::QueryBuilderError(_) => query(format!("{operation}: database query error")),
        DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::SerializationFailure,
            _,
        ) => connection(format!("{operation}: database connection error")),
        DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
            query(format!("{operation}: constraint rejected value: {}", info.message()))
        }
        _ => query(format!("{operation}: database error")),
    }
}

/// Convert a non-negative column value into a domain counter.
pub(crate) fn column_to_u64(column: &'static str, value: i64) -> Result<u64, String> {
    u64::try_from(value).map_err(|_| format!("{column} is negative: {value}"))
}

/// Convert a domain counter into a `BIGINT` bind value.
pub(crate) fn u64_to_column(column: &'static str, value: u64) -> Result<i64, String> {
    i64::try_from(value).map_err(|_| format!("{column} exceeds BIGINT range: {value}"))
}
