//! Error types surfaced by every mapper operation.

use crate::common::Item;

use aws_sdk_dynamodb::{
    error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types,
};
use std::{collections, fmt};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The request a backend error belongs to.
///
/// Carried by every backend-facing error so a failing call can be reproduced
/// from the error alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestContext {
    /// The table the request targeted.
    pub table_name: String,
    /// The primary key of the item, for single-item requests.
    pub key: Option<Item>,
    /// The update expression sent, if any.
    pub update_expression: Option<String>,
    /// The condition expression sent, if any.
    pub condition_expression: Option<String>,
    /// Name aliases sent with the expressions.
    pub expression_attribute_names: Option<collections::HashMap<String, String>>,
    /// Value aliases sent with the expressions.
    pub expression_attribute_values: Option<collections::HashMap<String, types::AttributeValue>>,
}

impl RequestContext {
    /// Context naming only the table.
    pub fn table(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table `{}`", self.table_name)?;
        if let Some(key) = &self.key {
            write!(f, ", key {key:?}")?;
        }
        if let Some(update_expression) = &self.update_expression {
            write!(f, ", update `{update_expression}`")?;
        }
        if let Some(condition_expression) = &self.condition_expression {
            write!(f, ", condition `{condition_expression}`")?;
        }
        if let Some(names) = &self.expression_attribute_names {
            write!(f, ", names {names:?}")?;
        }
        if let Some(values) = &self.expression_attribute_values {
            write!(f, ", values {values:?}")?;
        }
        Ok(())
    }
}

/// Errors returned by the mapper.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema description is malformed. Raised while building a registry.
    #[error("invalid schema: {0}")]
    SchemaValidation(String),

    /// A stored item was written by a newer schema than the registry knows.
    #[error(
        "table `{table}` holds an item at schema version {stored}, newer than supported version {supported}"
    )]
    UnsupportedSchemaVersion {
        /// The table the item was read from.
        table: String,
        /// The version found on the stored item.
        stored: u32,
        /// The version configured in the registry.
        supported: u32,
    },

    /// An optimistic-lock or existence condition failed.
    #[error("write conflict on {context}")]
    WriteConflict {
        /// The rejected request.
        context: Box<RequestContext>,
    },

    /// The backend could not be reached or rejected the request.
    #[error("backend unavailable: {message} ({context})")]
    BackendUnavailable {
        /// The backend's description of the failure.
        message: String,
        /// The failed request.
        context: Box<RequestContext>,
    },

    /// The backend reported an internal failure.
    #[error("internal backend error: {message} ({context})")]
    InternalBackend {
        /// The backend's description of the failure.
        message: String,
        /// The failed request.
        context: Box<RequestContext>,
    },

    /// A transaction was cancelled by the backend, usually by a failed condition.
    #[error("transaction cancelled: {reasons:?} ({context})")]
    TransactionCancelled {
        /// One cancellation code per transaction item, `None` for items that did not fail.
        reasons: Vec<String>,
        /// The cancelled request.
        context: Box<RequestContext>,
    },

    /// The targeted table or index does not exist.
    #[error("table not found: {message} ({context})")]
    TableNotFound {
        /// The backend's description of the failure.
        message: String,
        /// The failed request.
        context: Box<RequestContext>,
    },

    /// The caller broke an API contract, e.g. a collection mutation without an element type.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// A value does not match the shape its field declares.
    #[error("codec error: {0}")]
    Codec(String),

    /// A bounded batch retry gave up with work left over.
    #[error("{remaining} batch items still unprocessed after {attempts} attempts")]
    UnprocessedItems {
        /// Items (keys or write requests) never processed.
        remaining: usize,
        /// Calls issued before giving up.
        attempts: u32,
    },

    /// Serialization through `serde_dynamo` failed.
    #[error(transparent)]
    Serde(#[from] serde_dynamo::Error),
}

impl Error {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::SchemaValidation(message.into())
    }

    pub(crate) fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    pub(crate) fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }

    /// Whether this error is a failed optimistic-lock or existence condition.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }

    /// The request that failed, for backend-facing errors.
    pub fn context(&self) -> Option<&RequestContext> {
        match self {
            Self::WriteConflict { context }
            | Self::BackendUnavailable { context, .. }
            | Self::InternalBackend { context, .. }
            | Self::TransactionCancelled { context, .. }
            | Self::TableNotFound { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Attach the targeted key to the request context, when the backend call did not carry one.
    pub(crate) fn with_key(mut self, key: Item) -> Self {
        match &mut self {
            Self::WriteConflict { context }
            | Self::BackendUnavailable { context, .. }
            | Self::InternalBackend { context, .. }
            | Self::TransactionCancelled { context, .. }
            | Self::TableNotFound { context, .. } => {
                context.key.get_or_insert(key);
            }
            _ => {}
        }
        self
    }

    pub(crate) fn build(error: BuildError, context: RequestContext) -> Self {
        Self::BackendUnavailable {
            message: error.to_string(),
            context: Box::new(context),
        }
    }

    /// Classifies an SDK error by its service error code.
    pub(crate) fn from_sdk<E, R>(error: SdkError<E, R>, context: RequestContext) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: fmt::Debug,
    {
        let code = error
            .as_service_error()
            .and_then(|service_error| service_error.code())
            .map(str::to_string);
        let message = DisplayErrorContext(&error).to_string();
        let context = Box::new(context);
        match code.as_deref() {
            Some("ConditionalCheckFailedException") => Self::WriteConflict { context },
            Some("ResourceNotFoundException") => Self::TableNotFound { message, context },
            Some("InternalServerError") => Self::InternalBackend { message, context },
            Some("TransactionCanceledException") => Self::TransactionCancelled {
                reasons: Vec::new(),
                context,
            },
            _ => Self::BackendUnavailable { message, context },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::table_only(
        RequestContext::table("users"),
        "table `users`"
    )]
    #[case::with_expressions(
        RequestContext {
            table_name: "users".to_string(),
            update_expression: Some("SET #n0 = :v0".to_string()),
            condition_expression: Some("#n1 = :v1".to_string()),
            ..Default::default()
        },
        "table `users`, update `SET #n0 = :v0`, condition `#n1 = :v1`"
    )]
    fn test_request_context_display(#[case] context: RequestContext, #[case] expected: &str) {
        assert_eq!(context.to_string(), expected);
    }

    #[test]
    fn test_context_is_exposed_for_backend_errors() {
        let error = Error::WriteConflict {
            context: Box::new(RequestContext::table("users")),
        };
        assert!(error.is_write_conflict());
        assert_eq!(error.context().map(|c| c.table_name.as_str()), Some("users"));
        assert!(Error::codec("bad").context().is_none());
    }
}
