use std::sync::{Arc, OnceLock};

use crate::error_responses;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Request,
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use schemars::{
    schema::{Schema, SchemaObject, SubschemaValidation},
    schema_for, schema_for_value, JsonSchema,
};
use serde::Serialize;
use serde_json::Value;

pub use response::{ErrorResponse, ErrorResponseDocs};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, aide::OperationIo)]
#[aide(output_with = "axum::Json<ErrorResponseDocs>")]
pub enum Error {
    #[error("validation")]
    Validation(String),
    #[error("rejected_reminder")]
    RejectedReminder(String),

    #[error("not_found")]
    NotFound(String),
    #[error("conflict")]
    Conflict(String),

    // auth
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden(String),

    // extractors
    #[error("validation")]
    JsonValidation(#[from] JsonRejection),
    #[error("validation")]
    QueryValidation(#[from] QueryRejection),
    #[error("validation")]
    PathValidation(#[from] PathRejection),

    #[error(transparent)]
    DB(crate::db::Error),

    #[error("unexpected")]
    Unexpected(String),
}

impl From<crate::db::Error> for Error {
    fn from(error: crate::db::Error) -> Self {
        match error {
            crate::db::Error::NotFound(msg) => Self::NotFound(msg),
            crate::db::Error::Conflict(msg) => Self::Conflict(msg),
            error => Self::DB(error),
        }
    }
}

/// crate::Error <--> tokio_rusqlite::Error
///
/// Domain errors raised inside a `DB::call` closure are boxed into
/// `tokio_rusqlite::Error::Other` and recovered on the way out.
pub mod db_mappers {
    use super::*;
    use crate::db::rusqlite;
    use crate::db::tokio_rusqlite;

    impl From<tokio_rusqlite::Error> for Error {
        fn from(error: tokio_rusqlite::Error) -> Self {
            match error {
                tokio_rusqlite::Error::Other(err) => match err.downcast::<Error>() {
                    Ok(error) => *error,
                    Err(err) => Error::from(crate::db::Error::from(tokio_rusqlite::Error::Other(err))),
                },
                error => Error::from(crate::db::Error::from(error)),
            }
        }
    }

    impl From<rusqlite::Error> for Error {
        fn from(error: rusqlite::Error) -> Self {
            Error::from(crate::db::Error::from(error))
        }
    }

    impl From<Error> for tokio_rusqlite::Error {
        fn from(error: Error) -> Self {
            tokio_rusqlite::Error::Other(error.into())
        }
    }
}

// Response

error_responses! {
    validation: 400,
    rejected_reminder: 400,
    path_validation: 400,
    query_validation: 400,
    json_validation: 400,
    unauthorized: 401,
    forbidden: 403,
    not_found: 404,
    conflict: 409,
    unexpected: 500
}

impl From<&Error> for ErrorResponse {
    fn from(error: &Error) -> Self {
        let errors = errors();
        match error {
            Error::Validation(message) => errors.validation.with_message(message),
            Error::RejectedReminder(message) => errors.rejected_reminder.with_message(message),
            Error::NotFound(message) => errors.not_found.with_message(message),
            Error::Conflict(message) => errors.conflict.with_message(message),
            Error::Unauthorized => errors.unauthorized.with_message("Unauthorized"),
            Error::Forbidden(message) => errors.forbidden.with_message(message),
            Error::JsonValidation(error) => errors.json_validation.with_message(error.body_text()),
            Error::QueryValidation(error) => errors.query_validation.with_message(error.body_text()),
            Error::PathValidation(error) => errors.path_validation.with_message(error.body_text()),
            Error::DB(_) => errors.unexpected.with_message("Unexpected"),
            Error::Unexpected(message) => errors.unexpected.with_message(message),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let error = Arc::new(self);

        let error_res = ErrorResponse::from(error.clone().as_ref());
        let status = error_res.status;

        let mut res = axum::Json(error_res).into_response();
        res.extensions_mut().insert(error);

        *res.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        res
    }
}

pub async fn on_error(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let error = response.extensions().get::<Arc<Error>>().map(Arc::as_ref);
    if let Some(error) = error {
        match error {
            Error::DB(_) | Error::Unexpected(_) => tracing::error!("{:?}", error),
            _ => tracing::debug!("{:?}", error),
        }
    }

    response
}

mod response {
    use serde_json::Map;

    use super::*;

    #[derive(Debug, Serialize, serde::Deserialize, Clone, Default, JsonSchema)]
    pub struct ErrorResponse {
        pub error: String,
        pub message: Option<String>,
        pub status: u16,
        pub details: Option<Map<String, Value>>,
    }

    impl ErrorResponse {
        pub fn new(error: impl Into<String>, status: u16) -> Self {
            Self {
                error: error.into(),
                status,
                ..Default::default()
            }
        }

        pub fn with_message(&self, message: impl Into<String>) -> Self {
            let mut res = self.clone();
            res.message = Some(message.into());
            res
        }
    }

    pub struct ErrorResponseDocs;

    impl JsonSchema for ErrorResponseDocs {
        fn schema_name() -> String {
            String::from("ErrorResponse")
        }

        fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
            let errors = errors();
            let example_schema = schema_for_value!(errors);

            let error_schemas = example_schema
                .schema
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.examples.first())
                .and_then(|example| example.as_object())
                .map(|responses| {
                    responses
                        .values()
                        .filter_map(|v| {
                            let error = v.get("error")?.as_str()?.to_string();
                            let status = v.get("status")?.as_u64()?;
                            Some(error_schema(error, status))
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            let schema = SchemaObject {
                subschemas: Some(Box::new(SubschemaValidation {
                    one_of: Some(error_schemas),
                    ..Default::default()
                })),
                ..Default::default()
            };

            schema.into()
        }
    }

    fn error_schema(error: String, status: u64) -> Schema {
        let mut schema = schema_for!(ErrorResponse).schema;
        let obj = schema.object();
        if let Some(Schema::Object(p)) = obj.properties.get_mut("status") {
            p.enum_values = Some(vec![Value::from(status)]);
        }
        if let Some(Schema::Object(p)) = obj.properties.get_mut("error") {
            p.enum_values = Some(vec![Value::from(error)]);
        }

        Schema::from(schema)
    }

    /// Typed responses with a custom JSON schema
    /// ```rust,ignore
    /// error_responses! {
    ///     not_found: 404,
    ///     unexpected: 500
    /// }
    ///
    /// impl From<&Error> for ErrorResponse {
    ///     fn from(error: &Error) -> Self {
    ///     let errors = errors(); // <- from macro
    ///     match error {
    ///         Error::NotFound(message) => errors.not_found.with_message(message),
    ///         Error::Unexpected(message) => errors.unexpected.with_message(message),
    ///     }
    /// }
    /// ```
    #[macro_export]
    macro_rules! error_responses {
        (
            $($name:ident: $code:expr),* $(,)?
        ) => {
            #[derive(Debug, Clone, Serialize)]
            struct Responses {
                $(
                    $name: ErrorResponse,
                )*
            }

            static ERRORS: OnceLock<Responses> = OnceLock::new();

            fn errors() -> &'static Responses {
                ERRORS.get_or_init(|| Responses {
                    $(
                        $name: ErrorResponse::new(stringify!($name), $code),
                    )*
                })
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (Error::Validation("bad".into()), 400, "validation"),
            (Error::RejectedReminder("past".into()), 400, "rejected_reminder"),
            (Error::NotFound("gone".into()), 404, "not_found"),
            (Error::Conflict("taken".into()), 409, "conflict"),
            (Error::Unauthorized, 401, "unauthorized"),
            (Error::Forbidden("owner only".into()), 403, "forbidden"),
            (Error::Unexpected("boom".into()), 500, "unexpected"),
        ];

        for (error, status, code) in cases {
            let res = ErrorResponse::from(&error);
            assert_eq!(res.status, status);
            assert_eq!(res.error, code);
        }
    }

    #[test]
    fn domain_error_survives_db_call_boundary() {
        let boxed: crate::db::tokio_rusqlite::Error = Error::Forbidden("owner only".into()).into();
        let error = Error::from(boxed);

        assert!(matches!(error, Error::Forbidden(message) if message == "owner only"));
    }

    #[test]
    fn storage_details_are_not_exposed() {
        let error = Error::from(crate::db::rusqlite::Error::InvalidQuery);
        let res = ErrorResponse::from(&error);

        assert_eq!(res.status, 500);
        assert_eq!(res.message.as_deref(), Some("Unexpected"));
    }
}
