//! Classified structured payloads.
//!
//! Attributes carrying one of these payloads are recognized by the Zitadel encoder and mapped to
//! the matching sub-message of the access record instead of its `dynamic` map. Other encoders
//! serialize them as plain JSON objects. Fields follow the protobuf canonical JSON mapping: proto
//! field names, default values omitted, 64-bit integers as strings.

use serde::{Serialize, Serializer};

fn is_zero_u32(value: &u32) -> bool {
    *value == 0
}

fn is_zero_u64(value: &u64) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !value
}

fn int64_as_string<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(value)
}

/// An HTTP request and its outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HttpRequest {
    /// Protocol of the request, e.g. `HTTP/1.1`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    /// Host the request was sent to.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Port the request was sent to.
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub port: u32,
    /// Request path.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Request method.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Response status code.
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub status: u32,
    /// Value of the `Referer` header.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub referer: String,
    /// Value of the `User-Agent` header.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    /// Address of the client.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub remote_ip: String,
    /// Size of the request body.
    #[serde(skip_serializing_if = "is_zero_u64", serialize_with = "int64_as_string")]
    pub bytes_received: u64,
    /// Size of the response body.
    #[serde(skip_serializing_if = "is_zero_u64", serialize_with = "int64_as_string")]
    pub bytes_sent: u64,
}

/// The authenticated principal of a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserContext {
    /// Instance the principal belongs to.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instance_id: String,
    /// Organization the principal belongs to.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub org_id: String,
    /// Identifier of the principal.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    /// Whether the principal is a system user.
    #[serde(skip_serializing_if = "is_false")]
    pub is_system_user: bool,
    /// Whether the request carried valid credentials.
    #[serde(skip_serializing_if = "is_false")]
    pub is_authenticated: bool,
}

/// The API method that served a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApiContext {
    /// Service the method belongs to.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service: String,
    /// Method name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Result code.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code: String,
}

/// A failure worth reporting on its own.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Exception {
    /// Description of what went wrong.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cause: String,
    /// Translation key of a user-facing error.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub i18n_key: String,
    /// Classification of the error.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl Exception {
    /// Creates an exception with only its cause set.
    pub fn from_cause(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            ..Self::default()
        }
    }
}

/// One of the classified payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// See [`HttpRequest`].
    Http(HttpRequest),
    /// See [`UserContext`].
    User(UserContext),
    /// See [`ApiContext`].
    Api(ApiContext),
    /// See [`Exception`].
    Exception(Exception),
}

impl From<HttpRequest> for Payload {
    fn from(value: HttpRequest) -> Self {
        Self::Http(value)
    }
}

impl From<UserContext> for Payload {
    fn from(value: UserContext) -> Self {
        Self::User(value)
    }
}

impl From<ApiContext> for Payload {
    fn from(value: ApiContext) -> Self {
        Self::Api(value)
    }
}

impl From<Exception> for Payload {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_are_omitted_and_int64_is_a_string() {
        let request = HttpRequest {
            method: "GET".to_string(),
            status: 200,
            bytes_sent: 13,
            ..HttpRequest::default()
        };
        assert_eq!(
            serde_json::to_value(Payload::from(request)).ok(),
            Some(json!({"method": "GET", "status": 200, "bytes_sent": "13"}))
        );
    }

    #[test]
    fn exception_kind_is_named_type() {
        let exception = Exception {
            kind: "InternalError".to_string(),
            ..Exception::from_cause("no rows")
        };
        assert_eq!(
            serde_json::to_value(exception).ok(),
            Some(json!({"cause": "no rows", "type": "InternalError"}))
        );
    }
}
