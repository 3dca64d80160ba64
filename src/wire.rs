use serde::Deserialize;

/// Structured error body as commonly returned by JSON APIs.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error: Option<NestedError>,
    #[serde(default)]
    pub errors: Vec<NestedError>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NestedError {
    Detail {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        msg: Option<String>,
    },
    Text(String),
}

impl NestedError {
    fn message(&self) -> Option<&str> {
        match self {
            Self::Detail { message, msg } => non_empty(message).or_else(|| non_empty(msg)),
            Self::Text(text) => Some(text.as_str()).filter(|text| !text.trim().is_empty()),
        }
    }
}

impl ErrorPayload {
    /// Picks the first populated message in the order
    /// `message`, `msg`, `error`, `errors[0]`.
    pub fn business_message(&self) -> Option<&str> {
        non_empty(&self.message)
            .or_else(|| non_empty(&self.msg))
            .or_else(|| self.error.as_ref().and_then(NestedError::message))
            .or_else(|| self.errors.first().and_then(NestedError::message))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|text| !text.trim().is_empty())
}

/// Extracts a server-provided message from a response body, if it is a
/// structured JSON error payload.
pub(crate) fn business_message(body: &[u8]) -> Option<String> {
    let payload = serde_json::from_slice::<ErrorPayload>(body).ok()?;
    payload.business_message().map(str::to_owned)
}
