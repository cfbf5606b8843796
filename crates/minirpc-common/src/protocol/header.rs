use serde::{Deserialize, Serialize};

/// Precedes every request and response body.
///
/// `service_method` has the form `"Service.Method"`. `seq` is chosen by the
/// client and echoed by the server. `error` is empty unless the server failed
/// to produce a reply, in which case the body that follows is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub service_method: String,
    pub seq: u64,
    pub error: String,
}

impl Header {
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Copy of this header carrying an error message.
    pub fn with_error(&self, error: impl Into<String>) -> Self {
        Self {
            service_method: self.service_method.clone(),
            seq: self.seq,
            error: error.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
