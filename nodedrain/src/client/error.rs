use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{} '{}' was not found.", kind, name))]
    NotFound { kind: &'static str, name: String },

    #[snafu(display("Not permitted to {} {} '{}': '{}'", operation, kind, name, message))]
    Forbidden {
        operation: &'static str,
        kind: &'static str,
        name: String,
        message: String,
    },

    #[snafu(display("Unable to {} {} '{}': '{}'", operation, kind, name, source))]
    Request {
        operation: &'static str,
        kind: &'static str,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("Unable to build eviction request for Pod '{}': '{}'", name, source))]
    BuildRequest {
        name: String,
        source: kube::core::request::Error,
    },

    #[snafu(display("Unable to serialize request body for {} '{}': '{}'", kind, name, source))]
    Serialize {
        kind: &'static str,
        name: String,
        source: serde_json::Error,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }
}
