use thiserror::Error;

/// Failures talking to the dirt service. None of these are fatal to the
/// engine; reconciliation treats every variant as "server unavailable".
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DirtError {
    #[error("dirt service unreachable{}: {message}", status_suffix(.status))]
    Network { status: Option<u16>, message: String },

    #[error("malformed dirt service response: {0}")]
    Malformed(String),

    #[error("dirt service reported failure: {0}")]
    Unsuccessful(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

impl DirtError {
    pub fn network(message: impl Into<String>) -> Self {
        DirtError::Network {
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DirtError::Network { .. } => "network",
            DirtError::Malformed(_) => "malformed",
            DirtError::Unsuccessful(_) => "unsuccessful",
        }
    }
}

impl From<reqwest::Error> for DirtError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return DirtError::Malformed(err.to_string());
        }
        DirtError::Network {
            status: err.status().map(|status| status.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DirtError {
    fn from(err: serde_json::Error) -> Self {
        DirtError::Malformed(err.to_string())
    }
}

/// Why a spot cleaning did not go through. Cloneable so a second caller
/// waiting on the same in-flight cleaning receives the same verdict.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CleanError {
    #[error("spot {0} is not in the tank")]
    UnknownSpot(String),

    #[error("clean request for spot {spot_id} failed: {source}")]
    Request {
        spot_id: String,
        #[source]
        source: DirtError,
    },

    #[error("dirt engine has shut down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_mention_status_when_known() {
        let err = DirtError::Network {
            status: Some(503),
            message: "service unavailable".into(),
        };
        assert_eq!(
            err.to_string(),
            "dirt service unreachable (HTTP 503): service unavailable"
        );
        assert_eq!(
            DirtError::network("connection refused").to_string(),
            "dirt service unreachable: connection refused"
        );
    }

    #[test]
    fn json_errors_are_malformed() {
        let err: DirtError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "malformed");
    }
}
