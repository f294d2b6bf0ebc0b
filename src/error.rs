use reqwest::StatusCode;

/// Generic message shown when the search provider gave no usable detail.
pub const SEARCH_FAILED_MESSAGE: &str = "Failed to fetch search results";

/// Failures talking to the search provider.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search API returned {status}: {error}")]
    Api {
        status: StatusCode,
        error: String,
        details: Option<String>,
    },
    #[error("search request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed search response: {0}")]
    Malformed(String),
    #[error("search API key is not configured")]
    MissingApiKey,
    #[error("unsupported search provider: {0}")]
    UnsupportedProvider(String),
}

impl SearchError {
    /// Text suitable for the sources area: server `details` when present.
    pub fn user_message(&self) -> String {
        match self {
            SearchError::Api {
                details: Some(details),
                ..
            } if !details.trim().is_empty() => details.clone(),
            _ => SEARCH_FAILED_MESSAGE.to_string(),
        }
    }

    /// Detail string for the `{error, details}` HTTP body.
    pub fn details(&self) -> String {
        match self {
            SearchError::Api {
                details: Some(details),
                ..
            } => details.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_prefers_details() {
        let err = SearchError::Api {
            status: StatusCode::TOO_MANY_REQUESTS,
            error: "x".into(),
            details: Some("rate limited".into()),
        };
        assert_eq!(err.user_message(), "rate limited");
        assert_eq!(err.details(), "rate limited");
    }

    #[test]
    fn test_user_message_falls_back_to_generic() {
        let err = SearchError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: "boom".into(),
            details: None,
        };
        assert_eq!(err.user_message(), SEARCH_FAILED_MESSAGE);
        assert!(err.details().contains("boom"));

        let err = SearchError::Malformed("expected value".into());
        assert_eq!(err.user_message(), SEARCH_FAILED_MESSAGE);
    }

    #[test]
    fn test_blank_details_are_ignored() {
        let err = SearchError::Api {
            status: StatusCode::BAD_GATEWAY,
            error: "x".into(),
            details: Some("  ".into()),
        };
        assert_eq!(err.user_message(), SEARCH_FAILED_MESSAGE);
    }
}
