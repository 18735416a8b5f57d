use std::fmt;

/// Status group a response falls into.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusCategory {
    Informational,
    Success,
    Redirect,
    ClientError,
    ServerError,
    Aborted,
}

impl StatusCategory {
    /// `true` for the two categories that are raised as HTTP errors.
    pub fn is_error(self) -> bool {
        matches!(self, Self::ClientError | Self::ServerError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Success => "success",
            Self::Redirect => "redirect",
            Self::ClientError => "clientError",
            Self::ServerError => "serverError",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status value that matches no category (negative, or 1..=99).
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown HTTP status: {0}")]
pub struct UnknownStatus(pub i32);

type Matcher = fn(i32) -> bool;

// First match wins. 499 sits in both the client error and aborted ranges and
// must resolve to client error, so client error is checked before aborted.
const CHECK_ORDER: [(StatusCategory, Matcher); 6] = [
    (StatusCategory::Success, |s| (200..300).contains(&s)),
    (StatusCategory::ClientError, |s| (400..=499).contains(&s)),
    (StatusCategory::ServerError, |s| (500..600).contains(&s)),
    (StatusCategory::Redirect, |s| (300..400).contains(&s)),
    (StatusCategory::Aborted, |s| s == 0 || s == 499 || s >= 600),
    (StatusCategory::Informational, |s| (100..200).contains(&s)),
];

/// Maps an HTTP status to its category.
pub fn classify(status: i32) -> Result<StatusCategory, UnknownStatus> {
    CHECK_ORDER
        .iter()
        .find(|(_, matches)| matches(status))
        .map(|(category, _)| *category)
        .ok_or(UnknownStatus(status))
}

#[cfg(test)]
mod tests {
    use super::{classify, StatusCategory, UnknownStatus};

    #[test]
    fn classifies_every_range() {
        for status in 100..200 {
            assert_eq!(classify(status), Ok(StatusCategory::Informational));
        }
        for status in 200..300 {
            assert_eq!(classify(status), Ok(StatusCategory::Success));
        }
        for status in 300..400 {
            assert_eq!(classify(status), Ok(StatusCategory::Redirect));
        }
        for status in 400..=499 {
            assert_eq!(classify(status), Ok(StatusCategory::ClientError));
        }
        for status in 500..600 {
            assert_eq!(classify(status), Ok(StatusCategory::ServerError));
        }
    }

    #[test]
    fn status_499_is_client_error_not_aborted() {
        assert_eq!(classify(499), Ok(StatusCategory::ClientError));
    }

    #[test]
    fn zero_and_600_plus_are_aborted() {
        assert_eq!(classify(0), Ok(StatusCategory::Aborted));
        assert_eq!(classify(600), Ok(StatusCategory::Aborted));
        assert_eq!(classify(999), Ok(StatusCategory::Aborted));
        assert_eq!(classify(i32::MAX), Ok(StatusCategory::Aborted));
    }

    #[test]
    fn out_of_range_status_is_unknown() {
        assert_eq!(classify(-1), Err(UnknownStatus(-1)));
        assert_eq!(classify(1), Err(UnknownStatus(1)));
        assert_eq!(classify(99), Err(UnknownStatus(99)));
    }

    #[test]
    fn only_client_and_server_errors_are_errors() {
        assert!(StatusCategory::ClientError.is_error());
        assert!(StatusCategory::ServerError.is_error());
        assert!(!StatusCategory::Aborted.is_error());
        assert!(!StatusCategory::Redirect.is_error());
    }
}
