use {
    crate::Body,
    bytes::Bytes,
    derive_more::{Display, Error},
    http_body_util::{BodyExt, Full},
    hyper::{Response, StatusCode, header::CONTENT_RANGE},
    std::fmt::Display,
    tracing::warn,
};

/// Reason for rejecting a request.
///
/// The message is sent as the response body, so it never says more than the status
/// code. In particular a missing file and a forged token look the same.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ServeError {
    #[display("malformed identifier")]
    MalformedIdentifier,
    #[display("malformed request")]
    MalformedRequest,
    #[display("forbidden")]
    AuthenticationFailure,
    #[display("chunk hash mismatch")]
    IntegrityFailure,
    /// `size` is the complete length reported back in `Content-Range`, if known.
    #[display("range not satisfiable")]
    RangeNotSatisfiable { size: Option<u64> },
    #[display("file already exists")]
    Conflict,
    #[display("length required")]
    LengthRequired,
    #[display("payload too large")]
    ResourceExhausted,
    #[display("not found")]
    NotFound,
    #[display("internal server error")]
    Internal,
}

impl ServeError {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::MalformedIdentifier | Self::MalformedRequest | Self::IntegrityFailure => {
                StatusCode::BAD_REQUEST
            }
            Self::AuthenticationFailure => StatusCode::FORBIDDEN,
            Self::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Conflict => StatusCode::CONFLICT,
            Self::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::ResourceExhausted => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Full::new(Bytes::from(self.to_string())).boxed());
        *response.status_mut() = self.status();
        if let Self::RangeNotSatisfiable { size: Some(size) } = self {
            if let Ok(value) = format!("bytes */{size}").parse() {
                response.headers_mut().insert(CONTENT_RANGE, value);
            }
        }
        response
    }
}

/// Logs an unexpected failure and hides its details from the client.
pub fn internal(err: impl Display) -> ServeError {
    warn!(%err, "internal error");
    ServeError::Internal
}
