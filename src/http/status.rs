use std::fmt;

macro_rules! status_codes {
    ($($(#[$doc:meta])* $name:ident = $code:literal, $reason:literal;)+) => {
        /// An HTTP response status code.
        ///
        /// Only the codes a middleware stack commonly produces are named; this
        /// is not a complete registry.
        ///
        /// # Examples
        ///
        /// ```
        /// use onionpipe::http::StatusCode;
        ///
        /// let status = StatusCode::try_from(503).unwrap();
        /// assert_eq!(status, StatusCode::ServiceUnavailable);
        /// assert_eq!(status.to_string(), "503 Service Unavailable");
        /// assert!(status.is_server_error());
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum StatusCode {
            $($(#[$doc])* $name = $code,)+
        }

        impl StatusCode {
            /// Returns the canonical reason phrase.
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $(Self::$name => $reason,)+
                }
            }
        }

        impl TryFrom<u16> for StatusCode {
            type Error = UnknownStatus;

            fn try_from(code: u16) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(Self::$name),)+
                    other => Err(UnknownStatus(other)),
                }
            }
        }
    };
}

status_codes! {
    Continue = 100, "Continue";
    SwitchingProtocols = 101, "Switching Protocols";

    Ok = 200, "OK";
    Created = 201, "Created";
    Accepted = 202, "Accepted";
    NoContent = 204, "No Content";

    MovedPermanently = 301, "Moved Permanently";
    Found = 302, "Found";
    NotModified = 304, "Not Modified";
    TemporaryRedirect = 307, "Temporary Redirect";
    PermanentRedirect = 308, "Permanent Redirect";

    BadRequest = 400, "Bad Request";
    Unauthorized = 401, "Unauthorized";
    Forbidden = 403, "Forbidden";
    NotFound = 404, "Not Found";
    MethodNotAllowed = 405, "Method Not Allowed";
    RequestTimeout = 408, "Request Timeout";
    Conflict = 409, "Conflict";
    PayloadTooLarge = 413, "Payload Too Large";
    UnprocessableEntity = 422, "Unprocessable Entity";
    TooManyRequests = 429, "Too Many Requests";

    InternalServerError = 500, "Internal Server Error";
    NotImplemented = 501, "Not Implemented";
    BadGateway = 502, "Bad Gateway";
    ServiceUnavailable = 503, "Service Unavailable";
    GatewayTimeout = 504, "Gateway Timeout";
}

/// A numeric code with no [`StatusCode`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported status code {0}")]
pub struct UnknownStatus(pub u16);

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    pub fn is_client_error(self) -> bool {
        (400..500).contains(&self.as_u16())
    }

    pub fn is_server_error(self) -> bool {
        self.as_u16() >= 500
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

impl serde::Serialize for StatusCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert!(StatusCode::NoContent.is_success());
        assert!(StatusCode::TooManyRequests.is_client_error());
        assert!(!StatusCode::TooManyRequests.is_server_error());
        assert!(StatusCode::GatewayTimeout.is_server_error());
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(StatusCode::try_from(418), Err(UnknownStatus(418)));
        assert_eq!(StatusCode::try_from(404), Ok(StatusCode::NotFound));
    }

    #[test]
    fn serializes_as_number() {
        let json = serde_json::to_string(&StatusCode::Unauthorized).unwrap();
        assert_eq!(json, "401");
    }
}
