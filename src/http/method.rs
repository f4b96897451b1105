use std::{fmt, str::FromStr};

/// An HTTP request method.
///
/// Method names are case-sensitive; anything unrecognized is kept verbatim as
/// [`Method::Extension`].
///
/// # Examples
///
/// ```
/// use onionpipe::http::Method;
///
/// let method: Method = "HEAD".parse().unwrap();
/// assert_eq!(method, Method::Head);
/// assert!(method.is_safe());
///
/// let purge: Method = "PURGE".parse().unwrap();
/// assert_eq!(purge.as_str(), "PURGE");
/// assert!(!purge.is_idempotent());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Connect,
    Trace,
    Extension(String),
}

const STANDARD: [(Method, &str); 9] = [
    (Method::Get, "GET"),
    (Method::Head, "HEAD"),
    (Method::Post, "POST"),
    (Method::Put, "PUT"),
    (Method::Patch, "PATCH"),
    (Method::Delete, "DELETE"),
    (Method::Options, "OPTIONS"),
    (Method::Connect, "CONNECT"),
    (Method::Trace, "TRACE"),
];

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Extension(name) => name,
            standard => STANDARD
                .iter()
                .find(|(method, _)| method == standard)
                .map_or("", |(_, name)| *name),
        }
    }

    /// Safe methods do not change server state (RFC 9110 §9.2.1).
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options | Self::Trace)
    }

    /// Repeating an idempotent request has the same effect as sending it once
    /// (RFC 9110 §9.2.2).
    pub fn is_idempotent(&self) -> bool {
        self.is_safe() || matches!(self, Self::Put | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let standard = STANDARD
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(method, _)| method.clone());
        Ok(standard.unwrap_or_else(|| Self::Extension(s.to_owned())))
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(method) => method,
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_names_round_trip() {
        for (method, name) in STANDARD {
            assert_eq!(name.parse::<Method>().unwrap(), method);
            assert_eq!(method.as_str(), name);
        }
    }

    #[test]
    fn lowercase_is_an_extension() {
        assert_eq!(Method::from("get"), Method::Extension("get".into()));
    }
}
