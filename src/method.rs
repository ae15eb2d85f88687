//! HTTP method as a typed enum.
//!
//! Routes declare a [`Method`]; requests keep whatever method string arrived
//! on the wire. Matching between the two is case-insensitive, so a client
//! sending `post` still reaches a `Method::Post` route.

use std::fmt;
use std::str::FromStr;

/// A method a route can be declared for (RFC 9110 plus `PATCH`).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Trace   => "TRACE",
        }
    }

    /// Case-insensitive comparison against a raw request method.
    pub fn matches(self, raw: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(raw)
    }
}

/// Parses a method name, ignoring ASCII case.
impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [Method; 9] = [
            Method::Connect, Method::Delete, Method::Get, Method::Head, Method::Options,
            Method::Patch, Method::Post, Method::Put, Method::Trace,
        ];
        ALL.into_iter()
            .find(|m| m.matches(s))
            .ok_or_else(|| UnknownMethod(s.to_owned()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by [`Method::from_str`] for names outside the enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown method `{0}`")]
pub struct UnknownMethod(pub String);
