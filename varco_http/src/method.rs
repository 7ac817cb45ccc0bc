// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use phf::phf_map;
use unicase::UniCase;

/// A request method.
///
/// Methods outside the registry are carried verbatim in [`Method::Other`],
/// since the method token is an open set.
///
/// # References
/// * [RFC 9110 - Section 9. Methods](https://www.rfc-editor.org/rfc/rfc9110.html#section-9)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    Other(String),
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
    /// Get the method in string form.
    ///
    /// The method token is case-sensitive; standardized methods are defined
    /// in all-uppercase US-ASCII letters.
    #[must_use]
    pub fn as_string(&self) -> &str {
        match self {
            Self::Other(str) => str,
            Self::Connect => "CONNECT",
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Trace => "TRACE",
        }
    }

    /// Whether the semantics of this method never carry a response body.
    #[must_use]
    pub fn suppresses_response_body(&self) -> bool {
        *self == Method::Head
    }
}

static METHOD_MAP: phf::Map<UniCase<&'static str>, Method> = phf_map!(
    UniCase::ascii("connect") => Method::Connect,
    UniCase::ascii("delete") => Method::Delete,
    UniCase::ascii("get") => Method::Get,
    UniCase::ascii("head") => Method::Head,
    UniCase::ascii("options") => Method::Options,
    UniCase::ascii("patch") => Method::Patch,
    UniCase::ascii("post") => Method::Post,
    UniCase::ascii("put") => Method::Put,
    UniCase::ascii("trace") => Method::Trace,
);

impl From<String> for Method {
    fn from(value: String) -> Self {
        match METHOD_MAP.get(&UniCase::ascii(&value)) {
            Some(method) => method.clone(),
            None => Method::Other(value),
        }
    }
}

impl From<&str> for Method {
    fn from(value: &str) -> Self {
        match METHOD_MAP.get(&UniCase::ascii(value)) {
            Some(method) => method.clone(),
            None => Method::Other(value.to_string()),
        }
    }
}

/// The set of methods a route answers to.
///
/// `MethodSet::ANY` matches every method, and is considered *after*
/// method-specific routes for the same path shape during dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MethodSet {
    Any,
    Of(Vec<Method>),
}

impl MethodSet {
    pub const ANY: MethodSet = MethodSet::Any;

    /// A set holding a single method.
    #[must_use]
    pub fn single(method: Method) -> Self {
        Self::Of(vec![method])
    }

    #[must_use]
    pub fn contains(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Of(methods) => methods.contains(method),
        }
    }

    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// The methods of this set, in declaration order. Empty for `Any`.
    #[must_use]
    pub fn members(&self) -> &[Method] {
        match self {
            Self::Any => &[],
            Self::Of(methods) => methods,
        }
    }
}

impl From<Method> for MethodSet {
    fn from(value: Method) -> Self {
        Self::single(value)
    }
}

impl From<Vec<Method>> for MethodSet {
    fn from(value: Vec<Method>) -> Self {
        Self::Of(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("GET", Method::Get)]
    #[case("get", Method::Get)]
    #[case("Post", Method::Post)]
    #[case("BREW", Method::Other(String::from("BREW")))]
    fn method_lookup(#[case] input: &str, #[case] expected: Method) {
        assert_eq!(Method::from(input), expected);
    }

    #[test]
    fn method_set_membership() {
        let set = MethodSet::Of(vec![Method::Get, Method::Head]);
        assert!(set.contains(&Method::Get));
        assert!(!set.contains(&Method::Post));
        assert!(MethodSet::Any.contains(&Method::Other("BREW".into())));
    }
}
