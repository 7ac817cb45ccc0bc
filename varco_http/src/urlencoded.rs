// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Percent-encoding helpers for query strings and
//! `application/x-www-form-urlencoded` payloads.

/// Decode a single query or form component. In these contexts `+` denotes a
/// space. Malformed percent sequences are passed through unchanged rather
/// than rejected, matching how browsers submit forms.
#[must_use]
pub fn decode_component(input: &str) -> String {
    let replaced;
    let input = if input.contains('+') {
        replaced = input.replace('+', " ");
        &replaced
    } else {
        input
    };

    match urlencoding::decode(input) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => input.to_string(),
    }
}

/// Parse `name=value` pairs separated by `&`, preserving multiplicity and
/// insertion order. A pair without `=` yields an empty value.
#[must_use]
pub fn parse_pairs(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((name, value)) => pairs.push((decode_component(name), decode_component(value))),
            None => pairs.push((decode_component(pair), String::new())),
        }
    }
    pairs
}

/// Serialize pairs back into `application/x-www-form-urlencoded` form.
#[must_use]
pub fn encode_form(fields: &[(String, String)]) -> String {
    let mut output = String::new();
    for (name, value) in fields {
        if !output.is_empty() {
            output.push('&');
        }
        output.push_str(&urlencoding::encode(name));
        output.push('=');
        output.push_str(&urlencoding::encode(value));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a=1&b=2", vec![("a", "1"), ("b", "2")])]
    #[case("a=1&a=2", vec![("a", "1"), ("a", "2")])]
    #[case("key+name=v%20w", vec![("key name", "v w")])]
    #[case("flag", vec![("flag", "")])]
    #[case("", vec![])]
    fn parse_pairs_cases(#[case] input: &str, #[case] expected: Vec<(&str, &str)>) {
        let expected: Vec<(String, String)> = expected
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        assert_eq!(parse_pairs(input), expected);
    }

    #[test]
    fn round_trip_is_lossless_for_utf8() {
        let fields = vec![
            ("naïve key".to_string(), "välue & more".to_string()),
            ("emoji".to_string(), "🦀=crab".to_string()),
        ];
        assert_eq!(parse_pairs(&encode_form(&fields)), fields);
    }

    #[test]
    fn malformed_percent_sequences_pass_through() {
        assert_eq!(decode_component("100%"), "100%");
    }
}
