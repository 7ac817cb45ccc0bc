// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{
    HeaderName,
    HeaderValue,
};

/// An ordered, multi-valued field map.
///
/// Fields are replayed in first-seen order when a message is serialized, and
/// duplicate names are preserved as separate entries; `get` returns the
/// first occurrence. Name comparison is case-insensitive.
#[derive(Clone, Debug, Default)]
pub struct HeaderMap {
    fields: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderMap {
    #[must_use]
    pub fn new() -> HeaderMap {
        HeaderMap::default()
    }

    /// Append a field, keeping any fields already present under the same
    /// name. `Set-Cookie` in particular relies on this: every cookie is its
    /// own field line.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.fields.push((name, value));
    }

    /// Replace every occurrence of `name` with the single given value. The
    /// replacement takes the position of the first occurrence, or the end of
    /// the map when the name was absent.
    pub fn set(&mut self, name: HeaderName, value: HeaderValue) {
        let mut position = None;
        let mut index = 0;
        self.fields.retain(|(existing, _)| {
            let keep = *existing != name;
            if !keep && position.is_none() {
                position = Some(index);
            }
            if keep {
                index += 1;
            }
            keep
        });

        match position {
            Some(position) => self.fields.insert(position, (name, value)),
            None => self.fields.push((name, value)),
        }
    }

    /// Append unless the name is already present.
    pub fn append_if_absent(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.contains(&name) {
            self.fields.push((name, value));
        }
    }

    #[must_use]
    pub fn contains(&self, header_name: &HeaderName) -> bool {
        self.fields.iter().any(|(name, _)| name == header_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The first value under the given name.
    #[must_use]
    pub fn get(&self, header_name: &HeaderName) -> Option<&HeaderValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == header_name)
            .map(|(_, value)| value)
    }

    /// The first value under the given name, as a string slice.
    #[must_use]
    pub fn get_str(&self, header_name: &HeaderName) -> Option<&str> {
        self.get(header_name).and_then(HeaderValue::as_str_no_convert)
    }

    /// Every value under the given name, in insertion order.
    pub fn get_all<'map>(&'map self, header_name: &'map HeaderName) -> impl Iterator<Item = &'map HeaderValue> {
        self.fields
            .iter()
            .filter(move |(name, _)| name == header_name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.fields.iter().map(|(name, value)| (name, value))
    }

    pub fn remove(&mut self, header_name: &HeaderName) {
        self.fields.retain(|(name, _)| name != header_name);
    }

    pub fn set_content_length(&mut self, length: u64) {
        self.set(HeaderName::ContentLength, HeaderValue::Size(length));
    }

    pub fn set_content_type(&mut self, media_type: impl Into<HeaderValue>) {
        self.set(HeaderName::ContentType, media_type.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_duplicates_and_order() {
        let mut map = HeaderMap::new();
        map.append(HeaderName::SetCookie, "a=1".into());
        map.append(HeaderName::ContentType, "text/plain".into());
        map.append(HeaderName::SetCookie, "b=2".into());

        let cookies: Vec<String> = map.get_all(&HeaderName::SetCookie).map(|v| v.to_string()).collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);

        let names: Vec<&str> = map.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["Set-Cookie", "Content-Type", "Set-Cookie"]);
    }

    #[test]
    fn get_returns_first_occurrence() {
        let mut map = HeaderMap::new();
        map.append("X-Tag".into(), "first".into());
        map.append("x-tag".into(), "second".into());
        assert_eq!(map.get_str(&"X-Tag".into()), Some("first"));
    }

    #[test]
    fn set_collapses_previous_occurrences_in_place() {
        let mut map = HeaderMap::new();
        map.append(HeaderName::Connection, "keep-alive".into());
        map.append(HeaderName::ContentType, "text/plain".into());
        map.append(HeaderName::Connection, "close".into());

        map.set(HeaderName::Connection, "upgrade".into());

        let entries: Vec<(String, String)> = map.iter()
            .map(|(name, value)| (name.as_str().to_string(), value.to_string()))
            .collect();
        assert_eq!(entries, vec![
            ("Connection".to_string(), "upgrade".to_string()),
            ("Content-Type".to_string(), "text/plain".to_string()),
        ]);
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let mut map = HeaderMap::new();
        map.append("X-Custom-Header".into(), "yes".into());
        assert!(map.contains(&"x-custom-header".into()));
        assert_eq!(map.get_str(&"X-CUSTOM-HEADER".into()), Some("yes"));
    }
}
