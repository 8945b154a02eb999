//! Case-insensitive, multi-valued HTTP header container.
//!
//! Unlike the single-valued lookup table used elsewhere in zero-copy HTTP parsers, this
//! store knows about the handful of HTTP merge rules that actually matter in practice:
//! a fixed set of headers that must never repeat (the second occurrence is dropped with
//! a warning), `Set-Cookie` which must never be merged, and everything else which is
//! folded into a single comma-separated value per
//! [RFC 9110 §5.3](https://www.rfc-editor.org/rfc/rfc9110#section-5.3).

use std::borrow::Cow;

/// Headers that MUST NOT repeat. A second `append` for one of these is dropped and logged;
/// use [`HeadersContainer::set`] if the intent is to replace the value.
const SINGLETON_HEADERS: &[&[u8]] = &[
    b"content-type",
    b"content-length",
    b"user-agent",
    b"referer",
    b"host",
    b"authorization",
    b"proxy-authorization",
    b"if-modified-since",
    b"if-unmodified-since",
    b"from",
    b"location",
    b"max-forwards",
    b"retry-after",
    b"etag",
    b"last-modified",
    b"server",
    b"age",
    b"expires",
];

const SET_COOKIE: &[u8] = b"set-cookie";

#[inline(always)]
fn eq_ci(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn is_singleton(name: &[u8]) -> bool {
    SINGLETON_HEADERS.iter().any(|s| eq_ci(s, name))
}

#[derive(Debug, Clone, PartialEq)]
struct HeaderEntry {
    /// Casing as first inserted; preserved verbatim on emission.
    name: &'static [u8],
    values: Vec<Cow<'static, [u8]>>,
}

/// Case-insensitive, multi-valued header store.
///
/// Iteration order is insertion order. Lookups are case-insensitive. The casing of a
/// header's name, as it appeared on first insertion, is preserved for emission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadersContainer {
    entries: Vec<HeaderEntry>,
    /// Parsed `Content-Length`, cached directly by the request parser to avoid
    /// re-parsing the header value on every access.
    pub(crate) content_length: Option<usize>,
}

impl HeadersContainer {
    #[inline(always)]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            content_length: None,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.entries.clear();
        self.content_length = None;
    }

    fn position(&self, name: &[u8]) -> Option<usize> {
        self.entries.iter().position(|e| eq_ci(e.name, name))
    }

    /// Returns the (possibly comma-merged) value for `name`, or the first value for
    /// multi-valued headers such as `Set-Cookie`.
    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.position(name)
            .and_then(|i| self.entries[i].values.first())
            .map(|v| v.as_ref())
    }

    /// Returns every stored value for `name`, in insertion order.
    pub fn get_all(&self, name: &[u8]) -> Option<&[Cow<'static, [u8]>]> {
        self.position(name).map(|i| self.entries[i].values.as_slice())
    }

    /// Replaces all values for `name` with a single value, inserting it if absent.
    /// Preserves the casing already on record; uses `name`'s casing for a fresh insert.
    pub(crate) fn set(&mut self, name: &'static [u8], value: impl Into<Cow<'static, [u8]>>) {
        match self.position(name) {
            Some(i) => {
                self.entries[i].values.clear();
                self.entries[i].values.push(value.into());
            }
            None => self.entries.push(HeaderEntry {
                name,
                values: vec![value.into()],
            }),
        }
    }

    /// Appends a value for `name`, applying the merge rules described on the type.
    pub(crate) fn append(&mut self, name: &'static [u8], value: &'static [u8]) {
        if let Some(i) = self.position(name) {
            if is_singleton(name) {
                tracing::warn!(
                    header = %String::from_utf8_lossy(name),
                    "duplicate singleton header appended, discarding"
                );
                return;
            }
            if eq_ci(name, SET_COOKIE) {
                self.entries[i].values.push(Cow::Borrowed(value));
                return;
            }
            // Comma-merge: fold into the single existing value.
            let existing = self.entries[i].values.first().cloned().unwrap_or_default();
            let mut merged = existing.into_owned();
            merged.extend_from_slice(b", ");
            merged.extend_from_slice(value);
            self.entries[i].values = vec![Cow::Owned(merged)];
            return;
        }

        self.entries.push(HeaderEntry {
            name,
            values: vec![Cow::Borrowed(value)],
        });
    }

    /// Removes all values for `name` (case-insensitive). Returns whether anything was removed.
    pub fn remove(&mut self, name: &[u8]) -> bool {
        match self.position(name) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Removes every header.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.content_length = None;
    }

    /// Iterates over `(name, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static [u8], &[Cow<'static, [u8]>])> {
        self.entries.iter().map(|e| (e.name, e.values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut h = HeadersContainer::default();
        h.set(b"X-Trace-Id", Cow::Borrowed(&b"abc"[..]));
        assert_eq!(h.get(b"x-trace-id"), Some(&b"abc"[..]));
    }

    #[test]
    fn singleton_duplicate_is_dropped() {
        let mut h = HeadersContainer::default();
        h.append(b"Content-Type", b"text/plain");
        h.append(b"Content-Type", b"application/json");
        assert_eq!(h.get(b"content-type"), Some(&b"text/plain"[..]));
    }

    #[test]
    fn set_cookie_never_merges() {
        let mut h = HeadersContainer::default();
        h.append(b"Set-Cookie", b"a=1");
        h.append(b"Set-Cookie", b"b=2");
        let all = h.get_all(b"set-cookie").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].as_ref(), b"a=1");
        assert_eq!(all[1].as_ref(), b"b=2");
    }

    #[test]
    fn free_form_header_comma_merges() {
        let mut h = HeadersContainer::default();
        h.append(b"X-Forwarded-For", b"10.0.0.1");
        h.append(b"X-Forwarded-For", b"10.0.0.2");
        assert_eq!(h.get(b"x-forwarded-for"), Some(&b"10.0.0.1, 10.0.0.2"[..]));
    }

    #[test]
    fn first_seen_casing_is_preserved() {
        let mut h = HeadersContainer::default();
        h.append(b"X-Custom-Header", b"1");
        let (name, _) = h.iter().next().unwrap();
        assert_eq!(name, b"X-Custom-Header");
    }

    #[test]
    fn remove_is_case_insensitive() {
        let mut h = HeadersContainer::default();
        h.append(b"Accept", b"*/*");
        assert!(h.remove(b"ACCEPT"));
        assert!(h.get(b"accept").is_none());
    }
}
