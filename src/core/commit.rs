//! core::commit
//!
//! Decoded commit records.
//!
//! # Format
//!
//! A raw commit object is a header block followed by a blank line and the
//! free-form message. Each header line is `key SP value`; a line starting
//! with a single space continues the previous value (newline-joined), which
//! is how multi-line headers such as `gpgsig` and `mergetag` are encoded.
//! A key may repeat (`parent` does for merges), so values map to a list.
//!
//! Records are cheap to hold and are memoized per revision by the storage
//! layer's bounded cache.

use std::collections::HashMap;

/// A decoded commit: message body plus raw header multimap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Header key to one-or-more values, in header order per key.
    pub headers: HashMap<String, Vec<String>>,
    /// The commit message, everything after the first blank line.
    pub message: String,
}

impl CommitRecord {
    /// Parse raw commit bytes.
    ///
    /// Bytes that are not valid UTF-8 (legacy author names, odd encodings)
    /// are decoded lossily; header structure is byte-oriented and survives.
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        let mut lines = text.split('\n');
        let mut last_key: Option<String> = None;

        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if let Some(cont) = line.strip_prefix(' ') {
                // Continuation folds into the previous value.
                if let Some(key) = &last_key {
                    if let Some(values) = headers.get_mut(key) {
                        if let Some(last) = values.last_mut() {
                            last.push('\n');
                            last.push_str(cont);
                        }
                    }
                }
                continue;
            }
            let (key, value) = match line.split_once(' ') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (line.to_string(), String::new()),
            };
            headers.entry(key.clone()).or_default().push(value);
            last_key = Some(key);
        }

        let message = lines.collect::<Vec<_>>().join("\n");
        Self { headers, message }
    }

    /// First value for a header key, if present.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)?.first().map(String::as_str)
    }

    /// All values for a header key.
    pub fn header_all(&self, key: &str) -> &[String] {
        self.headers.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The `author` header, verbatim (name, email, timestamp).
    pub fn author(&self) -> Option<&str> {
        self.header("author")
    }

    /// The `committer` header, verbatim.
    pub fn committer(&self) -> Option<&str> {
        self.header("committer")
    }

    /// Parent ids as listed in the `parent` headers.
    pub fn parents(&self) -> &[String] {
        self.header_all("parent")
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"tree aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
parent bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n\
parent cccccccccccccccccccccccccccccccccccccccc\n\
author Alice <alice@example.com> 1700000000 +0000\n\
committer Bob <bob@example.com> 1700000001 +0000\n\
\n\
Merge branch 'feature'\n\
\n\
Details here.\n";

    #[test]
    fn parses_headers_and_message() {
        let record = CommitRecord::parse(RAW);
        assert_eq!(
            record.header("tree"),
            Some("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
        );
        assert_eq!(record.parents().len(), 2);
        assert_eq!(
            record.author(),
            Some("Alice <alice@example.com> 1700000000 +0000")
        );
        assert_eq!(record.summary(), "Merge branch 'feature'");
        assert_eq!(record.message, "Merge branch 'feature'\n\nDetails here.\n");
    }

    #[test]
    fn folds_continuation_lines() {
        // concat! keeps the leading space on each continuation line; a
        // `\`-continued literal would strip it.
        let raw = concat!(
            "tree aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n",
            "gpgsig -----BEGIN PGP SIGNATURE-----\n",
            " line-one\n",
            " line-two\n",
            " -----END PGP SIGNATURE-----\n",
            "author A <a@x> 1 +0000\n",
            "\n",
            "msg\n",
        );
        let record = CommitRecord::parse(raw.as_bytes());
        assert_eq!(
            record.header("gpgsig"),
            Some(
                "-----BEGIN PGP SIGNATURE-----\nline-one\nline-two\n-----END PGP SIGNATURE-----"
            )
        );
        // Continuation must not disturb surrounding headers.
        assert_eq!(record.header("author"), Some("A <a@x> 1 +0000"));
        assert_eq!(record.message, "msg\n");
    }

    #[test]
    fn handles_missing_message() {
        let record = CommitRecord::parse(b"tree aaaa\n");
        assert_eq!(record.header("tree"), Some("aaaa"));
        assert_eq!(record.message, "");
        assert_eq!(record.summary(), "");
    }

    #[test]
    fn lossy_decode_of_non_utf8_author() {
        let raw = b"author Bj\xf6rn <b@x> 1 +0000\n\nmsg\n";
        let record = CommitRecord::parse(raw);
        assert!(record.author().unwrap().starts_with("Bj"));
        assert_eq!(record.message, "msg\n");
    }

    #[test]
    fn root_commit_has_no_parents() {
        let record = CommitRecord::parse(
            b"tree aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
author A <a@x> 1 +0000\n\ncommit msg\n",
        );
        assert!(record.parents().is_empty());
    }
}
