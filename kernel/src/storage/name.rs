// File Name Rules
//
// Validation rejects names that could escape their folder or be
// executed by a web server. Sanitization maps a name onto what the
// storage will actually write.

use regex::Regex;

const RESERVED: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];
const MAX_NAME_BYTES: usize = 255;

#[derive(Debug, Clone)]
pub struct FileNameValidator {
    deny: Regex,
}

impl FileNameValidator {
    pub fn new(deny_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            deny: Regex::new(&format!("(?i){deny_pattern}"))?,
        })
    }

    /// A name must also survive sanitizing: dot-only names collapse to
    /// nothing and are rejected.
    pub fn is_valid(&self, name: &str) -> bool {
        !name.is_empty()
            && name.len() <= MAX_NAME_BYTES
            && !name.chars().any(|c| c.is_control() || RESERVED.contains(&c))
            && !self.deny.is_match(name)
            && !sanitize_file_name(name).is_empty()
    }
}

/// Replace reserved characters, control characters and whitespace runs
/// with `_`, and drop trailing dots.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_blank = false;

    for c in name.chars() {
        if c.is_whitespace() || c.is_control() || RESERVED.contains(&c) {
            if !in_blank {
                out.push('_');
            }
            in_blank = true;
        } else {
            out.push(c);
            in_blank = false;
        }
    }

    out.trim_end_matches('.').to_string()
}
