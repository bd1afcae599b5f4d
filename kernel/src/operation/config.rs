// Settings & Templated Configuration
//
// Settings are loaded from JSON. Values that depend on the operation
// being processed (upload folder, subfolder depth) are templates,
// expanded by a TemplateResolver at the time a handler needs them.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::RecordOperation;

/// Rejects names a web server could execute.
pub const DEFAULT_DENY_PATTERN: &str =
    r"\.(php[3-8]?|phpsh|phtml|pht|phar|shtml|cgi)(\..*)?$|\.pl$|^\.htaccess$";

/// Hashed subfolders are one hex character of an MD5 digest each.
pub const MAX_HASHED_SUBFOLDERS: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Storage name -> root directory.
    pub storages: BTreeMap<String, PathBuf>,

    /// Storage used for identifiers without a `name:` prefix.
    pub default_storage: String,

    /// Directory holding the mapping and record state files.
    pub state_dir: PathBuf,

    pub persistence: PersistenceSettings,

    pub http: HttpSettings,

    pub file_name_deny_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Template of the combined identifier uploads are stored under.
    pub file_upload_folder_path: String,

    /// Template of the hashed subfolder depth.
    pub hashed_subfolders: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Settings {
    /// Built-in settings (used if no config is provided).
    pub fn default_settings() -> Self {
        let mut storages = BTreeMap::new();
        storages.insert("local".to_string(), PathBuf::from("fileadmin"));

        Self {
            storages,
            default_storage: "local".into(),
            state_dir: PathBuf::from(".interest"),
            persistence: PersistenceSettings::default(),
            http: HttpSettings::default(),
            file_name_deny_pattern: DEFAULT_DENY_PATTERN.into(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            file_upload_folder_path: "local:/interest/".into(),
            hashed_subfolders: "0".into(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("interest/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// Expands configuration templates in the context of an operation.
pub trait TemplateResolver: Send + Sync {
    fn resolve(&self, template: &str, operation: &RecordOperation) -> String;
}

/// Resolver for `{placeholder}` templates.
///
/// Supported placeholders:
/// - `{table}`, `{remote_id}`
/// - `{field:NAME}`: string or number value of a data field
/// - `{env:NAME}`: environment variable
///
/// Unknown or unset placeholders expand to the empty string. A `{`
/// without a closing `}` is kept literally.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderResolver;

impl PlaceholderResolver {
    fn lookup(&self, placeholder: &str, operation: &RecordOperation) -> String {
        match placeholder.split_once(':') {
            None if placeholder == "table" => operation.table().to_string(),
            None if placeholder == "remote_id" => operation.remote_id().to_string(),
            Some(("field", name)) => match operation.data().get(name) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => String::new(),
            },
            Some(("env", name)) => std::env::var(name).unwrap_or_default(),
            _ => String::new(),
        }
    }
}

impl TemplateResolver for PlaceholderResolver {
    fn resolve(&self, template: &str, operation: &RecordOperation) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    out.push_str(&self.lookup(&after[..end], operation));
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        out.push_str(rest);
        out
    }
}

/// Parse a resolved subfolder depth.
///
/// Reads leading decimal digits and ignores the rest, so `"2 levels"`
/// is 2 and anything non-numeric or negative is 0.
pub fn parse_depth(value: &str) -> usize {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    digits
        .parse::<usize>()
        .map(|depth| depth.min(MAX_HASHED_SUBFOLDERS))
        .unwrap_or(0)
}
