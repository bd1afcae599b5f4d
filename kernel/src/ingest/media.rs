// Online Media Helpers
//
// Some URLs name media on a hosting provider rather than a file to
// download. A helper recognizes its provider's URLs and materializes a
// small placeholder file holding the media id, with a provider-specific
// extension.

use reqwest::Url;
use tracing::info;

use crate::storage::{Folder, ResourceStore, StorageError, StoredFile};

pub trait OnlineMediaHelper: Send + Sync {
    /// Extension of the placeholder files this helper produces.
    fn extension(&self) -> &'static str;

    /// Media id named by `url`, if this helper recognizes it.
    fn media_id(&self, url: &Url) -> Option<String>;
}

/// youtube.com/watch?v=, /embed/, /shorts/ and youtu.be links.
#[derive(Debug, Default, Clone, Copy)]
pub struct YouTubeHelper;

impl OnlineMediaHelper for YouTubeHelper {
    fn extension(&self) -> &'static str {
        "youtube"
    }

    fn media_id(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

        let id = match host {
            "youtu.be" => segments.next().map(str::to_string),
            "youtube.com" | "youtube-nocookie.com" => match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("embed" | "shorts" | "v") => segments.next().map(str::to_string),
                _ => None,
            },
            _ => None,
        }?;

        let valid = id.len() == 11
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then_some(id)
    }
}

/// vimeo.com/<id> and player.vimeo.com/video/<id> links.
#[derive(Debug, Default, Clone, Copy)]
pub struct VimeoHelper;

impl OnlineMediaHelper for VimeoHelper {
    fn extension(&self) -> &'static str {
        "vimeo"
    }

    fn media_id(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.trim_start_matches("www.");
        if host != "vimeo.com" && host != "player.vimeo.com" {
            return None;
        }

        url.path_segments()?
            .find(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
    }
}

/// Helpers tried in registration order.
#[derive(Default)]
pub struct OnlineMediaRegistry {
    helpers: Vec<Box<dyn OnlineMediaHelper>>,
}

impl OnlineMediaRegistry {
    pub fn new() -> Self {
        Self {
            helpers: Vec::new(),
        }
    }

    pub fn with_default_helpers() -> Self {
        let mut registry = Self::new();
        registry.register(YouTubeHelper);
        registry.register(VimeoHelper);
        registry
    }

    pub fn register<H: OnlineMediaHelper + 'static>(&mut self, helper: H) {
        self.helpers.push(Box::new(helper));
    }

    /// Materialize `url` as a placeholder file in `folder`.
    ///
    /// Returns `None` if no helper recognizes the URL. A placeholder for
    /// the same media already in the folder is reused.
    pub fn transform_url_to_file(
        &self,
        url: &str,
        folder: &Folder,
        resources: &ResourceStore,
    ) -> Result<Option<StoredFile>, StorageError> {
        let Ok(parsed) = Url::parse(url) else {
            return Ok(None);
        };

        for helper in &self.helpers {
            let Some(media_id) = helper.media_id(&parsed) else {
                continue;
            };

            let name = format!("{}.{}", media_id, helper.extension());
            if let Some(existing) = resources.find_file(folder, &name)? {
                return Ok(Some(existing));
            }

            let file = resources.create_file(folder, &name)?;
            resources.set_contents(&file, media_id.as_bytes())?;
            info!(url, media_id = %media_id, helper = helper.extension(), "materialized online media");
            return Ok(Some(file));
        }

        Ok(None)
    }
}
