//! Index of episodes that already exist on disk
//!
//! Built once per subscription run from a directory scan and consulted for
//! every catalog item, so repeated runs recognize owned episodes without
//! probing the network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::title_parser::ParsedTitle;

/// `(season, episode, language)` and `(absolute, language)` lookups to file paths.
///
/// Languages are lower-cased on insert and lookup.
#[derive(Debug, Clone, Default)]
pub struct LocalEpisodeCache {
    season_episodes: HashMap<(u32, u32, String), PathBuf>,
    absolute_episodes: HashMap<(u32, String), PathBuf>,
}

impl LocalEpisodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file under every numbering key it carries. The first file
    /// seen for a key keeps it.
    pub fn add(
        &mut self,
        season: Option<u32>,
        episode: Option<u32>,
        absolute: Option<u32>,
        path: impl Into<PathBuf>,
        language: &str,
    ) {
        let path = path.into();
        let language = language.to_lowercase();

        if let (Some(season), Some(episode)) = (season, episode) {
            self.season_episodes
                .entry((season, episode, language.clone()))
                .or_insert_with(|| path.clone());
        }

        if let Some(absolute) = absolute {
            self.absolute_episodes
                .entry((absolute, language))
                .or_insert(path);
        }
    }

    pub fn add_parsed(&mut self, parsed: &ParsedTitle, path: impl Into<PathBuf>) {
        self.add(
            parsed.season_number,
            parsed.episode_number,
            parsed.absolute_episode_number,
            path,
            &parsed.language,
        );
    }

    /// Either key alone is enough for a hit.
    pub fn contains(
        &self,
        season: Option<u32>,
        episode: Option<u32>,
        absolute: Option<u32>,
        language: &str,
    ) -> bool {
        self.lookup(season, episode, absolute, language).is_some()
    }

    pub fn contains_title(&self, parsed: &ParsedTitle) -> bool {
        self.existing_file_path(parsed).is_some()
    }

    /// Stored path for the title's numbering, season/episode first.
    pub fn existing_file_path(&self, parsed: &ParsedTitle) -> Option<&Path> {
        self.lookup(
            parsed.season_number,
            parsed.episode_number,
            parsed.absolute_episode_number,
            &parsed.language,
        )
    }

    fn lookup(
        &self,
        season: Option<u32>,
        episode: Option<u32>,
        absolute: Option<u32>,
        language: &str,
    ) -> Option<&Path> {
        let language = language.to_lowercase();

        let by_season_episode = match (season, episode) {
            (Some(season), Some(episode)) => self
                .season_episodes
                .get(&(season, episode, language.clone())),
            _ => None,
        };

        by_season_episode
            .or_else(|| absolute.and_then(|a| self.absolute_episodes.get(&(a, language))))
            .map(PathBuf::as_path)
    }

    pub fn season_episode_count(&self) -> usize {
        self.season_episodes.len()
    }

    pub fn absolute_episode_count(&self) -> usize {
        self.absolute_episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.season_episodes.is_empty() && self.absolute_episodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::title_parser::TitleParser;

    #[test]
    fn test_language_is_part_of_the_key() {
        let mut cache = LocalEpisodeCache::new();
        cache.add(Some(1), Some(1), None, "/tv/S01E01.mkv", "deu");

        assert!(cache.contains(Some(1), Some(1), None, "deu"));
        assert!(cache.contains(Some(1), Some(1), Some(42), "deu"));
        assert!(!cache.contains(Some(1), Some(1), None, "eng"));
    }

    #[test]
    fn test_language_lookup_is_case_insensitive() {
        let mut cache = LocalEpisodeCache::new();
        cache.add(Some(2), Some(3), None, "/tv/a.mkv", "ENG");
        assert!(cache.contains(Some(2), Some(3), None, "eng"));
        assert!(cache.contains(Some(2), Some(3), None, "Eng"));
    }

    #[test]
    fn test_either_key_is_sufficient() {
        let mut cache = LocalEpisodeCache::new();
        cache.add(None, None, Some(98), "/tv/098 - Avalon.mkv", "deu");
        cache.add(Some(4), Some(2), None, "/tv/S04E02 - Titel.mkv", "deu");

        assert!(cache.contains(Some(9), Some(9), Some(98), "deu"));
        assert!(cache.contains(Some(4), Some(2), Some(1), "deu"));
        assert!(!cache.contains(Some(9), Some(9), Some(97), "deu"));
        assert!(!cache.contains(None, None, None, "deu"));
    }

    #[test]
    fn test_incomplete_pair_is_not_indexed() {
        let mut cache = LocalEpisodeCache::new();
        cache.add(Some(1), None, None, "/tv/x.mkv", "deu");
        assert!(cache.is_empty());
        assert_eq!(cache.season_episode_count(), 0);
    }

    #[test]
    fn test_existing_file_path_prefers_season_episode() {
        let mut cache = LocalEpisodeCache::new();
        cache.add(Some(1), Some(5), None, "/tv/season.mkv", "deu");
        cache.add(None, None, Some(5), "/tv/absolute.mkv", "deu");

        let parser = TitleParser::default();
        let parsed = parser.parse(None, "Titel (S01/E05)");
        assert_eq!(cache.existing_file_path(&parsed), Some(Path::new("/tv/season.mkv")));

        let parsed = parser.parse(None, "Folge 5: Titel");
        assert_eq!(cache.existing_file_path(&parsed), Some(Path::new("/tv/absolute.mkv")));
        assert!(cache.contains_title(&parsed));
    }

    #[test]
    fn test_counts() {
        let mut cache = LocalEpisodeCache::new();
        cache.add(Some(1), Some(1), Some(1), "/tv/a.mkv", "deu");
        cache.add(Some(1), Some(1), None, "/tv/b.mkv", "deu");
        assert_eq!(cache.season_episode_count(), 1);
        assert_eq!(cache.absolute_episode_count(), 1);
    }
}
