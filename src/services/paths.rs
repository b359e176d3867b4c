//! Destination path builder
//!
//! Layout below the subscription directory:
//!
//! ```text
//! <base>/Staffel 2/S02E06 - Die Bande.mkv
//! <base>/Staffel 2/S02E06 - Die Bande.deu.ttml
//! <base>/098 - Gefangene von Avalon [AD].eng.mka
//! <base>/trailers/Der Film.strm
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::error;

use super::language::DEFAULT_LANGUAGE;
use super::title_parser::ParsedTitle;
use crate::config::Subscription;

/// What the main file of a job is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Strm,
}

impl MediaKind {
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Video => "mkv",
            MediaKind::Audio => "mka",
            MediaKind::Strm => "strm",
        }
    }
}

/// Every path a job may write to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadPaths {
    pub directory: PathBuf,
    pub main_file: PathBuf,
    pub subtitle_file: PathBuf,
    pub nfo_file: PathBuf,
    pub main_type: MediaKind,
}

/// Root directory of a subscription, `None` when no path is configured.
pub fn subscription_base_directory(
    subscription: &Subscription,
    default_download_path: Option<&Path>,
) -> Option<PathBuf> {
    let name = sanitize_name(&subscription.name);

    match subscription
        .download
        .download_path
        .as_deref()
        .filter(|p| !p.as_os_str().is_empty())
    {
        Some(path) if subscription.download.always_create_subfolder => Some(path.join(name)),
        Some(path) => Some(path.to_path_buf()),
        None => default_download_path
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.join(name)),
    }
}

/// Main file type for a parsed item under a subscription's policy.
pub fn main_type(parsed: &ParsedTitle, subscription: &Subscription) -> MediaKind {
    let series = &subscription.series;
    let download = &subscription.download;

    if download.use_streaming_url_files
        || (series.save_extras_as_strm && series.treat_non_episodes_as_extras && !parsed.is_show)
    {
        return MediaKind::Strm;
    }

    let default_language = parsed.language == DEFAULT_LANGUAGE;
    if (default_language && !parsed.has_audio_description)
        || parsed.has_sign_language
        || download.download_full_video_for_secondary_audio
    {
        MediaKind::Video
    } else {
        MediaKind::Audio
    }
}

/// Build all destination paths; `None` if the subscription has nowhere to write.
pub fn build_paths(
    parsed: &ParsedTitle,
    subscription: &Subscription,
    default_download_path: Option<&Path>,
) -> Option<DownloadPaths> {
    let Some(mut directory) = subscription_base_directory(subscription, default_download_path)
    else {
        error!(
            subscription = %subscription.name,
            title = %parsed.title,
            "No download path configured for subscription or globally"
        );
        return None;
    };

    let series = &subscription.series;

    let season = if parsed.is_show && parsed.has_season_episode() {
        parsed.season_number
    } else if series.treat_non_episodes_as_extras {
        parsed.season()
    } else {
        None
    };
    if let Some(season) = season {
        directory.push(format!("Staffel {}", season));
    }

    if series.treat_non_episodes_as_extras && !parsed.is_show {
        directory.push(if parsed.is_trailer {
            "trailers"
        } else if parsed.is_interview {
            "interviews"
        } else {
            "extras"
        });
    }

    let main_type = main_type(parsed, subscription);
    let main_file = directory.join(file_name(parsed, main_type.extension(), false));
    let subtitle_file = directory.join(file_name(parsed, "ttml", true));
    let nfo_file = main_file.with_extension("nfo");

    Some(DownloadPaths {
        directory,
        main_file,
        subtitle_file,
        nfo_file,
        main_type,
    })
}

fn file_name(parsed: &ParsedTitle, extension: &str, is_subtitle: bool) -> String {
    let numbering = match (parsed.season_number, parsed.episode_number, parsed.absolute_episode_number) {
        (Some(season), Some(episode), _) if parsed.is_show => {
            Some(format!("S{:02}E{:02}", season, episode))
        }
        (_, _, Some(absolute)) if parsed.is_show => Some(format!("{:03}", absolute)),
        _ => None,
    };

    let mut name = match numbering {
        Some(numbering) => format!("{} - {}", numbering, parsed.title),
        None => parsed.title.clone(),
    };

    if !is_subtitle {
        if parsed.has_audio_description {
            name.push_str(" [AD]");
        }
        if parsed.has_sign_language {
            name.push_str(" [DGS]");
        }
    }

    if parsed.language != DEFAULT_LANGUAGE || is_subtitle {
        name.push('.');
        name.push_str(&parsed.language);
    }

    name.push('.');
    name.push_str(extension);

    sanitize_name(&name)
}

/// Replace characters that are invalid in file names with `_`.
pub fn sanitize_name(name: &str) -> String {
    let options = sanitize_filename::Options {
        truncate: true,
        windows: true,
        replacement: "_",
    };
    sanitize_filename::sanitize_with_options(name, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn episode(title: &str, season: u32, episode: u32) -> ParsedTitle {
        ParsedTitle {
            title: title.to_string(),
            season_number: Some(season),
            episode_number: Some(episode),
            language: "deu".to_string(),
            is_show: true,
            is_parsed: true,
            ..Default::default()
        }
    }

    fn subscription(path: &str) -> Subscription {
        let mut sub = Subscription::new("Die Heiland");
        sub.download.download_path = Some(PathBuf::from(path));
        sub
    }

    #[test]
    fn test_episode_paths() {
        let parsed = episode("Die Bande", 2, 6);
        let paths = build_paths(&parsed, &subscription("/media/heiland"), None).unwrap();

        assert_eq!(paths.directory, PathBuf::from("/media/heiland/Staffel 2"));
        assert_eq!(paths.main_file, PathBuf::from("/media/heiland/Staffel 2/S02E06 - Die Bande.mkv"));
        assert_eq!(
            paths.subtitle_file,
            PathBuf::from("/media/heiland/Staffel 2/S02E06 - Die Bande.deu.ttml")
        );
        assert_eq!(paths.nfo_file, PathBuf::from("/media/heiland/Staffel 2/S02E06 - Die Bande.nfo"));
        assert_eq!(paths.main_type, MediaKind::Video);
    }

    #[test]
    fn test_absolute_and_accessibility_naming() {
        let parsed = ParsedTitle {
            title: "Gefangene von Avalon".to_string(),
            absolute_episode_number: Some(98),
            language: "eng".to_string(),
            is_show: true,
            has_audio_description: true,
            ..Default::default()
        };
        let paths = build_paths(&parsed, &subscription("/media/x"), None).unwrap();

        assert_eq!(
            paths.main_file,
            PathBuf::from("/media/x/098 - Gefangene von Avalon [AD].eng.mka")
        );
        assert_eq!(
            paths.subtitle_file,
            PathBuf::from("/media/x/098 - Gefangene von Avalon.eng.ttml")
        );
        assert_eq!(paths.main_type, MediaKind::Audio);
    }

    #[test]
    fn test_base_directory_resolution() {
        let mut sub = Subscription::new("Tatort: Köln");
        assert_eq!(subscription_base_directory(&sub, None), None);
        assert_eq!(
            subscription_base_directory(&sub, Some(Path::new("/dl"))),
            Some(PathBuf::from("/dl/Tatort_ Köln"))
        );

        sub.download.download_path = Some(PathBuf::from("/media/tatort"));
        assert_eq!(
            subscription_base_directory(&sub, Some(Path::new("/dl"))),
            Some(PathBuf::from("/media/tatort"))
        );

        sub.download.always_create_subfolder = true;
        assert_eq!(
            subscription_base_directory(&sub, None),
            Some(PathBuf::from("/media/tatort/Tatort_ Köln"))
        );
    }

    #[test]
    fn test_no_path_is_invalid() {
        let sub = Subscription::new("Nowhere");
        assert!(build_paths(&episode("A", 1, 1), &sub, None).is_none());
    }

    #[test]
    fn test_extras_layout() {
        let mut sub = subscription("/media/film");
        sub.series.treat_non_episodes_as_extras = true;

        let trailer = ParsedTitle {
            title: "Der Film".to_string(),
            language: "deu".to_string(),
            is_trailer: true,
            ..Default::default()
        };
        let paths = build_paths(&trailer, &sub, None).unwrap();
        assert_eq!(paths.directory, PathBuf::from("/media/film/trailers"));

        let extra = ParsedTitle {
            title: "Making of".to_string(),
            language: "deu".to_string(),
            standalone_season: Some(3),
            ..Default::default()
        };
        let paths = build_paths(&extra, &sub, None).unwrap();
        assert_eq!(paths.directory, PathBuf::from("/media/film/Staffel 3/extras"));

        sub.series.save_extras_as_strm = true;
        let paths = build_paths(&extra, &sub, None).unwrap();
        assert_eq!(paths.main_type, MediaKind::Strm);
        assert_eq!(paths.main_file, PathBuf::from("/media/film/Staffel 3/extras/Making of.strm"));
    }

    #[test]
    fn test_main_type_table() {
        let mut sub = Subscription::new("x");
        let mut parsed = episode("A", 1, 1);
        assert_eq!(main_type(&parsed, &sub), MediaKind::Video);

        parsed.has_audio_description = true;
        assert_eq!(main_type(&parsed, &sub), MediaKind::Audio);

        parsed.has_sign_language = true;
        assert_eq!(main_type(&parsed, &sub), MediaKind::Video);

        parsed.has_sign_language = false;
        parsed.has_audio_description = false;
        parsed.language = "fra".to_string();
        assert_eq!(main_type(&parsed, &sub), MediaKind::Audio);

        sub.download.download_full_video_for_secondary_audio = true;
        assert_eq!(main_type(&parsed, &sub), MediaKind::Video);

        sub.download.use_streaming_url_files = true;
        assert_eq!(main_type(&parsed, &sub), MediaKind::Strm);
    }

    #[test]
    fn test_invalid_characters_are_replaced() {
        let parsed = episode("Wer? Wie/Was: \"Nichts\"", 1, 2);
        let paths = build_paths(&parsed, &subscription("/m"), None).unwrap();
        let name = paths.main_file.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, "S01E02 - Wer_ Wie_Was_ _Nichts_.mkv");
    }
}
