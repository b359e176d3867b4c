//! NFO sidecar writer
//!
//! Writes Kodi/Jellyfin style `<episodedetails>` documents next to the main file.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::DateTime;
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Metadata for one sidecar file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfoMetadata {
    pub title: String,
    /// Only set for season/episode items
    pub show: Option<String>,
    pub plot: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Catalog item id
    pub id: String,
    pub studio: String,
    /// Unix seconds
    pub timestamp: i64,
    pub file_path: PathBuf,
}

/// Render the XML document.
pub fn render_nfo(meta: &NfoMetadata) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    writer.write_event(Event::Start(BytesStart::new("episodedetails")))?;

    write_text_element(&mut writer, "title", &meta.title)?;
    if let Some(show) = meta.show.as_deref() {
        write_text_element(&mut writer, "showtitle", show)?;
    }
    write_text_element(&mut writer, "plot", &meta.plot)?;
    if let Some(season) = meta.season {
        write_text_element(&mut writer, "season", &season.to_string())?;
    }
    if let Some(episode) = meta.episode {
        write_text_element(&mut writer, "episode", &episode.to_string())?;
    }
    if let Some(added) = DateTime::from_timestamp(meta.timestamp, 0) {
        write_text_element(
            &mut writer,
            "dateadded",
            &added.format("%Y-%m-%d %H:%M:%S").to_string(),
        )?;
    }
    write_text_element(&mut writer, "studio", &meta.studio)?;

    if !meta.id.is_empty() {
        let mut unique_id = BytesStart::new("uniqueid");
        unique_id.push_attribute(("type", "mediathekview"));
        writer.write_event(Event::Start(unique_id))?;
        writer.write_event(Event::Text(BytesText::new(&meta.id)))?;
        writer.write_event(Event::End(BytesEnd::new("uniqueid")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("episodedetails")))?;

    String::from_utf8(writer.into_inner().into_inner()).context("NFO output is not UTF-8")
}

/// Write the sidecar unless a file already exists at its path.
pub async fn write_nfo(meta: &NfoMetadata) -> Result<bool> {
    let path: &Path = &meta.file_path;
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(false);
    }

    let xml = render_nfo(meta)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, xml)
        .await
        .with_context(|| format!("Failed to write NFO file {}", path.display()))?;

    info!(path = %path.display(), "Created NFO file");
    Ok(true)
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Ok(());
    }
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> NfoMetadata {
        NfoMetadata {
            title: "Lehrer & Schüler".into(),
            show: Some("Die Heiland".into()),
            plot: "Eine Folge.".into(),
            season: Some(11),
            episode: Some(4),
            id: "abc123".into(),
            studio: "ARD".into(),
            timestamp: 1_700_000_000,
            file_path: PathBuf::from("/tmp/x.nfo"),
        }
    }

    #[test]
    fn test_render_episode() {
        let xml = render_nfo(&meta()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>"));
        assert!(xml.contains("<title>Lehrer &amp; Schüler</title>"));
        assert!(xml.contains("<showtitle>Die Heiland</showtitle>"));
        assert!(xml.contains("<season>11</season>"));
        assert!(xml.contains("<episode>4</episode>"));
        assert!(xml.contains("<dateadded>2023-11-14 22:13:20</dateadded>"));
        assert!(xml.contains("<studio>ARD</studio>"));
        assert!(xml.contains("<uniqueid type=\"mediathekview\">abc123</uniqueid>"));
    }

    #[test]
    fn test_render_omits_empty_fields() {
        let xml = render_nfo(&NfoMetadata {
            show: None,
            plot: String::new(),
            season: None,
            episode: None,
            ..meta()
        })
        .unwrap();

        assert!(!xml.contains("<showtitle>"));
        assert!(!xml.contains("<plot>"));
        assert!(!xml.contains("<season>"));
    }

    #[tokio::test]
    async fn test_write_does_not_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Staffel 1").join("S01E01 - A.nfo");
        let meta = NfoMetadata {
            file_path: path.clone(),
            ..meta()
        };

        assert!(write_nfo(&meta).await.unwrap());
        assert!(path.exists());
        assert!(!write_nfo(&meta).await.unwrap());
    }
}
