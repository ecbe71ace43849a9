//! Table rendering for list-style commands.

use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use zi_core::desktop::AppEntry;
use zi_schema::Feed;

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().map(|h| Cell::new(h).fg(Color::DarkGrey)));
    table
}

/// Applications with their access points and last change.
pub fn apps(entries: &[&AppEntry]) -> Table {
    let mut t = table(&["name", "interface", "integration", "changed"]);
    for entry in entries {
        let points = entry
            .access_points()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        let changed = chrono::DateTime::from_timestamp(entry.timestamp, 0)
            .unwrap_or_default()
            .format("%Y-%m-%d")
            .to_string();
        t.add_row(vec![
            Cell::new(&entry.name).fg(Color::Cyan),
            Cell::new(entry.interface.as_str()),
            Cell::new(points),
            Cell::new(changed).fg(Color::DarkGrey),
        ]);
    }
    t
}

/// Catalog search results.
pub fn feeds(feeds: &[&Feed]) -> Table {
    let mut t = table(&["name", "uri", "summary"]);
    for feed in feeds {
        t.add_row(vec![
            Cell::new(&feed.name).fg(Color::Cyan),
            Cell::new(feed.uri.as_str()),
            Cell::new(feed.summary.as_deref().unwrap_or("")),
        ]);
    }
    t
}

/// One row per selected interface: interface, version, where it lives.
pub fn selections(rows: &[(String, String, String)]) -> Table {
    let mut t = table(&["interface", "version", "location"]);
    for (interface, version, location) in rows {
        t.add_row(vec![
            Cell::new(interface).fg(Color::Cyan),
            Cell::new(version),
            Cell::new(location).fg(Color::DarkGrey),
        ]);
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use zi_core::desktop::AccessPoint;
    use zi_schema::FeedUri;

    #[test]
    fn apps_table_lists_access_points() {
        let mut entry = AppEntry::new(FeedUri::parse("http://example.com/editor.xml").unwrap(), "Editor");
        entry.access_points = Some(vec![AccessPoint::AppAlias {
            name: "ed".into(),
            command: None,
        }]);
        let rendered = apps(&[&entry]).to_string();
        assert!(rendered.contains("Editor"));
        assert!(rendered.contains("http://example.com/editor.xml"));
        assert!(rendered.contains("ed"));
    }

    #[test]
    fn selections_table_has_one_row_per_interface() {
        let rows = vec![
            ("http://example.com/a.xml".to_string(), "1.0".to_string(), "/store/a".to_string()),
            ("http://example.com/b.xml".to_string(), "2.0".to_string(), "not cached".to_string()),
        ];
        let rendered = selections(&rows).to_string();
        assert!(rendered.contains("not cached"));
        assert!(rendered.contains("2.0"));
    }
}
