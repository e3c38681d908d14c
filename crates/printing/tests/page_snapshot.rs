use std::fs;
use std::path::{Path, PathBuf};

use pagepress_printing::{
    measure, GreedyPaginator, Margin, Orientation, PageConfig, Paginator, PaperSize, RenderedElement,
    RowRecord,
};
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct PageSnapshot {
    rows: Vec<usize>,
    logo: bool,
    page_break: bool,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct LayoutSnapshot {
    total_pages: u32,
    total_rows: usize,
    usable_height_px: u32,
    pages: Vec<PageSnapshot>,
}

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn snapshot_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
        .join(name)
}

fn load_rendered(name: &str) -> RenderedElement {
    let raw = fs::read_to_string(fixture_path(name)).expect("read fixture");
    serde_json::from_str(&raw).expect("parse rendered element")
}

fn layout_snapshot(root: &RenderedElement, config: &PageConfig) -> LayoutSnapshot {
    let template = measure(root)
        .expect("delivery note is a table")
        .with_logo(RowRecord::new("<tr><td colspan=\"4\">ACME</td></tr>", 60));
    let result = GreedyPaginator.paginate(&template, config);
    LayoutSnapshot {
        total_pages: result.summary.total_pages,
        total_rows: result.summary.total_rows,
        usable_height_px: result.summary.usable_height_px as u32,
        pages: result
            .pages
            .iter()
            .map(|page| PageSnapshot {
                rows: page.row_indices().collect(),
                logo: page.has_logo(),
                page_break: page.ends_with_break(),
            })
            .collect(),
    }
}

#[test]
fn delivery_note_layout_matches_snapshot() {
    let root = load_rendered("delivery_note.json");
    let config = PageConfig {
        orientation: Orientation::Portrait,
        paper: PaperSize::A5,
        margins: Margin::uniform(10.0),
        ..PageConfig::default()
    };
    let actual = layout_snapshot(&root, &config);

    let path = snapshot_path("delivery_note_a5.ron");
    if !path.exists() {
        let pretty = PrettyConfig::new().depth_limit(4);
        let serialized = ron::ser::to_string_pretty(&actual, pretty).expect("serialize snapshot");
        fs::create_dir_all(path.parent().expect("snapshot dir")).expect("create snapshot dir");
        fs::write(&path, serialized).expect("write snapshot");
        panic!(
            "Snapshot created at {}. Re-run the test to compare against the stored layout.",
            path.display()
        );
    }

    let expected: LayoutSnapshot =
        ron::from_str(&fs::read_to_string(&path).expect("read snapshot")).expect("parse snapshot");
    assert_eq!(actual, expected, "layout snapshot mismatch");
}
