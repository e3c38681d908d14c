#![allow(dead_code)]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::json;

/// Writes a rendered three-row table snapshot (500 px rows) into `dir`.
pub fn write_snapshot(dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let rows: Vec<_> = (0..3)
        .map(|index| {
            json!({
                "tag": "tr",
                "height_px": 500.0,
                "markup": format!("<tr><td>row {index}</td></tr>"),
                "children": [{ "tag": "td", "width_px": 180.0 }],
            })
        })
        .collect();
    let snapshot = json!({
        "tag": "table",
        "class": "bill",
        "children": [{ "tag": "tbody", "children": rows }],
    });
    let path = dir.join("bill.json");
    fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
    Ok(path)
}

pub fn cli(workspace: &Path) -> Result<Command, Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("pagepress-cli")?;
    cmd.current_dir(workspace)
        .env_remove("RUST_LOG")
        .arg("--workspace")
        .arg(workspace);
    Ok(cmd)
}
