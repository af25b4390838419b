// Offline replay: serve box scores saved as `<game_ref>.json` files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use pickem_core::normalize::RawBoxScore;
use pickem_core::source::StaticSource;

/// Load every `<game_ref>.json` in `dir` into a [`StaticSource`].
///
/// Files whose stem is not a number are ignored. A file that does not parse
/// as a box score is an error, so a bad capture never settles silently as
/// "not found".
pub fn load_dir(dir: &Path) -> Result<StaticSource> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read offline directory {}", dir.display()))?;

    let source = StaticSource::new();
    let mut loaded = 0usize;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", dir.display()))?
            .path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(game_ref) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<i64>().ok())
        else {
            warn!(path = %path.display(), "skipping file without a numeric game id");
            continue;
        };

        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        let box_score = RawBoxScore::from_json(value)
            .with_context(|| format!("{} is not a recognised box score", path.display()))?;

        debug!(game_ref, path = %path.display(), "loaded offline box score");
        source.insert_box_score(game_ref, box_score);
        loaded += 1;
    }

    info!(dir = %dir.display(), loaded, "offline source ready");
    Ok(source)
}
