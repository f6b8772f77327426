use tracing::warn;
use url::Url;

/// rewrites every media reference in an HLS playlist so the player fetches
/// segments back through the relay instead of hitting the origin directly
pub struct PlaylistRewriter;

impl PlaylistRewriter {
    /// strictly line-by-line. a line is a reference iff, after trimming, it
    /// is non-empty and doesn't start with '#'. tags and blanks pass through
    /// untouched, ordering is preserved, and a reference that won't resolve
    /// is emitted unchanged rather than killing the whole playlist.
    pub fn rewrite(playlist: &str, base_url: &str) -> String {
        let lines: Vec<String> = playlist
            .split('\n')
            .map(|line| {
                let trimmed = line.trim();

                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return line.to_string();
                }

                match Url::parse(base_url).and_then(|base| base.join(trimmed)) {
                    Ok(absolute) => {
                        format!("/segment?url={}", urlencoding::encode(absolute.as_str()))
                    }
                    Err(e) => {
                        warn!("Failed to resolve playlist line '{}': {}", trimmed, e);
                        line.to_string()
                    }
                }
            })
            .collect();

        lines.join("\n")
    }
}
