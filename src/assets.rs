//! Static assets served outside the login flow.

/// A static file ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub content_type: &'static str,
    pub body: &'static [u8],
}

/// Source of static files.
pub trait AssetSource: Send + Sync {
    /// Look up an asset by path relative to the site root. `None` means not found.
    fn serve(&self, path: &str) -> Option<Asset>;
}

/// Assets compiled into the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedAssets;

const INDEX_HTML: &str = include_str!("../assets/index.html");

impl AssetSource for EmbeddedAssets {
    fn serve(&self, path: &str) -> Option<Asset> {
        match path.trim_start_matches('/') {
            "" | "index.html" => Some(Asset {
                content_type: "text/html; charset=utf-8",
                body: INDEX_HTML.as_bytes(),
            }),
            _ => None,
        }
    }
}
