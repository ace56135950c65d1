//! HTML page handlers: serves the dashboard UI.
//!
//! The page is composed from a shared base layout plus the map template,
//! embedded at compile time via `include_str!`. Map data comes from the JSON
//! endpoints, polled by the page itself.

use axum::response::Html;

const BASE_CSS: &str = r#"* { margin: 0; padding: 0; box-sizing: border-box; }
html, body { height: 100%; }
body { font-family: 'Courier New', monospace; background: #0a0a0a; color: #e0e0e0; display: flex; flex-direction: column; }
nav { background: #111; border-bottom: 1px solid #333; padding: 8px 16px; display: flex; align-items: center; gap: 24px; }
nav .brand { color: #00ff88; font-weight: bold; font-size: 14px; text-decoration: none; }
nav a { color: #888; text-decoration: none; font-size: 13px; }
nav a:hover { color: #00ff88; }
nav .status { margin-left: auto; font-size: 12px; color: #888; }"#;

const NAV_HTML: &str = r#"<nav>
    <a href="/" class="brand">cam-tracker</a>
    <a href="/data">Data</a>
    <a href="/api/map/geojson">GeoJSON</a>
    <a href="/api/stats">Stats</a>
    <span class="status" id="status">waiting for data</span>
</nav>"#;

fn render_page(title: &str, body: &str) -> Html<String> {
    let mut s = String::with_capacity(body.len() + BASE_CSS.len() + NAV_HTML.len() + 512);
    s.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    s.push_str("<meta charset=\"UTF-8\">\n");
    s.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n");
    s.push_str("<title>cam-tracker");
    if !title.is_empty() {
        s.push_str(" | ");
        s.push_str(title);
    }
    s.push_str("</title>\n");
    s.push_str("<link rel=\"stylesheet\" href=\"https://unpkg.com/leaflet@1.9.4/dist/leaflet.css\" />\n");
    s.push_str("<style>\n");
    s.push_str(BASE_CSS);
    s.push_str("\n</style>\n");
    s.push_str("</head>\n<body>\n");
    s.push_str(NAV_HTML);
    s.push('\n');
    s.push_str(body);
    s.push_str("\n</body>\n</html>");
    Html(s)
}

/// GET / and /map
pub async fn page_map() -> Html<String> {
    render_page("Map", include_str!("../../templates/map.html"))
}
