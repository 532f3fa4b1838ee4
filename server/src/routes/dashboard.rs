//! Browser dashboard

use axum::response::Html;

const DASHBOARD_HTML: &str = include_str!("../../static/dashboard.html");

/// GET / - upload or capture a leaf photo and show the diagnosis
pub async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}
