//! Child-context URL and popup placement.

use url::Url;

use super::host::ScreenGeometry;
use crate::policy::IncludeList;

/// Fixed origin of the issuer; messages from anywhere else are ignored.
pub const ISSUER_ORIGIN: &str = "https://verify.ageproof.org";

/// Issuer verification page opened in the child context.
pub const ISSUER_PATH: &str = "/verify";

pub const POPUP_WIDTH: i32 = 480;
pub const POPUP_HEIGHT: i32 = 720;

/// `{ISSUER_ORIGIN}{ISSUER_PATH}?session=..&autostart=1[&include=a,b]`
pub fn build_child_url(session: &str, include: Option<&IncludeList>) -> String {
    let mut url = Url::parse(ISSUER_ORIGIN)
        .and_then(|origin| origin.join(ISSUER_PATH))
        .expect("issuer URL constants are valid");
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("session", session);
        query.append_pair("autostart", "1");
        if let Some(include) = include {
            query.append_pair("include", &include.to_query_value());
        }
    }
    url.into()
}

/// `window.open` feature string for a popup centered over the opener.
pub fn popup_features(screen: &ScreenGeometry) -> String {
    let left = screen.left + ((screen.width - POPUP_WIDTH) / 2).max(0);
    let top = screen.top + ((screen.height - POPUP_HEIGHT) / 2).max(0);
    format!(
        "popup=yes,width={POPUP_WIDTH},height={POPUP_HEIGHT},left={left},top={top},resizable=yes,scrollbars=yes"
    )
}
