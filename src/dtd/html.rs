use std::sync::{Arc, LazyLock};

use url::Url;

use crate::{dtd::Dtd, error::SilentErrorHandler};

/// The bundled HTML DTD source. Identified by the URL `Html.dtd`, and by any
/// absolute `w3.org` URL whose document type name is `html`, so parsing
/// real-world documents never reaches for the network.
pub(crate) const HTML_DTD_TEXT: &str = include_str!("../../resources/html.dtd");

static HTML_DTD: LazyLock<Arc<Dtd>> = LazyLock::new(|| {
    let dtd = Dtd::parse_str("html", HTML_DTD_TEXT, &SilentErrorHandler)
        .expect("the bundled HTML DTD must parse");
    Arc::new(dtd)
});

/// The bundled HTML DTD, parsed once and shared.
pub fn html_dtd() -> Arc<Dtd> {
    HTML_DTD.clone()
}

/// Whether a system identifier should be served from the bundled copy.
pub(crate) fn is_builtin_html_uri(doc_type: &str, system_id: &str) -> bool {
    let path_matches = system_id
        .rsplit(['/', '\\'])
        .next()
        .is_some_and(|file| file.eq_ignore_ascii_case("html.dtd"));
    if path_matches {
        return true;
    }

    doc_type.eq_ignore_ascii_case("html")
        && Url::parse(system_id).is_ok_and(|url| {
            url.host_str()
                .is_some_and(|host| host == "w3.org" || host.ends_with(".w3.org"))
        })
}
