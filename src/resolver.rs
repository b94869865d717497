use std::{fs::File, io::Read, path::Path};

use url::Url;

use crate::error::SgmlError;

/// An opened external resource plus the metadata the parser needs to decode
/// and re-resolve against it.
pub struct Resource {
    pub stream: Box<dyn Read>,
    /// Declared encoding, when the transport knows one (HTTP charset, …).
    pub encoding: Option<String>,
    /// MIME type, when the transport knows one.
    pub mime_type: Option<String>,
    /// The URI after any server-side redirection; becomes the new base URI.
    pub redirect: Option<Url>,
}

impl Resource {
    pub fn from_reader(stream: impl Read + 'static) -> Self {
        Self {
            stream: Box::new(stream),
            encoding: None,
            mime_type: None,
            redirect: None,
        }
    }
}

/// The only I/O boundary of the parser: maps a URI to an opened resource.
///
/// Implementations may refuse schemes they do not serve. Failure to locate a
/// resource must surface as [`SgmlError::ResourceNotFound`], which is distinct
/// from successfully opening an empty resource.
pub trait EntityResolver {
    fn get_content(&self, uri: &Url) -> Result<Resource, SgmlError>;
}

/// Serves `file:` URIs from the local filesystem and refuses everything else.
pub struct DefaultResolver;

impl EntityResolver for DefaultResolver {
    fn get_content(&self, uri: &Url) -> Result<Resource, SgmlError> {
        if uri.scheme() != "file" {
            return Err(SgmlError::UnsupportedScheme);
        }
        let path = uri
            .to_file_path()
            .map_err(|_| SgmlError::ResourceNotFound)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SgmlError::ResourceNotFound);
            }
            Err(err) => return Err(err.into()),
        };
        let mime_type = match path.extension().and_then(|ext| ext.to_str()) {
            Some("html") | Some("htm") => Some("text/html".to_owned()),
            Some("xml") => Some("text/xml".to_owned()),
            _ => None,
        };
        Ok(Resource {
            stream: Box::new(file),
            encoding: None,
            mime_type,
            redirect: None,
        })
    }
}

/// Resolve `reference` against `base`, falling back to interpreting a bare
/// reference as a path relative to the current directory.
pub fn resolve_uri(base: Option<&Url>, reference: &str) -> Result<Url, SgmlError> {
    match Url::parse(reference) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            if let Some(base) = base {
                Ok(base.join(reference)?)
            } else {
                let cwd = std::env::current_dir()?;
                Url::from_file_path(cwd.join(Path::new(reference)))
                    .map_err(|_| SgmlError::BaseUriRequired)
            }
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolver_refuses_http() {
        let uri = Url::parse("http://example.com/doc.html").unwrap();
        assert!(matches!(
            DefaultResolver.get_content(&uri),
            Err(SgmlError::UnsupportedScheme)
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let uri = Url::from_file_path("/definitely/not/here.sgml").unwrap();
        assert!(matches!(
            DefaultResolver.get_content(&uri),
            Err(SgmlError::ResourceNotFound)
        ));
    }
}
