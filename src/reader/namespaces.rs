use crate::{
    XML_NAMESPACE, XMLNS_NAMESPACE,
    reader::{NodeType, SgmlReader},
};

impl SgmlReader {
    /// Namespace URI of the current element or attribute, resolved by
    /// scanning the open element stack for `xmlns` and `xmlns:prefix`
    /// declarations.
    ///
    /// SGML input has no real namespaces, so resolution is best-effort: a
    /// prefix with no declaration in scope receives a synthetic URI
    /// (`#unknown`, then `#unknown1`, … for further distinct prefixes),
    /// stable for the lifetime of this reader.
    pub fn namespace_uri(&mut self) -> Option<String> {
        match self.node_type() {
            NodeType::Element | NodeType::EndElement => {
                match self.name().rsplit_once(':').map(|(p, _)| p.to_owned()) {
                    Some(prefix) if prefix.eq_ignore_ascii_case("xml") => {
                        Some(XML_NAMESPACE.to_owned())
                    }
                    Some(prefix) if prefix.eq_ignore_ascii_case("xmlns") => {
                        Some(XMLNS_NAMESPACE.to_owned())
                    }
                    Some(prefix) => Some(self.resolve_prefix(&prefix)),
                    None => self.lookup_declaration("xmlns"),
                }
            }
            NodeType::Attribute => {
                let name = self.name().to_owned();
                if name.eq_ignore_ascii_case("xmlns") {
                    return Some(XMLNS_NAMESPACE.to_owned());
                }
                match name.rsplit_once(':').map(|(p, _)| p.to_owned()) {
                    Some(prefix) if prefix.eq_ignore_ascii_case("xml") => {
                        Some(XML_NAMESPACE.to_owned())
                    }
                    Some(prefix) if prefix.eq_ignore_ascii_case("xmlns") => {
                        Some(XMLNS_NAMESPACE.to_owned())
                    }
                    Some(prefix) => Some(self.resolve_prefix(&prefix)),
                    // Unprefixed attributes are in no namespace.
                    None => None,
                }
            }
            _ => None,
        }
    }

    fn resolve_prefix(&mut self, prefix: &str) -> String {
        let declaration = format!("xmlns:{prefix}");
        if let Some(uri) = self.lookup_declaration(&declaration) {
            return uri;
        }

        if let Some(uri) = self.unknown_namespaces.get(prefix) {
            return uri.clone();
        }
        let uri = if self.unknown_namespaces.is_empty() {
            "#unknown".to_owned()
        } else {
            format!("#unknown{}", self.unknown_namespaces.len())
        };
        self.unknown_namespaces.insert(prefix.to_owned(), uri.clone());
        uri
    }

    /// Find the value of an `xmlns`/`xmlns:p` declaration on the current
    /// node or the nearest ancestor.
    fn lookup_declaration(&self, declaration: &str) -> Option<String> {
        if let Some(attr) = self
            .node
            .attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(declaration))
        {
            return Some(attr.value().to_owned());
        }
        self.stack.iter().rev().find_map(|frame| {
            frame
                .attributes
                .iter()
                .find(|a| a.name.eq_ignore_ascii_case(declaration))
                .map(|a| a.value().to_owned())
        })
    }
}
