/// Declared content short-circuits the content model: an EMPTY element has no
/// structure at all, CDATA/RCDATA elements swallow raw text until their end
/// tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeclaredContent {
    #[default]
    Default,
    Empty,
    Cdata,
    Rcdata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupConnector {
    #[default]
    None,
    /// `,`
    Sequence,
    /// `|`
    Or,
    /// `&`
    And,
}

impl std::fmt::Display for GroupConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::None => Ok(()),
            Self::Sequence => write!(f, ","),
            Self::Or => write!(f, "|"),
            Self::And => write!(f, "&"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Occurrence {
    #[default]
    Required,
    /// `?`
    Optional,
    /// `+`
    OneOrMore,
    /// `*`
    ZeroOrMore,
}

impl Occurrence {
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional | Self::ZeroOrMore)
    }

    pub fn is_repeatable(&self) -> bool {
        matches!(self, Self::OneOrMore | Self::ZeroOrMore)
    }

    pub(crate) fn from_suffix(c: char) -> Option<Self> {
        match c {
            '?' => Some(Self::Optional),
            '+' => Some(Self::OneOrMore),
            '*' => Some(Self::ZeroOrMore),
            _ => None,
        }
    }
}

impl std::fmt::Display for Occurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Required => Ok(()),
            Self::Optional => write!(f, "?"),
            Self::OneOrMore => write!(f, "+"),
            Self::ZeroOrMore => write!(f, "*"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum GroupMember {
    Symbol { name: String, occurrence: Occurrence },
    Group(Group),
}

impl GroupMember {
    pub fn occurrence(&self) -> Occurrence {
        match self {
            Self::Symbol { occurrence, .. } => *occurrence,
            Self::Group(group) => group.occurrence,
        }
    }

    /// Whether an element named `name` (uppercase) can start inside this
    /// member.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Symbol { name: symbol, .. } => symbol == name,
            Self::Group(group) => group.can_contain(name),
        }
    }
}

/// One parenthesized model group.
///
/// The connector is uniform across a group; the DTD parser reports mixed
/// connectors and keeps the first one it saw.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub members: Vec<GroupMember>,
    pub connector: GroupConnector,
    pub occurrence: Occurrence,
    /// Set by the presence of `#PCDATA`.
    pub mixed: bool,
}

impl Group {
    /// Membership query: can an element named `name` (uppercase) appear
    /// somewhere inside this group? Ordering constraints are the document
    /// parser's concern; this answers the looser containment question.
    pub fn can_contain(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.matches(name))
    }

    pub fn can_contain_text(&self) -> bool {
        self.mixed
            || self.members.iter().any(|m| match m {
                GroupMember::Group(group) => group.can_contain_text(),
                GroupMember::Symbol { .. } => false,
            })
    }

    fn display_to(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        let mut first = true;
        if self.mixed {
            write!(f, "#PCDATA")?;
            first = false;
        }
        for member in &self.members {
            if !first {
                write!(f, "{}", self.connector)?;
            }
            first = false;
            match member {
                GroupMember::Symbol { name, occurrence } => write!(f, "{name}{occurrence}")?,
                GroupMember::Group(group) => group.display_to(f)?,
            }
        }
        write!(f, "){}", self.occurrence)
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display_to(f)
    }
}

/// The structural rule for an element's permitted children.
#[derive(Debug, Clone, Default)]
pub struct ContentModel {
    pub declared: DeclaredContent,
    /// Set by the `ANY` keyword.
    pub any: bool,
    pub group: Group,
}

impl ContentModel {
    pub fn empty() -> Self {
        Self {
            declared: DeclaredContent::Empty,
            ..Default::default()
        }
    }

    pub fn any() -> Self {
        Self {
            any: true,
            ..Default::default()
        }
    }

    /// Whether an element named `name` (uppercase) may appear as a child.
    pub fn can_contain(&self, name: &str) -> bool {
        match self.declared {
            DeclaredContent::Default => self.any || self.group.can_contain(name),
            // EMPTY, CDATA, and RCDATA elements have no nested structure.
            _ => false,
        }
    }

    /// Whether character data may appear as a child.
    pub fn can_contain_text(&self) -> bool {
        match self.declared {
            DeclaredContent::Default => self.any || self.group.can_contain_text(),
            DeclaredContent::Cdata | DeclaredContent::Rcdata => true,
            DeclaredContent::Empty => false,
        }
    }
}

impl std::fmt::Display for ContentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.declared {
            DeclaredContent::Empty => write!(f, "EMPTY"),
            DeclaredContent::Cdata => write!(f, "CDATA"),
            DeclaredContent::Rcdata => write!(f, "RCDATA"),
            DeclaredContent::Default if self.any => write!(f, "ANY"),
            DeclaredContent::Default => write!(f, "{}", self.group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: &str) -> GroupMember {
        GroupMember::Symbol {
            name: name.to_owned(),
            occurrence: Occurrence::Required,
        }
    }

    #[test]
    fn membership_descends_into_nested_groups() {
        let inner = Group {
            members: vec![symbol("EM"), symbol("STRONG")],
            connector: GroupConnector::Or,
            ..Default::default()
        };
        let outer = Group {
            members: vec![symbol("P"), GroupMember::Group(inner)],
            connector: GroupConnector::Sequence,
            ..Default::default()
        };
        assert!(outer.can_contain("STRONG"));
        assert!(outer.can_contain("P"));
        assert!(!outer.can_contain("DIV"));
    }

    #[test]
    fn declared_content_suppresses_children() {
        let model = ContentModel {
            declared: DeclaredContent::Cdata,
            ..Default::default()
        };
        assert!(!model.can_contain("P"));
        assert!(model.can_contain_text());
        assert!(!ContentModel::empty().can_contain_text());
    }

    #[test]
    fn display_round_trips_shape() {
        let group = Group {
            members: vec![symbol("HEAD"), symbol("BODY")],
            connector: GroupConnector::Sequence,
            ..Default::default()
        };
        let model = ContentModel {
            group,
            ..Default::default()
        };
        assert_eq!(model.to_string(), "(HEAD,BODY)");
    }
}
