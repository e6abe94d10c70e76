//! Identifiers for offline asset branches

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
    #[error("value cannot end with '{0}'")]
    InvalidEnd(char),
    #[error("value cannot contain '..'")]
    DoubleDot,
    #[error("value cannot end with '.lock'")]
    LockSuffix,
    #[error("missing separator '/' in branch name")]
    MissingSeparator,
    #[error("invalid locale: {0}")]
    InvalidLocale(#[source] Box<ParseError>),
    #[error("invalid resource type: {0}")]
    InvalidResourceType(#[source] Box<ParseError>),
}

/// Validate one component of a branch name.
///
/// Rules:
/// - Non-empty
/// - ASCII alphanumerics, `-`, `_` and `.` only (no `/`, so components never
///   bleed into each other once joined)
/// - Cannot start with `-` or `.`
/// - Cannot end with `.`, cannot end with `.lock`, cannot contain `..`
fn validate_component(s: &str) -> Result<(), ParseError> {
    if s.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(c @ ('-' | '.')) = s.chars().next() {
        return Err(ParseError::InvalidStart(c));
    }

    if s.ends_with('.') {
        return Err(ParseError::InvalidEnd('.'));
    }

    if s.contains("..") {
        return Err(ParseError::DoubleDot);
    }

    if s.ends_with(".lock") {
        return Err(ParseError::LockSuffix);
    }

    for c in s.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(ParseError::InvalidCharacter(c));
        }
    }

    Ok(())
}

/// A localized resource namespace such as `jp` or `en-US`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    /// Locales the asset server publishes.
    pub const KNOWN: [&'static str; 5] = ["jp", "en", "tw", "cn", "kr"];

    pub fn jp() -> Self {
        Locale("jp".into())
    }

    /// Returns the locale tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is one of the locales the asset server publishes.
    pub fn is_known(&self) -> bool {
        Self::KNOWN.contains(&self.0.as_str())
    }
}

impl FromStr for Locale {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_component(s)?;
        Ok(Locale(s.to_string()))
    }
}

impl TryFrom<String> for Locale {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_component(&value)?;
        Ok(Locale(value))
    }
}

impl From<Locale> for String {
    fn from(value: Locale) -> Self {
        value.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A category of downloadable resource such as `basic` or `movie`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceType(String);

impl ResourceType {
    /// Resource types the bundle generator publishes per locale.
    pub const KNOWN: [&'static str; 5] = ["main", "basic", "movie", "sound", "unsupported"];

    pub fn main() -> Self {
        ResourceType("main".into())
    }

    pub fn basic() -> Self {
        ResourceType("basic".into())
    }

    pub fn movie() -> Self {
        ResourceType("movie".into())
    }

    pub fn sound() -> Self {
        ResourceType("sound".into())
    }

    pub fn unsupported() -> Self {
        ResourceType("unsupported".into())
    }

    /// Returns the resource type as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the bundle generator publishes this type.
    pub fn is_known(&self) -> bool {
        Self::KNOWN.contains(&self.0.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_component(s)?;
        Ok(ResourceType(s.to_string()))
    }
}

impl TryFrom<String> for ResourceType {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_component(&value)?;
        Ok(ResourceType(value))
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The branch holding one (locale, resource type) bundle: `<locale>/<type>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchName {
    pub locale: Locale,
    pub resource_type: ResourceType,
}

impl BranchName {
    /// Creates a new BranchName from locale and resource type
    pub fn new(locale: Locale, resource_type: ResourceType) -> Self {
        Self {
            locale,
            resource_type,
        }
    }

    /// Full ref of the branch on the remote.
    pub fn remote_head(&self) -> String {
        format!("refs/heads/{}", self)
    }

    /// Remote-tracking ref the branch is fetched into.
    pub fn tracking_ref(&self) -> String {
        format!("refs/remotes/origin/{}", self)
    }

    /// Local branch ref checked out in the working copy.
    pub fn local_ref(&self) -> String {
        self.remote_head()
    }
}

impl FromStr for BranchName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (locale_str, type_str) = s.split_once('/').ok_or(ParseError::MissingSeparator)?;

        let locale = locale_str
            .parse::<Locale>()
            .map_err(|e| ParseError::InvalidLocale(Box::new(e)))?;
        let resource_type = type_str
            .parse::<ResourceType>()
            .map_err(|e| ParseError::InvalidResourceType(Box::new(e)))?;

        Ok(BranchName::new(locale, resource_type))
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.locale, self.resource_type)
    }
}

/// Fetch refspec mapping a remote branch to its remote-tracking ref.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Refspec(String);

impl Refspec {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Refspec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical branch for a (locale, resource type) pair.
pub fn branch_name_for(locale: &Locale, resource_type: &ResourceType) -> BranchName {
    BranchName::new(locale.clone(), resource_type.clone())
}

/// Forced fetch refspec for a branch.
pub fn refspec_for(branch: &BranchName) -> Refspec {
    Refspec(format!("+{}:{}", branch.remote_head(), branch.tracking_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locale(s: &str) -> Locale {
        s.parse().unwrap()
    }

    fn kind(s: &str) -> ResourceType {
        s.parse().unwrap()
    }

    mod component_tests {
        use super::*;

        #[test]
        fn valid_locales() {
            for s in ["jp", "en-US", "zh_Hant", "ja-JP"] {
                assert_eq!(locale(s).as_str(), s);
            }
        }

        #[test]
        fn rejects_empty() {
            assert_eq!("".parse::<Locale>(), Err(ParseError::Empty));
            assert_eq!("".parse::<ResourceType>(), Err(ParseError::Empty));
        }

        #[test]
        fn rejects_slash() {
            assert_eq!(
                "en/US".parse::<Locale>(),
                Err(ParseError::InvalidCharacter('/'))
            );
            assert_eq!(
                "a/b".parse::<ResourceType>(),
                Err(ParseError::InvalidCharacter('/'))
            );
        }

        #[test]
        fn rejects_leading_dash_or_dot() {
            assert_eq!("-jp".parse::<Locale>(), Err(ParseError::InvalidStart('-')));
            assert_eq!(".jp".parse::<Locale>(), Err(ParseError::InvalidStart('.')));
        }

        #[test]
        fn rejects_ref_unsafe_forms() {
            assert_eq!("a..b".parse::<Locale>(), Err(ParseError::DoubleDot));
            assert_eq!("basic.".parse::<ResourceType>(), Err(ParseError::InvalidEnd('.')));
            assert_eq!(
                "basic.lock".parse::<ResourceType>(),
                Err(ParseError::LockSuffix)
            );
            assert_eq!(
                "ba sic".parse::<ResourceType>(),
                Err(ParseError::InvalidCharacter(' '))
            );
        }

        #[test]
        fn known_values() {
            assert!(Locale::jp().is_known());
            assert!(!locale("en-US").is_known());
            for s in ResourceType::KNOWN {
                assert!(kind(s).is_known());
            }
            assert!(!kind("characters").is_known());
        }

        #[test]
        fn serde_rejects_invalid() {
            let parsed: Result<Locale, _> = serde_json::from_str("\"a/b\"");
            assert!(parsed.is_err());
            let parsed: ResourceType = serde_json::from_str("\"movie\"").unwrap();
            assert_eq!(parsed, ResourceType::movie());
        }
    }

    mod branch_tests {
        use super::*;

        #[test]
        fn branch_name_joins_components() {
            let branch = branch_name_for(&Locale::jp(), &ResourceType::basic());
            assert_eq!(branch.to_string(), "jp/basic");
        }

        #[test]
        fn branch_name_roundtrips_through_parse() {
            let branch: BranchName = "cn/sound".parse().unwrap();
            assert_eq!(branch.locale, locale("cn"));
            assert_eq!(branch.resource_type, ResourceType::sound());
        }

        #[test]
        fn branch_parse_errors() {
            assert_eq!(
                "jp".parse::<BranchName>(),
                Err(ParseError::MissingSeparator)
            );
            assert!(matches!(
                "/basic".parse::<BranchName>(),
                Err(ParseError::InvalidLocale(_))
            ));
            assert!(matches!(
                "jp/basic/extra".parse::<BranchName>(),
                Err(ParseError::InvalidResourceType(_))
            ));
        }

        #[test]
        fn distinct_pairs_never_collide() {
            let locales = ["jp", "en", "en-US", "ja-JP", "a", "a-b", "a_b", "ab"];
            let kinds = ["basic", "characters", "b", "a-b", "a_b", "ab", "movie"];
            let mut seen = std::collections::HashMap::new();
            for l in locales {
                for k in kinds {
                    let name = branch_name_for(&locale(l), &kind(k)).to_string();
                    if let Some(previous) = seen.insert(name.clone(), (l, k)) {
                        panic!("{:?} and {:?} both map to {}", previous, (l, k), name);
                    }
                }
            }
            assert_eq!(seen.len(), locales.len() * kinds.len());
        }

        #[test]
        fn distinct_locales_same_type_differ() {
            let us = branch_name_for(&locale("en-US"), &kind("characters"));
            let jp = branch_name_for(&locale("ja-JP"), &kind("characters"));
            assert_ne!(us, jp);
            assert_ne!(us.to_string(), jp.to_string());
            assert_ne!(refspec_for(&us), refspec_for(&jp));
        }
    }

    mod refspec_tests {
        use super::*;

        #[test]
        fn refspec_maps_head_to_tracking_ref() {
            let branch = branch_name_for(&Locale::jp(), &ResourceType::movie());
            assert_eq!(
                refspec_for(&branch).as_str(),
                "+refs/heads/jp/movie:refs/remotes/origin/jp/movie"
            );
        }

        #[test]
        fn refspec_is_deterministic() {
            let branch = branch_name_for(&locale("kr"), &ResourceType::unsupported());
            let first = refspec_for(&branch);
            for _ in 0..10 {
                assert_eq!(refspec_for(&branch), first);
            }
        }

        #[test]
        fn refspec_is_valid_for_git() {
            let branch = branch_name_for(&locale("en-US"), &kind("characters"));
            assert!(git2::Reference::is_valid_name(&branch.remote_head()));
            assert!(git2::Reference::is_valid_name(&branch.tracking_ref()));
        }
    }
}
