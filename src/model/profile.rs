use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Static description of a simulated child's disposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalityProfile {
    #[serde(deserialize_with = "de_entity_id")]
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Ordered characteristic tags; the first one is the "primary" trait.
    #[serde(
        default,
        alias = "keycharacteristic",
        alias = "key_characteristics",
        alias = "characteristics",
        deserialize_with = "de_tags"
    )]
    pub tags: Vec<String>,

    #[serde(default, alias = "core_need_description")]
    pub core_need: Option<String>,
}

/// Behavioural situation the dialogue takes place under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeContext {
    #[serde(deserialize_with = "de_entity_id")]
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,
}

/// A concrete scene belonging to one challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(deserialize_with = "de_entity_id")]
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "de_opt_entity_id")]
    pub challenge_id: Option<String>,
}

impl PersonalityProfile {
    pub fn description(&self) -> Option<&str> {
        non_blank(self.description.as_deref())
    }

    pub fn core_need(&self) -> Option<&str> {
        non_blank(self.core_need.as_deref())
    }

    pub fn primary_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty())
    }
}

impl ChallengeContext {
    pub fn description(&self) -> Option<&str> {
        non_blank(self.description.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// How the caller picks an entity out of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(String),
    Name(String),
}

impl Selector {
    /// `id:<x>` and `name:<x>` are explicit; anything else is treated as a name.
    pub fn parse(raw: &str) -> Self {
        if let Some(id) = raw.strip_prefix("id:") {
            Selector::Id(id.trim().to_string())
        } else if let Some(name) = raw.strip_prefix("name:") {
            Selector::Name(name.to_string())
        } else {
            Selector::Name(raw.to_string())
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Id(id) => write!(f, "id {id}"),
            Selector::Name(name) => write!(f, "'{name}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Personality,
    Challenge,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Personality => f.write_str("personality"),
            EntityKind::Challenge => f.write_str("challenge"),
        }
    }
}

/// Identifiers arrive either as JSON numbers (content backend) or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(serde_json::Number),
    Text(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

fn de_entity_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn de_opt_entity_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

/// Tags come as a JSON array, a delimited string, or null.
fn de_tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTags {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Option::<RawTags>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(RawTags::List(tags)) => tags,
        Some(RawTags::Joined(joined)) => joined
            .split(['、', ',', '，'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
    })
}
