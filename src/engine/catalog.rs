use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CatalogError;
use crate::model::profile::{ChallengeContext, PersonalityProfile, Scenario};

/// Read-only reference collections a simulator is built from.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    personalities: Vec<PersonalityProfile>,
    challenges: Vec<ChallengeContext>,
    scenarios: Vec<Scenario>,
}

/// `{id, name}` row for selection menus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Catalog {
    pub fn new(
        personalities: Vec<PersonalityProfile>,
        challenges: Vec<ChallengeContext>,
        scenarios: Vec<Scenario>,
    ) -> Self {
        Self {
            personalities,
            challenges,
            scenarios,
        }
    }

    pub fn personalities(&self) -> &[PersonalityProfile] {
        &self.personalities
    }

    pub fn challenges(&self) -> &[ChallengeContext] {
        &self.challenges
    }

    pub fn personality_options(&self) -> Vec<EntitySummary> {
        self.personalities
            .iter()
            .map(|p| EntitySummary {
                id: p.id.clone(),
                name: p.name.clone(),
                description: None,
            })
            .collect()
    }

    pub fn challenge_options(&self) -> Vec<EntitySummary> {
        self.challenges
            .iter()
            .filter(|c| !c.id.is_empty() && !c.name.is_empty())
            .map(|c| EntitySummary {
                id: c.id.clone(),
                name: c.name.clone(),
                description: None,
            })
            .collect()
    }

    pub fn scenarios_for_challenge(&self, challenge_id: &str) -> Vec<EntitySummary> {
        self.scenarios
            .iter()
            .filter(|s| s.challenge_id.as_deref() == Some(challenge_id))
            .map(|s| EntitySummary {
                id: s.id.clone(),
                name: s.name.clone(),
                description: s.description.clone(),
            })
            .collect()
    }
}

/// Anything that can produce a `Catalog`: a file export, built-in data, a backend.
pub trait CatalogSource {
    fn load(&self) -> Result<Catalog, CatalogError>;

    fn describe(&self) -> String;
}

/* =========================
   File-backed catalog
   ========================= */

/// JSON export of the content backend.
///
/// Top level holds `personalities`, `challenges` and optionally `scenarios`
/// (backend names `personality_traits`, `daily_challenges`, `scenario_instances`
/// are accepted too). Each list may be wrapped in `{"data": [...]}` and each
/// record may be flat or nested as `{"id", "attributes": {...}}`.
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CatalogSource for FileCatalog {
    fn load(&self) -> Result<Catalog, CatalogError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| CatalogError::Io {
            path: self.path.clone(),
            source,
        })?;
        let catalog = parse_catalog(&raw, &self.path)?;

        if catalog.personalities.is_empty() || catalog.challenges.is_empty() {
            return Err(CatalogError::Empty {
                path: self.path.clone(),
            });
        }

        tracing::info!(
            path = %self.path.display(),
            personalities = catalog.personalities.len(),
            challenges = catalog.challenges.len(),
            scenarios = catalog.scenarios.len(),
            "Loaded catalog"
        );
        Ok(catalog)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

pub fn parse_catalog(raw: &str, path: &Path) -> Result<Catalog, CatalogError> {
    let parse_err = |reason: String| CatalogError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let root: Value = serde_json::from_str(raw).map_err(|e| parse_err(e.to_string()))?;
    let Value::Object(root) = root else {
        return Err(parse_err("top level must be a JSON object".into()));
    };

    Ok(Catalog {
        personalities: decode_section(
            &root,
            &["personalities", "personality_traits", "personality-traits"],
        ),
        challenges: decode_section(
            &root,
            &["challenges", "daily_challenges", "daily-challenges"],
        ),
        scenarios: decode_section(
            &root,
            &["scenarios", "scenario_instances", "dialogue-scenarios"],
        ),
    })
}

/// Decode every record of the first present section; bad records are skipped.
fn decode_section<T: DeserializeOwned>(root: &Map<String, Value>, keys: &[&str]) -> Vec<T> {
    let Some((key, section)) = keys
        .iter()
        .find_map(|k| root.get(*k).map(|v| (*k, v)))
    else {
        return Vec::new();
    };

    let items = match section {
        Value::Array(items) => items,
        Value::Object(wrapper) => match wrapper.get("data") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| {
            let record = flatten_record(item);
            match serde_json::from_value::<T>(record) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    tracing::warn!(section = key, "Skipping catalog record: {}", e);
                    None
                }
            }
        })
        .collect()
}

/// Bring both record shapes to the flat one: lift `attributes` to the top and
/// turn a nested `daily_challenge` relation into `challenge_id`.
fn flatten_record(item: &Value) -> Value {
    let Value::Object(object) = item else {
        return item.clone();
    };

    let mut flat = Map::new();
    for (key, value) in object {
        if key != "attributes" {
            flat.insert(key.clone(), value.clone());
        }
    }
    if let Some(Value::Object(attributes)) = object.get("attributes") {
        for (key, value) in attributes {
            flat.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    if !flat.contains_key("challenge_id") {
        if let Some(id) = flat.get("daily_challenge").and_then(relation_id) {
            flat.insert("challenge_id".into(), id);
        }
    }
    flat.remove("daily_challenge");

    Value::Object(flat)
}

/// `{"id": 1}`, `{"data": {"id": 1}}` or a bare id.
fn relation_id(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) | Value::String(_) => Some(value.clone()),
        Value::Object(object) => match object.get("id") {
            Some(id) => Some(id.clone()),
            None => object.get("data").and_then(relation_id),
        },
        _ => None,
    }
}

/* =========================
   Built-in catalog
   ========================= */

/// Built-in data used when no content backend export is configured.
pub struct FallbackCatalog;

impl CatalogSource for FallbackCatalog {
    fn load(&self) -> Result<Catalog, CatalogError> {
        tracing::info!("Using built-in catalog");
        Ok(builtin_catalog())
    }

    fn describe(&self) -> String {
        "built-in data".into()
    }
}

fn personality(id: &str, name: &str, desc: &str, tags: &[&str], need: &str) -> PersonalityProfile {
    PersonalityProfile {
        id: id.into(),
        name: name.into(),
        description: Some(desc.into()),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        core_need: Some(need.into()),
    }
}

fn challenge(id: &str, name: &str, desc: &str) -> ChallengeContext {
    ChallengeContext {
        id: id.into(),
        name: name.into(),
        description: Some(desc.into()),
    }
}

fn scenario(id: &str, name: &str, desc: &str, challenge_id: &str) -> Scenario {
    Scenario {
        id: id.into(),
        name: name.into(),
        description: Some(desc.into()),
        challenge_id: Some(challenge_id.into()),
    }
}

pub fn builtin_catalog() -> Catalog {
    Catalog::new(
        vec![
            personality("1", "外向型", "喜欢社交，充满活力", &["热情", "健谈", "乐观"], "归属感"),
            personality("2", "内向型", "安静、深思熟虑", &["谨慎", "专注", "独立"], "自主感"),
            personality(
                "3",
                "内向敏感型",
                "安静，容易察觉他人情绪，受到批评时容易退缩",
                &["内向", "敏感"],
                "安全感",
            ),
        ],
        vec![
            challenge("1", "情绪管理", "学习控制情绪反应"),
            challenge("2", "沟通技巧", "改善与孩子的沟通方式"),
            challenge("3", "学习困难", "孩子在学习上遇到挫折，缺乏信心"),
        ],
        vec![
            scenario("1", "孩子发脾气", "孩子因为小事而情绪失控", "1"),
            scenario("2", "孩子不想上学", "孩子拒绝去学校", "3"),
        ],
    )
}
