use crate::error::SimulationError;
use crate::model::profile::{ChallengeContext, EntityKind, PersonalityProfile, Selector};

/// Records that can be picked out by id or exact name.
pub trait Selectable {
    const KIND: EntityKind;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
}

impl Selectable for PersonalityProfile {
    const KIND: EntityKind = EntityKind::Personality;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Selectable for ChallengeContext {
    const KIND: EntityKind = EntityKind::Challenge;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// First record matching the selector exactly. No trimming, no fuzzy matching.
pub fn resolve<'a, T: Selectable>(
    items: &'a [T],
    selector: &Selector,
) -> Result<&'a T, SimulationError> {
    items
        .iter()
        .find(|item| match selector {
            Selector::Id(id) => item.id() == id,
            Selector::Name(name) => item.name() == name,
        })
        .ok_or_else(|| SimulationError::NotFound {
            kind: T::KIND,
            selector: selector.clone(),
        })
}
