use crate::model::evaluation::SimulationResult;
use crate::model::profile::Selector;

pub enum EngineCommand {
    Simulate {
        parent_utterance: String,
        personality: Selector,
        challenge: Selector,
    },
    Shutdown,
}

pub enum EngineResponse {
    Simulated(SimulationResult),

    Failed {
        /// HTTP-equivalent status, 4xx for caller mistakes.
        status: u16,
        message: String,
    },
}
