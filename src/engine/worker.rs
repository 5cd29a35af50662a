use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::engine::llm_client::GenerativeService;
use crate::engine::protocol::{EngineCommand, EngineResponse};
use crate::engine::simulator::DialogueSimulator;

/// Background loop that serves simulation commands off the caller's thread.
pub struct Engine<S> {
    rx: Receiver<EngineCommand>,
    tx: Sender<EngineResponse>,
    simulator: Arc<DialogueSimulator<S>>,
}

/// Handles held by the front end.
pub struct EngineHandle {
    pub commands: Sender<EngineCommand>,
    pub responses: Receiver<EngineResponse>,
    pub thread: JoinHandle<()>,
}

impl<S: GenerativeService + 'static> Engine<S> {
    pub fn new(
        rx: Receiver<EngineCommand>,
        tx: Sender<EngineResponse>,
        simulator: Arc<DialogueSimulator<S>>,
    ) -> Self {
        Self { rx, tx, simulator }
    }

    pub fn spawn(simulator: Arc<DialogueSimulator<S>>) -> EngineHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();

        let thread = std::thread::spawn(move || {
            let engine = Engine::new(cmd_rx, resp_tx, simulator);
            engine.run();
        });

        EngineHandle {
            commands: cmd_tx,
            responses: resp_rx,
            thread,
        }
    }

    pub fn run(&self) {
        while let Ok(cmd) = self.rx.recv() {
            match cmd {
                EngineCommand::Simulate {
                    parent_utterance,
                    personality,
                    challenge,
                } => {
                    let response = match self.simulator.simulate_dialogue(
                        &parent_utterance,
                        &personality,
                        &challenge,
                    ) {
                        Ok(result) => EngineResponse::Simulated(result),
                        Err(e) => EngineResponse::Failed {
                            status: e.http_status(),
                            message: e.to_string(),
                        },
                    };

                    if self.tx.send(response).is_err() {
                        break;
                    }
                }

                EngineCommand::Shutdown => break,
            }
        }
        tracing::debug!("Engine loop stopped");
    }
}
