pub mod catalog;
pub mod evaluation_parser;
pub mod llm_client;
pub mod normalizer;
pub mod offline;
pub mod prompt_builder;
pub mod protocol;
pub mod resolver;
pub mod simulator;
pub mod worker;
