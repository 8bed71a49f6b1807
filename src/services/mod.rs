pub mod asset_storage;
pub mod commit_service;
pub mod derivation_engine;
pub mod intake_service;
pub mod sweeper;
pub mod temp_store;
