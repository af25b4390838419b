// Library root for the pickem binary: CLI, NHL web client, offline replay.

pub mod cli;
pub mod nhl;
pub mod offline;
